use thiserror::Error;

/// Errors surfaced by the session controller to the exam-taking flow.
#[derive(Debug, Error)]
pub enum ProctorError {
    /// The camera could not be opened. Monitoring never starts.
    #[error("camera {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("monitoring already running for user {user_id} exam {exam_id}")]
    AlreadyRunning { user_id: u64, exam_id: u64 },

    #[error("violation counter cannot be reset while monitoring is running")]
    SessionActive,

    #[error("detector warm-up failed: {0}")]
    DetectorInit(String),

    #[error("failed to spawn monitoring thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ProctorError {
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, ProctorError::DeviceUnavailable { .. })
    }
}
