//! Error types shared by the park facilities.

/// Failure of a blocking facility operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParkError {
    /// The visitor's cancellation token fired while waiting. Nothing the
    /// wait had counted is left behind.
    #[error("wait abandoned by visitor")]
    Abandoned,
    #[error("facility is closed")]
    Closed,
    /// Boarding attempted after the current heat has left the start.
    #[error("race already underway")]
    RaceUnderway,
    #[error("no free capacity")]
    Full,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ParkError {
    pub fn is_abandoned(&self) -> bool {
        matches!(self, ParkError::Abandoned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("race needs at least one raft")]
    NoRafts,
}

pub type Result<T> = std::result::Result<T, ParkError>;
