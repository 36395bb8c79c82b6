use thiserror::Error;

#[derive(Error, Debug)]
pub enum KoosteError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Aggregation period of {0}s is not supported: use 5, 10, 15, 20, 30 \
         or a whole multiple of 60 up to 86400"
    )]
    InvalidPeriod(u64),

    #[error("Invalid metric tag {part:?}: {reason}")]
    InvalidTag { part: String, reason: String },

    #[error("Invalid metric name {0:?}")]
    InvalidName(String),

    #[error("Metric {0} is already owned by a different collection manager")]
    AlreadyOwned(String),

    #[error("Misuse error: {0}")]
    Misuse(String),

    #[error("Pool capacity {requested} is out of range (1..={max})")]
    PoolCapacity { requested: usize, max: usize },

    #[error("Values buffer capacity {requested} is out of range (1..={max})")]
    BufferCapacity { requested: usize, max: usize },

    #[error("Cycle driver cannot start from the {0} state")]
    DriverState(&'static str),
}

/// Result type alias for kooste operations.
pub type Result<T> = std::result::Result<T, KoosteError>;

impl KoosteError {
    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new misuse error.
    pub fn misuse<S: Into<String>>(msg: S) -> Self {
        Self::Misuse(msg.into())
    }

    /// Returns true when the caller can fix the input and retry.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidPeriod(_)
                | Self::InvalidTag { .. }
                | Self::InvalidName(_)
                | Self::PoolCapacity { .. }
                | Self::BufferCapacity { .. }
        )
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_)
            | Self::InvalidPeriod(_)
            | Self::PoolCapacity { .. }
            | Self::BufferCapacity { .. } => "config",
            Self::InvalidTag { .. } | Self::InvalidName(_) => "validation",
            Self::AlreadyOwned(_) | Self::Misuse(_) | Self::DriverState(_) => "misuse",
        }
    }
}
