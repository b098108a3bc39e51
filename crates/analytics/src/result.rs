use thiserror::Error;

use pharmacy_store::StoreError;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// The demand history is shorter than the model needs.
    #[error("insufficient data for {model}: need at least {required} periods, have {available}")]
    InsufficientData {
        model: &'static str,
        required: usize,
        available: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AnalyticsError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsError::InsufficientData { .. } => "insufficient_data",
            AnalyticsError::InvalidConfig(_) => "invalid_config",
            AnalyticsError::InvalidInput(_) => "invalid_input",
            AnalyticsError::Store(err) => err.kind(),
        }
    }
}
