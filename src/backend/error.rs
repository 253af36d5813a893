use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Timed out calling {service} after {timeout_secs}s")]
    Timeout { service: String, timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Backend error: status={status}, message={message}")]
    StatusError { status: u16, message: String },

    #[error("Invalid backend response: {message}")]
    DecodeError { message: String },

    #[error("Invalid request: {message}")]
    RequestError { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::NetworkError { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::RateLimitError { .. } => true,
            GatewayError::StatusError { status, .. } => *status >= 500,
            GatewayError::DecodeError { .. } => false,
            GatewayError::RequestError { .. } => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::NetworkError { .. } | GatewayError::Timeout { .. } => {
                "Donation service is temporarily unavailable. Please try again.".to_string()
            }
            GatewayError::RateLimitError { .. } => {
                "Too many requests. Please retry shortly".to_string()
            }
            GatewayError::StatusError { .. } | GatewayError::DecodeError { .. } => {
                "An unexpected error occurred. Please try again.".to_string()
            }
            GatewayError::RequestError { message } => message.clone(),
        }
    }

    pub fn timeout(service: &str, timeout: std::time::Duration) -> Self {
        GatewayError::Timeout {
            service: service.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }
}
