use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the auto-reply service
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should back off for the specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Resource already exists (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A header required to build the reply is absent
    #[error("Message {message_id} has no {header} header")]
    MissingHeader {
        message_id: String,
        header: &'static str,
    },

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GmailError {
    /// Check if the error is transient (the next cycle may succeed)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. }
                | GmailError::ServerError { .. }
                | GmailError::NetworkError(_)
        )
    }

    /// Check if the error is permanent
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Seconds the caller should back off for, if this is a rate limit
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GmailError::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Classify an HTTP status code returned by the Gmail API
    fn from_status(status_code: u16, message: String, retry_after: u64) -> Self {
        match status_code {
            401 => GmailError::AuthError(message),
            403 => GmailError::Forbidden(message),
            404 => GmailError::MessageNotFound(message),
            409 => GmailError::Conflict(message),
            429 => GmailError::RateLimitExceeded { retry_after },
            400 => GmailError::BadRequest(message),
            500..=599 => GmailError::ServerError {
                status: status_code,
                message,
            },
            _ => GmailError::ApiError(message),
        }
    }
}

/// Default back-off when the server asks us to slow down without saying how long
const DEFAULT_RETRY_AFTER: u64 = 5;

/// Parse the Retry-After header from an HTTP response
///
/// The header is either delay-seconds (`"120"`) or an HTTP-date. Missing,
/// invalid or past values fall back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                if let Ok(duration) = http_date.duration_since(std::time::SystemTime::now()) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

/// Classify a Google JSON error body: `{"error": {"code": 409, "message": "..."}}`
fn from_error_body(body: &serde_json::Value) -> GmailError {
    let error = body.get("error").unwrap_or(body);
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    match error.get("code").and_then(|c| c.as_u64()) {
        Some(code) => match u16::try_from(code) {
            Ok(status) => GmailError::from_status(status, message, DEFAULT_RETRY_AFTER),
            Err(_) => GmailError::ApiError(format!("Unexpected error code {}: {}", code, message)),
        },
        None => GmailError::BadRequest(message),
    }
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let message = format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                );
                GmailError::from_status(status.as_u16(), message, parse_retry_after_header(response))
            }
            // The hub reports non-success responses that carry a JSON body here
            google_gmail1::Error::BadRequest(ref body) => from_error_body(body),
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            google_gmail1::Error::MissingToken(ref err) => {
                GmailError::AuthError(format!("No access token: {}", err))
            }
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}
