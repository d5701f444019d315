use http::StatusCode;

/// Failure of a call through the authenticated request layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server rejected our credentials, or we had none to send.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    /// The caller supplied invalid arguments.
    #[error("bad request: {message}")]
    BadRequest { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    /// Any other non-success status.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),
    /// A success response whose body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(String),
    /// The identity provider failed for a reason other than a missing session.
    #[error("identity provider error: {0}")]
    Identity(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    /// Map a non-success status and its message into the taxonomy.
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized { message },
            StatusCode::BAD_REQUEST => ApiError::BadRequest { message },
            StatusCode::NOT_FOUND => ApiError::NotFound { message },
            other => ApiError::Server {
                status: other.as_u16(),
                message,
            },
        }
    }

    /// HTTP status this error corresponds to, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::BadRequest { .. } => Some(400),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::BadRequest { message }
            | ApiError::NotFound { message }
            | ApiError::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
