use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// 401 or 403. The backend answers this way when the CSRF token is
    /// missing or has expired.
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend is rate limiting requests")]
    RateLimited,

    #[error("Backend error: {0}")]
    ServerError(String),

    #[error("Could not reach backend: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Longest response body excerpt kept in an error.
const BODY_EXCERPT_LIMIT: usize = 500;

impl ApiError {
    fn excerpt(body: &str) -> String {
        if body.len() <= BODY_EXCERPT_LIMIT {
            return body.to_string();
        }
        let mut end = BODY_EXCERPT_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = Self::excerpt(body);
        match status.as_u16() {
            code @ (401 | 403) => ApiError::Rejected { status: code, body },
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(body),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, body)),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited | ApiError::ServerError(_) | ApiError::NetworkError(_)
        )
    }
}
