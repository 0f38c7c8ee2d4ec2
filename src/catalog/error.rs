use reqwest::StatusCode;
use thiserror::Error;

/// Why a remote catalog call could not produce a usable answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("request timed out")]
  Timeout,

  #[error("server unreachable: {0}")]
  Unreachable(String),

  #[error("server rejected request ({status}){}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
  ServerRejected {
    status: StatusCode,
    message: Option<String>,
  },

  #[error("malformed response: {0}")]
  Malformed(String),
}

/// Maximum length for error response bodies kept in error messages
const MAX_ERROR_BODY_LENGTH: usize = 300;

impl FetchError {
  pub fn from_reqwest(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      FetchError::Timeout
    } else if err.is_decode() || err.is_body() {
      FetchError::Malformed(err.to_string())
    } else {
      // connect failures, DNS, TLS and request building all land here
      FetchError::Unreachable(err.to_string())
    }
  }

  pub fn from_status(status: StatusCode, body: &str) -> Self {
    let body = body.trim();
    let message = if body.is_empty() {
      None
    } else {
      Some(truncate_body(body))
    };
    FetchError::ServerRejected { status, message }
  }

  pub fn malformed(err: serde_json::Error) -> Self {
    FetchError::Malformed(err.to_string())
  }
}

fn truncate_body(body: &str) -> String {
  if body.len() <= MAX_ERROR_BODY_LENGTH {
    return body.to_string();
  }
  let mut end = MAX_ERROR_BODY_LENGTH;
  while !body.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}... ({} bytes)", &body[..end], body.len())
}
