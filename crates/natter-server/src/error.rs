//! Error types and axum `IntoResponse` implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use natter_hub::Error as HubError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,
  #[error("not found")]
  NotFound,
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error(transparent)]
  Hub(#[from] HubError),
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Error::Unauthorized => StatusCode::UNAUTHORIZED,
      Error::NotFound => StatusCode::NOT_FOUND,
      Error::BadRequest(_) => StatusCode::BAD_REQUEST,
      Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
      Error::Hub(e) => match e {
        HubError::Forbidden { .. } => StatusCode::FORBIDDEN,
        HubError::Validation(_) => StatusCode::BAD_REQUEST,
        HubError::Persistence(_) | HubError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        HubError::BrokerUnavailable(_) => StatusCode::BAD_GATEWAY,
        HubError::ConnectionLost(_) | HubError::Aggregation(_) => {
          StatusCode::INTERNAL_SERVER_ERROR
        }
      },
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::warn!(error = %self, %status, "request failed");
    }

    let mut res = (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response();
    if let Error::Unauthorized = self {
      res.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"natter\""),
      );
    }
    res
  }
}
