use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use color_eyre::Report;
use tracing::error;

/// Error on the request/response path, rendered as a plain-text status.
#[derive(Debug)]
pub struct AppError {
  status: StatusCode,
  report: Report,
}

impl AppError {
  pub fn new(status: StatusCode, report: Report) -> Self {
    Self { status, report }
  }

  /// Store failure while assembling a response
  pub fn storage(report: Report) -> Self {
    Self::new(StatusCode::INTERNAL_SERVER_ERROR, report)
  }

  /// Upstream unreachable on a cache miss or forward
  pub fn upstream(report: Report) -> Self {
    Self::new(StatusCode::BAD_GATEWAY, report)
  }

  pub fn bad_request(report: Report) -> Self {
    Self::new(StatusCode::BAD_REQUEST, report)
  }

  /// Install or activation has not completed
  pub fn unavailable(report: Report) -> Self {
    Self::new(StatusCode::SERVICE_UNAVAILABLE, report)
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    error!(status = %self.status, error = %self.report, "request failed");
    (self.status, self.report.to_string()).into_response()
  }
}
