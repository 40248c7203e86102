//! API Request/Response Types
//!
//! JSON bodies of the HTTP boundary and the `{ok, data, error}` envelope.
//! Error codes are the stable `code()` strings of the domain errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::errors::LedgerError;
use crate::domain::types::{Choice, LedgerEntry, LedgerEntryType, Points, TopicStatus};
use crate::ports::job_queue::EnqueueOutcome;
use crate::usecases::bets::BetError;
use crate::usecases::topics::TopicError;

// ── Requests ──────────────────────────────────────────────

/// `POST /bets`
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBetBody {
  pub topic_id: String,
  /// Whole points; fractional values are rejected by admission.
  pub amount: f64,
  pub choice: Choice,
}

/// `POST /ledger/deltas`
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerDeltaBody {
  pub user_id: String,
  pub amount: Points,
  pub entry_type: LedgerEntryType,
  pub related_bet_id: Option<String>,
  pub related_vote_id: Option<String>,
  pub note: Option<String>,
}

/// `POST /settlements/pending`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingBody {
  pub limit: Option<usize>,
}

/// `PUT /topics/:id/status`
#[derive(Debug, Clone, Deserialize)]
pub struct TopicStatusBody {
  pub status: TopicStatus,
}

/// `PUT /topics/:id/resolution`
#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionBody {
  pub result: Choice,
  #[serde(default)]
  pub summary: String,
}

// ── Responses ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PlacedBetData {
  pub bet_id: String,
  pub amount: Points,
  pub balance_after: Points,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaData {
  pub balance_after: Points,
  pub entry: LedgerEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueData {
  pub topic_id: String,
  /// `accepted` or `already_queued`.
  pub status: EnqueueOutcome,
}

// ── Envelope ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
  pub code: String,
  pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
  pub ok: bool,
  pub data: Option<T>,
  pub error: Option<ErrorBody>,
}

impl<T: Serialize> Envelope<T> {
  pub fn ok(data: T) -> Json<Self> {
    Json(Self {
      ok: true,
      data: Some(data),
      error: None,
    })
  }
}

/// Error half of the envelope, with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
  pub status: StatusCode,
  pub code: String,
  pub message: String,
}

impl ApiError {
  pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
    Self {
      status,
      code: code.to_string(),
      message: message.into(),
    }
  }

  pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
    Self::new(StatusCode::BAD_REQUEST, code, message)
  }

  /// HTTP status for a domain error code.
  pub fn status_for(code: &str) -> StatusCode {
    match code {
      "MISSING_USER" | "ZERO_AMOUNT" | "INVALID_AMOUNT" | "AMOUNT_OVERFLOW" => {
        StatusCode::BAD_REQUEST
      }
      "TOPIC_NOT_FOUND" => StatusCode::NOT_FOUND,
      "BELOW_MIN_AMOUNT" | "ABOVE_MAX_AMOUNT" | "DAILY_CAP_EXCEEDED" | "POOL_SHARE_EXCEEDED"
      | "COOLDOWN_ACTIVE" | "STATUS_NOT_ALLOWED" => StatusCode::UNPROCESSABLE_ENTITY,
      "INSUFFICIENT_BALANCE" | "DUPLICATE_REFERENCE" | "CONCURRENT_WRITE_RACE"
      | "BET_SETTLE_REJECTED" | "TOPIC_NOT_OPEN" | "ALREADY_SETTLED" | "PARTIALLY_SETTLED" => {
        StatusCode::CONFLICT
      }
      "LOCK_TIMEOUT" | "TOPIC_BUSY" => StatusCode::SERVICE_UNAVAILABLE,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn from_code(code: &'static str, message: String) -> Self {
    Self::new(Self::status_for(code), code, message)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = Envelope::<()> {
      ok: false,
      data: None,
      error: Some(ErrorBody {
        code: self.code,
        message: self.message,
      }),
    };
    (self.status, Json(body)).into_response()
  }
}

impl From<LedgerError> for ApiError {
  fn from(e: LedgerError) -> Self {
    Self::from_code(e.code(), e.to_string())
  }
}

impl From<BetError> for ApiError {
  fn from(e: BetError) -> Self {
    Self::from_code(e.code(), e.to_string())
  }
}

impl From<TopicError> for ApiError {
  fn from(e: TopicError) -> Self {
    Self::from_code(e.code(), e.to_string())
  }
}

impl From<anyhow::Error> for ApiError {
  fn from(e: anyhow::Error) -> Self {
    Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", format!("{e:#}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_mapping() {
    assert_eq!(ApiError::status_for("INSUFFICIENT_BALANCE"), StatusCode::CONFLICT);
    assert_eq!(ApiError::status_for("DAILY_CAP_EXCEEDED"), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(ApiError::status_for("LOCK_TIMEOUT"), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ApiError::status_for("AMOUNT_OVERFLOW"), StatusCode::BAD_REQUEST);
    assert_eq!(ApiError::status_for("PARTIALLY_SETTLED"), StatusCode::CONFLICT);
    assert_eq!(ApiError::status_for("STORE_FAILURE"), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[test]
  fn test_ledger_error_keeps_code() {
    let err = ApiError::from(LedgerError::ZeroAmount);
    assert_eq!(err.code, "ZERO_AMOUNT");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
  }

  #[test]
  fn test_success_envelope_shape() {
    let Json(body) = Envelope::ok(5);
    let json = serde_json::to_value(body).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["data"], 5);
    assert!(json["error"].is_null());
  }
}
