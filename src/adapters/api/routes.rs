//! API Routes - axum HTTP Boundary
//!
//! Thin handlers that translate JSON bodies into use-case calls and wrap
//! results in the `{ok, data, error}` envelope. Caller identity comes
//! from the `x-user-id` header set by the external auth layer.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tracing::instrument;

use super::types::{
  ApiError, DeltaData, EnqueueData, Envelope, LedgerDeltaBody, PendingBody, PlaceBetBody,
  PlacedBetData, ResolutionBody, TopicStatusBody,
};
use crate::adapters::metrics::{HealthState, ServiceMetrics, health};
use crate::domain::types::{LedgerEntryType, LedgerRef, PoolStats, Resolution, Topic};
use crate::ports::job_queue::{JobQueue, SettlementJob};
use crate::usecases::bets::{BetService, PlaceBetRequest};
use crate::usecases::ledger_writer::{DeltaRequest, LedgerWriter};
use crate::usecases::settlement_jobs::{RecoverySweep, SweepReport};
use crate::usecases::topics::{ResolutionRequest, TopicService};

/// Header carrying the authenticated caller.
pub const USER_HEADER: &str = "x-user-id";

/// Sweep size when the operator does not pass a limit.
const DEFAULT_PENDING_LIMIT: usize = 50;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
  pub writer: Arc<LedgerWriter>,
  pub bets: Arc<BetService>,
  pub topics: Arc<TopicService>,
  pub queue: Arc<dyn JobQueue>,
  pub sweep: Arc<RecoverySweep>,
  pub metrics: Arc<ServiceMetrics>,
}

/// Caller id taken from `x-user-id`.
pub struct CallerId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerId {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    parts
      .headers
      .get(USER_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(|v| Self(v.to_string()))
      .ok_or_else(|| {
        ApiError::new(
          StatusCode::UNAUTHORIZED,
          "MISSING_USER",
          format!("{USER_HEADER} header is required"),
        )
      })
  }
}

/// Full router: API, health probes and metrics.
pub fn router(state: ApiState, health: HealthState) -> Router {
  let api = Router::new()
    .route("/bets", post(place_bet))
    .route("/ledger/deltas", post(apply_delta))
    .route("/topics/:id/settlement", post(request_settlement))
    .route("/topics/:id/pool", get(pool_stats))
    .route("/topics/:id/status", put(set_topic_status))
    .route("/topics/:id/resolution", put(record_resolution))
    .route("/settlements/pending", post(process_pending))
    .route("/metrics", get(metrics))
    .with_state(state);

  api.merge(health::routes(health))
}

#[instrument(skip_all, fields(user_id = %caller.0))]
async fn place_bet(
  State(state): State<ApiState>,
  caller: CallerId,
  Json(body): Json<PlaceBetBody>,
) -> Result<Json<Envelope<PlacedBetData>>, ApiError> {
  let placed = state
    .bets
    .place_bet(PlaceBetRequest {
      user_id: caller.0,
      topic_id: body.topic_id,
      amount: body.amount,
      choice: body.choice,
    })
    .await?;

  Ok(Envelope::ok(PlacedBetData {
    bet_id: placed.bet_id,
    amount: placed.amount,
    balance_after: placed.balance_after,
  }))
}

async fn apply_delta(
  State(state): State<ApiState>,
  Json(body): Json<LedgerDeltaBody>,
) -> Result<Json<Envelope<DeltaData>>, ApiError> {
  if matches!(
    body.entry_type,
    LedgerEntryType::BetPlace | LedgerEntryType::BetSettle | LedgerEntryType::BetRefund
  ) {
    return Err(ApiError::bad_request(
      "ENTRY_TYPE_NOT_ALLOWED",
      format!("{} entries are written by bet placement and settlement", body.entry_type),
    ));
  }

  let reference = match (body.related_bet_id, body.related_vote_id) {
    (Some(_), Some(_)) => {
      return Err(ApiError::bad_request(
        "AMBIGUOUS_REFERENCE",
        "at most one of related_bet_id and related_vote_id may be set",
      ));
    }
    (Some(bet_id), None) => Some(LedgerRef::Bet(bet_id)),
    (None, Some(vote_id)) => Some(LedgerRef::Vote(vote_id)),
    (None, None) => None,
  };

  let mut request = DeltaRequest::new(body.user_id, body.amount, body.entry_type);
  request.reference = reference;
  request.note = body.note;

  let applied = state.writer.apply_delta(request).await?;
  Ok(Envelope::ok(DeltaData {
    balance_after: applied.balance_after,
    entry: applied.entry,
  }))
}

async fn request_settlement(
  State(state): State<ApiState>,
  caller: CallerId,
  Path(topic_id): Path<String>,
) -> Result<Json<Envelope<EnqueueData>>, ApiError> {
  let status = state
    .queue
    .submit(SettlementJob::settle(topic_id.clone(), caller.0))
    .await?;
  Ok(Envelope::ok(EnqueueData { topic_id, status }))
}

async fn pool_stats(
  State(state): State<ApiState>,
  Path(topic_id): Path<String>,
) -> Result<Json<Envelope<PoolStats>>, ApiError> {
  Ok(Envelope::ok(state.bets.pool_stats(&topic_id).await?))
}

async fn set_topic_status(
  State(state): State<ApiState>,
  Path(topic_id): Path<String>,
  Json(body): Json<TopicStatusBody>,
) -> Result<Json<Envelope<Topic>>, ApiError> {
  Ok(Envelope::ok(
    state.topics.set_status(&topic_id, body.status).await?,
  ))
}

async fn record_resolution(
  State(state): State<ApiState>,
  caller: CallerId,
  Path(topic_id): Path<String>,
  Json(body): Json<ResolutionBody>,
) -> Result<Json<Envelope<Resolution>>, ApiError> {
  let resolution = state
    .topics
    .record_resolution(ResolutionRequest {
      topic_id,
      result: body.result,
      summary: body.summary,
      resolver_id: caller.0,
    })
    .await?;
  Ok(Envelope::ok(resolution))
}

async fn process_pending(
  State(state): State<ApiState>,
  body: Option<Json<PendingBody>>,
) -> Result<Json<Envelope<SweepReport>>, ApiError> {
  let limit = body
    .and_then(|Json(b)| b.limit)
    .unwrap_or(DEFAULT_PENDING_LIMIT);
  Ok(Envelope::ok(
    state.sweep.process_pending_settlements(limit).await?,
  ))
}

async fn metrics(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
  let body = state.metrics.render()?;
  Ok((
    [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
    body,
  ))
}
