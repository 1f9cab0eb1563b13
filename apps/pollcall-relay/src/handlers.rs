use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use pollcall::model::{PartyId, RelayCandidate};
use pollcall::signaling::wire::{PARTY_HEADER, PayloadBody};
use pollcall::signaling::{CandidateBatch, MemoryRelay, SlotFetch};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug)]
pub enum ApiError {
    MissingParty,
    InvalidParty,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match self {
            ApiError::MissingParty => format!("missing {PARTY_HEADER} header"),
            ApiError::InvalidParty => format!("{PARTY_HEADER} header must be a non-empty id"),
        };
        (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
    }
}

fn requester(headers: &HeaderMap) -> Result<PartyId, ApiError> {
    let raw = headers
        .get(PARTY_HEADER)
        .ok_or(ApiError::MissingParty)?
        .to_str()
        .map_err(|_| ApiError::InvalidParty)?;
    raw.parse().map_err(|_| ApiError::InvalidParty)
}

/// POST /calls/:callee/offer
pub async fn post_offer(
    State(relay): State<MemoryRelay>,
    headers: HeaderMap,
    Path(callee): Path<String>,
    Json(body): Json<PayloadBody>,
) -> Result<StatusCode, ApiError> {
    let caller = requester(&headers)?;
    debug!(%caller, %callee, "offer stored");
    relay.put_offer(&caller, &PartyId::new(callee), body.payload);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /calls/:caller/offer
pub async fn get_offer(
    State(relay): State<MemoryRelay>,
    headers: HeaderMap,
    Path(caller): Path<String>,
) -> Result<Json<SlotFetch>, ApiError> {
    let callee = requester(&headers)?;
    Ok(Json(relay.offer(&PartyId::new(caller), &callee)))
}

/// POST /calls/:caller/answer
pub async fn post_answer(
    State(relay): State<MemoryRelay>,
    headers: HeaderMap,
    Path(caller): Path<String>,
    Json(body): Json<PayloadBody>,
) -> Result<StatusCode, ApiError> {
    let callee = requester(&headers)?;
    debug!(%caller, %callee, "answer stored");
    relay.put_answer(&PartyId::new(caller), &callee, body.payload);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /calls/:callee/answer
pub async fn get_answer(
    State(relay): State<MemoryRelay>,
    headers: HeaderMap,
    Path(callee): Path<String>,
) -> Result<Json<SlotFetch>, ApiError> {
    let caller = requester(&headers)?;
    Ok(Json(relay.answer(&caller, &PartyId::new(callee))))
}

/// POST /candidates/:receiver
pub async fn post_candidate(
    State(relay): State<MemoryRelay>,
    headers: HeaderMap,
    Path(receiver): Path<String>,
    Json(body): Json<PayloadBody>,
) -> Result<(StatusCode, Json<RelayCandidate>), ApiError> {
    let sender = requester(&headers)?;
    let stored = relay.push_candidate(&sender, &PartyId::new(receiver), body.payload);
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET /candidates/:peer
pub async fn get_candidates(
    State(relay): State<MemoryRelay>,
    headers: HeaderMap,
    Path(peer): Path<String>,
) -> Result<Json<CandidateBatch>, ApiError> {
    let me = requester(&headers)?;
    Ok(Json(relay.candidates_between(&me, &PartyId::new(peer))))
}

/// DELETE /calls/:peer
pub async fn clear_call(
    State(relay): State<MemoryRelay>,
    headers: HeaderMap,
    Path(peer): Path<String>,
) -> Result<StatusCode, ApiError> {
    let me = requester(&headers)?;
    relay.clear(&me, &PartyId::new(peer));
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}
