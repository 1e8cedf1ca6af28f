/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::letters::InvalidLetter;
use crate::query::{build_query, Cursor, QuerySpec};
use crate::share::{share_url, SharePlatform};
use crate::store::{DocumentStore, LiveSubscription};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::unfold;
use letterbox_protocol::{FeedQuery, LetterPage, LikeRequest, NewLetter};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn DocumentStore>,
    pub page_size: u32,
    pub public_base_url: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn new(status: StatusCode, error: impl ToString) -> Self {
        Self {
            status,
            error: error.to_string(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("letter not found: {id}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        if let Some(invalid) = e.downcast_ref::<InvalidLetter>() {
            return Self::new(StatusCode::BAD_REQUEST, invalid);
        }
        error!("letter store error: {e:#}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/letters", get(list_letters).post(create_letter))
        .route("/letters/stream", get(stream_letters))
        .route("/letters/:id", get(get_letter))
        .route("/letters/:id/like", post(like_letter))
        .route("/letters/:id/share", get(share_letter))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl ApiState {
    fn limit(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.page_size).clamp(1, 200)
    }
}

fn parse_cursor(spec: &QuerySpec, raw: Option<&str>) -> ApiResult<Option<Cursor>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let cursor = Cursor::decode(raw)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("{e:#}")))?;
    if !cursor.belongs_to(spec) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "cursor belongs to a different filter/sort",
        ));
    }
    Ok(Some(cursor))
}

async fn list_letters(
    State(state): State<ApiState>,
    Query(q): Query<FeedQuery>,
) -> ApiResult<Json<LetterPage>> {
    let spec = build_query(&q.filter, q.sort);
    let after = parse_cursor(&spec, q.cursor.as_deref())?;
    let page = state
        .store
        .fetch_page(&spec, after.as_ref(), state.limit(q.limit))
        .await?;
    Ok(Json(LetterPage {
        items: page.items,
        next: page.next.map(|c| c.encode()),
    }))
}

async fn create_letter(
    State(state): State<ApiState>,
    Json(new): Json<NewLetter>,
) -> ApiResult<Response> {
    let letter = state.store.add_letter(new).await?;
    Ok((StatusCode::CREATED, Json(letter)).into_response())
}

async fn get_letter(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Response> {
    match state.store.get_letter(&id).await? {
        Some(letter) => Ok(Json(letter).into_response()),
        None => Err(ApiError::not_found(&id)),
    }
}

async fn like_letter(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<LikeRequest>,
) -> ApiResult<Response> {
    let viewer_id = req.viewer_id.trim();
    if viewer_id.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "missing viewerId"));
    }
    match state.store.apply_like(&id, viewer_id, req.action).await? {
        Some(receipt) => {
            info!(letter_id = %id, action = ?req.action, likes = receipt.likes, "like via api");
            Ok(Json(receipt).into_response())
        }
        None => Err(ApiError::not_found(&id)),
    }
}

#[derive(Debug, Deserialize)]
struct ShareQuery {
    #[serde(default)]
    platform: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShareLink {
    platform: String,
    url: String,
}

async fn share_letter(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<ShareQuery>,
) -> ApiResult<Json<ShareLink>> {
    let raw = q.platform.unwrap_or_else(|| "copy".to_string());
    let platform = SharePlatform::parse(&raw)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("unknown platform: {raw}")))?;
    let letter = state
        .store
        .get_letter(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(&id))?;
    Ok(Json(ShareLink {
        platform: raw,
        url: share_url(platform, &state.public_base_url, &letter),
    }))
}

async fn stream_letters(
    State(state): State<ApiState>,
    Query(q): Query<FeedQuery>,
) -> ApiResult<Response> {
    let spec = build_query(&q.filter, q.sort);
    let sub = state.store.subscribe(&spec, state.limit(q.limit)).await?;
    info!(spec = %spec.key(), "snapshot stream opened");

    // The subscription is dropped (and its producer cancelled) with the stream.
    let stream = unfold(Some(sub), |sub: Option<LiveSubscription>| async move {
        let mut sub = sub?;
        match sub.next().await {
            Some(Ok(items)) => {
                let data = serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string());
                let evt = Event::default().event("snapshot").data(data);
                Some((Ok::<Event, Infallible>(evt), Some(sub)))
            }
            Some(Err(e)) => {
                let evt = Event::default().event("error").data(format!("{e:#}"));
                Some((Ok(evt), None))
            }
            None => None,
        }
    });

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
        .into_response())
}
