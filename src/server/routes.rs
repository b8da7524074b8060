//! Axum route handlers.
//!
//! # Routes
//!
//! - `GET  /health`                         — liveness (+ `?detail=1` adapter probe)
//! - `POST /ingest`                         — ZIP body → portfolio id
//! - `POST /ingest/:portfolio_id/images`    — additive ZIP upload
//! - `GET  /ingest/progress/:portfolio_id`  — SSE ingestion progress
//! - `POST /profile/aggregate/:portfolio_id`— (re)aggregate the style profile
//! - `POST /generate`                       — SSE: progress / preview / complete
//! - `POST /feedback`                       — feedback intake, 202 ack
//! - `GET  /profile` `/generations` `/prompts` `/bandit/snapshot`
//!   `/rlhf/weights` `/corrections/:portfolio_id` `/coverage`
//!   — read-only projections
//!
//! Identity arrives as the `X-User-Id` header; the engine trusts it.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::EngineError;
use crate::generation::{CancelToken, GenerateRequest, GenerationProgress};
use crate::types::{FeedbackEvent, FeedbackKind};

use super::AppState;

type ApiError = (StatusCode, Json<Value>);

/// Build the router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ingest", post(ingest_handler))
        .route("/ingest/:portfolio_id/images", post(add_images_handler))
        .route("/ingest/progress/:portfolio_id", get(ingest_progress_handler))
        .route("/profile/aggregate/:portfolio_id", post(aggregate_handler))
        .route("/generate", post(generate_handler))
        .route("/feedback", post(feedback_handler))
        .route("/profile", get(profile_handler))
        .route("/generations", get(generations_handler))
        .route("/prompts", get(prompts_handler))
        .route("/bandit/snapshot", get(bandit_snapshot_handler))
        .route("/rlhf/weights", get(rlhf_weights_handler))
        .route("/corrections/:portfolio_id", get(corrections_handler))
        .route("/coverage", get(coverage_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
}

fn map_engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Capacity { .. } => StatusCode::TOO_MANY_REQUESTS,
        EngineError::Cancelled { .. } => StatusCode::CONFLICT,
        EngineError::ExternalTransient { .. } | EngineError::ExternalPermanent { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "request failed");
    }
    (status, Json(serde_json::json!({ "error": e.user_message() })))
}

/// Pull the trusted user identity from headers.
fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request("missing X-User-Id header"))
}

/// GET /health
async fn health_handler(
    State(state): State<AppState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    let mut body = serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "atelier",
    });
    if params.get("detail").is_some_and(|v| v == "1") {
        let adapter = state.orchestrator.adapter();
        body["adapters"] = serde_json::json!({
            adapter.name(): if adapter.health_check().await { "up" } else { "down" },
        });
    }
    Json(body)
}

/// POST /ingest — raw ZIP body.
async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    if body.is_empty() {
        return Err(bad_request("empty upload"));
    }
    let (portfolio, stream) = state
        .pipeline
        .ingest_zip(&user, body)
        .await
        .map_err(map_engine_error)?;
    state.progress_streams.insert(portfolio.id.clone(), stream);
    Ok(Json(serde_json::json!({
        "portfolio_id": portfolio.id,
        "status": portfolio.status,
    })))
}

/// POST /ingest/:portfolio_id/images — additive ZIP upload.
async fn add_images_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(portfolio_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let portfolio = state
        .portfolios
        .get(&portfolio_id)
        .map_err(map_engine_error)?;
    if portfolio.user_id != user {
        return Err(map_engine_error(EngineError::not_found(format!(
            "portfolio {portfolio_id} not found"
        ))));
    }
    let (portfolio, stream) = state
        .pipeline
        .add_images(&portfolio_id, body)
        .await
        .map_err(map_engine_error)?;
    state.progress_streams.insert(portfolio.id.clone(), stream);
    Ok(Json(serde_json::json!({
        "portfolio_id": portfolio.id,
        "status": "processing",
    })))
}

/// GET /ingest/progress/:portfolio_id — SSE stream of progress events.
async fn ingest_progress_handler(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (_, rx) = state
        .progress_streams
        .remove(&portfolio_id)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "no active ingestion for portfolio" })),
            )
        })?;

    let stream = futures::stream::unfold(rx, |mut rx| async {
        let event = rx.recv().await?;
        let sse = Event::default()
            .event("progress")
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().event("progress"));
        Some((Ok(sse), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /profile/aggregate/:portfolio_id
async fn aggregate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(portfolio_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let portfolio = state
        .portfolios
        .get(&portfolio_id)
        .map_err(map_engine_error)?;
    if portfolio.user_id != user {
        return Err(map_engine_error(EngineError::not_found(format!(
            "portfolio {portfolio_id} not found"
        ))));
    }
    let descriptors = state
        .descriptors
        .list_for_portfolio(&portfolio_id)
        .map_err(map_engine_error)?;
    if descriptors.is_empty() {
        return Err(bad_request("portfolio has no analyzed images"));
    }
    let profile = crate::profile::aggregate(&user, &portfolio_id, &descriptors);
    state.profiles.replace(&profile).map_err(map_engine_error)?;
    Ok(Json(serde_json::to_value(&profile).map_err(|e| {
        map_engine_error(EngineError::Serde(e))
    })?))
}

/// POST /generate — SSE: `progress`, `preview`, then `complete`.
async fn generate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user = user_id(&headers)?;
    if request.count == 0 {
        return Err(bad_request("count must be at least 1"));
    }

    let (progress_tx, progress_rx) = tokio::sync::mpsc::channel::<GenerationProgress>(64);
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<Event>(64);
    let cancel = CancelToken::new();

    // Forward orchestrator progress into SSE events.
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut rx = progress_rx;
        while let Some(progress) = rx.recv().await {
            let kind = if progress.preview_urls.is_empty() {
                "progress"
            } else {
                "preview"
            };
            if let Ok(event) = Event::default().event(kind).json_data(&progress) {
                if forward_tx.send(event).await.is_err() {
                    break;
                }
            }
        }
    });

    // Run the batch and close with a complete (or error) event.
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let result = orchestrator
            .generate(&user, &request, Some(progress_tx), cancel)
            .await;
        let event = match result {
            Ok(generations) => Event::default()
                .event("complete")
                .json_data(&serde_json::json!({ "generations": generations }))
                .unwrap_or_else(|_| Event::default().event("complete")),
            Err(e) => {
                tracing::warn!(error = %e, "generation batch failed");
                Event::default()
                    .event("error")
                    .json_data(&serde_json::json!({ "error": e.user_message() }))
                    .unwrap_or_else(|_| Event::default().event("error"))
            }
        };
        let _ = event_tx.send(event).await;
    });

    let stream = futures::stream::unfold(event_rx, |mut rx| async {
        let event = rx.recv().await?;
        Some((Ok(event), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /feedback — validate ownership inline, learn in the background.
async fn feedback_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = user_id(&headers)?;
    let generation_id = body
        .get("generation_id")
        .and_then(Value::as_str)
        .ok_or_else(|| bad_request("missing 'generation_id'"))?
        .to_string();
    let kind = body
        .get("kind")
        .and_then(Value::as_str)
        .and_then(FeedbackKind::parse)
        .ok_or_else(|| bad_request("missing or unknown 'kind'"))?;
    let event = FeedbackEvent {
        event_id: body
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        user_id: user.clone(),
        generation_id,
        kind,
        payload: body.get("payload").cloned().unwrap_or(Value::Null),
        created_at: chrono::Utc::now(),
    };

    // Ownership rejections surface immediately; everything else is
    // fire-and-forget so feedback never blocks serving.
    state
        .generations
        .get_owned(&event.generation_id, &user)
        .map_err(map_engine_error)?;

    let processor = state.feedback.clone();
    let event_id = event.event_id.clone();
    tokio::spawn(async move {
        if let Err(e) = processor.process(&event).await {
            tracing::error!(event_id = %event.event_id, error = %e, "feedback processing failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": true, "event_id": event_id })),
    ))
}

/// GET /profile
async fn profile_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    match state.profiles.get(&user).map_err(map_engine_error)? {
        Some(profile) => Ok(Json(serde_json::to_value(&profile).map_err(|e| {
            map_engine_error(EngineError::Serde(e))
        })?)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no style profile yet" })),
        )),
    }
}

/// GET /generations — latest first, with short-lived signed URLs.
async fn generations_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let generations = state
        .generations
        .list_for_user(&user, 100)
        .map_err(map_engine_error)?;
    let items: Vec<Value> = generations
        .iter()
        .map(|g| {
            let mut v = serde_json::to_value(g).unwrap_or(Value::Null);
            if !g.url.is_empty() {
                let key = format!("users/{}/generations/{}.png", g.user_id, g.id);
                v["signed_url"] = Value::String(state.object_store.signed_url(&key, 3600));
            }
            v
        })
        .collect();
    Ok(Json(serde_json::json!({ "generations": items })))
}

/// GET /prompts
async fn prompts_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let prompts = state
        .prompts
        .list_for_user(&user, 50)
        .map_err(map_engine_error)?;
    Ok(Json(serde_json::json!({ "prompts": prompts })))
}

/// GET /bandit/snapshot
async fn bandit_snapshot_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let arms = state.bandit.snapshot(&user).map_err(map_engine_error)?;
    Ok(Json(serde_json::json!({ "arms": arms })))
}

/// GET /rlhf/weights
async fn rlhf_weights_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let weights = state.rlhf.weights(&user).map_err(map_engine_error)?;
    Ok(Json(serde_json::json!({ "weights": weights })))
}

/// GET /corrections/:portfolio_id
async fn corrections_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(portfolio_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let portfolio = state
        .portfolios
        .get(&portfolio_id)
        .map_err(map_engine_error)?;
    if portfolio.user_id != user {
        return Err(map_engine_error(EngineError::not_found(format!(
            "portfolio {portfolio_id} not found"
        ))));
    }
    let corrections = state
        .descriptors
        .list_corrections(&portfolio_id)
        .map_err(map_engine_error)?;
    Ok(Json(serde_json::json!({ "corrections": corrections })))
}

/// GET /coverage — latest report plus active gaps.
async fn coverage_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers)?;
    let report = state
        .coverage
        .latest_report(&user)
        .map_err(map_engine_error)?;
    let gaps = state.coverage.active_gaps(&user).map_err(map_engine_error)?;
    Ok(Json(serde_json::json!({
        "report": report.map(|(selected_ids, per_slot, diversity_score)| serde_json::json!({
            "selected_ids": selected_ids,
            "per_slot_coverage": per_slot,
            "diversity_score": diversity_score,
        })),
        "active_gaps": gaps,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::generation::StubAdapter;
    use crate::interfaces::object_store::FsObjectStore;
    use crate::interfaces::vision::ScriptedVisionModel;
    use crate::storage::Database;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Fixture {
        _dir: tempfile::TempDir,
        state: AppState,
        vision: Arc<ScriptedVisionModel>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("atelier.db")).unwrap();
        let vision = Arc::new(ScriptedVisionModel::new());
        let state = AppState::new(
            Arc::new(EngineConfig::default()),
            db,
            Arc::new(FsObjectStore::new(
                dir.path().join("objects"),
                "http://cdn.test",
                b"secret".to_vec(),
            )),
            vision.clone(),
            Arc::new(StubAdapter::new()),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            state,
            vision,
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 22)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let f = fixture();
        let app = app_router(f.state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "atelier");
        assert_eq!(json["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn test_missing_user_header_rejected() {
        let f = fixture();
        let app = app_router(f.state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/profile")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_profile_404_before_aggregation() {
        let f = fixture();
        let app = app_router(f.state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/profile")
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_feedback_rejects_unknown_generation() {
        let f = fixture();
        let app = app_router(f.state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/feedback")
                    .header("x-user-id", "u1")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"generation_id": "nope", "kind": "like"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_feedback_ack_for_owned_generation() {
        let f = fixture();
        f.state
            .generations
            .insert(&crate::types::Generation {
                id: "g1".into(),
                user_id: "u1".into(),
                prompt_id: "p1".into(),
                generation_index: 0,
                provider: "stub".into(),
                url: "http://cdn.test/g1.png".into(),
                width: 1024,
                height: 1024,
                cost_cents: 1,
                created_at: chrono::Utc::now(),
                quality_score: None,
                status: crate::types::GenerationStatus::Selected,
                error: None,
            })
            .unwrap();
        let app = app_router(f.state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/feedback")
                    .header("x-user-id", "u1")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "generation_id": "g1",
                            "kind": "like",
                            "event_id": "evt-1"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["accepted"], true);
        assert_eq!(json["event_id"], "evt-1");
    }

    #[tokio::test]
    async fn test_generate_sse_completes() {
        let f = fixture();
        // Seed a profile so generation is brand-driven.
        let mut profile = crate::types::StyleProfile {
            user_id: "u1".into(),
            portfolio_id: "p1".into(),
            total_images: 5,
            ..Default::default()
        };
        profile.garments.add("blazer");
        profile.colors.add("navy");
        f.state.profiles.replace(&profile).unwrap();

        let app = app_router(f.state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/generate")
                    .header("x-user-id", "u1")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"count": 1, "seed": 5}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 22)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: complete"), "stream was: {text}");
        assert!(text.contains("generations"));

        // The batch really persisted rows.
        let rows = f.state.generations.list_for_user("u1", 10).unwrap();
        assert_eq!(rows.len(), 2); // ⌈1·1.2⌉ → 1 prompt × k=2
    }

    #[tokio::test]
    async fn test_ingest_and_progress_sse() {
        let f = fixture();
        f.vision.push(Ok(serde_json::json!({
            "executive_summary": "Navy blazer.",
            "garments": [{
                "type": "blazer",
                "silhouette": "tailored",
                "fabric": { "primary_material": "wool suiting" },
                "color_palette": [{ "color_name": "navy" }],
                "construction_details": ["notched lapel"],
                "sleeve_length": "long",
                "collar": "notched lapel",
                "pattern": "solid",
                "confidence": 0.92
            }],
            "photography": {
                "shot_composition": { "type": "editorial" },
                "lighting": { "type": "studio lighting", "direction": "front" },
                "camera": { "angle": "eye level", "height": "full length" },
                "background": "seamless studio"
            },
            "styling_context": "tailored",
            "contextual_attributes": { "season": "autumn", "occasion": "work",
                                       "mood_aesthetic": "tailored/minimalist" }
        })));

        let png = {
            let img = image::RgbImage::from_pixel(1, 1, image::Rgb([9, 0, 0]));
            let mut out = std::io::Cursor::new(Vec::new());
            img.write_to(&mut out, image::ImageFormat::Png).unwrap();
            out.into_inner()
        };
        let zip = {
            use std::io::Write;
            let mut cursor = std::io::Cursor::new(Vec::new());
            {
                let mut writer = zip::ZipWriter::new(&mut cursor);
                let options = zip::write::FileOptions::default();
                writer.start_file("a.png", options).unwrap();
                writer.write_all(&png).unwrap();
                writer.finish().unwrap();
            }
            cursor.into_inner()
        };

        let app = app_router(f.state.clone());
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("x-user-id", "u1")
                    .body(Body::from(zip))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let portfolio_id = json["portfolio_id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/ingest/progress/{portfolio_id}"))
                    .header("x-user-id", "u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 22)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("\"status\":\"analyzed\""), "stream was: {text}");
    }
}
