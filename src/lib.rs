pub mod callstate;
pub mod config;
pub mod db;
pub mod dead_letter;
pub mod error;
pub mod ingest;
pub mod phone;
pub mod presence;
pub mod provider;
pub mod push;
pub mod selector;
pub mod types;
pub mod verify;

pub use config::Config;

use self::config::{expand_tilde, load_config, resolve_database_url};
use self::db::DbKind;
use self::dead_letter::{DeadLetterBuffer, DeadLetterKind};
use self::error::IngestError;
use self::provider::{ConfigCredentials, CredentialProvider, ProviderClient};
use self::types::{
    FormParams, InboundSmsEvent, InboundVoiceEvent, SmsStatusEvent, StatusCallbackEvent,
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::AnyPool;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const SMS_WEBHOOK_PATH: &str = "/v1/webhooks/sms";
pub const VOICE_WEBHOOK_PATH: &str = "/v1/webhooks/voice";
pub const CALL_STATUS_PATH: &str = "/v1/webhooks/call-status";
pub const SMS_STATUS_PATH: &str = "/v1/webhooks/sms-status";

const SIGNATURE_HEADER: &str = "X-Twilio-Signature";
const TWIML_EMPTY: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: AnyPool,
    pub db_kind: DbKind,
    pub http: reqwest::Client,
    pub dead_letter: DeadLetterBuffer,
    pub credentials: ConfigCredentials,
    pub provider: ProviderClient,
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    sqlx::any::install_default_drivers();

    let config = load_config();
    let db_url = resolve_database_url(&config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;

    let http = reqwest::Client::new();
    let state = AppState {
        credentials: ConfigCredentials::new(&config.telephony),
        provider: ProviderClient::new(http.clone(), &config.telephony),
        dead_letter: DeadLetterBuffer::new(expand_tilde(&config.dead_letter.path)),
        config,
        pool,
        db_kind,
        http,
    };

    tokio::spawn(start_conversation_sweeper(state.clone()));

    let authed_routes = Router::new()
        .route("/v1/messages/send", post(send_message))
        .route("/v1/calls", post(start_call))
        .route("/v1/conversations", get(list_conversations))
        .route("/v1/conversations/:phone/messages", get(list_messages))
        .route("/v1/presence/heartbeat", post(presence_heartbeat))
        .route("/v1/push/subscriptions", post(register_push_subscription))
        .route("/v1/dead-letter/replay", post(replay_dead_letters))
        .route("/v1/agents", post(upsert_agent))
        .route("/v1/contacts", post(create_contact))
        .route("/v1/numbers", post(upsert_number))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route(SMS_WEBHOOK_PATH, post(sms_webhook))
        .route(VOICE_WEBHOOK_PATH, post(voice_webhook))
        .route(CALL_STATUS_PATH, post(call_status_webhook))
        .route(SMS_STATUS_PATH, post(sms_status_webhook));

    let app = Router::new()
        .merge(authed_routes)
        .merge(public_routes)
        .with_state(state.clone());

    Ok((state, app))
}

/// Closes threads with no traffic past the inactivity threshold.
async fn start_conversation_sweeper(state: AppState) {
    let interval = state.config.conversation.sweep_interval_seconds.max(60);
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        let cutoff = Utc::now() - ChronoDuration::days(state.config.conversation.close_after_days);
        match db::close_idle_conversations(&state.pool, state.db_kind, cutoff).await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "idle conversations closed"),
            Err(err) => warn!("conversation sweep failed: {err:?}"),
        }
    }
}

async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> impl IntoResponse {
    if let Some(token) = state.config.auth.token.as_ref() {
        let header = headers.get("X-Dialhub-Token").and_then(|v| v.to_str().ok());
        if header != Some(token.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(req).await
}

// -- public surface ------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub conversations: i64,
    pub messages: i64,
    pub calls: i64,
    pub dead_letters: usize,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        conversations: db::count_rows(&state.pool, "conversations").await,
        messages: db::count_rows(&state.pool, "messages").await,
        calls: db::count_rows(&state.pool, "calls").await,
        dead_letters: state.dead_letter.read_entries().len(),
    })
}

fn twiml_ok() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        TWIML_EMPTY,
    )
        .into_response()
}

fn signed_url(state: &AppState, path: &str) -> String {
    format!(
        "{}{}",
        state.config.telephony.public_base_url.trim_end_matches('/'),
        path
    )
}

/// Signature gate shared by every webhook route. When no signing secret is
/// configured (local development) the check is skipped.
fn check_signature(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    params: &FormParams,
) -> Result<(), IngestError> {
    let Some(secret) = state.config.telephony.auth_token.as_deref() else {
        return Ok(());
    };
    let provided = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let url = signed_url(state, path);
    if verify::verify_signature(secret, &url, params, provided) {
        Ok(())
    } else {
        Err(IngestError::Auth)
    }
}

async fn sms_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = match types::parse_form(&body) {
        Ok(params) => params,
        Err(err) => {
            warn!("sms webhook rejected: {err}");
            return twiml_ok();
        }
    };
    if check_signature(&state, &headers, SMS_WEBHOOK_PATH, &params).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let event = match InboundSmsEvent::from_form(&params) {
        Ok(event) => event,
        Err(err) => {
            // Malformed-but-signed pings ack cleanly; retrying them would
            // never succeed.
            warn!("sms webhook missing fields, acking no-op: {err}");
            return twiml_ok();
        }
    };

    match ingest::ingest_sms(&state, &event).await {
        Ok(_) => twiml_ok(),
        Err(IngestError::Validation(reason)) => {
            warn!("sms ingest no-op: {reason}");
            twiml_ok()
        }
        Err(IngestError::Auth) => StatusCode::UNAUTHORIZED.into_response(),
        Err(IngestError::Unavailable(err)) => {
            error!(sid = %event.message_sid, "sms ingest exhausted retries: {err:?}");
            state
                .dead_letter
                .append(DeadLetterKind::Sms, &params, &err.to_string());
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn voice_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = match types::parse_form(&body) {
        Ok(params) => params,
        Err(err) => {
            warn!("voice webhook rejected: {err}");
            return twiml_ok();
        }
    };
    if check_signature(&state, &headers, VOICE_WEBHOOK_PATH, &params).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let event = match InboundVoiceEvent::from_form(&params) {
        Ok(event) => event,
        Err(err) => {
            warn!("voice webhook missing fields, acking no-op: {err}");
            return twiml_ok();
        }
    };

    match ingest::ingest_voice(&state, &event).await {
        Ok(_) => twiml_ok(),
        Err(IngestError::Validation(reason)) => {
            warn!("voice ingest no-op: {reason}");
            twiml_ok()
        }
        Err(IngestError::Auth) => StatusCode::UNAUTHORIZED.into_response(),
        Err(IngestError::Unavailable(err)) => {
            error!(sid = %event.call_sid, "voice ingest exhausted retries: {err:?}");
            state
                .dead_letter
                .append(DeadLetterKind::Voice, &params, &err.to_string());
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Call status callbacks always ack "OK" once authenticated, applied or
/// rejected, so the provider stops re-delivering.
async fn call_status_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = match types::parse_form(&body) {
        Ok(params) => params,
        Err(_) => return (StatusCode::OK, "OK").into_response(),
    };
    if check_signature(&state, &headers, CALL_STATUS_PATH, &params).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let event = match StatusCallbackEvent::from_form(&params) {
        Ok(event) => event,
        Err(err) => {
            warn!("status callback missing fields, acking: {err}");
            return (StatusCode::OK, "OK").into_response();
        }
    };

    match callstate::apply_status_callback(&state.pool, state.db_kind, &event).await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(err) => {
            error!(sid = %event.call_sid, "status callback storage error: {err:?}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn sms_status_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let params = match types::parse_form(&body) {
        Ok(params) => params,
        Err(_) => return (StatusCode::OK, "OK").into_response(),
    };
    if check_signature(&state, &headers, SMS_STATUS_PATH, &params).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let event = match SmsStatusEvent::from_form(&params) {
        Ok(event) => event,
        Err(err) => {
            warn!("sms status callback missing fields, acking: {err}");
            return (StatusCode::OK, "OK").into_response();
        }
    };

    match db::update_message_status(&state.pool, state.db_kind, &event.message_sid, &event.status)
        .await
    {
        Ok(updated) => {
            if !updated {
                warn!(sid = %event.message_sid, "status callback for unknown message");
            }
            (StatusCode::OK, "OK").into_response()
        }
        Err(err) => {
            error!(sid = %event.message_sid, "sms status storage error: {err:?}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

// -- authed surface ------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub agent_id: Option<String>,
    pub to: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub provider_sid: String,
    pub from: String,
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let now = Utc::now();
    let to = phone::normalize(&req.to);

    let selected = match selector::select_outbound_number(
        &state.pool,
        state.db_kind,
        types::Channel::Sms,
        req.agent_id.as_deref(),
        &to,
        now,
    )
    .await
    {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({"error": "no outbound number available"})),
            )
                .into_response();
        }
        Err(err) => {
            error!("number selection failed: {err:?}");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let creds = match state.credentials.telephony().await {
        Ok(creds) => creds,
        Err(err) => {
            error!("credential retrieval failed: {err:?}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    let callback = signed_url(&state, SMS_STATUS_PATH);
    let provider_sid = match state
        .provider
        .send_sms(&creds, &selected.phone, &to, &req.body, Some(&callback))
        .await
    {
        Ok(sid) => sid,
        Err(err) => {
            error!(to = %to, "provider send failed: {err:?}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    let result: anyhow::Result<String> = async {
        let conversation = db::find_or_create_conversation(
            &state.pool,
            state.db_kind,
            &to,
            req.agent_id.as_deref(),
            Some(&selected.phone),
            now,
        )
        .await?;
        let record = db::MessageRecord {
            id: Uuid::new_v4().to_string(),
            provider_sid: provider_sid.clone(),
            conversation_id: conversation.id.clone(),
            direction: "outbound".to_string(),
            from_number: selected.phone.clone(),
            to_number: to.clone(),
            body: Some(req.body.clone()),
            status: "queued".to_string(),
            agent_id: req.agent_id.clone(),
            created_at: now,
        };
        db::insert_message_idempotent(&state.pool, state.db_kind, &record).await?;
        db::touch_conversation_outbound(&state.pool, state.db_kind, &to, &selected.phone, now)
            .await?;
        Ok(record.id)
    }
    .await;

    match result {
        Ok(message_id) => Json(SendMessageResponse {
            message_id,
            provider_sid,
            from: selected.phone,
        })
        .into_response(),
        Err(err) => {
            // The provider accepted the send; losing the local record is a
            // logged inconsistency, not a failed request.
            error!(sid = %provider_sid, "outbound message record failed: {err:?}");
            Json(json!({"provider_sid": provider_sid, "warning": "record write failed"}))
                .into_response()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartCallRequest {
    pub agent_id: Option<String>,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct StartCallResponse {
    pub call_id: String,
    pub provider_sid: String,
    pub from: String,
}

async fn start_call(State(state): State<AppState>, Json(req): Json<StartCallRequest>) -> Response {
    let now = Utc::now();
    let to = phone::normalize(&req.to);

    let selected = match selector::select_outbound_number(
        &state.pool,
        state.db_kind,
        types::Channel::Voice,
        req.agent_id.as_deref(),
        &to,
        now,
    )
    .await
    {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({"error": "no outbound number available"})),
            )
                .into_response();
        }
        Err(err) => {
            error!("number selection failed: {err:?}");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let creds = match state.credentials.telephony().await {
        Ok(creds) => creds,
        Err(err) => {
            error!("credential retrieval failed: {err:?}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    let callback = signed_url(&state, CALL_STATUS_PATH);
    let provider_sid = match state
        .provider
        .create_call(&creds, &selected.phone, &to, &callback)
        .await
    {
        Ok(sid) => sid,
        Err(err) => {
            error!(to = %to, "provider call create failed: {err:?}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    let record = db::CallRecord {
        id: Uuid::new_v4().to_string(),
        provider_sid: provider_sid.clone(),
        direction: "outbound".to_string(),
        from_number: selected.phone.clone(),
        to_number: to.clone(),
        agent_id: req.agent_id.clone(),
        status: callstate::CallStatus::Queued.as_str().to_string(),
        duration_secs: None,
        recording_url: None,
        outcome: None,
        created_at: now,
        updated_at: now,
    };
    if let Err(err) = db::insert_call_idempotent(&state.pool, state.db_kind, &record).await {
        error!(sid = %provider_sid, "call record write failed: {err:?}");
    }

    Json(StartCallResponse {
        call_id: record.id,
        provider_sid,
        from: selected.phone,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> impl IntoResponse {
    let limit = page.limit.unwrap_or(100).min(500);
    let offset = page.offset.unwrap_or(0);
    let conversations = db::list_conversations(&state.pool, state.db_kind, limit, offset)
        .await
        .unwrap_or_default();
    Json(conversations)
}

async fn list_messages(
    State(state): State<AppState>,
    Path(contact_phone): Path<String>,
    Query(page): Query<Pagination>,
) -> Response {
    let normalized = phone::normalize(&contact_phone);
    let conversation =
        match db::get_conversation_by_phone(&state.pool, state.db_kind, &normalized).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => return StatusCode::NOT_FOUND.into_response(),
            Err(err) => {
                error!("conversation lookup failed: {err:?}");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        };
    let limit = page.limit.unwrap_or(200).min(500);
    let offset = page.offset.unwrap_or(0);
    let messages = db::list_messages(&state.pool, state.db_kind, &conversation.id, limit, offset)
        .await
        .unwrap_or_default();
    Json(messages).into_response()
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
}

async fn presence_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    match presence::heartbeat(&state.pool, state.db_kind, &req.agent_id, Utc::now()).await {
        Ok(true) => Json(json!({"status": "ok"})).into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("heartbeat failed: {err:?}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSubscriptionRequest {
    pub agent_id: String,
    pub endpoint: String,
    pub keys: PushKeys,
}

async fn register_push_subscription(
    State(state): State<AppState>,
    Json(req): Json<RegisterSubscriptionRequest>,
) -> Response {
    let record = db::PushSubscriptionRecord {
        id: Uuid::new_v4().to_string(),
        agent_id: req.agent_id,
        endpoint: req.endpoint,
        key_p256dh: req.keys.p256dh,
        key_auth: req.keys.auth,
        created_at: Utc::now(),
    };
    match db::upsert_push_subscription(&state.pool, state.db_kind, &record).await {
        Ok(()) => Json(json!({"status": "registered"})).into_response(),
        Err(err) => {
            error!("subscription registration failed: {err:?}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn replay_dead_letters(State(state): State<AppState>) -> impl IntoResponse {
    let summary = ingest::replay_dead_letters(&state).await;
    Json(summary)
}

#[derive(Debug, Deserialize)]
pub struct UpsertAgentRequest {
    pub id: String,
    pub name: String,
    pub role: Option<String>,
}

async fn upsert_agent(
    State(state): State<AppState>,
    Json(req): Json<UpsertAgentRequest>,
) -> Response {
    let record = db::AgentRecord {
        id: req.id,
        name: req.name,
        role: req.role.unwrap_or_else(|| "rep".to_string()),
        last_seen_at: None,
    };
    match db::upsert_agent(&state.pool, state.db_kind, &record).await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(err) => {
            error!("agent upsert failed: {err:?}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateContactRequest {
    pub phone: String,
    pub name: Option<String>,
    pub assigned_agent_id: Option<String>,
}

async fn create_contact(
    State(state): State<AppState>,
    Json(req): Json<CreateContactRequest>,
) -> Response {
    let record = db::ContactRecord {
        id: Uuid::new_v4().to_string(),
        phone: phone::normalize(&req.phone),
        name: req.name,
        assigned_agent_id: req.assigned_agent_id,
        created_at: Utc::now(),
    };
    match db::insert_contact(&state.pool, state.db_kind, &record).await {
        Ok(()) => Json(json!({"id": record.id})).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpsertNumberRequest {
    pub phone: String,
    pub active: bool,
    pub owner_agent_id: Option<String>,
    pub cooldown_until: Option<i64>,
}

async fn upsert_number(
    State(state): State<AppState>,
    Json(req): Json<UpsertNumberRequest>,
) -> Response {
    let record = db::NumberPoolRecord {
        phone: phone::normalize(&req.phone),
        active: req.active,
        owner_agent_id: req.owner_agent_id,
        cooldown_until: req
            .cooldown_until
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
        daily_count: 0,
        last_used_date: None,
    };
    match db::upsert_pool_entry(&state.pool, state.db_kind, &record).await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(err) => {
            error!("number upsert failed: {err:?}");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
