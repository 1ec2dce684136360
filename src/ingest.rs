use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, CallRecord, ContactRecord, MessageRecord};
use crate::dead_letter::{DeadLetterBuffer, DeadLetterEntry, DeadLetterKind};
use crate::error::IngestError;
use crate::phone;
use crate::presence;
use crate::push;
use crate::types::{Channel, InboundSmsEvent, InboundVoiceEvent};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created,
    /// An event with this provider sid was already recorded; nothing
    /// changed (replay safety).
    Duplicate,
}

/// Bounded retry for one database step. Absorbs transient connection
/// exhaustion; the caller escalates to the dead-letter buffer when the
/// final attempt still fails.
pub async fn with_retries<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, "ingest step failed: {err:?}");
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry budget empty")))
}

/// Owning-agent resolution, in priority order. Always terminates with some
/// agent as long as any admin exists.
pub fn resolve_agent(
    assigned_agent: Option<&str>,
    last_interaction_agent: Option<&str>,
    number_owner: Option<&str>,
    admins: &[String],
) -> Option<String> {
    assigned_agent
        .or(last_interaction_agent)
        .or(number_owner)
        .map(|s| s.to_string())
        .or_else(|| admins.first().cloned())
}

struct RoutingContext {
    contact: Option<ContactRecord>,
    contact_phone: String,
    receiving_number: String,
    agent_id: Option<String>,
}

async fn resolve_routing(
    state: &AppState,
    from: &str,
    to: &str,
) -> anyhow::Result<RoutingContext> {
    let attempts = state.config.ingest.retry_attempts;
    let delay = Duration::from_millis(state.config.ingest.retry_delay_ms);

    // Flexible contact match: exact first, then common rewrites.
    let mut contact = None;
    for candidate in phone::candidates(from) {
        let found = with_retries(attempts, delay, || {
            db::find_contact_by_phone_exact(&state.pool, state.db_kind, &candidate)
        })
        .await?;
        if found.is_some() {
            contact = found;
            break;
        }
    }

    // The thread key is the contact's canonical phone when known.
    let contact_phone = contact
        .as_ref()
        .map(|c| c.phone.clone())
        .unwrap_or_else(|| phone::normalize(from));
    let receiving_number = phone::normalize(to);

    let last_interaction = with_retries(attempts, delay, || {
        db::get_last_interaction(&state.pool, state.db_kind, &contact_phone)
    })
    .await?;

    let pool_entry = with_retries(attempts, delay, || {
        db::get_pool_entry(&state.pool, state.db_kind, &receiving_number)
    })
    .await?;

    let now = Utc::now();
    let admins = with_retries(attempts, delay, || {
        presence::admins_by_activity(
            &state.pool,
            state.db_kind,
            now,
            state.config.presence.active_window_seconds,
        )
    })
    .await?;
    let admin_ids: Vec<String> = admins.into_iter().map(|a| a.id).collect();

    let agent_id = resolve_agent(
        contact.as_ref().and_then(|c| c.assigned_agent_id.as_deref()),
        last_interaction.as_ref().map(|li| li.agent_id.as_str()),
        pool_entry.as_ref().and_then(|p| p.owner_agent_id.as_deref()),
        &admin_ids,
    );

    Ok(RoutingContext {
        contact,
        contact_phone,
        receiving_number,
        agent_id,
    })
}

/// Ingests one inbound SMS. Idempotent on the provider message sid: the
/// message insert decides whether this event is new, and the conversation
/// counter is only touched when it is, so duplicate and concurrent
/// deliveries settle on exactly one message row and one unread increment.
pub async fn ingest_sms(
    state: &AppState,
    event: &InboundSmsEvent,
) -> Result<IngestOutcome, IngestError> {
    let attempts = state.config.ingest.retry_attempts;
    let delay = Duration::from_millis(state.config.ingest.retry_delay_ms);

    let routing = resolve_routing(state, &event.from, &event.to)
        .await
        .map_err(IngestError::Unavailable)?;
    let now = Utc::now();

    let conversation = with_retries(attempts, delay, || {
        db::find_or_create_conversation(
            &state.pool,
            state.db_kind,
            &routing.contact_phone,
            routing.agent_id.as_deref(),
            Some(routing.receiving_number.as_str()),
            now,
        )
    })
    .await
    .map_err(IngestError::Unavailable)?;

    let record = MessageRecord {
        id: Uuid::new_v4().to_string(),
        provider_sid: event.message_sid.clone(),
        conversation_id: conversation.id.clone(),
        direction: "inbound".to_string(),
        from_number: phone::normalize(&event.from),
        to_number: routing.receiving_number.clone(),
        body: event.body.clone(),
        status: "received".to_string(),
        agent_id: routing.agent_id.clone(),
        created_at: now,
    };
    let inserted = with_retries(attempts, delay, || {
        db::record_inbound_message(
            &state.pool,
            state.db_kind,
            &record,
            &routing.contact_phone,
            Channel::Sms.as_str(),
            now,
        )
    })
    .await
    .map_err(IngestError::Unavailable)?;

    if !inserted {
        info!(sid = %event.message_sid, "duplicate inbound sms, no-op");
        return Ok(IngestOutcome::Duplicate);
    }

    notify_agent(
        state,
        routing.agent_id.as_deref(),
        json!({
            "kind": "inbound_sms",
            "from": routing.contact_phone,
            "contact": routing.contact.as_ref().and_then(|c| c.name.clone()),
            "body": event.body,
            "conversation_id": conversation.id,
        }),
    )
    .await;

    Ok(IngestOutcome::Created)
}

/// Ingests one inbound voice notification: records the call (idempotent on
/// the call sid), the last interaction, an activity row, and notifies the
/// routed agent.
pub async fn ingest_voice(
    state: &AppState,
    event: &InboundVoiceEvent,
) -> Result<IngestOutcome, IngestError> {
    let attempts = state.config.ingest.retry_attempts;
    let delay = Duration::from_millis(state.config.ingest.retry_delay_ms);

    let routing = resolve_routing(state, &event.from, &event.to)
        .await
        .map_err(IngestError::Unavailable)?;
    let now = Utc::now();

    let record = CallRecord {
        id: Uuid::new_v4().to_string(),
        provider_sid: event.call_sid.clone(),
        direction: "inbound".to_string(),
        from_number: phone::normalize(&event.from),
        to_number: routing.receiving_number.clone(),
        agent_id: routing.agent_id.clone(),
        status: "ringing".to_string(),
        duration_secs: None,
        recording_url: None,
        outcome: None,
        created_at: now,
        updated_at: now,
    };
    let inserted = with_retries(attempts, delay, || {
        db::record_inbound_call(
            &state.pool,
            state.db_kind,
            &record,
            &routing.contact_phone,
            Channel::Voice.as_str(),
            now,
        )
    })
    .await
    .map_err(IngestError::Unavailable)?;

    if !inserted {
        info!(sid = %event.call_sid, "duplicate inbound call, no-op");
        return Ok(IngestOutcome::Duplicate);
    }

    // Best-effort activity trail, never part of the ack.
    if let Err(err) = db::insert_activity(
        &state.pool,
        state.db_kind,
        routing.agent_id.as_deref(),
        Some(&routing.contact_phone),
        "inbound_call",
        Some(&event.call_sid),
    )
    .await
    {
        warn!(sid = %event.call_sid, "activity write failed: {err:?}");
    }

    notify_agent(
        state,
        routing.agent_id.as_deref(),
        json!({
            "kind": "inbound_call",
            "from": routing.contact_phone,
            "contact": routing.contact.as_ref().and_then(|c| c.name.clone()),
            "call_sid": event.call_sid,
        }),
    )
    .await;

    Ok(IngestOutcome::Created)
}

async fn notify_agent(state: &AppState, agent_id: Option<&str>, payload: serde_json::Value) {
    let Some(agent_id) = agent_id else {
        return;
    };
    let outcomes = push::notify(
        &state.pool,
        state.db_kind,
        &state.http,
        &state.config.push,
        agent_id,
        &payload,
    )
    .await;
    if !outcomes.is_empty() {
        info!(agent = %agent_id, count = outcomes.len(), "push fan-out dispatched");
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub archived: Option<String>,
}

/// Reprocesses every buffered dead-letter entry through the same ingestion
/// path (signature validation was already done when the event was first
/// accepted). Safe to run repeatedly: provider-sid uniqueness turns
/// already-recovered entries into no-ops. The live log is renamed aside
/// first and the replay consumes that snapshot, so a webhook failing
/// concurrently appends to a fresh live log instead of a file about to be
/// archived. Entries that still fail are re-buffered.
pub async fn replay_dead_letters(state: &AppState) -> ReplaySummary {
    let snapshot = match state.dead_letter.archive() {
        Ok(Some(path)) => path,
        Ok(None) => return ReplaySummary::default(),
        Err(err) => {
            warn!("dead-letter snapshot failed, replay skipped: {err:?}");
            return ReplaySummary::default();
        }
    };

    let entries = DeadLetterBuffer::read_entries_from(&snapshot);
    let mut summary = ReplaySummary {
        archived: Some(snapshot.display().to_string()),
        ..ReplaySummary::default()
    };
    let mut still_failing: Vec<DeadLetterEntry> = Vec::new();

    for entry in entries {
        let result = match entry.kind {
            DeadLetterKind::Sms => match InboundSmsEvent::from_form(&entry.raw_payload) {
                Ok(event) => ingest_sms(state, &event).await,
                Err(err) => Err(err),
            },
            DeadLetterKind::Voice => match InboundVoiceEvent::from_form(&entry.raw_payload) {
                Ok(event) => ingest_voice(state, &event).await,
                Err(err) => Err(err),
            },
        };
        match result {
            Ok(IngestOutcome::Created) => summary.replayed += 1,
            Ok(IngestOutcome::Duplicate) => summary.duplicates += 1,
            Err(IngestError::Validation(reason)) => {
                // Poison entry; archiving keeps it on disk for inspection.
                warn!("dead-letter entry unparseable, dropping from buffer: {reason}");
                summary.failed += 1;
            }
            Err(err) => {
                warn!("dead-letter replay still failing: {err}");
                summary.failed += 1;
                still_failing.push(entry);
            }
        }
    }

    for entry in &still_failing {
        state
            .dead_letter
            .append(entry.kind, &entry.raw_payload, &entry.error);
    }

    info!(
        replayed = summary.replayed,
        duplicates = summary.duplicates,
        failed = summary.failed,
        "dead-letter replay finished"
    );
    summary
}
