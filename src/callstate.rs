use anyhow::Result;
use chrono::Utc;
use sqlx::AnyPool;
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, CallRecord, DbKind};
use crate::types::StatusCallbackEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Queued,
    Initiated,
    Ringing,
    Answered,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
}

impl CallStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "initiated" => Some(Self::Initiated),
            "ringing" => Some(Self::Ringing),
            "answered" => Some(Self::Answered),
            "in-progress" | "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "busy" => Some(Self::Busy),
            "failed" => Some(Self::Failed),
            "no-answer" | "no_answer" => Some(Self::NoAnswer),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
            Self::Canceled => "canceled",
        }
    }

    /// Total order over statuses; all terminal states share the top rank.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Queued => 1,
            Self::Initiated => 2,
            Self::Ringing => 3,
            Self::Answered => 4,
            Self::InProgress => 5,
            Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer | Self::Canceled => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.priority() >= 6
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move the stored status to the incoming one.
    Apply,
    /// Status is locked; fold in duration/recording only.
    MergeInfo,
    /// Duplicate or regression with nothing new; no write.
    Ignore,
}

/// Decides what a status callback may do to the stored call. Once a
/// terminal status is recorded the status never changes again; later
/// callbacks may only contribute informational fields. Identical
/// re-deliveries are no-ops.
pub fn plan_transition(current: CallStatus, incoming: CallStatus, has_new_info: bool) -> Transition {
    if incoming == current {
        if has_new_info {
            return Transition::MergeInfo;
        }
        return Transition::Ignore;
    }
    if current.is_terminal() {
        if has_new_info {
            return Transition::MergeInfo;
        }
        return Transition::Ignore;
    }
    Transition::Apply
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Created,
    Applied(CallStatus),
    MergedInfo,
    Ignored,
    UnknownStatus,
}

/// Applies one provider status callback. Rejected or duplicate callbacks
/// still resolve Ok so the webhook can ack and stop provider retries.
pub async fn apply_status_callback(
    pool: &AnyPool,
    kind: DbKind,
    event: &StatusCallbackEvent,
) -> Result<CallbackOutcome> {
    let Some(incoming) = CallStatus::parse(&event.status) else {
        warn!(sid = %event.call_sid, status = %event.status, "unknown call status, ignoring");
        return Ok(CallbackOutcome::UnknownStatus);
    };
    let now = Utc::now();

    let existing = db::get_call_by_sid(pool, kind, &event.call_sid).await?;
    let Some(call) = existing else {
        // First sighting of this call sid: record what we know. Callbacks
        // only reach us for calls this account originated.
        let record = CallRecord {
            id: Uuid::new_v4().to_string(),
            provider_sid: event.call_sid.clone(),
            direction: "outbound".to_string(),
            from_number: event.from.clone().unwrap_or_default(),
            to_number: event.to.clone().unwrap_or_default(),
            agent_id: None,
            status: incoming.as_str().to_string(),
            duration_secs: event.duration_secs,
            recording_url: event.recording_url.clone(),
            outcome: None,
            created_at: now,
            updated_at: now,
        };
        db::insert_call_idempotent(pool, kind, &record).await?;
        return Ok(CallbackOutcome::Created);
    };

    let current = CallStatus::parse(&call.status).unwrap_or(CallStatus::Queued);
    let has_new_info = event.duration_secs.is_some() || event.recording_url.is_some();

    match plan_transition(current, incoming, has_new_info) {
        Transition::Apply => {
            db::update_call_status(
                pool,
                kind,
                &event.call_sid,
                incoming.as_str(),
                event.duration_secs,
                event.recording_url.as_deref(),
                now,
            )
            .await?;
            info!(sid = %event.call_sid, from = %current, to = %incoming, "call status advanced");

            if incoming == CallStatus::Completed && call.agent_id.is_some() {
                // Best-effort activity log; never fails the callback.
                if let Err(err) = db::insert_activity(
                    pool,
                    kind,
                    call.agent_id.as_deref(),
                    None,
                    "call_completed",
                    Some(&event.call_sid),
                )
                .await
                {
                    warn!(sid = %event.call_sid, "activity log write failed: {err:?}");
                }
            }
            Ok(CallbackOutcome::Applied(incoming))
        }
        Transition::MergeInfo => {
            db::merge_call_info(
                pool,
                kind,
                &event.call_sid,
                event.duration_secs,
                event.recording_url.as_deref(),
                now,
            )
            .await?;
            if current.is_terminal() && incoming != current {
                warn!(sid = %event.call_sid, stored = %current, incoming = %incoming, "status regression rejected, info merged");
            }
            Ok(CallbackOutcome::MergedInfo)
        }
        Transition::Ignore => {
            if current.is_terminal() && incoming != current {
                warn!(sid = %event.call_sid, stored = %current, incoming = %incoming, "status regression rejected");
            }
            Ok(CallbackOutcome::Ignored)
        }
    }
}
