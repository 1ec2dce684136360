use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::AnyPool;
use tracing::debug;

use crate::db::{self, DbKind, NumberPoolRecord};
use crate::phone;
use crate::types::Channel;

/// A pool number is eligible when it is active and any cooldown has lapsed.
pub fn is_eligible(entry: &NumberPoolRecord, now: DateTime<Utc>) -> bool {
    if !entry.active {
        return false;
    }
    match entry.cooldown_until {
        Some(until) => until <= now,
        None => true,
    }
}

fn first_eligible(entries: Vec<NumberPoolRecord>, now: DateTime<Utc>) -> Option<NumberPoolRecord> {
    entries.into_iter().find(|e| is_eligible(e, now))
}

/// Chooses the outbound caller identity for a send to `contact_phone`.
///
/// Order, first match wins:
/// 1. the conversation's sticky number (thread continuity on the
///    recipient's handset),
/// 2. the sending agent's own eligible number,
/// 3. the contact's assigned agent's eligible number,
/// 4. the first eligible active number in the pool.
///
/// The only side effect is one atomic daily-use increment on the winner.
/// `None` means no eligible identity exists; the caller must fail the send.
pub async fn select_outbound_number(
    pool: &AnyPool,
    kind: DbKind,
    channel: Channel,
    sender_agent_id: Option<&str>,
    contact_phone: &str,
    now: DateTime<Utc>,
) -> Result<Option<NumberPoolRecord>> {
    let normalized = phone::normalize(contact_phone);

    let chosen = pick_candidate(pool, kind, sender_agent_id, &normalized, now).await?;

    if let Some(entry) = chosen.as_ref() {
        let today = now.format("%Y-%m-%d").to_string();
        db::increment_daily_use(pool, kind, &entry.phone, &today).await?;
        debug!(number = %entry.phone, contact = %normalized, channel = channel.as_str(), "selected outbound number");
    }

    Ok(chosen)
}

async fn pick_candidate(
    pool: &AnyPool,
    kind: DbKind,
    sender_agent_id: Option<&str>,
    contact_phone: &str,
    now: DateTime<Utc>,
) -> Result<Option<NumberPoolRecord>> {
    // 1. Sticky conversation number.
    if let Some(conversation) = db::get_conversation_by_phone(pool, kind, contact_phone).await? {
        if let Some(number_phone) = conversation.number_phone.as_deref() {
            if let Some(entry) = db::get_pool_entry(pool, kind, number_phone).await? {
                if is_eligible(&entry, now) {
                    return Ok(Some(entry));
                }
                debug!(number = %entry.phone, "sticky number ineligible, falling through");
            }
        }
    }

    // 2. Sender's own number.
    if let Some(agent_id) = sender_agent_id {
        let owned = db::list_pool_entries_by_owner(pool, kind, agent_id).await?;
        if let Some(entry) = first_eligible(owned, now) {
            return Ok(Some(entry));
        }
    }

    // 3. Assigned agent's number.
    if let Some(contact) = db::find_contact_by_phone_exact(pool, kind, contact_phone).await? {
        if let Some(assigned) = contact.assigned_agent_id.as_deref() {
            if Some(assigned) != sender_agent_id {
                let owned = db::list_pool_entries_by_owner(pool, kind, assigned).await?;
                if let Some(entry) = first_eligible(owned, now) {
                    return Ok(Some(entry));
                }
            }
        }
    }

    // 4. Global default: first eligible active number.
    let all = db::list_active_pool_entries(pool, kind).await?;
    Ok(first_eligible(all, now))
}
