use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::AnyPool;

use crate::db::{self, AgentRecord, DbKind};

pub const ADMIN_ROLE: &str = "admin";

/// Records one heartbeat for an agent. Returns false for an unknown agent
/// id, which callers treat as a client error rather than creating rows.
pub async fn heartbeat(pool: &AnyPool, kind: DbKind, agent_id: &str, now: DateTime<Utc>) -> Result<bool> {
    db::touch_agent_heartbeat(pool, kind, agent_id, now).await
}

/// An agent is active when its last heartbeat falls inside the window.
pub fn is_active(last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>, window_seconds: i64) -> bool {
    match last_seen_at {
        Some(seen) => now - seen <= Duration::seconds(window_seconds),
        None => false,
    }
}

/// Admin agents, active ones first. Used as the last-resort routing
/// fallback: prefer someone currently at their desk, but always return
/// every admin so routing can terminate whenever any agent exists.
pub async fn admins_by_activity(
    pool: &AnyPool,
    kind: DbKind,
    now: DateTime<Utc>,
    window_seconds: i64,
) -> Result<Vec<AgentRecord>> {
    let mut admins = db::list_agents_by_role(pool, kind, ADMIN_ROLE).await?;
    admins.sort_by_key(|a| !is_active(a.last_seen_at, now, window_seconds));
    Ok(admins)
}
