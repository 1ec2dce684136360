use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{AnyPool, Row, ValueRef};
use std::borrow::Cow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

fn i64_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

fn datetime_to_i64(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

// The Any driver refuses to decode a NULL column straight into Option<T>,
// so every nullable column goes through an explicit null probe first.
fn get_opt_i64(row: &sqlx::any::AnyRow, col: &str) -> Result<Option<i64>> {
    if row.try_get_raw(col)?.is_null() {
        return Ok(None);
    }
    Ok(Some(row.try_get(col)?))
}

fn get_opt_str(row: &sqlx::any::AnyRow, col: &str) -> Result<Option<String>> {
    if row.try_get_raw(col)?.is_null() {
        return Ok(None);
    }
    Ok(Some(row.try_get(col)?))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: String,
    pub phone: String,
    pub name: Option<String>,
    pub assigned_agent_id: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberPoolRecord {
    pub phone: String,
    pub active: bool,
    pub owner_agent_id: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub cooldown_until: Option<DateTime<Utc>>,
    pub daily_count: i64,
    pub last_used_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub contact_phone: String,
    pub agent_id: Option<String>,
    pub number_phone: Option<String>,
    pub status: String,
    pub unread_count: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_message_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub provider_sid: String,
    pub conversation_id: String,
    pub direction: String,
    pub from_number: String,
    pub to_number: String,
    pub body: Option<String>,
    pub status: String,
    pub agent_id: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: String,
    pub provider_sid: String,
    pub direction: String,
    pub from_number: String,
    pub to_number: String,
    pub agent_id: Option<String>,
    pub status: String,
    pub duration_secs: Option<i64>,
    pub recording_url: Option<String>,
    pub outcome: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastInteractionRecord {
    pub contact_phone: String,
    pub agent_id: String,
    pub channel: String,
    pub number_phone: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscriptionRecord {
    pub id: String,
    pub agent_id: String,
    pub endpoint: String,
    pub key_p256dh: String,
    pub key_auth: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<()> {
    let stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            last_seen_at INTEGER
        )"#,
        r#"CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            phone TEXT NOT NULL UNIQUE,
            name TEXT,
            assigned_agent_id TEXT,
            created_at INTEGER NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS number_pool (
            phone TEXT PRIMARY KEY,
            active INTEGER NOT NULL,
            owner_agent_id TEXT,
            cooldown_until INTEGER,
            daily_count INTEGER NOT NULL,
            last_used_date TEXT,
            created_at INTEGER NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            contact_phone TEXT NOT NULL UNIQUE,
            agent_id TEXT,
            number_phone TEXT,
            status TEXT NOT NULL,
            unread_count INTEGER NOT NULL,
            last_message_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            provider_sid TEXT NOT NULL UNIQUE,
            conversation_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            from_number TEXT NOT NULL,
            to_number TEXT NOT NULL,
            body TEXT,
            status TEXT NOT NULL,
            agent_id TEXT,
            created_at INTEGER NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at)"#,
        r#"CREATE TABLE IF NOT EXISTS calls (
            id TEXT PRIMARY KEY,
            provider_sid TEXT NOT NULL UNIQUE,
            direction TEXT NOT NULL,
            from_number TEXT NOT NULL,
            to_number TEXT NOT NULL,
            agent_id TEXT,
            status TEXT NOT NULL,
            duration_secs INTEGER,
            recording_url TEXT,
            outcome TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS last_interactions (
            contact_phone TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            number_phone TEXT,
            occurred_at INTEGER NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS push_subscriptions (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            endpoint TEXT NOT NULL UNIQUE,
            key_p256dh TEXT NOT NULL,
            key_auth TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_push_agent ON push_subscriptions(agent_id)"#,
        r#"CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            agent_id TEXT,
            contact_phone TEXT,
            kind TEXT NOT NULL,
            detail TEXT,
            created_at INTEGER NOT NULL
        )"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}

// -- agents / presence --------------------------------------------------

pub async fn upsert_agent(pool: &AnyPool, kind: DbKind, record: &AgentRecord) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO agents (id, name, role, last_seen_at) VALUES (?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
               name=excluded.name,
               role=excluded.role,
               last_seen_at=excluded.last_seen_at"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.role)
        .bind(record.last_seen_at.map(datetime_to_i64))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn touch_agent_heartbeat(
    pool: &AnyPool,
    kind: DbKind,
    agent_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = rewrite_sql("UPDATE agents SET last_seen_at = ? WHERE id = ?", kind);
    let result = sqlx::query(sql.as_ref())
        .bind(datetime_to_i64(now))
        .bind(agent_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn row_to_agent(row: &sqlx::any::AnyRow) -> Result<AgentRecord> {
    let last_seen_at = get_opt_i64(row, "last_seen_at")?;
    Ok(AgentRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        role: row.try_get("role")?,
        last_seen_at: last_seen_at.map(i64_to_datetime),
    })
}

pub async fn list_agents_by_role(
    pool: &AnyPool,
    kind: DbKind,
    role: &str,
) -> Result<Vec<AgentRecord>> {
    let sql = rewrite_sql(
        "SELECT id, name, role, last_seen_at FROM agents WHERE role = ? ORDER BY id",
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).bind(role).fetch_all(pool).await?;
    rows.iter().map(row_to_agent).collect()
}

// -- contacts ------------------------------------------------------------

fn row_to_contact(row: &sqlx::any::AnyRow) -> Result<ContactRecord> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(ContactRecord {
        id: row.try_get("id")?,
        phone: row.try_get("phone")?,
        name: get_opt_str(row, "name")?,
        assigned_agent_id: get_opt_str(row, "assigned_agent_id")?,
        created_at: i64_to_datetime(created_at),
    })
}

pub async fn insert_contact(pool: &AnyPool, kind: DbKind, record: &ContactRecord) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO contacts (id, phone, name, assigned_agent_id, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.phone)
        .bind(record.name.as_deref())
        .bind(record.assigned_agent_id.as_deref())
        .bind(datetime_to_i64(record.created_at))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find_contact_by_phone_exact(
    pool: &AnyPool,
    kind: DbKind,
    phone: &str,
) -> Result<Option<ContactRecord>> {
    let sql = rewrite_sql(
        "SELECT id, phone, name, assigned_agent_id, created_at FROM contacts WHERE phone = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(phone)
        .fetch_optional(pool)
        .await?;
    row.map(|r| row_to_contact(&r)).transpose()
}

// -- number pool ---------------------------------------------------------

fn row_to_pool_entry(row: &sqlx::any::AnyRow) -> Result<NumberPoolRecord> {
    let active: i64 = row.try_get("active")?;
    let cooldown_until = get_opt_i64(row, "cooldown_until")?;
    Ok(NumberPoolRecord {
        phone: row.try_get("phone")?,
        active: active != 0,
        owner_agent_id: get_opt_str(row, "owner_agent_id")?,
        cooldown_until: cooldown_until.map(i64_to_datetime),
        daily_count: row.try_get("daily_count")?,
        last_used_date: get_opt_str(row, "last_used_date")?,
    })
}

pub async fn upsert_pool_entry(
    pool: &AnyPool,
    kind: DbKind,
    record: &NumberPoolRecord,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO number_pool (phone, active, owner_agent_id, cooldown_until, daily_count, last_used_date, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(phone) DO UPDATE SET
               active=excluded.active,
               owner_agent_id=excluded.owner_agent_id,
               cooldown_until=excluded.cooldown_until"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.phone)
        .bind(if record.active { 1_i64 } else { 0_i64 })
        .bind(record.owner_agent_id.as_deref())
        .bind(record.cooldown_until.map(datetime_to_i64))
        .bind(record.daily_count)
        .bind(record.last_used_date.as_deref())
        .bind(datetime_to_i64(Utc::now()))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_pool_entry(
    pool: &AnyPool,
    kind: DbKind,
    phone: &str,
) -> Result<Option<NumberPoolRecord>> {
    let sql = rewrite_sql(
        r#"SELECT phone, active, owner_agent_id, cooldown_until, daily_count, last_used_date
           FROM number_pool WHERE phone = ?"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(phone)
        .fetch_optional(pool)
        .await?;
    row.map(|r| row_to_pool_entry(&r)).transpose()
}

pub async fn list_pool_entries_by_owner(
    pool: &AnyPool,
    kind: DbKind,
    owner_agent_id: &str,
) -> Result<Vec<NumberPoolRecord>> {
    let sql = rewrite_sql(
        r#"SELECT phone, active, owner_agent_id, cooldown_until, daily_count, last_used_date
           FROM number_pool WHERE owner_agent_id = ? ORDER BY phone"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(owner_agent_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_pool_entry).collect()
}

pub async fn list_active_pool_entries(
    pool: &AnyPool,
    kind: DbKind,
) -> Result<Vec<NumberPoolRecord>> {
    let sql = rewrite_sql(
        r#"SELECT phone, active, owner_agent_id, cooldown_until, daily_count, last_used_date
           FROM number_pool WHERE active = 1 ORDER BY phone"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).fetch_all(pool).await?;
    rows.iter().map(row_to_pool_entry).collect()
}

/// Single atomic daily-use increment on the chosen number. The counter
/// resets whenever the recorded use date differs from `today`.
pub async fn increment_daily_use(
    pool: &AnyPool,
    kind: DbKind,
    phone: &str,
    today: &str,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"UPDATE number_pool
           SET daily_count = CASE WHEN last_used_date = ? THEN daily_count + 1 ELSE 1 END,
               last_used_date = ?
           WHERE phone = ?"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(today)
        .bind(today)
        .bind(phone)
        .execute(pool)
        .await?;
    Ok(())
}

// -- conversations -------------------------------------------------------

fn row_to_conversation(row: &sqlx::any::AnyRow) -> Result<ConversationRecord> {
    let last_message_at: i64 = row.try_get("last_message_at")?;
    let created_at: i64 = row.try_get("created_at")?;
    Ok(ConversationRecord {
        id: row.try_get("id")?,
        contact_phone: row.try_get("contact_phone")?,
        agent_id: get_opt_str(row, "agent_id")?,
        number_phone: get_opt_str(row, "number_phone")?,
        status: row.try_get("status")?,
        unread_count: row.try_get("unread_count")?,
        last_message_at: i64_to_datetime(last_message_at),
        created_at: i64_to_datetime(created_at),
    })
}

pub async fn get_conversation_by_phone(
    pool: &AnyPool,
    kind: DbKind,
    contact_phone: &str,
) -> Result<Option<ConversationRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, contact_phone, agent_id, number_phone, status, unread_count, last_message_at, created_at
           FROM conversations WHERE contact_phone = ?"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(contact_phone)
        .fetch_optional(pool)
        .await?;
    row.map(|r| row_to_conversation(&r)).transpose()
}

/// Race-tolerant find-or-create: the insert silently loses to a concurrent
/// first contact (unique contact_phone), then the surviving row is read
/// back. Exactly one conversation exists per contact phone afterward.
pub async fn find_or_create_conversation(
    pool: &AnyPool,
    kind: DbKind,
    contact_phone: &str,
    agent_id: Option<&str>,
    number_phone: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ConversationRecord> {
    let sql = rewrite_sql(
        r#"INSERT INTO conversations (id, contact_phone, agent_id, number_phone, status, unread_count, last_message_at, created_at)
           VALUES (?, ?, ?, ?, 'OPEN', 0, ?, ?)
           ON CONFLICT(contact_phone) DO NOTHING"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(Uuid::new_v4().to_string())
        .bind(contact_phone)
        .bind(agent_id)
        .bind(number_phone)
        .bind(datetime_to_i64(now))
        .bind(datetime_to_i64(now))
        .execute(pool)
        .await?;

    get_conversation_by_phone(pool, kind, contact_phone)
        .await?
        .ok_or_else(|| anyhow::anyhow!("conversation vanished after upsert: {contact_phone}"))
}

/// Records one inbound message atomically. The idempotent insert, the
/// conversation touch (unread +1, reopen, refresh last_message_at, adopt
/// the receiving number as sticky when none is set) and the
/// last-interaction upsert commit or roll back together, so a retried or
/// replayed event can never observe a message row whose conversation side
/// effects were lost. Returns false when the provider sid already exists.
pub async fn record_inbound_message(
    pool: &AnyPool,
    kind: DbKind,
    record: &MessageRecord,
    contact_phone: &str,
    channel: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let sql = rewrite_sql(
        r#"INSERT INTO messages (id, provider_sid, conversation_id, direction, from_number, to_number, body, status, agent_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(provider_sid) DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.provider_sid)
        .bind(&record.conversation_id)
        .bind(&record.direction)
        .bind(&record.from_number)
        .bind(&record.to_number)
        .bind(record.body.as_deref())
        .bind(&record.status)
        .bind(record.agent_id.as_deref())
        .bind(datetime_to_i64(record.created_at))
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let sql = rewrite_sql(
        r#"UPDATE conversations
           SET unread_count = unread_count + 1,
               status = 'OPEN',
               last_message_at = ?,
               agent_id = COALESCE(?, agent_id),
               number_phone = COALESCE(number_phone, ?)
           WHERE contact_phone = ?"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(datetime_to_i64(now))
        .bind(record.agent_id.as_deref())
        .bind(Some(record.to_number.as_str()))
        .bind(contact_phone)
        .execute(&mut *tx)
        .await?;

    if let Some(agent_id) = record.agent_id.as_deref() {
        upsert_last_interaction_tx(
            &mut tx,
            kind,
            contact_phone,
            agent_id,
            channel,
            Some(record.to_number.as_str()),
            now,
        )
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Voice counterpart of [`record_inbound_message`]: the idempotent call
/// insert and the last-interaction upsert share one transaction.
pub async fn record_inbound_call(
    pool: &AnyPool,
    kind: DbKind,
    record: &CallRecord,
    contact_phone: &str,
    channel: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let sql = rewrite_sql(
        r#"INSERT INTO calls (id, provider_sid, direction, from_number, to_number, agent_id, status, duration_secs, recording_url, outcome, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(provider_sid) DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.provider_sid)
        .bind(&record.direction)
        .bind(&record.from_number)
        .bind(&record.to_number)
        .bind(record.agent_id.as_deref())
        .bind(&record.status)
        .bind(record.duration_secs)
        .bind(record.recording_url.as_deref())
        .bind(record.outcome.as_deref())
        .bind(datetime_to_i64(record.created_at))
        .bind(datetime_to_i64(record.updated_at))
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    if let Some(agent_id) = record.agent_id.as_deref() {
        upsert_last_interaction_tx(
            &mut tx,
            kind,
            contact_phone,
            agent_id,
            channel,
            Some(record.to_number.as_str()),
            now,
        )
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

async fn upsert_last_interaction_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Any>,
    kind: DbKind,
    contact_phone: &str,
    agent_id: &str,
    channel: &str,
    number_phone: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO last_interactions (contact_phone, agent_id, channel, number_phone, occurred_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(contact_phone) DO UPDATE SET
               agent_id=excluded.agent_id,
               channel=excluded.channel,
               number_phone=excluded.number_phone,
               occurred_at=excluded.occurred_at"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(contact_phone)
        .bind(agent_id)
        .bind(channel)
        .bind(number_phone)
        .bind(datetime_to_i64(now))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Outbound touch: refresh activity and pin the sticky number, no unread
/// change.
pub async fn touch_conversation_outbound(
    pool: &AnyPool,
    kind: DbKind,
    contact_phone: &str,
    number_phone: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"UPDATE conversations
           SET status = 'OPEN',
               last_message_at = ?,
               number_phone = COALESCE(number_phone, ?)
           WHERE contact_phone = ?"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(datetime_to_i64(now))
        .bind(number_phone)
        .bind(contact_phone)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn close_idle_conversations(
    pool: &AnyPool,
    kind: DbKind,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let sql = rewrite_sql(
        "UPDATE conversations SET status = 'CLOSED' WHERE status = 'OPEN' AND last_message_at < ?",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(datetime_to_i64(cutoff))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn list_conversations(
    pool: &AnyPool,
    kind: DbKind,
    limit: i64,
    offset: i64,
) -> Result<Vec<ConversationRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, contact_phone, agent_id, number_phone, status, unread_count, last_message_at, created_at
           FROM conversations ORDER BY last_message_at DESC LIMIT ? OFFSET ?"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_conversation).collect()
}

// -- messages ------------------------------------------------------------

fn row_to_message(row: &sqlx::any::AnyRow) -> Result<MessageRecord> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        provider_sid: row.try_get("provider_sid")?,
        conversation_id: row.try_get("conversation_id")?,
        direction: row.try_get("direction")?,
        from_number: row.try_get("from_number")?,
        to_number: row.try_get("to_number")?,
        body: get_opt_str(row, "body")?,
        status: row.try_get("status")?,
        agent_id: get_opt_str(row, "agent_id")?,
        created_at: i64_to_datetime(created_at),
    })
}

/// Idempotent insert keyed on the provider sid. Returns false when a row
/// with this sid already existed (duplicate delivery, replay).
pub async fn insert_message_idempotent(
    pool: &AnyPool,
    kind: DbKind,
    record: &MessageRecord,
) -> Result<bool> {
    let sql = rewrite_sql(
        r#"INSERT INTO messages (id, provider_sid, conversation_id, direction, from_number, to_number, body, status, agent_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(provider_sid) DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.provider_sid)
        .bind(&record.conversation_id)
        .bind(&record.direction)
        .bind(&record.from_number)
        .bind(&record.to_number)
        .bind(record.body.as_deref())
        .bind(&record.status)
        .bind(record.agent_id.as_deref())
        .bind(datetime_to_i64(record.created_at))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_message_status(
    pool: &AnyPool,
    kind: DbKind,
    provider_sid: &str,
    status: &str,
) -> Result<bool> {
    let sql = rewrite_sql("UPDATE messages SET status = ? WHERE provider_sid = ?", kind);
    let result = sqlx::query(sql.as_ref())
        .bind(status)
        .bind(provider_sid)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_messages(
    pool: &AnyPool,
    kind: DbKind,
    conversation_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, provider_sid, conversation_id, direction, from_number, to_number, body, status, agent_id, created_at
           FROM messages WHERE conversation_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_message).collect()
}

// -- calls ---------------------------------------------------------------

fn row_to_call(row: &sqlx::any::AnyRow) -> Result<CallRecord> {
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    Ok(CallRecord {
        id: row.try_get("id")?,
        provider_sid: row.try_get("provider_sid")?,
        direction: row.try_get("direction")?,
        from_number: row.try_get("from_number")?,
        to_number: row.try_get("to_number")?,
        agent_id: get_opt_str(row, "agent_id")?,
        status: row.try_get("status")?,
        duration_secs: get_opt_i64(row, "duration_secs")?,
        recording_url: get_opt_str(row, "recording_url")?,
        outcome: get_opt_str(row, "outcome")?,
        created_at: i64_to_datetime(created_at),
        updated_at: i64_to_datetime(updated_at),
    })
}

pub async fn get_call_by_sid(
    pool: &AnyPool,
    kind: DbKind,
    provider_sid: &str,
) -> Result<Option<CallRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, provider_sid, direction, from_number, to_number, agent_id, status, duration_secs, recording_url, outcome, created_at, updated_at
           FROM calls WHERE provider_sid = ?"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(provider_sid)
        .fetch_optional(pool)
        .await?;
    row.map(|r| row_to_call(&r)).transpose()
}

/// Idempotent call insert keyed on the provider sid.
pub async fn insert_call_idempotent(
    pool: &AnyPool,
    kind: DbKind,
    record: &CallRecord,
) -> Result<bool> {
    let sql = rewrite_sql(
        r#"INSERT INTO calls (id, provider_sid, direction, from_number, to_number, agent_id, status, duration_secs, recording_url, outcome, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(provider_sid) DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.provider_sid)
        .bind(&record.direction)
        .bind(&record.from_number)
        .bind(&record.to_number)
        .bind(record.agent_id.as_deref())
        .bind(&record.status)
        .bind(record.duration_secs)
        .bind(record.recording_url.as_deref())
        .bind(record.outcome.as_deref())
        .bind(datetime_to_i64(record.created_at))
        .bind(datetime_to_i64(record.updated_at))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_call_status(
    pool: &AnyPool,
    kind: DbKind,
    provider_sid: &str,
    status: &str,
    duration_secs: Option<i64>,
    recording_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"UPDATE calls
           SET status = ?,
               duration_secs = COALESCE(?, duration_secs),
               recording_url = COALESCE(?, recording_url),
               updated_at = ?
           WHERE provider_sid = ?"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(status)
        .bind(duration_secs)
        .bind(recording_url)
        .bind(datetime_to_i64(now))
        .bind(provider_sid)
        .execute(pool)
        .await?;
    Ok(())
}

/// Merge informational fields without touching the status (terminal lock).
pub async fn merge_call_info(
    pool: &AnyPool,
    kind: DbKind,
    provider_sid: &str,
    duration_secs: Option<i64>,
    recording_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"UPDATE calls
           SET duration_secs = COALESCE(?, duration_secs),
               recording_url = COALESCE(?, recording_url),
               updated_at = ?
           WHERE provider_sid = ?"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(duration_secs)
        .bind(recording_url)
        .bind(datetime_to_i64(now))
        .bind(provider_sid)
        .execute(pool)
        .await?;
    Ok(())
}

// -- last interactions ---------------------------------------------------

pub async fn get_last_interaction(
    pool: &AnyPool,
    kind: DbKind,
    contact_phone: &str,
) -> Result<Option<LastInteractionRecord>> {
    let sql = rewrite_sql(
        r#"SELECT contact_phone, agent_id, channel, number_phone, occurred_at
           FROM last_interactions WHERE contact_phone = ?"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(contact_phone)
        .fetch_optional(pool)
        .await?;
    if let Some(row) = row {
        let occurred_at: i64 = row.try_get("occurred_at")?;
        return Ok(Some(LastInteractionRecord {
            contact_phone: row.try_get("contact_phone")?,
            agent_id: row.try_get("agent_id")?,
            channel: row.try_get("channel")?,
            number_phone: get_opt_str(&row, "number_phone")?,
            occurred_at: i64_to_datetime(occurred_at),
        }));
    }
    Ok(None)
}

// -- push subscriptions --------------------------------------------------

pub async fn upsert_push_subscription(
    pool: &AnyPool,
    kind: DbKind,
    record: &PushSubscriptionRecord,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO push_subscriptions (id, agent_id, endpoint, key_p256dh, key_auth, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(endpoint) DO UPDATE SET
               agent_id=excluded.agent_id,
               key_p256dh=excluded.key_p256dh,
               key_auth=excluded.key_auth"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.agent_id)
        .bind(&record.endpoint)
        .bind(&record.key_p256dh)
        .bind(&record.key_auth)
        .bind(datetime_to_i64(record.created_at))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_push_subscriptions(
    pool: &AnyPool,
    kind: DbKind,
    agent_id: &str,
) -> Result<Vec<PushSubscriptionRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, agent_id, endpoint, key_p256dh, key_auth, created_at
           FROM push_subscriptions WHERE agent_id = ? ORDER BY created_at"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(agent_id)
        .fetch_all(pool)
        .await?;
    let mut result = Vec::new();
    for row in rows {
        let created_at: i64 = row.try_get("created_at")?;
        result.push(PushSubscriptionRecord {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            endpoint: row.try_get("endpoint")?,
            key_p256dh: row.try_get("key_p256dh")?,
            key_auth: row.try_get("key_auth")?,
            created_at: i64_to_datetime(created_at),
        });
    }
    Ok(result)
}

pub async fn delete_push_subscription(pool: &AnyPool, kind: DbKind, id: &str) -> Result<()> {
    let sql = rewrite_sql("DELETE FROM push_subscriptions WHERE id = ?", kind);
    sqlx::query(sql.as_ref()).bind(id).execute(pool).await?;
    Ok(())
}

// -- activities ----------------------------------------------------------

pub async fn insert_activity(
    pool: &AnyPool,
    kind: DbKind,
    agent_id: Option<&str>,
    contact_phone: Option<&str>,
    activity_kind: &str,
    detail: Option<&str>,
) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO activities (id, agent_id, contact_phone, kind, detail, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(Uuid::new_v4().to_string())
        .bind(agent_id)
        .bind(contact_phone)
        .bind(activity_kind)
        .bind(detail)
        .bind(datetime_to_i64(Utc::now()))
        .execute(pool)
        .await?;
    Ok(())
}

// -- counts (status endpoint) --------------------------------------------

pub async fn count_rows(pool: &AnyPool, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(1) FROM {table}");
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(pool)
        .await
        .unwrap_or(0)
}
