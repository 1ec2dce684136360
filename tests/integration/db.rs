use chrono::Utc;
use dialhub::callstate::{self, CallbackOutcome, CallStatus};
use dialhub::config::Config;
use dialhub::db::{self, CallRecord, DbKind, MessageRecord, NumberPoolRecord};
use dialhub::dead_letter::{DeadLetterBuffer, DeadLetterKind};
use dialhub::ingest::{self, IngestOutcome};
use dialhub::provider::{ConfigCredentials, ProviderClient};
use dialhub::selector;
use dialhub::types::{Channel, InboundSmsEvent, StatusCallbackEvent};
use dialhub::AppState;
use sqlx::AnyPool;
use tempfile::TempDir;
use uuid::Uuid;

async fn create_test_pool(db_path: &str) -> (AnyPool, DbKind) {
    sqlx::any::install_default_drivers();
    let db_url = format!("sqlite://{}?mode=rwc", db_path);
    let pool = AnyPool::connect(&db_url).await.unwrap();
    let kind = DbKind::Sqlite;
    db::init_db(&pool, kind).await.unwrap();
    (pool, kind)
}

fn test_state(pool: AnyPool, kind: DbKind, dead_letter_path: std::path::PathBuf) -> AppState {
    let config = Config::default();
    let http = reqwest::Client::new();
    AppState {
        credentials: ConfigCredentials::new(&config.telephony),
        provider: ProviderClient::new(http.clone(), &config.telephony),
        dead_letter: DeadLetterBuffer::new(dead_letter_path),
        config,
        pool,
        db_kind: kind,
        http,
    }
}

fn inbound_message(sid: &str, conversation_id: &str) -> MessageRecord {
    MessageRecord {
        id: Uuid::new_v4().to_string(),
        provider_sid: sid.to_string(),
        conversation_id: conversation_id.to_string(),
        direction: "inbound".to_string(),
        from_number: "+61400000001".to_string(),
        to_number: "+61255501234".to_string(),
        body: Some("hello".to_string()),
        status: "received".to_string(),
        agent_id: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_conversation_readback_with_null_agent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let (pool, kind) = create_test_pool(db_path.to_str().unwrap()).await;

    // No agents exist yet, so the thread is created with every nullable
    // column NULL; the read-back must still decode.
    let conversation =
        db::find_or_create_conversation(&pool, kind, "+61400000001", None, None, Utc::now())
            .await
            .unwrap();
    assert!(conversation.agent_id.is_none());
    assert!(conversation.number_phone.is_none());

    let again = db::get_conversation_by_phone(&pool, kind, "+61400000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.id, conversation.id);
}

#[tokio::test]
async fn test_find_or_create_is_single_row() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let (pool, kind) = create_test_pool(db_path.to_str().unwrap()).await;

    let now = Utc::now();
    let first = db::find_or_create_conversation(&pool, kind, "+61400000001", None, None, now)
        .await
        .unwrap();
    let second =
        db::find_or_create_conversation(&pool, kind, "+61400000001", Some("rep1"), None, now)
            .await
            .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(db::count_rows(&pool, "conversations").await, 1);
}

#[tokio::test]
async fn test_pool_entry_null_columns_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let (pool, kind) = create_test_pool(db_path.to_str().unwrap()).await;

    let record = NumberPoolRecord {
        phone: "+61255501234".to_string(),
        active: true,
        owner_agent_id: None,
        cooldown_until: None,
        daily_count: 0,
        last_used_date: None,
    };
    db::upsert_pool_entry(&pool, kind, &record).await.unwrap();

    let loaded = db::get_pool_entry(&pool, kind, "+61255501234")
        .await
        .unwrap()
        .unwrap();
    assert!(loaded.active);
    assert!(loaded.owner_agent_id.is_none());
    assert!(loaded.cooldown_until.is_none());
    assert!(loaded.last_used_date.is_none());
}

#[tokio::test]
async fn test_select_outbound_number_per_channel() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let (pool, kind) = create_test_pool(db_path.to_str().unwrap()).await;

    let record = NumberPoolRecord {
        phone: "+61255501234".to_string(),
        active: true,
        owner_agent_id: None,
        cooldown_until: None,
        daily_count: 0,
        last_used_date: None,
    };
    db::upsert_pool_entry(&pool, kind, &record).await.unwrap();

    let now = Utc::now();
    let sms = selector::select_outbound_number(&pool, kind, Channel::Sms, None, "+61400000001", now)
        .await
        .unwrap()
        .expect("eligible number for sms");
    let voice =
        selector::select_outbound_number(&pool, kind, Channel::Voice, None, "+61400000001", now)
            .await
            .unwrap()
            .expect("eligible number for voice");
    assert_eq!(sms.phone, voice.phone);

    // Both sends land the daily-use increment on the same pool entry.
    let loaded = db::get_pool_entry(&pool, kind, "+61255501234")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.daily_count, 2);
}

#[tokio::test]
async fn test_record_inbound_message_idempotent_with_touch() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let (pool, kind) = create_test_pool(db_path.to_str().unwrap()).await;

    let now = Utc::now();
    let conversation =
        db::find_or_create_conversation(&pool, kind, "+61400000001", None, Some("+61255501234"), now)
            .await
            .unwrap();

    let record = inbound_message("SM100", &conversation.id);
    let first = db::record_inbound_message(&pool, kind, &record, "+61400000001", "sms", now)
        .await
        .unwrap();
    assert!(first);

    // Same provider sid again: no second row, no second unread increment.
    let replayed = inbound_message("SM100", &conversation.id);
    let second = db::record_inbound_message(&pool, kind, &replayed, "+61400000001", "sms", now)
        .await
        .unwrap();
    assert!(!second);

    assert_eq!(db::count_rows(&pool, "messages").await, 1);
    let conversation = db::get_conversation_by_phone(&pool, kind, "+61400000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.status, "OPEN");
}

#[tokio::test]
async fn test_status_callbacks_on_fresh_call_with_null_info() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let (pool, kind) = create_test_pool(db_path.to_str().unwrap()).await;

    let now = Utc::now();
    let record = CallRecord {
        id: Uuid::new_v4().to_string(),
        provider_sid: "CA100".to_string(),
        direction: "outbound".to_string(),
        from_number: "+61255501234".to_string(),
        to_number: "+61400000001".to_string(),
        agent_id: None,
        status: CallStatus::Queued.as_str().to_string(),
        duration_secs: None,
        recording_url: None,
        outcome: None,
        created_at: now,
        updated_at: now,
    };
    db::insert_call_idempotent(&pool, kind, &record).await.unwrap();

    // First callback arrives while duration/recording/agent are all NULL.
    let ringing = StatusCallbackEvent {
        call_sid: "CA100".to_string(),
        status: "ringing".to_string(),
        from: None,
        to: None,
        duration_secs: None,
        recording_url: None,
    };
    let outcome = callstate::apply_status_callback(&pool, kind, &ringing)
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Applied(CallStatus::Ringing));

    let completed = StatusCallbackEvent {
        call_sid: "CA100".to_string(),
        status: "completed".to_string(),
        from: None,
        to: None,
        duration_secs: Some(42),
        recording_url: None,
    };
    let outcome = callstate::apply_status_callback(&pool, kind, &completed)
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Applied(CallStatus::Completed));

    // Stale out-of-order delivery after the terminal state: status locked.
    let late_ringing = StatusCallbackEvent {
        call_sid: "CA100".to_string(),
        status: "ringing".to_string(),
        from: None,
        to: None,
        duration_secs: None,
        recording_url: None,
    };
    let outcome = callstate::apply_status_callback(&pool, kind, &late_ringing)
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Ignored);

    // A late recording url still merges without moving the status.
    let recording = StatusCallbackEvent {
        call_sid: "CA100".to_string(),
        status: "busy".to_string(),
        from: None,
        to: None,
        duration_secs: None,
        recording_url: Some("https://rec.example.com/CA100".to_string()),
    };
    let outcome = callstate::apply_status_callback(&pool, kind, &recording)
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::MergedInfo);

    let call = db::get_call_by_sid(&pool, kind, "CA100").await.unwrap().unwrap();
    assert_eq!(call.status, "completed");
    assert_eq!(call.duration_secs, Some(42));
    assert_eq!(
        call.recording_url.as_deref(),
        Some("https://rec.example.com/CA100")
    );
}

#[tokio::test]
async fn test_ingest_sms_then_replay_reaches_same_state() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let (pool, kind) = create_test_pool(db_path.to_str().unwrap()).await;
    let state = test_state(pool.clone(), kind, temp_dir.path().join("dead-letter.jsonl"));

    let event = InboundSmsEvent {
        message_sid: "SM200".to_string(),
        from: "+61400000001".to_string(),
        to: "+61255501234".to_string(),
        body: Some("hello".to_string()),
        num_media: 0,
    };

    let outcome = ingest::ingest_sms(&state, &event).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Created);

    // The provider redelivers the same event: end state is unchanged.
    let outcome = ingest::ingest_sms(&state, &event).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Duplicate);

    assert_eq!(db::count_rows(&pool, "messages").await, 1);
    assert_eq!(db::count_rows(&pool, "conversations").await, 1);
    let conversation = db::get_conversation_by_phone(&state.pool, kind, "+61400000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.unread_count, 1);

    // A buffered copy replayed later is also a no-op against the same state.
    let params = dialhub::types::parse_form(
        "Body=hello&From=%2B61400000001&MessageSid=SM200&To=%2B61255501234",
    )
    .unwrap();
    state
        .dead_letter
        .append(DeadLetterKind::Sms, &params, "database unavailable");
    let summary = ingest::replay_dead_letters(&state).await;
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.replayed, 0);
    assert_eq!(summary.failed, 0);

    assert_eq!(db::count_rows(&pool, "messages").await, 1);
    let conversation = db::get_conversation_by_phone(&state.pool, kind, "+61400000001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.unread_count, 1);
}
