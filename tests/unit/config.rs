use dialhub::config::{expand_tilde, resolve_database_url, Config};

#[test]
fn test_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 8093);
    assert!(cfg.auth.token.is_none());
    assert!(cfg.database.url.is_none());
    assert_eq!(cfg.database.sqlite_path, "~/.dialhub/state.sqlite");
    assert_eq!(cfg.telephony.api_base_url, "https://api.twilio.com");
    assert_eq!(cfg.telephony.request_timeout_seconds, 10);
    assert_eq!(cfg.presence.active_window_seconds, 300);
    assert_eq!(cfg.ingest.retry_attempts, 3);
    assert_eq!(cfg.ingest.retry_delay_ms, 200);
    assert_eq!(cfg.dead_letter.path, "~/.dialhub/dead-letter.jsonl");
    assert_eq!(cfg.push.ttl_seconds, 3600);
    assert_eq!(cfg.conversation.close_after_days, 7);
}

#[test]
fn test_partial_json_fills_defaults() {
    let raw = r#"{
        "server": {"host": "127.0.0.1", "port": 9000},
        "telephony": {
            "account_sid": "AC123",
            "auth_token": "secret",
            "api_base_url": "https://api.twilio.com",
            "public_base_url": "https://dialer.example.com",
            "request_timeout_seconds": 5
        }
    }"#;
    let cfg: Config = serde_json::from_str(raw).unwrap();
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.telephony.account_sid.as_deref(), Some("AC123"));
    // Sections absent from the file keep their defaults.
    assert_eq!(cfg.ingest.retry_attempts, 3);
    assert_eq!(cfg.dead_letter.path, "~/.dialhub/dead-letter.jsonl");
}

#[test]
fn test_empty_json_object_is_all_defaults() {
    let cfg: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg.server.port, Config::default().server.port);
}

#[test]
fn test_config_roundtrip() {
    let cfg = Config::default();
    let json = serde_json::to_string(&cfg).unwrap();
    let parsed: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.server.port, cfg.server.port);
    assert_eq!(parsed.database.sqlite_path, cfg.database.sqlite_path);
}

#[test]
fn test_expand_tilde() {
    assert_eq!(
        expand_tilde("/var/lib/dialhub/state.sqlite"),
        std::path::PathBuf::from("/var/lib/dialhub/state.sqlite")
    );
    let expanded = expand_tilde("~/x.sqlite");
    assert!(!expanded.to_string_lossy().starts_with("~"));
}

#[test]
fn test_resolve_database_url_prefers_explicit() {
    let mut cfg = Config::default();
    cfg.database.url = Some("postgres://dialer:pw@localhost/dialhub".to_string());
    assert_eq!(
        resolve_database_url(&cfg),
        "postgres://dialer:pw@localhost/dialhub"
    );
}

#[test]
fn test_resolve_database_url_sqlite_fallback() {
    let mut cfg = Config::default();
    cfg.database.sqlite_path = "/tmp/dialhub-test/state.sqlite".to_string();
    assert_eq!(
        resolve_database_url(&cfg),
        "sqlite:///tmp/dialhub-test/state.sqlite"
    );
}
