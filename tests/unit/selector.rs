use chrono::{Duration, Utc};
use dialhub::db::NumberPoolRecord;
use dialhub::selector::is_eligible;

fn entry(phone: &str) -> NumberPoolRecord {
    NumberPoolRecord {
        phone: phone.to_string(),
        active: true,
        owner_agent_id: None,
        cooldown_until: None,
        daily_count: 0,
        last_used_date: None,
    }
}

#[test]
fn test_active_no_cooldown_is_eligible() {
    assert!(is_eligible(&entry("+61255501234"), Utc::now()));
}

#[test]
fn test_inactive_never_eligible() {
    let mut e = entry("+61255501234");
    e.active = false;
    assert!(!is_eligible(&e, Utc::now()));
}

#[test]
fn test_future_cooldown_blocks() {
    let now = Utc::now();
    let mut e = entry("+61255501234");
    e.cooldown_until = Some(now + Duration::hours(1));
    assert!(!is_eligible(&e, now));
}

#[test]
fn test_elapsed_cooldown_unblocks() {
    let now = Utc::now();
    let mut e = entry("+61255501234");
    e.cooldown_until = Some(now - Duration::seconds(1));
    assert!(is_eligible(&e, now));
}

#[test]
fn test_cooldown_boundary_is_inclusive() {
    let now = Utc::now();
    let mut e = entry("+61255501234");
    e.cooldown_until = Some(now);
    assert!(is_eligible(&e, now));
}

#[test]
fn test_inactive_with_elapsed_cooldown_still_blocked() {
    let now = Utc::now();
    let mut e = entry("+61255501234");
    e.active = false;
    e.cooldown_until = Some(now - Duration::hours(2));
    assert!(!is_eligible(&e, now));
}
