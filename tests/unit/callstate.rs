use dialhub::callstate::{plan_transition, CallStatus, Transition};

#[test]
fn test_parse_known_statuses() {
    assert_eq!(CallStatus::parse("queued"), Some(CallStatus::Queued));
    assert_eq!(CallStatus::parse("in-progress"), Some(CallStatus::InProgress));
    assert_eq!(CallStatus::parse("in_progress"), Some(CallStatus::InProgress));
    assert_eq!(CallStatus::parse("no-answer"), Some(CallStatus::NoAnswer));
    assert_eq!(CallStatus::parse("cancelled"), Some(CallStatus::Canceled));
    assert_eq!(CallStatus::parse(" Completed "), Some(CallStatus::Completed));
}

#[test]
fn test_parse_unknown_status() {
    assert_eq!(CallStatus::parse("exploded"), None);
    assert_eq!(CallStatus::parse(""), None);
}

#[test]
fn test_roundtrip_as_str() {
    for status in [
        CallStatus::Queued,
        CallStatus::Initiated,
        CallStatus::Ringing,
        CallStatus::Answered,
        CallStatus::InProgress,
        CallStatus::Completed,
        CallStatus::Busy,
        CallStatus::Failed,
        CallStatus::NoAnswer,
        CallStatus::Canceled,
    ] {
        assert_eq!(CallStatus::parse(status.as_str()), Some(status));
    }
}

#[test]
fn test_priority_is_monotone_through_lifecycle() {
    assert!(CallStatus::Queued.priority() < CallStatus::Initiated.priority());
    assert!(CallStatus::Initiated.priority() < CallStatus::Ringing.priority());
    assert!(CallStatus::Ringing.priority() < CallStatus::Answered.priority());
    assert!(CallStatus::Answered.priority() < CallStatus::InProgress.priority());
    assert!(CallStatus::InProgress.priority() < CallStatus::Completed.priority());
}

#[test]
fn test_terminal_states_share_top_priority() {
    let terminals = [
        CallStatus::Completed,
        CallStatus::Busy,
        CallStatus::Failed,
        CallStatus::NoAnswer,
        CallStatus::Canceled,
    ];
    for status in terminals {
        assert!(status.is_terminal());
        assert_eq!(status.priority(), CallStatus::Completed.priority());
    }
    assert!(!CallStatus::InProgress.is_terminal());
}

#[test]
fn test_forward_progress_applies() {
    assert_eq!(
        plan_transition(CallStatus::Queued, CallStatus::Ringing, false),
        Transition::Apply
    );
    assert_eq!(
        plan_transition(CallStatus::Ringing, CallStatus::Completed, true),
        Transition::Apply
    );
}

#[test]
fn test_completed_then_ringing_stays_completed() {
    // Out-of-order delivery after the call already ended.
    assert_eq!(
        plan_transition(CallStatus::Completed, CallStatus::Ringing, false),
        Transition::Ignore
    );
}

#[test]
fn test_terminal_accepts_late_info_only() {
    // A late callback carrying the recording url merges fields but the
    // status stays put.
    assert_eq!(
        plan_transition(CallStatus::Completed, CallStatus::Ringing, true),
        Transition::MergeInfo
    );
    assert_eq!(
        plan_transition(CallStatus::Busy, CallStatus::Failed, true),
        Transition::MergeInfo
    );
    assert_eq!(
        plan_transition(CallStatus::Busy, CallStatus::Failed, false),
        Transition::Ignore
    );
}

#[test]
fn test_duplicate_delivery_is_noop() {
    assert_eq!(
        plan_transition(CallStatus::Ringing, CallStatus::Ringing, false),
        Transition::Ignore
    );
    assert_eq!(
        plan_transition(CallStatus::Completed, CallStatus::Completed, false),
        Transition::Ignore
    );
}

#[test]
fn test_duplicate_with_new_info_merges() {
    assert_eq!(
        plan_transition(CallStatus::Completed, CallStatus::Completed, true),
        Transition::MergeInfo
    );
}

#[test]
fn test_non_terminal_regression_still_applies() {
    // Before a terminal state lands the latest callback wins, even when it
    // looks like a step backward.
    assert_eq!(
        plan_transition(CallStatus::InProgress, CallStatus::Ringing, false),
        Transition::Apply
    );
}
