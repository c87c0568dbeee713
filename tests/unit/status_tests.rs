//! Status rendering.

use chrono::Utc;
use feature_relay::models::session::{SessionMetadata, SessionRecord, SessionStatus};
use feature_relay::status::{render_status, DEFAULT_HISTORY_LIMIT};

fn record(external: Option<&str>, status: SessionStatus) -> SessionRecord {
    let now = Utc::now();
    SessionRecord::new("auth", external.map(str::to_owned), status, now, now)
}

#[test]
fn shows_current_session_details() {
    let current = record(Some("abc-123"), SessionStatus::Active).with_metadata(SessionMetadata {
        model: Some("opus".into()),
        ..SessionMetadata::default()
    });

    let out = render_status("auth", Some(&current), &[], DEFAULT_HISTORY_LIMIT);

    assert!(out.starts_with("Feature: auth\n"));
    assert!(out.contains(&current.id));
    assert!(out.contains("External ID:  abc-123"));
    assert!(out.contains("Status:       active"));
    assert!(out.contains("Resumable:    yes"));
    assert!(out.contains("Model:        opus"));
    assert!(!out.contains("History"));
}

#[test]
fn history_is_capped_with_remainder_count() {
    let current = record(Some("abc-123"), SessionStatus::Active);
    let history: Vec<SessionRecord> = (0..8)
        .map(|i| record(Some(&format!("ext-id-{i}")), SessionStatus::Interrupted))
        .collect();

    let out = render_status("auth", Some(&current), &history, DEFAULT_HISTORY_LIMIT);

    assert!(out.contains("History (8):"));
    for shown in &history[..5] {
        assert!(out.contains(shown.external_session_id.as_deref().unwrap()));
    }
    for hidden in &history[5..] {
        assert!(!out.contains(hidden.external_session_id.as_deref().unwrap()));
    }
    assert!(out.contains("... and 3 more"));
}

#[test]
fn no_remainder_line_when_everything_fits() {
    let current = record(None, SessionStatus::Interrupted);
    let history = vec![record(None, SessionStatus::Active)];

    let out = render_status("auth", Some(&current), &history, DEFAULT_HISTORY_LIMIT);
    assert!(out.contains("History (1):"));
    assert!(!out.contains("more"));
}

#[test]
fn every_field_is_on_its_own_line() {
    let current = record(Some("abc-123"), SessionStatus::Active);
    let history = vec![
        record(Some("old-1"), SessionStatus::Interrupted),
        record(None, SessionStatus::Completed),
    ];

    let out = render_status("auth", Some(&current), &history, 1);
    let lines: Vec<&str> = out.lines().collect();

    assert!(out.ends_with('\n'));
    assert_eq!(lines.len(), 10, "{out}");
    assert_eq!(lines[0], "Feature: auth");
    assert_eq!(lines[1], format!("  Session:      {}", current.id));
    assert_eq!(lines[2], "  External ID:  abc-123");
    assert_eq!(lines[3], "  Status:       active");
    assert_eq!(lines[4], "  Resumable:    yes");
    assert!(lines[5].starts_with("  Last active:  "));
    assert_eq!(lines[6], "  Model:        default");
    assert_eq!(lines[7], "  History (2):");
    assert!(lines[8].ends_with("old-1"));
    assert_eq!(lines[9], "    ... and 1 more");
}
