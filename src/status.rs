//! Human-readable session status for a feature.

use crate::models::session::SessionRecord;

/// Default number of history entries shown.
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// Render the session summary for `feature`.
///
/// `history` is expected newest-first, as returned by
/// [`SessionStore::list`](crate::persistence::SessionStore::list). At most
/// `limit` entries are listed, followed by a count of the rest.
#[must_use]
pub fn render_status(
    feature: &str,
    current: Option<&SessionRecord>,
    history: &[SessionRecord],
    limit: usize,
) -> String {
    let mut out = format!("Feature: {feature}\n");

    let Some(record) = current else {
        out.push_str("  No session recorded.\n");
        return out;
    };

    let external = record
        .external_session_id
        .as_deref()
        .unwrap_or("not available");
    let resumable = if record.resumable { "yes" } else { "no" };

    out.push_str(&format!("  Session:      {}\n", record.id));
    out.push_str(&format!("  External ID:  {external}\n"));
    out.push_str(&format!("  Status:       {}\n", record.status));
    out.push_str(&format!("  Resumable:    {resumable}\n"));
    out.push_str(&format!(
        "  Last active:  {}\n",
        record.last_activity.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "  Model:        {}\n",
        record.model().unwrap_or("default")
    ));

    if history.is_empty() {
        return out;
    }

    out.push_str(&format!("  History ({}):\n", history.len()));
    for entry in history.iter().take(limit) {
        out.push_str(&history_line(entry));
    }
    if history.len() > limit {
        out.push_str(&format!("    ... and {} more\n", history.len() - limit));
    }
    out
}

/// One history row: `<started> <status> <external id or ->`.
#[must_use]
pub fn history_line(record: &SessionRecord) -> String {
    format!(
        "    {}  {:<11}  {}\n",
        record.started_at.format("%Y-%m-%d %H:%M"),
        record.status.as_str(),
        record.external_session_id.as_deref().unwrap_or("-")
    )
}
