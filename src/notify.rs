use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use uuid::Uuid;

/// Outbound side channel for status alerts. At-most-once: the ledger makes a
/// single attempt per flagged write and never retries.
pub trait NotificationSink {
    fn notify(
        &self,
        target_user_id: &str,
        title: &str,
        message: &str,
        category: &str,
        priority: &str,
    ) -> anyhow::Result<()>;
}

/// Queue notifications into the workspace database; the front-end drains
/// them on its own schedule.
pub struct SqliteSink<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSink<'a> {
    pub fn new(conn: &'a Connection) -> SqliteSink<'a> {
        SqliteSink { conn }
    }
}

impl NotificationSink for SqliteSink<'_> {
    fn notify(
        &self,
        target_user_id: &str,
        title: &str,
        message: &str,
        category: &str,
        priority: &str,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO notifications(id, target_user_id, title, message, category, priority, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                target_user_id,
                title,
                message,
                category,
                priority,
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        )?;
        Ok(())
    }
}

/// Dispatch failures are logged and dropped; a downstream notification
/// problem must never roll back a ledger write.
pub fn best_effort(
    sink: &dyn NotificationSink,
    target_user_id: &str,
    title: &str,
    message: &str,
    category: &str,
    priority: &str,
) {
    if let Err(e) = sink.notify(target_user_id, title, message, category, priority) {
        tracing::warn!(
            target_user_id,
            title,
            error = %e,
            "notification dispatch failed; ledger write stands"
        );
    }
}
