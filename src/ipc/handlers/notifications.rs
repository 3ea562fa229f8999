use rusqlite::Connection;
use serde_json::json;

use crate::ipc::helpers::{dispatch, get_opt_str, get_usize_or, HandlerErr};
use crate::ipc::types::{AppState, Request};

fn notifications_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let target = get_opt_str(params, "targetUserId");
    let limit = get_usize_or(params, "limit", 50);
    let mut stmt = conn
        .prepare(
            "SELECT id, target_user_id, title, message, category, priority, created_at
             FROM notifications
             WHERE (?1 IS NULL OR target_user_id = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )
        .map_err(|e| HandlerErr {
            code: "db_failed",
            message: e.to_string(),
            details: None,
        })?;
    let notifications = stmt
        .query_map((target.as_deref(), limit as i64), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "targetUserId": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "message": r.get::<_, String>(3)?,
                "category": r.get::<_, String>(4)?,
                "priority": r.get::<_, String>(5)?,
                "createdAt": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "notifications": notifications }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(dispatch(state, req, notifications_list)),
        _ => None,
    }
}
