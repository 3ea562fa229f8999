use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::helpers::{dispatch, get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::LedgerKind;

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_failed",
        message: e.to_string(),
        details: None,
    }
}

fn roster_add_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let display_name = get_required_str(params, "displayName")?;
    let id = get_opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let sort_order = params.get("sortOrder").and_then(|v| v.as_i64()).unwrap_or(0);
    let active = params.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
    conn.execute(
        "INSERT INTO subjects(id, class_id, display_name, active, sort_order)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           class_id = excluded.class_id,
           display_name = excluded.display_name,
           active = excluded.active,
           sort_order = excluded.sort_order",
        (&id, &class_id, &display_name, active as i64, sort_order),
    )
    .map_err(db_err)?;
    Ok(json!({ "id": id }))
}

fn roster_add_context(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let kind_str = get_required_str(params, "kind")?;
    let label = get_required_str(params, "label")?;
    let kind = LedgerKind::parse(&kind_str)?;
    let id = get_opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO contexts(id, class_id, kind, label)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           class_id = excluded.class_id,
           kind = excluded.kind,
           label = excluded.label",
        (&id, &class_id, kind.as_str(), &label),
    )
    .map_err(db_err)?;
    Ok(json!({ "id": id }))
}

fn roster_list_subjects(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, display_name, active, sort_order
             FROM subjects
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let subjects = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "displayName": r.get::<_, String>(1)?,
                "active": r.get::<_, i64>(2)? != 0,
                "sortOrder": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "subjects": subjects }))
}

// Cascades through ledger_records via the schema's ON DELETE CASCADE.
fn roster_remove_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let n = conn
        .execute("DELETE FROM subjects WHERE id = ?", [&id])
        .map_err(db_err)?;
    if n == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "removed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.addSubject" => Some(dispatch(state, req, roster_add_subject)),
        "roster.addContext" => Some(dispatch(state, req, roster_add_context)),
        "roster.listSubjects" => Some(dispatch(state, req, roster_list_subjects)),
        "roster.removeSubject" => Some(dispatch(state, req, roster_remove_subject)),
        _ => None,
    }
}
