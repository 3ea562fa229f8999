use rusqlite::Connection;
use serde_json::json;

use crate::ipc::helpers::{
    dispatch, get_actor, get_opt_str, get_required_str, get_usize_or, records_json, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{GradeStatus, Ledger, LedgerKind, Occurrence, StatusCode};
use crate::notify::SqliteSink;

// An assignment is a one-shot context, like a surah: a re-grade replaces the
// existing result rather than appending a sibling row.
fn grading_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let context_id = get_required_str(params, "contextId")?;
    let status_str = get_required_str(params, "status")?;
    let remarks = get_opt_str(params, "remarks");
    let actor = get_actor(params)?;
    let status = GradeStatus::parse(&status_str)?;

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let rec = ledger.upsert_record(
        &subject_id,
        &context_id,
        &Occurrence::OneShot,
        status,
        &actor,
        remarks.as_deref(),
    )?;
    Ok(json!({ "record": serde_json::to_value(&rec).unwrap_or_else(|_| json!({})) }))
}

fn grading_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let context_id = get_opt_str(params, "contextId");
    let limit = get_usize_or(params, "limit", 50);
    let offset = get_usize_or(params, "offset", 0);

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let records = ledger.query_history(
        &subject_id,
        LedgerKind::Grading,
        context_id.as_deref(),
        limit,
        offset,
    )?;
    Ok(records_json(&records))
}

fn grading_pass_rate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let window = get_usize_or(params, "window", 30);

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let rate = ledger.compute_rate(
        &subject_id,
        LedgerKind::Grading,
        GradeStatus::Pass.as_str(),
        window,
    )?;
    Ok(json!({ "passPercent": rate }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.record" => Some(dispatch(state, req, grading_record)),
        "grading.history" => Some(dispatch(state, req, grading_history)),
        "grading.passRate" => Some(dispatch(state, req, grading_pass_rate)),
        _ => None,
    }
}
