use rusqlite::Connection;
use serde_json::json;

use crate::ipc::helpers::{
    dispatch, get_actor, get_opt_str, get_required_str, get_str_array, get_usize_or, records_json,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{AttendanceStatus, Ledger, LedgerKind, Occurrence, StatusCode};
use crate::notify::SqliteSink;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_RATE_WINDOW: usize = 30;

fn parse_status_with_rules(
    status_str: &str,
    remarks: Option<&str>,
) -> Result<AttendanceStatus, HandlerErr> {
    let status = AttendanceStatus::parse(status_str)?;
    // Engine stores whatever it is handed; the justification rule for
    // excused absences lives here at the boundary.
    if status == AttendanceStatus::Excused && remarks.map(str::trim).unwrap_or("").is_empty() {
        return Err(HandlerErr::bad_params("EXCUSED requires remarks"));
    }
    Ok(status)
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let context_id = get_required_str(params, "contextId")?;
    let date = get_required_str(params, "date")?;
    let status_str = get_required_str(params, "status")?;
    let remarks = get_opt_str(params, "remarks");
    let actor = get_actor(params)?;
    let status = parse_status_with_rules(&status_str, remarks.as_deref())?;
    let occurrence = Occurrence::parse_day(&date)?;

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let rec = ledger.upsert_record(
        &subject_id,
        &context_id,
        &occurrence,
        status,
        &actor,
        remarks.as_deref(),
    )?;
    Ok(json!({ "record": serde_json::to_value(&rec).unwrap_or_else(|_| json!({})) }))
}

fn attendance_bulk_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_ids = get_str_array(params, "subjectIds")?;
    let context_id = get_required_str(params, "contextId")?;
    let date = get_required_str(params, "date")?;
    let status_str = get_required_str(params, "status")?;
    let actor = get_actor(params)?;
    let status = parse_status_with_rules(&status_str, None)?;
    let occurrence = Occurrence::parse_day(&date)?;

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let count = ledger.bulk_upsert(&subject_ids, &context_id, &occurrence, status, &actor)?;
    Ok(json!({ "count": count }))
}

fn attendance_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let context_id = get_opt_str(params, "contextId");
    let limit = get_usize_or(params, "limit", DEFAULT_HISTORY_LIMIT);
    let offset = get_usize_or(params, "offset", 0);

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let records = ledger.query_history(
        &subject_id,
        LedgerKind::Attendance,
        context_id.as_deref(),
        limit,
        offset,
    )?;
    Ok(records_json(&records))
}

fn attendance_rate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let status_str = get_opt_str(params, "status").unwrap_or_else(|| "PRESENT".to_string());
    let status = AttendanceStatus::parse(&status_str)?;
    let window = get_usize_or(params, "window", DEFAULT_RATE_WINDOW);

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let rate = ledger.compute_rate(&subject_id, LedgerKind::Attendance, status.as_str(), window)?;
    Ok(json!({ "ratePercent": rate }))
}

fn attendance_reset_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let context_id = get_required_str(params, "contextId")?;
    let date = get_required_str(params, "date")?;
    let actor = get_actor(params)?;
    let occurrence = Occurrence::parse_day(&date)?;

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let deleted = ledger.reset_context(&context_id, &occurrence, &actor)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(dispatch(state, req, attendance_mark)),
        "attendance.bulkMark" => Some(dispatch(state, req, attendance_bulk_mark)),
        "attendance.history" => Some(dispatch(state, req, attendance_history)),
        "attendance.rate" => Some(dispatch(state, req, attendance_rate)),
        "attendance.resetDay" => Some(dispatch(state, req, attendance_reset_day)),
        _ => None,
    }
}
