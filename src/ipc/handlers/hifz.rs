use rusqlite::Connection;
use serde_json::json;

use crate::ipc::helpers::{
    dispatch, get_actor, get_opt_str, get_required_str, get_usize_or, records_json, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Ledger, LedgerKind, MasteryStatus, Occurrence, StatusCode};
use crate::notify::SqliteSink;

// A surah is a one-shot context: mastery is keyed without a date, so
// re-submissions toggle the single row in place.
fn hifz_set_mastery(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let context_id = get_required_str(params, "contextId")?;
    let status_str = get_required_str(params, "status")?;
    let remarks = get_opt_str(params, "remarks");
    let actor = get_actor(params)?;
    let status = MasteryStatus::parse(&status_str)?;

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

fn hifz_history(
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
        LedgerKind::Hifz,
        context_id.as_deref(),
        limit,
        offset,
    )?;
    Ok(records_json(&records))
}

fn hifz_progress(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let window = get_usize_or(params, "window", 30);

    let sink = SqliteSink::new(conn);
    let ledger = Ledger::new(conn, &sink);
    let rate = ledger.compute_rate(
        &subject_id,
        LedgerKind::Hifz,
        MasteryStatus::Mastered.as_str(),
        window,
    )?;
    Ok(json!({ "masteredPercent": rate }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "hifz.setMastery" => Some(dispatch(state, req, hifz_set_mastery)),
        "hifz.history" => Some(dispatch(state, req, hifz_history)),
        "hifz.progress" => Some(dispatch(state, req, hifz_progress)),
        _ => None,
    }
}
