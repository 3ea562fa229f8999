use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Actor, LedgerError, Role};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        super::error::err(id, self.code, self.message, self.details)
    }
}

impl From<LedgerError> for HandlerErr {
    fn from(e: LedgerError) -> HandlerErr {
        let code = match &e {
            LedgerError::Unauthorized => "unauthorized",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Validation(_) => "bad_params",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Storage(_) => "db_failed",
        };
        HandlerErr {
            code,
            message: e.to_string(),
            details: None,
        }
    }
}

/// Every domain method needs an open workspace; route the request body
/// through `f` with the connection and wrap the outcome in the envelope.
pub fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_usize_or(params: &serde_json::Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub fn get_str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!(
                "{} must be an array of strings",
                key
            )));
        };
        out.push(s.to_string());
    }
    Ok(out)
}

/// The identity provider attaches `params.actor = { id, role }` to every
/// privileged request. A missing or id-less actor is unauthorized, not a
/// params problem; an unknown role string is.
pub fn get_actor(params: &serde_json::Value) -> Result<Actor, HandlerErr> {
    let Some(actor) = params.get("actor") else {
        return Err(HandlerErr {
            code: "unauthorized",
            message: "missing params.actor".to_string(),
            details: None,
        });
    };
    let Some(id) = actor.get("id").and_then(|v| v.as_str()) else {
        return Err(HandlerErr {
            code: "unauthorized",
            message: "actor has no id".to_string(),
            details: None,
        });
    };
    if id.trim().is_empty() {
        return Err(HandlerErr {
            code: "unauthorized",
            message: "actor has no id".to_string(),
            details: None,
        });
    }
    let role_str = actor
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("actor.role must be a string"))?;
    let role = Role::parse(role_str)?;
    Ok(Actor {
        id: id.to_string(),
        role,
    })
}

pub fn records_json(records: &[crate::ledger::LedgerRecord]) -> serde_json::Value {
    json!({
        "records": records
            .iter()
            .map(|r| serde_json::to_value(r).unwrap_or_else(|_| json!({})))
            .collect::<Vec<_>>()
    })
}
