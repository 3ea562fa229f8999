use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::notify::{self, NotificationSink};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("actor missing or lacks the required role")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("unique key breached outside the upsert path: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Privilege tiers supplied by the identity provider. Ordering matters:
/// later variants may do everything earlier ones can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Standard,
    Elevated,
    Super,
}

impl Role {
    pub fn parse(s: &str) -> Result<Role> {
        match s {
            "STANDARD" => Ok(Role::Standard),
            "ELEVATED" => Ok(Role::Elevated),
            "SUPER" => Ok(Role::Super),
            other => Err(LedgerError::Validation(format!("unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Attendance,
    Hifz,
    Grading,
}

impl LedgerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerKind::Attendance => "attendance",
            LedgerKind::Hifz => "hifz",
            LedgerKind::Grading => "grading",
        }
    }

    pub fn parse(s: &str) -> Result<LedgerKind> {
        match s {
            "attendance" => Ok(LedgerKind::Attendance),
            "hifz" => Ok(LedgerKind::Hifz),
            "grading" => Ok(LedgerKind::Grading),
            other => Err(LedgerError::Validation(format!(
                "unknown context kind: {}",
                other
            ))),
        }
    }
}

/// A closed status vocabulary for one ledger kind. The engine stores the
/// canonical string and enforces only key uniqueness; any per-status rules
/// belong to the handler that owns the enum.
pub trait StatusCode: Copy {
    const KIND: LedgerKind;
    fn as_str(&self) -> &'static str;
    /// Whether writing this status emits a best-effort notification.
    fn flags_notification(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Result<AttendanceStatus> {
        match s {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            "LATE" => Ok(AttendanceStatus::Late),
            "EXCUSED" => Ok(AttendanceStatus::Excused),
            other => Err(LedgerError::Validation(format!(
                "unknown attendance status: {}",
                other
            ))),
        }
    }
}

impl StatusCode for AttendanceStatus {
    const KIND: LedgerKind = LedgerKind::Attendance;

    fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Excused => "EXCUSED",
        }
    }

    fn flags_notification(&self) -> bool {
        // Unexplained absence alerts the guardian channel.
        matches!(self, AttendanceStatus::Absent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasteryStatus {
    Mastered,
    InProgress,
}

impl MasteryStatus {
    pub fn parse(s: &str) -> Result<MasteryStatus> {
        match s {
            "MASTERED" => Ok(MasteryStatus::Mastered),
            "IN_PROGRESS" => Ok(MasteryStatus::InProgress),
            other => Err(LedgerError::Validation(format!(
                "unknown mastery status: {}",
                other
            ))),
        }
    }
}

impl StatusCode for MasteryStatus {
    const KIND: LedgerKind = LedgerKind::Hifz;

    fn as_str(&self) -> &'static str {
        match self {
            MasteryStatus::Mastered => "MASTERED",
            MasteryStatus::InProgress => "IN_PROGRESS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeStatus {
    Pass,
    Fail,
}

impl GradeStatus {
    pub fn parse(s: &str) -> Result<GradeStatus> {
        match s {
            "PASS" => Ok(GradeStatus::Pass),
            "FAIL" => Ok(GradeStatus::Fail),
            other => Err(LedgerError::Validation(format!(
                "unknown grade status: {}",
                other
            ))),
        }
    }
}

impl StatusCode for GradeStatus {
    const KIND: LedgerKind = LedgerKind::Grading;

    fn as_str(&self) -> &'static str {
        match self {
            GradeStatus::Pass => "PASS",
            GradeStatus::Fail => "FAIL",
        }
    }
}

/// The date leg of the composite key. Timestamps are truncated to their day
/// before keying, so any two writes within one day collide on the same row.
/// One-shot contexts (a surah, an assignment) carry no date at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    Day(NaiveDate),
    OneShot,
}

impl Occurrence {
    /// Accepts a plain date (`2024-01-05`) or an RFC 3339 timestamp, which
    /// is truncated to the start of its day.
    pub fn parse_day(s: &str) -> Result<Occurrence> {
        if let Ok(d) = s.parse::<NaiveDate>() {
            return Ok(Occurrence::Day(d));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Ok(Occurrence::Day(ts.date_naive()));
        }
        Err(LedgerError::Validation(format!(
            "occurrence must be YYYY-MM-DD or an RFC 3339 timestamp: {}",
            s
        )))
    }

    pub fn key(&self) -> String {
        match self {
            Occurrence::Day(d) => d.format("%Y-%m-%d").to_string(),
            Occurrence::OneShot => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub subject_id: String,
    pub context_id: String,
    pub occurrence: Option<String>,
    pub status: String,
    pub remarks: Option<String>,
    pub recorded_by: String,
    pub recorded_at: String,
}

struct ContextRow {
    class_id: String,
    kind: String,
    label: String,
}

/// Keyed-record upsert service over one workspace connection. The store
/// handle and notification sink are injected per instance; there is no
/// ambient state.
pub struct Ledger<'a> {
    conn: &'a Connection,
    sink: &'a dyn NotificationSink,
}

impl<'a> Ledger<'a> {
    pub fn new(conn: &'a Connection, sink: &'a dyn NotificationSink) -> Ledger<'a> {
        Ledger { conn, sink }
    }

    /// Insert-or-update the record for (subject, context, occurrence).
    /// Last write wins for status and remarks; `recorded_at` is refreshed.
    pub fn upsert_record<S: StatusCode>(
        &self,
        subject_id: &str,
        context_id: &str,
        occurrence: &Occurrence,
        status: S,
        actor: &Actor,
        remarks: Option<&str>,
    ) -> Result<LedgerRecord> {
        require_authenticated(actor)?;
        let ctx = resolve_context(self.conn, context_id, S::KIND)?;
        check_subject(self.conn, subject_id, &ctx.class_id)?;
        let rec = write_record(
            self.conn,
            subject_id,
            context_id,
            occurrence,
            S::KIND,
            status.as_str(),
            actor,
            remarks,
        )?;
        if status.flags_notification() {
            self.dispatch_flag(subject_id, &ctx, &rec);
        }
        Ok(rec)
    }

    /// Apply one status to a batch of subjects in a single transaction.
    /// The first failure aborts the whole batch; no partial roster states.
    pub fn bulk_upsert<S: StatusCode>(
        &self,
        subject_ids: &[String],
        context_id: &str,
        occurrence: &Occurrence,
        status: S,
        actor: &Actor,
    ) -> Result<usize> {
        require_authenticated(actor)?;
        let ctx = resolve_context(self.conn, context_id, S::KIND)?;
        let tx = self.conn.unchecked_transaction().map_err(map_store_err)?;
        let mut written: Vec<LedgerRecord> = Vec::with_capacity(subject_ids.len());
        for subject_id in subject_ids {
            check_subject(&tx, subject_id, &ctx.class_id)?;
            let rec = write_record(
                &tx,
                subject_id,
                context_id,
                occurrence,
                S::KIND,
                status.as_str(),
                actor,
                None,
            )?;
            written.push(rec);
        }
        tx.commit().map_err(map_store_err)?;
        // Dispatch only after commit so rolled-back writes never alert.
        if status.flags_notification() {
            for rec in &written {
                self.dispatch_flag(&rec.subject_id, &ctx, rec);
            }
        }
        Ok(written.len())
    }

    /// Newest-first history for a subject, optionally scoped to a context,
    /// restartable via `offset`.
    pub fn query_history(
        &self,
        subject_id: &str,
        kind: LedgerKind,
        context_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT subject_id, context_id, occurrence, status, remarks, recorded_by, recorded_at
             FROM ledger_records
             WHERE subject_id = ?1 AND kind = ?2 AND (?3 IS NULL OR context_id = ?3)
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?4 OFFSET ?5",
        )?;
        let rows = stmt
            .query_map(
                (
                    subject_id,
                    kind.as_str(),
                    context_id,
                    limit as i64,
                    offset as i64,
                ),
                record_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Share of the most recent `window` records carrying `status_of_interest`,
    /// rounded to the nearest integer percent.
    pub fn compute_rate(
        &self,
        subject_id: &str,
        kind: LedgerKind,
        status_of_interest: &str,
        window: usize,
    ) -> Result<u8> {
        let mut stmt = self.conn.prepare(
            "SELECT status FROM ledger_records
             WHERE subject_id = ?1 AND kind = ?2
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?3",
        )?;
        let statuses = stmt
            .query_map((subject_id, kind.as_str(), window as i64), |r| {
                r.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rate_percent(&statuses, status_of_interest))
    }

    /// Hard-delete every record for a context+occurrence pair. Irreversible,
    /// so gated on the highest privilege tier.
    pub fn reset_context(
        &self,
        context_id: &str,
        occurrence: &Occurrence,
        actor: &Actor,
    ) -> Result<usize> {
        if actor.id.trim().is_empty() || actor.role < Role::Super {
            return Err(LedgerError::Unauthorized);
        }
        if !context_exists(self.conn, context_id)? {
            return Err(LedgerError::NotFound("context"));
        }
        let n = self.conn.execute(
            "DELETE FROM ledger_records WHERE context_id = ? AND occurrence = ?",
            (context_id, occurrence.key()),
        )?;
        Ok(n)
    }

    fn dispatch_flag(&self, subject_id: &str, ctx: &ContextRow, rec: &LedgerRecord) {
        let message = match &rec.occurrence {
            Some(day) => format!("Marked {} for {} on {}", rec.status, ctx.label, day),
            None => format!("Marked {} for {}", rec.status, ctx.label),
        };
        notify::best_effort(
            self.sink,
            subject_id,
            "Unexplained absence",
            &message,
            "attendance",
            "high",
        );
    }
}

/// Empty history reads as a perfect record. Callers surfacing this number
/// must treat "no data yet" and "always present" as the same 100.
pub fn rate_percent(statuses: &[String], of_interest: &str) -> u8 {
    if statuses.is_empty() {
        return 100;
    }
    let matching = statuses.iter().filter(|s| s.as_str() == of_interest).count();
    (100.0 * matching as f64 / statuses.len() as f64).round() as u8
}

fn require_authenticated(actor: &Actor) -> Result<()> {
    if actor.id.trim().is_empty() {
        return Err(LedgerError::Unauthorized);
    }
    Ok(())
}

fn resolve_context(conn: &Connection, context_id: &str, kind: LedgerKind) -> Result<ContextRow> {
    let row = conn
        .query_row(
            "SELECT class_id, kind, label FROM contexts WHERE id = ?",
            [context_id],
            |r| {
                Ok(ContextRow {
                    class_id: r.get(0)?,
                    kind: r.get(1)?,
                    label: r.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(LedgerError::NotFound("context"))?;
    if row.kind != kind.as_str() {
        return Err(LedgerError::Validation(format!(
            "context {} is a {} context, not {}",
            context_id,
            row.kind,
            kind.as_str()
        )));
    }
    Ok(row)
}

fn context_exists(conn: &Connection, context_id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM contexts WHERE id = ?", [context_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn check_subject(conn: &Connection, subject_id: &str, class_id: &str) -> Result<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ? AND class_id = ?",
            (subject_id, class_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(LedgerError::NotFound("subject"));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_record(
    conn: &Connection,
    subject_id: &str,
    context_id: &str,
    occurrence: &Occurrence,
    kind: LedgerKind,
    status: &str,
    actor: &Actor,
    remarks: Option<&str>,
) -> Result<LedgerRecord> {
    let recorded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    conn.execute(
        "INSERT INTO ledger_records(
            subject_id, context_id, occurrence, kind, status, remarks, recorded_by, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(subject_id, context_id, occurrence) DO UPDATE SET
           status = excluded.status,
           remarks = excluded.remarks,
           recorded_by = excluded.recorded_by,
           recorded_at = excluded.recorded_at",
        (
            subject_id,
            context_id,
            occurrence.key(),
            kind.as_str(),
            status,
            remarks,
            &actor.id,
            &recorded_at,
        ),
    )
    .map_err(map_store_err)?;
    Ok(LedgerRecord {
        subject_id: subject_id.to_string(),
        context_id: context_id.to_string(),
        occurrence: match occurrence {
            Occurrence::Day(_) => Some(occurrence.key()),
            Occurrence::OneShot => None,
        },
        status: status.to_string(),
        remarks: remarks.map(|s| s.to_string()),
        recorded_by: actor.id.clone(),
        recorded_at,
    })
}

fn record_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerRecord> {
    let occurrence: String = r.get(2)?;
    Ok(LedgerRecord {
        subject_id: r.get(0)?,
        context_id: r.get(1)?,
        occurrence: if occurrence.is_empty() {
            None
        } else {
            Some(occurrence)
        },
        status: r.get(3)?,
        remarks: r.get(4)?,
        recorded_by: r.get(5)?,
        recorded_at: r.get(6)?,
    })
}

fn map_store_err(e: rusqlite::Error) -> LedgerError {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.code == ErrorCode::ConstraintViolation {
            // The upsert should have absorbed any same-key race; a breach
            // here is an internal defect, not user error.
            tracing::error!(error = %e, "unique key breached outside the upsert path");
            return LedgerError::Conflict(e.to_string());
        }
    }
    LedgerError::Storage(e)
}
