use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("madrasah.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class_sort ON subjects(class_id, sort_order)",
        [],
    )?;

    // A context is the scoping side of the ledger key: a class-day roster for
    // attendance, a surah for Hifz tracking, an assignment for grading.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contexts(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            label TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contexts_class ON contexts(class_id)",
        [],
    )?;

    // occurrence is a canonical day key ('YYYY-MM-DD') or '' for one-shot
    // contexts. Stored NOT NULL so the compound key actually dedupes; SQLite
    // treats NULLs in a unique key as distinct.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_records(
            subject_id TEXT NOT NULL,
            context_id TEXT NOT NULL,
            occurrence TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            remarks TEXT,
            recorded_by TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY(subject_id, context_id, occurrence),
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            FOREIGN KEY(context_id) REFERENCES contexts(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_subject ON ledger_records(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_context_occurrence
         ON ledger_records(context_id, occurrence)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            target_user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            category TEXT NOT NULL,
            priority TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_target ON notifications(target_user_id)",
        [],
    )?;

    Ok(conn)
}
