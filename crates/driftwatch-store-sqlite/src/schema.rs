//! SQL schema for the Driftwatch SQLite store.
//!
//! Executed once at connection startup. Idempotent thanks to
//! `CREATE TABLE IF NOT EXISTS`; future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS accounts (
    account_id TEXT PRIMARY KEY,
    email      TEXT NOT NULL,
    tier       TEXT NOT NULL,    -- 'free' | 'starter' | 'pro'
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pages (
    page_id         TEXT PRIMARY KEY,
    account_id      TEXT NOT NULL REFERENCES accounts(account_id),
    url             TEXT NOT NULL,
    cadence         TEXT NOT NULL,    -- 'daily' | 'weekly'
    metric_focus    TEXT,
    mobile_enabled  INTEGER NOT NULL DEFAULT 0,
    active          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    last_scanned_at TEXT
);

-- Image bytes live on disk; rows hold paths and digests only.
CREATE TABLE IF NOT EXISTS baselines (
    baseline_id    TEXT PRIMARY KEY,
    page_id        TEXT NOT NULL REFERENCES pages(page_id),
    captured_at    TEXT NOT NULL,
    desktop_path   TEXT NOT NULL,
    desktop_digest TEXT NOT NULL,
    mobile_path    TEXT,
    mobile_digest  TEXT,
    current        INTEGER NOT NULL DEFAULT 1
);

-- At most one current baseline per page.
CREATE UNIQUE INDEX IF NOT EXISTS baselines_current_idx
    ON baselines(page_id) WHERE current = 1;

-- Change rows are never deleted. The status column only ever moves forward;
-- every transition is a conditional UPDATE guarded on the expected current
-- status, so a replayed workflow step cannot resurrect a closed record.
CREATE TABLE IF NOT EXISTS changes (
    change_id         TEXT PRIMARY KEY,
    page_id           TEXT NOT NULL REFERENCES pages(page_id),
    element           TEXT NOT NULL,
    scope             TEXT NOT NULL,    -- 'element' | 'section' | 'page'
    before_text       TEXT NOT NULL,
    after_text        TEXT NOT NULL,
    description       TEXT,
    magnitude         TEXT NOT NULL,    -- 'incremental' | 'overhaul'
    hypothesis        TEXT,
    match_note        TEXT,
    first_detected_at TEXT NOT NULL,
    last_seen_at      TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'watching',
    superseded_by     TEXT REFERENCES changes(change_id),
    CHECK (change_id != superseded_by)
);

-- One verdict per (change, horizon); a second computation is a no-op.
CREATE TABLE IF NOT EXISTS checkpoints (
    checkpoint_id TEXT PRIMARY KEY,
    change_id     TEXT NOT NULL REFERENCES changes(change_id),
    horizon_days  INTEGER NOT NULL,
    assessment    TEXT NOT NULL,
    confidence    REAL NOT NULL,
    reasoning     TEXT NOT NULL,
    data_sources  TEXT NOT NULL DEFAULT '[]',
    computed_at   TEXT NOT NULL,
    UNIQUE (change_id, horizon_days)
);

CREATE TABLE IF NOT EXISTS checkpoint_feedback (
    feedback_id   TEXT PRIMARY KEY,
    checkpoint_id TEXT NOT NULL REFERENCES checkpoints(checkpoint_id),
    verdict       TEXT NOT NULL,    -- 'accurate' | 'inaccurate'
    note          TEXT,
    recorded_at   TEXT NOT NULL
);

-- One scan per (page, trigger, day); duplicate scheduling is a no-op.
CREATE TABLE IF NOT EXISTS scans (
    scan_id       TEXT PRIMARY KEY,
    page_id       TEXT NOT NULL REFERENCES pages(page_id),
    trigger_kind  TEXT NOT NULL,    -- 'deploy' | 'scheduled' | 'manual'
    kind          TEXT NOT NULL,    -- 'establish' | 'diff'
    day           TEXT NOT NULL,    -- ISO 8601 calendar date
    status        TEXT NOT NULL DEFAULT 'running',
    error         TEXT,
    started_at    TEXT NOT NULL,
    finished_at   TEXT,
    changes_found INTEGER NOT NULL DEFAULT 0,
    UNIQUE (page_id, trigger_kind, day)
);

CREATE INDEX IF NOT EXISTS pages_account_idx      ON pages(account_id);
CREATE INDEX IF NOT EXISTS changes_page_idx       ON changes(page_id);
CREATE INDEX IF NOT EXISTS changes_status_idx     ON changes(status);
CREATE INDEX IF NOT EXISTS checkpoints_change_idx ON checkpoints(change_id);
CREATE INDEX IF NOT EXISTS scans_page_idx         ON scans(page_id);

PRAGMA user_version = 1;
";
