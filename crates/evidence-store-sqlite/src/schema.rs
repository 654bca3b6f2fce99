//! SQL schema for the evidence SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per temporal slice. A NULL valid_to marks the current version.
-- Rows are never deleted; the only UPDATE closes the current slice.
CREATE TABLE IF NOT EXISTS entity_versions (
    entity_key     TEXT    NOT NULL,
    kind           TEXT    NOT NULL,   -- person | place | thing | event | authority | evidence | fact
    version_number INTEGER NOT NULL,
    valid_from     TEXT    NOT NULL,   -- fixed-width RFC 3339 UTC
    valid_to       TEXT,
    status         TEXT    NOT NULL DEFAULT 'active',
    fields_json    TEXT    NOT NULL,
    actor_id       TEXT    NOT NULL,
    event_hash     TEXT    NOT NULL,
    PRIMARY KEY (entity_key, version_number),
    CHECK (valid_to IS NULL OR valid_to > valid_from)
);

CREATE UNIQUE INDEX IF NOT EXISTS entity_current_idx
    ON entity_versions(entity_key) WHERE valid_to IS NULL;
CREATE INDEX IF NOT EXISTS entity_as_of_idx
    ON entity_versions(entity_key, valid_from, valid_to);

-- Events are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS events (
    event_id       TEXT    PRIMARY KEY,
    aggregate_id   TEXT    NOT NULL,
    aggregate_type TEXT    NOT NULL,
    event_version  INTEGER NOT NULL,
    event_type     TEXT    NOT NULL,
    payload_json   TEXT    NOT NULL,   -- inner payload only; the tag is event_type
    actor_id       TEXT    NOT NULL,
    occurred_at    TEXT    NOT NULL,
    event_hash     TEXT    NOT NULL,
    previous_hash  TEXT    NOT NULL,
    UNIQUE (aggregate_id, event_version),
    CHECK  (event_version >= 1)
);

-- Aggregates whose chain failed verification. Writes are refused while
-- released_at is NULL.
CREATE TABLE IF NOT EXISTS quarantine (
    aggregate_id TEXT PRIMARY KEY,
    broken_at    INTEGER,
    detected_at  TEXT NOT NULL,
    released_at  TEXT,
    released_by  TEXT,
    release_note TEXT
);

CREATE TABLE IF NOT EXISTS fact_versions (
    fact_id             TEXT    NOT NULL,
    version_number      INTEGER NOT NULL,
    valid_from          TEXT    NOT NULL,
    valid_to            TEXT,
    case_id             TEXT    NOT NULL,
    text                TEXT    NOT NULL,
    fact_type           TEXT    NOT NULL,
    classification      TEXT    NOT NULL,   -- fact | claim | speculation | opinion
    weight              REAL    NOT NULL,
    credibility_factors TEXT    NOT NULL DEFAULT '[]',
    verified            INTEGER NOT NULL DEFAULT 0,
    evidence_id         TEXT,
    PRIMARY KEY (fact_id, version_number),
    CHECK (weight >= 0.0 AND weight <= 1.0),
    CHECK (valid_to IS NULL OR valid_to > valid_from)
);

CREATE UNIQUE INDEX IF NOT EXISTS fact_current_idx
    ON fact_versions(fact_id) WHERE valid_to IS NULL;
CREATE INDEX IF NOT EXISTS fact_as_of_idx
    ON fact_versions(fact_id, valid_from, valid_to);
CREATE INDEX IF NOT EXISTS fact_case_idx
    ON fact_versions(case_id);

CREATE TABLE IF NOT EXISTS fact_links (
    link_id      TEXT PRIMARY KEY,
    from_fact_id TEXT NOT NULL,
    to_fact_id   TEXT NOT NULL,
    relation     TEXT NOT NULL,   -- supports | contradicts
    recorded_at  TEXT NOT NULL,
    UNIQUE (from_fact_id, to_fact_id, relation),
    CHECK  (from_fact_id != to_fact_id)
);

-- One row per unordered pair: fact_low < fact_high.
CREATE TABLE IF NOT EXISTS contradictions (
    contradiction_id  TEXT PRIMARY KEY,
    fact_low          TEXT NOT NULL,
    fact_high         TEXT NOT NULL,
    conflict_type     TEXT NOT NULL,
    winning_fact_id   TEXT,
    resolution        TEXT,
    resolution_method TEXT,   -- manual | automatic
    detected_at       TEXT NOT NULL,
    resolved_at       TEXT,
    UNIQUE (fact_low, fact_high),
    CHECK  (fact_low < fact_high),
    CHECK  (winning_fact_id IS NULL OR winning_fact_id IN (fact_low, fact_high))
);

CREATE INDEX IF NOT EXISTS contradictions_high_idx ON contradictions(fact_high);

PRAGMA user_version = 1;
";
