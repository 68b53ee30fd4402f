//! Local cache schema.

/// SQL schema for the challenge cache tables.
pub const SCHEMA: &str = r#"
-- Last known progress per user and challenge type
CREATE TABLE IF NOT EXISTS challenge_progress (
    user_id TEXT NOT NULL,
    challenge_type TEXT NOT NULL,
    progress INTEGER NOT NULL CHECK (progress >= 0),
    goal INTEGER NOT NULL CHECK (goal > 0),
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, challenge_type)
);

-- When each user's progress was last written from the remote profile
CREATE TABLE IF NOT EXISTS challenge_sync (
    user_id TEXT PRIMARY KEY,
    synced_at TEXT NOT NULL
);
"#;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;
