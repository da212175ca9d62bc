//! Database schema definitions.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the forgeboard database.
pub const SCHEMA_SQL: &str = r"
    -- Directory
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS organizations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        org_id INTEGER REFERENCES organizations(id),
        name TEXT NOT NULL,
        visibility TEXT NOT NULL DEFAULT 'public',
        CHECK (visibility IN ('public', 'private'))
    );
    CREATE INDEX IF NOT EXISTS idx_projects_org_id ON projects(org_id);

    CREATE TABLE IF NOT EXISTS project_members (
        project_id INTEGER NOT NULL REFERENCES projects(id),
        user_id INTEGER NOT NULL,
        PRIMARY KEY (project_id, user_id)
    );

    -- Milestones
    -- Counter columns are denormalized; the store keeps them true on every
    -- issue lifecycle change.
    CREATE TABLE IF NOT EXISTS milestones (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id),
        title TEXT NOT NULL,
        contents TEXT NOT NULL DEFAULT '',
        due_date TEXT,
        num_open_issues INTEGER NOT NULL DEFAULT 0,
        num_closed_issues INTEGER NOT NULL DEFAULT 0,
        num_total_issues INTEGER NOT NULL DEFAULT 0,
        completion_rate INTEGER NOT NULL DEFAULT 0,
        CHECK (length(title) >= 1)
    );
    CREATE INDEX IF NOT EXISTS idx_milestones_project_id ON milestones(project_id);
    CREATE INDEX IF NOT EXISTS idx_milestones_due_date ON milestones(due_date);

    -- Issues
    CREATE TABLE IF NOT EXISTS issues (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id),
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        state TEXT NOT NULL DEFAULT 'open',
        author_id INTEGER,
        assignee_id INTEGER,
        milestone_id INTEGER REFERENCES milestones(id),
        num_comments INTEGER NOT NULL DEFAULT 0,
        due_date TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (state IN ('open', 'closed'))
    );
    CREATE INDEX IF NOT EXISTS idx_issues_project_id ON issues(project_id);
    CREATE INDEX IF NOT EXISTS idx_issues_state ON issues(state);
    CREATE INDEX IF NOT EXISTS idx_issues_author_id ON issues(author_id);
    CREATE INDEX IF NOT EXISTS idx_issues_assignee_id ON issues(assignee_id);
    CREATE INDEX IF NOT EXISTS idx_issues_milestone_id ON issues(milestone_id);
    CREATE INDEX IF NOT EXISTS idx_issues_due_date ON issues(due_date);
    CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at);

    -- Comments
    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id INTEGER NOT NULL REFERENCES issues(id),
        author_id INTEGER NOT NULL,
        contents TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_comments_issue_id ON comments(issue_id);
    CREATE INDEX IF NOT EXISTS idx_comments_author_id ON comments(author_id);

    -- Labels
    CREATE TABLE IF NOT EXISTS labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id),
        category TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_labels_project_id ON labels(project_id);

    CREATE TABLE IF NOT EXISTS issue_labels (
        issue_id INTEGER NOT NULL REFERENCES issues(id),
        label_id INTEGER NOT NULL REFERENCES labels(id),
        PRIMARY KEY (issue_id, label_id)
    );
    CREATE INDEX IF NOT EXISTS idx_issue_labels_label_id ON issue_labels(label_id);

    -- Mentions
    -- resource_type is free-form; only issue_post and issue_comment are
    -- understood by search resolution.
    CREATE TABLE IF NOT EXISTS mentions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_mentions_user_id ON mentions(user_id);

    -- Metadata
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Apply the schema to a connection. Idempotent.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_twice() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();

        let version: String = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION.to_string());
    }
}
