//! `SQLite` storage implementation.
//!
//! One [`SqliteStorage`] owns one connection and serves one request at a
//! time; there is no internal locking. Search conditions materialize into a
//! single SQL statement plus up to four secondary lookups (comment text
//! matches, commenter resolution, mention resolution, label resolution),
//! each of which fails the whole call on error — a partially applied filter
//! would silently return wrong results.

use crate::error::{ForgeboardError, Result};
use crate::model::{
    Comment, Direction, Issue, Label, MentionResource, Milestone, Project, ProjectVisibility,
    State, User, ANONYMOUS_USER_ID,
};
use crate::search::SearchCondition;
use crate::storage::schema::apply_schema;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const ISSUE_COLUMNS: &str = "id, project_id, title, body, state, author_id, assignee_id, \
                             milestone_id, num_comments, due_date, created_at, updated_at";

const MILESTONE_COLUMNS: &str = "id, project_id, title, contents, due_date, num_open_issues, \
                                 num_closed_issues, num_total_issues, completion_rate";

/// Scope of one search materialization.
///
/// Exactly one scope applies per call: a single project, the whole store, or
/// an organization restricted to what the viewer can see. The viewer is an
/// explicit parameter rather than ambient state.
#[derive(Debug, Clone, Copy)]
enum SearchScope {
    Project(i64),
    Global,
    Organization { org_id: i64, viewer_id: i64 },
}

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema
    /// application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    // ========================================================================
    // DIRECTORY
    // ========================================================================

    /// Register a user.
    ///
    /// # Errors
    ///
    /// Returns an error on constraint violation (duplicate login).
    pub fn add_user(&mut self, login: &str, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO users (login, name) VALUES (?, ?)",
            rusqlite::params![login, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Resolve a user by id. Missing rows and the reserved anonymous id both
    /// resolve to the anonymous user.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup query fails.
    pub fn get_user(&self, id: i64) -> Result<User> {
        if id == ANONYMOUS_USER_ID {
            return Ok(User::anonymous());
        }
        let user = self
            .conn
            .query_row(
                "SELECT id, login, name FROM users WHERE id = ?",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        login: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user.unwrap_or_else(User::anonymous))
    }

    /// Register an organization.
    ///
    /// # Errors
    ///
    /// Returns an error on constraint violation (duplicate name).
    pub fn add_organization(&mut self, name: &str) -> Result<i64> {
        self.conn
            .execute("INSERT INTO organizations (name) VALUES (?)", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Register a project, optionally under an organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_project(
        &mut self,
        org_id: Option<i64>,
        name: &str,
        visibility: ProjectVisibility,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO projects (org_id, name, visibility) VALUES (?, ?, ?)",
            rusqlite::params![org_id, name, visibility.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Grant a user membership of a project (grants access to private
    /// projects during visibility checks).
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_project_member(&mut self, project_id: i64, user_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?, ?)",
            rusqlite::params![project_id, user_id],
        )?;
        Ok(())
    }

    /// Fetch a project by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup query fails.
    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, org_id, name, visibility FROM projects WHERE id = ?",
                [id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        org_id: row.get(1)?,
                        name: row.get(2)?,
                        visibility: row
                            .get::<_, String>(3)?
                            .parse()
                            .unwrap_or(ProjectVisibility::Private),
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    /// Register a label in a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_label(&mut self, project_id: i64, category: &str, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO labels (project_id, category, name) VALUES (?, ?, ?)",
            rusqlite::params![project_id, category, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Fetch a label by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup query fails.
    pub fn get_label(&self, id: i64) -> Result<Option<Label>> {
        let label = self
            .conn
            .query_row(
                "SELECT id, project_id, category, name FROM labels WHERE id = ?",
                [id],
                |row| {
                    Ok(Label {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        category: row.get(2)?,
                        name: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(label)
    }

    // ========================================================================
    // ISSUE LIFECYCLE
    // ========================================================================

    /// Create a new issue. The `id` field of the argument is ignored; the
    /// assigned id is returned. Milestone counters are maintained
    /// incrementally when the issue lands on a milestone.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or counter maintenance fails.
    pub fn create_issue(&mut self, issue: &Issue) -> Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO issues (project_id, title, body, state, author_id, assignee_id,
                                 milestone_id, num_comments, due_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                issue.project_id,
                issue.title,
                issue.body,
                issue.state.as_str(),
                issue.author_id,
                issue.assignee_id,
                issue.milestone_id,
                issue.num_comments,
                issue.due_date.map(|d| d.to_string()),
                issue.created_at.to_rfc3339(),
                issue.updated_at.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        if let Some(milestone_id) = issue.milestone_id {
            let mut milestone = Self::milestone_in_tx(&tx, milestone_id)?
                .ok_or(ForgeboardError::MilestoneNotFound { id: milestone_id })?;
            milestone.record_attached(issue.is_open());
            Self::save_milestone_counters(&tx, &milestone)?;
        }

        tx.commit()?;
        Ok(id)
    }

    /// Fetch an issue by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup query fails.
    pub fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?");
        let issue = self
            .conn
            .query_row(&sql, [id], |row| Self::issue_from_row(row))
            .optional()?;
        Ok(issue)
    }

    /// Delete an issue along with its comments and label links, keeping
    /// milestone counters true.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeboardError::IssueNotFound`] if the issue does not
    /// exist, or a database error.
    pub fn delete_issue(&mut self, id: i64) -> Result<()> {
        let issue = self
            .get_issue(id)?
            .ok_or(ForgeboardError::IssueNotFound { id })?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM comments WHERE issue_id = ?", [id])?;
        tx.execute("DELETE FROM issue_labels WHERE issue_id = ?", [id])?;
        tx.execute("DELETE FROM issues WHERE id = ?", [id])?;

        if let Some(milestone_id) = issue.milestone_id {
            let mut milestone = Self::milestone_in_tx(&tx, milestone_id)?
                .ok_or(ForgeboardError::MilestoneNotFound { id: milestone_id })?;
            milestone.record_detached(issue.is_open());
            Self::save_milestone_counters(&tx, &milestone)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Open or close an issue. No-op when the state is unchanged. Milestone
    /// counters are maintained incrementally.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeboardError::IssueNotFound`] if the issue does not
    /// exist, or a database error.
    pub fn set_issue_state(&mut self, id: i64, state: State) -> Result<()> {
        debug_assert!(state != State::All, "All is a filter value, not a state");
        let issue = self
            .get_issue(id)?
            .ok_or(ForgeboardError::IssueNotFound { id })?;
        if issue.state == state {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE issues SET state = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![state.as_str(), Utc::now().to_rfc3339(), id],
        )?;

        if let Some(milestone_id) = issue.milestone_id {
            let mut milestone = Self::milestone_in_tx(&tx, milestone_id)?
                .ok_or(ForgeboardError::MilestoneNotFound { id: milestone_id })?;
            milestone.record_state_change(state == State::Open);
            Self::save_milestone_counters(&tx, &milestone)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Move an issue onto a milestone (or off, with `None`), adjusting the
    /// counters of both the old and the new milestone.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for a missing issue or milestone, or a
    /// database error.
    pub fn set_issue_milestone(&mut self, id: i64, milestone_id: Option<i64>) -> Result<()> {
        let issue = self
            .get_issue(id)?
            .ok_or(ForgeboardError::IssueNotFound { id })?;
        if issue.milestone_id == milestone_id {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE issues SET milestone_id = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![milestone_id, Utc::now().to_rfc3339(), id],
        )?;

        if let Some(old_id) = issue.milestone_id {
            let mut old = Self::milestone_in_tx(&tx, old_id)?
                .ok_or(ForgeboardError::MilestoneNotFound { id: old_id })?;
            old.record_detached(issue.is_open());
            Self::save_milestone_counters(&tx, &old)?;
        }
        if let Some(new_id) = milestone_id {
            let mut new = Self::milestone_in_tx(&tx, new_id)?
                .ok_or(ForgeboardError::MilestoneNotFound { id: new_id })?;
            new.record_attached(issue.is_open());
            Self::save_milestone_counters(&tx, &new)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Add a comment to an issue and bump its denormalized comment count.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeboardError::IssueNotFound`] if the issue does not
    /// exist, or a database error.
    pub fn add_comment(&mut self, issue_id: i64, author_id: i64, contents: &str) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE issues SET num_comments = num_comments + 1, updated_at = ? WHERE id = ?",
            rusqlite::params![Utc::now().to_rfc3339(), issue_id],
        )?;
        if updated == 0 {
            return Err(ForgeboardError::IssueNotFound { id: issue_id });
        }
        tx.execute(
            "INSERT INTO comments (issue_id, author_id, contents, created_at)
             VALUES (?, ?, ?, ?)",
            rusqlite::params![issue_id, author_id, contents, Utc::now().to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// List the comments of an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn comments_for_issue(&self, issue_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author_id, contents, created_at
             FROM comments WHERE issue_id = ? ORDER BY created_at, id",
        )?;
        let comments = stmt
            .query_map([issue_id], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    author_id: row.get(2)?,
                    contents: row.get(3)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    /// Attach a label to an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_issue_label(&mut self, issue_id: i64, label_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO issue_labels (issue_id, label_id) VALUES (?, ?)",
            rusqlite::params![issue_id, label_id],
        )?;
        Ok(())
    }

    /// Record a mention of a user on a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_mention(
        &mut self,
        user_id: i64,
        resource: &MentionResource,
        resource_id: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO mentions (user_id, resource_type, resource_id) VALUES (?, ?, ?)",
            rusqlite::params![user_id, resource.as_str(), resource_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ========================================================================
    // MILESTONE MANAGER
    // ========================================================================

    /// Persist a new milestone as-is. The `id` field of the argument is
    /// ignored; the assigned id is returned.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty title, or a database error.
    pub fn create_milestone(&mut self, milestone: &Milestone) -> Result<i64> {
        if milestone.title.trim().is_empty() {
            return Err(ForgeboardError::validation("title", "cannot be empty"));
        }
        self.conn.execute(
            "INSERT INTO milestones (project_id, title, contents, due_date, num_open_issues,
                                     num_closed_issues, num_total_issues, completion_rate)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                milestone.project_id,
                milestone.title,
                milestone.contents,
                milestone.due_date.map(|d| d.to_string()),
                milestone.num_open_issues,
                milestone.num_closed_issues,
                milestone.num_total_issues,
                milestone.completion_rate,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Persist `milestone` over the row at `id`, recomputing the completion
    /// rate from the supplied counters first (0 when the total is 0).
    ///
    /// # Errors
    ///
    /// Returns [`ForgeboardError::MilestoneNotFound`] if no row exists at
    /// `id`, or a database error.
    pub fn update_milestone(&mut self, milestone: &Milestone, id: i64) -> Result<()> {
        let completion_rate = Milestone::completion_rate_for(
            milestone.num_total_issues,
            milestone.num_closed_issues,
        );
        let updated = self.conn.execute(
            "UPDATE milestones SET project_id = ?, title = ?, contents = ?, due_date = ?,
                                   num_open_issues = ?, num_closed_issues = ?,
                                   num_total_issues = ?, completion_rate = ?
             WHERE id = ?",
            rusqlite::params![
                milestone.project_id,
                milestone.title,
                milestone.contents,
                milestone.due_date.map(|d| d.to_string()),
                milestone.num_open_issues,
                milestone.num_closed_issues,
                milestone.num_total_issues,
                completion_rate,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(ForgeboardError::MilestoneNotFound { id });
        }
        Ok(())
    }

    /// Delete a milestone and detach every issue referencing it, in one
    /// transaction. Issues survive with a null milestone reference.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeboardError::MilestoneNotFound`] if no row exists at
    /// `id`, or a database error.
    pub fn delete_milestone(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;

        let issue_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM issues WHERE milestone_id = ?")?;
            let ids = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let deleted = tx.execute("DELETE FROM milestones WHERE id = ?", [id])?;
        if deleted == 0 {
            return Err(ForgeboardError::MilestoneNotFound { id });
        }
        for issue_id in &issue_ids {
            tx.execute(
                "UPDATE issues SET milestone_id = NULL WHERE id = ?",
                [issue_id],
            )?;
        }

        tx.commit()?;
        debug!(milestone_id = id, detached = issue_ids.len(), "deleted milestone");
        Ok(())
    }

    /// Fetch a milestone by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup query fails.
    pub fn get_milestone(&self, id: i64) -> Result<Option<Milestone>> {
        let sql = format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = ?");
        let milestone = self
            .conn
            .query_row(&sql, [id], |row| Self::milestone_from_row(row))
            .optional()?;
        Ok(milestone)
    }

    /// All milestones of a project, due date ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn milestones_by_project(&self, project_id: i64) -> Result<Vec<Milestone>> {
        self.find_milestones(project_id, State::All, "due_date", Direction::Asc)
    }

    /// Milestones that still have open issues, due date ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn open_milestones(&self, project_id: i64) -> Result<Vec<Milestone>> {
        self.find_milestones(project_id, State::Open, "due_date", Direction::Asc)
    }

    /// Milestones with no open issues left, due date ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn closed_milestones(&self, project_id: i64) -> Result<Vec<Milestone>> {
        self.find_milestones(project_id, State::Closed, "due_date", Direction::Asc)
    }

    /// Milestones of a project filtered by openness and sorted by a
    /// whitelisted key. Open means `num_open_issues > 0`, closed means
    /// `num_open_issues == 0`; `All` applies no openness predicate.
    /// Unknown sort keys fall back to due date ascending with null due
    /// dates last.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_milestones(
        &self,
        project_id: i64,
        state: State,
        sort: &str,
        direction: Direction,
    ) -> Result<Vec<Milestone>> {
        let mut sql =
            format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE project_id = ?");

        match state {
            State::Open => sql.push_str(" AND num_open_issues > 0"),
            State::Closed => sql.push_str(" AND num_open_issues = 0"),
            State::All => {}
        }

        let dir = direction.sql();
        match sort {
            "due_date" => {
                let _ = write!(sql, " ORDER BY (due_date IS NULL), due_date {dir}");
            }
            "title" => {
                let _ = write!(sql, " ORDER BY title COLLATE NOCASE {dir}");
            }
            "completion_rate" => {
                let _ = write!(sql, " ORDER BY completion_rate {dir}");
            }
            _ => sql.push_str(" ORDER BY (due_date IS NULL), due_date ASC"),
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let milestones = stmt
            .query_map([project_id], |row| Self::milestone_from_row(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(milestones)
    }

    /// Selection-control options for a project's milestones: `(id-as-string,
    /// title)` pairs ordered by title ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn milestone_options(&self, project_id: i64) -> Result<Vec<(String, String)>> {
        let milestones =
            self.find_milestones(project_id, State::All, "title", Direction::Asc)?;
        Ok(milestones
            .into_iter()
            .map(|m| (m.id.to_string(), m.title))
            .collect())
    }

    /// Recompute all three counters of a milestone from the issue table.
    ///
    /// The correctness-preserving path for bulk changes where incremental
    /// maintenance is unsafe.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeboardError::MilestoneNotFound`] if no row exists at
    /// `id`, or a database error.
    pub fn refresh_milestone_counts(&mut self, id: i64) -> Result<Milestone> {
        let mut milestone = self
            .get_milestone(id)?
            .ok_or(ForgeboardError::MilestoneNotFound { id })?;

        let (total, open): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(state = 'open'), 0)
             FROM issues WHERE milestone_id = ?",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        milestone.num_total_issues = total;
        milestone.num_open_issues = open;
        milestone.num_closed_issues = total - open;
        milestone.recalculate();

        let tx = self.conn.transaction()?;
        Self::save_milestone_counters(&tx, &milestone)?;
        tx.commit()?;
        debug!(milestone_id = id, total, open, "recounted milestone");
        Ok(milestone)
    }

    // ========================================================================
    // ISSUE SEARCH
    // ========================================================================

    /// Materialize a condition against one project: every filter dimension
    /// applies, including milestone and labels.
    ///
    /// # Errors
    ///
    /// Fails fast if any resolution round trip or the primary query fails.
    pub fn search_in_project(
        &self,
        cond: &SearchCondition,
        project_id: i64,
    ) -> Result<Vec<Issue>> {
        self.run_search(cond, SearchScope::Project(project_id))
    }

    /// Materialize a condition with no project restriction (global search
    /// contexts). Milestone and label filters do not apply here; they are
    /// project-scoped entities.
    ///
    /// # Errors
    ///
    /// Fails fast if any resolution round trip or the primary query fails.
    pub fn search_all(&self, cond: &SearchCondition) -> Result<Vec<Issue>> {
        self.run_search(cond, SearchScope::Global)
    }

    /// Materialize a condition across an organization, restricted to the
    /// projects `viewer_id` can see. When the condition carries a
    /// project-name allowlist, it is intersected with the visible set.
    /// An empty project set matches nothing.
    ///
    /// # Errors
    ///
    /// Fails fast if any resolution round trip or the primary query fails.
    pub fn search_in_organization(
        &self,
        cond: &SearchCondition,
        org_id: i64,
        viewer_id: i64,
    ) -> Result<Vec<Issue>> {
        self.run_search(cond, SearchScope::Organization { org_id, viewer_id })
    }

    #[allow(clippy::too_many_lines)]
    fn run_search(&self, cond: &SearchCondition, scope: SearchScope) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        // Scope restriction first.
        let project_scope = match scope {
            SearchScope::Project(project_id) => {
                sql.push_str(" AND project_id = ?");
                params.push(Box::new(project_id));
                Some(project_id)
            }
            SearchScope::Global => None,
            SearchScope::Organization { org_id, viewer_id } => {
                let project_ids = if cond.is_filtered_by_project() {
                    self.allowlisted_project_ids(org_id, viewer_id, &cond.project_names)?
                } else {
                    self.visible_project_ids(org_id, viewer_id)?
                };
                if project_ids.is_empty() {
                    // Nothing visible: the query must match nothing.
                    sql.push_str(" AND project_id = -1");
                } else {
                    push_in_clause(&mut sql, &mut params, "project_id", &project_ids);
                }
                None
            }
        };

        // Free text: title OR body OR any comment's contents.
        if let Some(filter) = cond.filter.as_deref().map(str::trim) {
            if !filter.is_empty() {
                let comment_ids = self.comment_match_issue_ids(filter, project_scope)?;
                let pattern = format!("%{filter}%");
                sql.push_str(" AND (title LIKE ? OR body LIKE ?");
                params.push(Box::new(pattern.clone()));
                params.push(Box::new(pattern));
                if !comment_ids.is_empty() {
                    let placeholders = vec!["?"; comment_ids.len()].join(",");
                    let _ = write!(sql, " OR id IN ({placeholders})");
                    for id in &comment_ids {
                        params.push(Box::new(*id));
                    }
                }
                sql.push(')');
            }
        }

        // Author: the anonymous sentinel means "no author".
        if let Some(author_id) = cond.author_id {
            if author_id == ANONYMOUS_USER_ID {
                sql.push_str(" AND author_id IS NULL");
            } else {
                sql.push_str(" AND author_id = ?");
                params.push(Box::new(author_id));
            }
        }

        // Assignee: the anonymous sentinel means "unassigned".
        if let Some(assignee_id) = cond.assignee_id {
            if assignee_id == ANONYMOUS_USER_ID {
                sql.push_str(" AND assignee_id IS NULL");
            } else {
                sql.push_str(" AND assignee_id = ?");
                params.push(Box::new(assignee_id));
            }
        }

        // Commenter: anonymous means no filter; an empty resolved id set
        // must match nothing, never fall through to "no filter".
        if let Some(commenter_id) = cond.commenter_id {
            let commenter = self.get_user(commenter_id)?;
            if !commenter.is_anonymous() {
                let ids = self.commented_issue_ids(commenter_id, project_scope)?;
                if ids.is_empty() {
                    sql.push_str(" AND id = -1");
                } else {
                    push_in_clause(&mut sql, &mut params, "id", &ids);
                }
            }
        }

        // Mention: same anonymous and empty-set rules as commenter.
        if let Some(mention_id) = cond.mention_id {
            let mentioned = self.get_user(mention_id)?;
            if !mentioned.is_anonymous() {
                let ids = self.mentioned_issue_ids(mention_id)?;
                if ids.is_empty() {
                    sql.push_str(" AND id = -1");
                } else {
                    push_in_clause(&mut sql, &mut params, "id", &ids);
                }
            }
        }

        // Milestone and labels are project-scoped dimensions.
        if let Some(project_id) = project_scope {
            if let Some(milestone_id) = cond.milestone_id {
                if milestone_id == Milestone::NULL_MILESTONE_ID {
                    sql.push_str(" AND milestone_id IS NULL");
                } else {
                    sql.push_str(" AND milestone_id = ?");
                    params.push(Box::new(milestone_id));
                }
            }

            if !cond.label_ids.is_empty() {
                let resolved = self.resolved_label_ids(&cond.label_ids, project_id)?;
                if resolved.is_empty() {
                    sql.push_str(" AND id = -1");
                } else {
                    let placeholders = vec!["?"; resolved.len()].join(",");
                    let _ = write!(
                        sql,
                        " AND id IN (SELECT issue_id FROM issue_labels WHERE label_id IN ({placeholders}))"
                    );
                    for id in resolved {
                        params.push(Box::new(id));
                    }
                }
            }
        }

        if cond.commented {
            sql.push_str(" AND num_comments >= 1");
        }

        // State: only open/closed restrict; All adds nothing.
        if matches!(cond.state, State::Open | State::Closed) {
            sql.push_str(" AND state = ?");
            params.push(Box::new(cond.state.as_str().to_string()));
        }

        // Due date: inclusive upper bound at day granularity.
        if let Some(due_date) = cond.due_date {
            let upper = due_date
                .checked_add_days(Days::new(1))
                .unwrap_or(NaiveDate::MAX);
            sql.push_str(" AND due_date < ?");
            params.push(Box::new(upper.to_string()));
        }

        push_order_by(&mut sql, &cond.order_by, cond.order_dir);

        if let Some(limit) = cond.limit {
            if limit > 0 {
                sql.push_str(" LIMIT ?");
                params.push(Box::new(limit as i64));
                if cond.page > 0 {
                    sql.push_str(" OFFSET ?");
                    params.push(Box::new((cond.page * limit) as i64));
                }
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let issues = stmt
            .query_map(params_refs.as_slice(), |row| Self::issue_from_row(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(issues)
    }

    // ========================================================================
    // RESOLUTION ROUND TRIPS
    // ========================================================================

    /// Ids of projects in an organization that `viewer_id` can see: public
    /// ones, plus private ones the viewer is a member of.
    fn visible_project_ids(&self, org_id: i64, viewer_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM projects
             WHERE org_id = ?
               AND (visibility = 'public'
                    OR id IN (SELECT project_id FROM project_members WHERE user_id = ?))",
        )?;
        let ids = stmt
            .query_map(rusqlite::params![org_id, viewer_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Intersection of a case-insensitive project-name allowlist with the
    /// visible set.
    fn allowlisted_project_ids(
        &self,
        org_id: i64,
        viewer_id: i64,
        names: &[String],
    ) -> Result<Vec<i64>> {
        let visible = self.visible_project_ids(org_id, viewer_id)?;
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM projects WHERE org_id = ?")?;
        let projects = stmt
            .query_map([org_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut ids = Vec::new();
        for name in names {
            for (id, project_name) in &projects {
                if project_name.eq_ignore_ascii_case(name) && visible.contains(id) {
                    ids.push(*id);
                    break;
                }
            }
        }
        Ok(ids)
    }

    /// Ids of issues with a comment whose contents match the free-text
    /// filter, optionally restricted to one project.
    fn comment_match_issue_ids(&self, filter: &str, project_id: Option<i64>) -> Result<Vec<i64>> {
        let pattern = format!("%{filter}%");
        let ids = match project_id {
            Some(project_id) => {
                let mut stmt = self.conn.prepare(
                    "SELECT DISTINCT c.issue_id FROM comments c
                     JOIN issues i ON i.id = c.issue_id
                     WHERE i.project_id = ? AND c.contents LIKE ?",
                )?;
                let ids = stmt
                    .query_map(rusqlite::params![project_id, pattern], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT DISTINCT issue_id FROM comments WHERE contents LIKE ?",
                )?;
                let ids = stmt
                    .query_map([pattern], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            }
        };
        Ok(ids)
    }

    /// Ids of issues a user has commented on, optionally restricted to one
    /// project.
    fn commented_issue_ids(&self, commenter_id: i64, project_id: Option<i64>) -> Result<Vec<i64>> {
        let ids = match project_id {
            Some(project_id) => {
                let mut stmt = self.conn.prepare(
                    "SELECT DISTINCT c.issue_id FROM comments c
                     JOIN issues i ON i.id = c.issue_id
                     WHERE c.author_id = ? AND i.project_id = ?",
                )?;
                let ids = stmt
                    .query_map(rusqlite::params![commenter_id, project_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT DISTINCT issue_id FROM comments WHERE author_id = ?",
                )?;
                let ids = stmt
                    .query_map([commenter_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            }
        };
        Ok(ids)
    }

    /// Ids of issues a user is mentioned in, across issue posts and issue
    /// comments. Mentions on comments are followed back to the owning issue;
    /// unsupported resource types are skipped with a warning.
    fn mentioned_issue_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let mut issue_ids: BTreeSet<i64> = BTreeSet::new();
        let mut comment_ids: Vec<i64> = Vec::new();

        let mut stmt = self
            .conn
            .prepare("SELECT resource_type, resource_id FROM mentions WHERE user_id = ?")?;
        let mentions = stmt
            .query_map([user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (resource_type, resource_id) in mentions {
            match resource_type
                .parse::<MentionResource>()
                .unwrap_or(MentionResource::Other(resource_type.clone()))
            {
                MentionResource::IssuePost => {
                    issue_ids.insert(resource_id);
                }
                MentionResource::IssueComment => comment_ids.push(resource_id),
                MentionResource::Other(kind) => {
                    warn!("'{kind}' is not supported");
                }
            }
        }

        if !comment_ids.is_empty() {
            let placeholders = vec!["?"; comment_ids.len()].join(",");
            let sql = format!(
                "SELECT DISTINCT issue_id FROM comments WHERE id IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::ToSql> = comment_ids
                .iter()
                .map(|id| id as &dyn rusqlite::ToSql)
                .collect();
            let backlinked = stmt
                .query_map(params_refs.as_slice(), |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            issue_ids.extend(backlinked);
        }

        Ok(issue_ids.into_iter().collect())
    }

    /// Resolve requested label ids to the ones that exist in the project.
    fn resolved_label_ids(&self, requested: &BTreeSet<i64>, project_id: i64) -> Result<Vec<i64>> {
        if requested.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; requested.len()].join(",");
        let sql = format!(
            "SELECT id FROM labels WHERE project_id = ? AND id IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_id)];
        for id in requested {
            params.push(Box::new(*id));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let ids = stmt
            .query_map(params_refs.as_slice(), |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
        Ok(Issue {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            state: State::from_param(&row.get::<_, String>(4)?),
            author_id: row.get(5)?,
            assignee_id: row.get(6)?,
            milestone_id: row.get(7)?,
            num_comments: row.get(8)?,
            due_date: row.get::<_, Option<String>>(9)?.as_deref().map(parse_date),
            created_at: parse_datetime(&row.get::<_, String>(10)?),
            updated_at: parse_datetime(&row.get::<_, String>(11)?),
        })
    }

    fn milestone_from_row(row: &rusqlite::Row) -> rusqlite::Result<Milestone> {
        Ok(Milestone {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            contents: row.get(3)?,
            due_date: row.get::<_, Option<String>>(4)?.as_deref().map(parse_date),
            num_open_issues: row.get(5)?,
            num_closed_issues: row.get(6)?,
            num_total_issues: row.get(7)?,
            completion_rate: row.get(8)?,
        })
    }

    fn milestone_in_tx(tx: &Transaction, id: i64) -> Result<Option<Milestone>> {
        let sql = format!("SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = ?");
        let milestone = tx
            .query_row(&sql, [id], |row| Self::milestone_from_row(row))
            .optional()?;
        Ok(milestone)
    }

    fn save_milestone_counters(tx: &Transaction, milestone: &Milestone) -> Result<()> {
        tx.execute(
            "UPDATE milestones SET num_open_issues = ?, num_closed_issues = ?,
                                   num_total_issues = ?, completion_rate = ?
             WHERE id = ?",
            rusqlite::params![
                milestone.num_open_issues,
                milestone.num_closed_issues,
                milestone.num_total_issues,
                milestone.completion_rate,
                milestone.id,
            ],
        )?;
        Ok(())
    }
}

/// Append ` AND {column} IN (?,...)` with one placeholder per id.
fn push_in_clause(
    sql: &mut String,
    params: &mut Vec<Box<dyn rusqlite::ToSql>>,
    column: &str,
    ids: &[i64],
) {
    let placeholders = vec!["?"; ids.len()].join(",");
    let _ = write!(sql, " AND {column} IN ({placeholders})");
    for id in ids {
        params.push(Box::new(*id));
    }
}

/// Append the ORDER BY clause for a whitelisted issue sort key.
///
/// `due_date` keeps NULL due dates last regardless of direction; anything
/// outside the whitelist falls back to newest-first.
fn push_order_by(sql: &mut String, order_by: &str, direction: Direction) {
    let dir = direction.sql();
    match order_by {
        "due_date" => {
            let _ = write!(sql, " ORDER BY (due_date IS NULL), due_date {dir}");
        }
        "created_at" => {
            let _ = write!(sql, " ORDER BY created_at {dir}");
        }
        "updated_at" => {
            let _ = write!(sql, " ORDER BY updated_at {dir}");
        }
        "num_comments" => {
            let _ = write!(sql, " ORDER BY num_comments {dir}");
        }
        "title" => {
            let _ = write!(sql, " ORDER BY title COLLATE NOCASE {dir}");
        }
        _ => sql.push_str(" ORDER BY created_at DESC"),
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Utc.from_utc_datetime(&naive);
    }
    Utc::now()
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or(NaiveDate::MIN)
}
