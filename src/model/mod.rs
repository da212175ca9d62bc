//! Core data types for `forgeboard`.
//!
//! This module defines the entities the query builder and milestone manager
//! operate on:
//! - `Issue` - the trackable work item
//! - `Milestone` - a project-scoped deadline with aggregate issue counts
//! - `State` - open/closed lifecycle, plus `All` for filter purposes
//! - `User` / `Project` / `Organization` - directory entities
//! - `Label` / `Comment` / `Mention` - issue satellites

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved user id meaning "anonymous" / "nobody". Never a stored row.
///
/// As a filter value it is a sentinel: "unassigned" for the assignee filter,
/// "no author" for the author filter, and "skip this filter" for the
/// commenter and mention filters.
pub const ANONYMOUS_USER_ID: i64 = -1;

/// Issue lifecycle state. `All` never appears on a stored issue; it exists
/// for filters that do not restrict by state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Open,
    Closed,
    All,
}

impl State {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }

    /// Parse a user-supplied state token. Unrecognized tokens mean `All`,
    /// which adds no predicate.
    #[must_use]
    pub fn from_param(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "open" => Self::Open,
            "closed" => Self::Closed,
            _ => Self::All,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    /// SQL keyword for this direction.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = crate::error::ForgeboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(crate::error::ForgeboardError::InvalidDirection {
                value: other.to_string(),
            }),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub name: String,
}

impl User {
    /// The anonymous placeholder user.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_USER_ID,
            login: "anonymous".to_string(),
            name: String::new(),
        }
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_USER_ID
    }
}

/// Project visibility within its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectVisibility {
    #[default]
    Public,
    Private,
}

impl ProjectVisibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for ProjectVisibility {
    type Err = crate::error::ForgeboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(crate::error::ForgeboardError::validation(
                "visibility",
                format!("unknown visibility '{other}'"),
            )),
        }
    }
}

impl fmt::Display for ProjectVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hosted project, optionally owned by an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub org_id: Option<i64>,
    pub name: String,
    pub visibility: ProjectVisibility,
}

/// An organization grouping projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

/// A project-scoped issue label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub project_id: i64,
    pub category: String,
    pub name: String,
}

/// Resource kind a mention is attached to.
///
/// Only issue posts and issue comments participate in issue search; other
/// kinds are skipped (with a warning) during mention resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionResource {
    IssuePost,
    IssueComment,
    #[serde(untagged)]
    Other(String),
}

impl MentionResource {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::IssuePost => "issue_post",
            Self::IssueComment => "issue_comment",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for MentionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MentionResource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "issue_post" => Self::IssuePost,
            "issue_comment" => Self::IssueComment,
            other => Self::Other(other.to_string()),
        })
    }
}

/// A user mention on some resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: i64,
    pub user_id: i64,
    pub resource: MentionResource,
    pub resource_id: i64,
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub issue_id: i64,
    pub author_id: i64,
    pub contents: String,
    pub created_at: DateTime<Utc>,
}

/// The trackable work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub body: String,
    pub state: State,
    pub author_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub milestone_id: Option<i64>,
    pub num_comments: i64,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }
}

/// A project-scoped deadline entity tracking aggregate issue counts.
///
/// Invariant: `completion_rate == floor(100 * num_closed_issues /
/// num_total_issues)` when `num_total_issues > 0`, else 0. The counter
/// methods below re-establish it after every adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Milestone {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub contents: String,
    pub due_date: Option<NaiveDate>,
    pub num_open_issues: i64,
    pub num_closed_issues: i64,
    pub num_total_issues: i64,
    pub completion_rate: i64,
}

impl Milestone {
    /// Reserved milestone id meaning "explicitly no milestone" in filters.
    pub const NULL_MILESTONE_ID: i64 = -1;

    /// Integer completion percentage, floor-truncated. 0 when total is 0.
    #[must_use]
    pub const fn completion_rate_for(total: i64, closed: i64) -> i64 {
        if total > 0 { 100 * closed / total } else { 0 }
    }

    /// Recompute `completion_rate` from the current counters.
    pub fn recalculate(&mut self) {
        self.completion_rate =
            Self::completion_rate_for(self.num_total_issues, self.num_closed_issues);
    }

    /// Incremental counter maintenance: an issue was attached.
    pub fn record_attached(&mut self, open: bool) {
        self.num_total_issues += 1;
        if open {
            self.num_open_issues += 1;
        } else {
            self.num_closed_issues += 1;
        }
        self.recalculate();
    }

    /// Incremental counter maintenance: an issue was detached or deleted.
    pub fn record_detached(&mut self, open: bool) {
        self.num_total_issues -= 1;
        if open {
            self.num_open_issues -= 1;
        } else {
            self.num_closed_issues -= 1;
        }
        self.recalculate();
    }

    /// Incremental counter maintenance: an attached issue flipped state.
    pub fn record_state_change(&mut self, now_open: bool) {
        if now_open {
            self.num_open_issues += 1;
            self.num_closed_issues -= 1;
        } else {
            self.num_open_issues -= 1;
            self.num_closed_issues += 1;
        }
        self.recalculate();
    }

    /// Copy the editable fields from another milestone value.
    pub fn update_with(&mut self, other: &Self) {
        self.title = other.title.clone();
        self.contents = other.contents.clone();
        self.due_date = other.due_date;
    }

    /// Due date rendered as `yyyy-MM-dd`, if set.
    #[must_use]
    pub fn due_date_string(&self) -> Option<String> {
        self.due_date.map(|d| d.format("%Y-%m-%d").to_string())
    }
}
