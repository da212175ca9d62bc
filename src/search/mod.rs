//! Issue search condition accumulation.
//!
//! A [`SearchCondition`] collects the optional filter dimensions of one
//! search request. It is pure data; [`crate::storage::SqliteStorage`]
//! materializes it into an executable query in one of three scopes
//! (project, unscoped, organization).

use crate::model::{Direction, State};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default order key for issue listings.
pub const DEFAULT_ORDER_BY: &str = "created_at";

/// Accumulated filter criteria for one issue search request.
///
/// Every field is optional in effect: unset fields contribute no predicate.
/// Filters compose conjunctively; the free-text filter is internally a
/// disjunction over title, body, and comment contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCondition {
    /// Sort key; whitelisted by the store, falls back to `created_at`.
    pub order_by: String,
    pub order_dir: Direction,
    /// Case-insensitive free-text filter over title, body, and comments.
    pub filter: Option<String>,
    /// Only `Open`/`Closed` add a predicate; `All` adds none.
    pub state: State,
    /// Restrict to issues with at least one comment.
    pub commented: bool,
    /// `Milestone::NULL_MILESTONE_ID` means "issues without a milestone".
    pub milestone_id: Option<i64>,
    pub label_ids: BTreeSet<i64>,
    pub author_id: Option<i64>,
    /// `ANONYMOUS_USER_ID` means "unassigned".
    pub assignee_id: Option<i64>,
    pub commenter_id: Option<i64>,
    pub mention_id: Option<i64>,
    /// Inclusive upper bound at day granularity.
    pub due_date: Option<NaiveDate>,
    /// Organization scope only: case-insensitive project-name allowlist.
    pub project_names: Vec<String>,
    /// Zero-based page offset; applied only when `limit` is set.
    pub page: usize,
    pub limit: Option<usize>,
}

impl Default for SearchCondition {
    fn default() -> Self {
        Self {
            order_by: DEFAULT_ORDER_BY.to_string(),
            order_dir: Direction::Desc,
            filter: None,
            state: State::Open,
            commented: false,
            milestone_id: None,
            label_ids: BTreeSet::new(),
            author_id: None,
            assignee_id: None,
            commenter_id: None,
            mention_id: None,
            due_date: None,
            project_names: Vec::new(),
            page: 0,
            limit: None,
        }
    }
}

impl SearchCondition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this condition without the page offset.
    ///
    /// The page is intentionally left at zero so that a condition reused
    /// across tabs starts each tab from its first page.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            page: 0,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = order_by.into();
        self
    }

    #[must_use]
    pub fn with_order_dir(mut self, dir: Direction) -> Self {
        self.order_dir = dir;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Set the state from a request token; unknown tokens mean `All`.
    #[must_use]
    pub fn with_state_param(mut self, token: &str) -> Self {
        self.state = State::from_param(token);
        self
    }

    #[must_use]
    pub fn with_commented(mut self, commented: bool) -> Self {
        self.commented = commented;
        self
    }

    #[must_use]
    pub fn with_milestone_id(mut self, milestone_id: i64) -> Self {
        self.milestone_id = Some(milestone_id);
        self
    }

    #[must_use]
    pub fn with_label_ids(mut self, label_ids: impl IntoIterator<Item = i64>) -> Self {
        self.label_ids = label_ids.into_iter().collect();
        self
    }

    pub fn add_label_id(&mut self, label_id: i64) {
        self.label_ids.insert(label_id);
    }

    #[must_use]
    pub fn with_author_id(mut self, author_id: i64) -> Self {
        self.author_id = Some(author_id);
        self
    }

    #[must_use]
    pub fn with_assignee_id(mut self, assignee_id: i64) -> Self {
        self.assignee_id = Some(assignee_id);
        self
    }

    #[must_use]
    pub fn with_commenter_id(mut self, commenter_id: i64) -> Self {
        self.commenter_id = Some(commenter_id);
        self
    }

    #[must_use]
    pub fn with_mention_id(mut self, mention_id: i64) -> Self {
        self.mention_id = Some(mention_id);
        self
    }

    #[must_use]
    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    #[must_use]
    pub fn with_project_names(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.project_names = names.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Due date rendered as `yyyy-MM-dd`, if set.
    #[must_use]
    pub fn due_date_string(&self) -> Option<String> {
        self.due_date.map(|d| d.format("%Y-%m-%d").to_string())
    }

    /// True when an explicit project-name allowlist restricts the
    /// organization scope.
    #[must_use]
    pub fn is_filtered_by_project(&self) -> bool {
        !self.project_names.is_empty()
    }
}
