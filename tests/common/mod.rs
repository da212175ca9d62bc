//! Shared fixtures for integration tests: real `SQLite`, no mocks.
#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use forgeboard::model::{Issue, Milestone, State};
use forgeboard::storage::SqliteStorage;

pub fn init_test_logging() {
    forgeboard::logging::init_test_logging();
}

pub fn test_db() -> SqliteStorage {
    init_test_logging();
    SqliteStorage::open_memory().expect("Failed to create test database")
}

pub mod fixtures {
    use super::*;

    /// `yyyy-MM-dd` literal to a `NaiveDate`.
    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date literal")
    }

    /// An open issue in `project_id` with everything else unset.
    ///
    /// `age_days` staggers `created_at` so tests can assert on ordering.
    pub fn issue(project_id: i64, title: &str, age_days: i64) -> Issue {
        let created = Utc::now() - Duration::days(age_days);
        Issue {
            id: 0,
            project_id,
            title: title.to_string(),
            body: String::new(),
            state: State::Open,
            author_id: None,
            assignee_id: None,
            milestone_id: None,
            num_comments: 0,
            due_date: None,
            created_at: created,
            updated_at: created,
        }
    }

    pub fn milestone(project_id: i64, title: &str, due: Option<&str>) -> Milestone {
        Milestone {
            id: 0,
            project_id,
            title: title.to_string(),
            contents: String::new(),
            due_date: due.map(date),
            num_open_issues: 0,
            num_closed_issues: 0,
            num_total_issues: 0,
            completion_rate: 0,
        }
    }
}

/// Seed a lone project (no organization) and return its id.
pub fn seed_project(storage: &mut SqliteStorage, name: &str) -> i64 {
    storage
        .add_project(None, name, forgeboard::model::ProjectVisibility::Public)
        .expect("Failed to seed project")
}
