//! Issue search and milestone tracking core for project hosting.
//!
//! `forgeboard` implements the two query-heavy pieces of a project-hosting
//! application over an embedded `SQLite` store:
//!
//! - [`model::Milestone`] lifecycle plus the denormalized issue-count and
//!   completion-rate bookkeeping attached to it, and
//! - [`search::SearchCondition`], an accumulator that turns a dozen optional
//!   filter dimensions into one executable issue query.
//!
//! The entry point is [`storage::SqliteStorage`], which owns the connection
//! and materializes conditions in three scopes: single project, whole store,
//! or organization restricted to the projects a viewer can see.

pub mod error;
pub mod logging;
pub mod model;
pub mod search;
pub mod storage;

pub use error::{ForgeboardError, Result};
pub use search::SearchCondition;
pub use storage::SqliteStorage;
