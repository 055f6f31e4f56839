//! Goalify - goal tracking with automatic progress rollup
//!
//! Users own goals, goals own milestones, milestones own tasks. Whenever a
//! task or milestone changes, its parents' percentages and statuses are
//! re-derived bottom-up and stored.
//!
//! # Progress Rules
//!
//! | Level | Derived from | Value |
//! |-------|--------------|-------|
//! | Milestone | its tasks | `round(100 * completed / total)`, 0 when empty |
//! | Goal (`task_weighted`) | every task, standalone milestones count once | float |
//! | Goal (`milestone_weighted`) | completed milestones / milestones | integer |
//!
//! Status follows the percentage: 0 is `pending`, 100 is `completed`,
//! anything between is `in_progress`.
//!
//! # Quick Start
//!
//! ```no_run
//! use goalify::{Aggregation, Database, Tracker};
//! use goalify::requests::{CreateGoalRequest, RegisterRequest};
//! use goalify::model::Priority;
//!
//! let db = Database::open_at("goalify.db").unwrap();
//! let tracker = Tracker::new(db, Aggregation::TaskWeighted);
//!
//! let session = tracker.register(&RegisterRequest {
//!     name: "Ada".into(),
//!     email: "ada@example.com".into(),
//!     password: "analytical".into(),
//! }).unwrap();
//!
//! let goal = tracker.create_goal(session.user.id, &CreateGoalRequest {
//!     title: "Run a marathon".into(),
//!     description: None,
//!     start_date: "2025-01-01".parse().unwrap(),
//!     end_date: "2025-12-31".parse().unwrap(),
//!     priority: Priority::High,
//!     status: None,
//!     progress_percentage: None,
//! }).unwrap();
//! println!("{}: {}%", goal.goal.title, goal.goal.progress_percentage);
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod init;
pub mod model;
pub mod progress;
pub mod requests;
pub mod schema;
pub mod serve;
pub mod tracker;

pub use auth::AuthSession;
pub use config::Config;
pub use db::{Database, DbSummary, Goal, Milestone, Task, User, CURRENT_SCHEMA};
pub use error::{AppError, AppResult};
pub use progress::Aggregation;
pub use serve::{Api, Reply};
pub use tracker::{GoalView, MilestoneView, RecalcReport, TaskView, Tracker};
