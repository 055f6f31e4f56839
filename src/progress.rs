//! Progress propagation
//!
//! Percentages are stored, never computed on read. Every write to a task or
//! milestone ends with an explicit call into this module, which re-derives the
//! parent rows bottom-up:
//!
//! ```text
//! task write ──► derive_milestone_from_tasks ──► derive_goal_from_milestones
//! milestone write ─────────────────────────────► derive_goal_from_milestones
//! ```
//!
//! A derivation whose result equals the stored value performs no write and
//! no cascade. That guard is what keeps repeated derivations idempotent.
//!
//! All functions take a connection that the caller has already placed inside
//! a transaction, so a triggering write and its cascade commit together.

use crate::db::{now_rfc3339, Goal, Milestone};
use crate::error::AppError;
use crate::model::Status;
use crate::schema::{goals, milestones, tasks};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Float tolerance under which a task-weighted goal percentage counts as unchanged
pub const GOAL_PERCENTAGE_TOLERANCE: f64 = 0.001;

/// How a goal's percentage is aggregated from its milestones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Every task weighs 1; a milestone without tasks weighs 1 and counts
    /// as done when its own status is completed. Float percentage.
    #[default]
    TaskWeighted,
    /// Completed milestones over all milestones, rounded to an integer
    MilestoneWeighted,
}

/// Per-milestone inputs to goal aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilestoneTally {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub status: Status,
}

impl MilestoneTally {
    pub fn is_standalone(&self) -> bool {
        self.total_tasks == 0
    }
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::TaskWeighted => "task_weighted",
            Aggregation::MilestoneWeighted => "milestone_weighted",
        }
    }

    /// Whether task counts feed the goal directly, so a task change can move
    /// the goal even when its milestone's percentage stays put
    pub fn counts_tasks(&self) -> bool {
        matches!(self, Aggregation::TaskWeighted)
    }

    pub fn goal_percentage(&self, tallies: &[MilestoneTally]) -> f64 {
        match self {
            Aggregation::TaskWeighted => {
                let (mut total, mut completed) = (0i64, 0i64);
                for tally in tallies {
                    if tally.is_standalone() {
                        total += 1;
                        if tally.status == Status::Completed {
                            completed += 1;
                        }
                    } else {
                        total += tally.total_tasks;
                        completed += tally.completed_tasks;
                    }
                }
                if total == 0 {
                    return 0.0;
                }
                completed as f64 / total as f64 * 100.0
            }
            Aggregation::MilestoneWeighted => {
                let total = tallies.len() as i64;
                let completed = tallies
                    .iter()
                    .filter(|t| t.status == Status::Completed)
                    .count() as i64;
                f64::from(rounded_percentage(completed, total))
            }
        }
    }

    pub fn status_for(&self, percentage: f64) -> Status {
        match self {
            Aggregation::TaskWeighted => {
                if percentage < 0.1 {
                    Status::Pending
                } else if percentage >= 99.9 {
                    Status::Completed
                } else {
                    Status::InProgress
                }
            }
            Aggregation::MilestoneWeighted => {
                if percentage == 0.0 {
                    Status::Pending
                } else if percentage == 100.0 {
                    Status::Completed
                } else {
                    Status::InProgress
                }
            }
        }
    }

    /// Whether `computed` should replace `stored`
    pub fn differs(&self, stored: f64, computed: f64) -> bool {
        match self {
            Aggregation::TaskWeighted => (stored - computed).abs() > GOAL_PERCENTAGE_TOLERANCE,
            Aggregation::MilestoneWeighted => stored != computed,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_weighted" => Ok(Aggregation::TaskWeighted),
            "milestone_weighted" => Ok(Aggregation::MilestoneWeighted),
            other => Err(format!(
                "Unknown aggregation '{}': expected task_weighted or milestone_weighted",
                other
            )),
        }
    }
}

/// `round(100 * completed / total)` with halves rounded up; 0 when empty
pub fn rounded_percentage(completed: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    ((200 * completed + total) / (2 * total)) as i32
}

/// Status implied by an integer percentage
pub fn status_for_percentage(percentage: i32) -> Status {
    match percentage {
        0 => Status::Pending,
        100 => Status::Completed,
        _ => Status::InProgress,
    }
}

/// Resolve a direct status/percentage assignment on a row without children.
///
/// `completed` forces 100 and `pending` forces 0. `in_progress` keeps the
/// supplied (or current) percentage, which must then lie strictly between
/// 0 and 100. A bare percentage implies its status. `Ok(None)` means nothing
/// was requested.
pub fn resolve_manual(
    status: Option<Status>,
    percentage: Option<i32>,
    current: i32,
) -> Result<Option<(i32, Status)>, AppError> {
    if let Some(p) = percentage {
        if !(0..=100).contains(&p) {
            return Err(AppError::invalid(
                "progress_percentage",
                "Invalid progress percentage",
                "The progress percentage must be between 0 and 100.",
            ));
        }
    }

    match (status, percentage) {
        (Some(Status::Completed), _) => Ok(Some((100, Status::Completed))),
        (Some(Status::Pending), _) => Ok(Some((0, Status::Pending))),
        (Some(Status::InProgress), p) => {
            let p = p.unwrap_or(current);
            if (1..=99).contains(&p) {
                Ok(Some((p, Status::InProgress)))
            } else {
                Err(AppError::invalid(
                    "progress_percentage",
                    "Invalid progress percentage",
                    "An in-progress item needs a progress percentage between 1 and 99.",
                ))
            }
        }
        (None, Some(p)) => Ok(Some((p, status_for_percentage(p)))),
        (None, None) => Ok(None),
    }
}

// ============================================================================
// Derivations against storage
// ============================================================================

/// What a derivation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// Stored a new percentage and status
    Written,
    /// Computed value matched the stored one; nothing written
    Unchanged,
    /// Row no longer exists
    Missing,
}

/// `(total, completed)` tasks under one milestone
pub fn task_counts(conn: &mut SqliteConnection, milestone_id: i32) -> QueryResult<(i64, i64)> {
    let total: i64 = tasks::table
        .filter(tasks::milestone_id.eq(milestone_id))
        .count()
        .get_result(conn)?;
    let completed: i64 = tasks::table
        .filter(tasks::milestone_id.eq(milestone_id))
        .filter(tasks::status.eq(Status::Completed.as_str()))
        .count()
        .get_result(conn)?;
    Ok((total, completed))
}

/// Aggregation inputs for every milestone of a goal
pub fn milestone_tallies(conn: &mut SqliteConnection, goal_id: i32) -> QueryResult<Vec<MilestoneTally>> {
    let rows: Vec<(i32, String)> = milestones::table
        .filter(milestones::goal_id.eq(goal_id))
        .select((milestones::id, milestones::status))
        .load(conn)?;

    let task_rows: Vec<(i32, String)> = tasks::table
        .inner_join(milestones::table)
        .filter(milestones::goal_id.eq(goal_id))
        .select((tasks::milestone_id, tasks::status))
        .load(conn)?;

    let mut counts: HashMap<i32, (i64, i64)> = HashMap::new();
    for (milestone_id, status) in task_rows {
        let entry = counts.entry(milestone_id).or_insert((0, 0));
        entry.0 += 1;
        if status == Status::Completed.as_str() {
            entry.1 += 1;
        }
    }

    Ok(rows
        .into_iter()
        .map(|(id, status)| {
            let (total_tasks, completed_tasks) = counts.get(&id).copied().unwrap_or((0, 0));
            MilestoneTally {
                total_tasks,
                completed_tasks,
                // Unknown text cannot be completed, which is all aggregation asks
                status: status.parse().unwrap_or(Status::Pending),
            }
        })
        .collect())
}

/// Re-derive a milestone's percentage and status from its tasks.
///
/// A milestone with no tasks falls back to 0 / pending. On a write the
/// parent goal is re-derived as well.
pub fn derive_milestone_from_tasks(
    conn: &mut SqliteConnection,
    milestone_id: i32,
    aggregation: Aggregation,
) -> QueryResult<Derivation> {
    let milestone = milestones::table
        .find(milestone_id)
        .select(Milestone::as_select())
        .first(conn)
        .optional()?;
    let Some(milestone) = milestone else {
        return Ok(Derivation::Missing);
    };

    let (total, completed) = task_counts(conn, milestone_id)?;
    let percentage = rounded_percentage(completed, total);

    if percentage == milestone.progress_percentage {
        tracing::debug!(milestone_id, percentage, "milestone progress unchanged");
        return Ok(Derivation::Unchanged);
    }

    let status = status_for_percentage(percentage);
    let now = now_rfc3339();
    diesel::update(milestones::table.find(milestone_id))
        .set((
            milestones::progress_percentage.eq(percentage),
            milestones::status.eq(status.as_str()),
            milestones::updated_at.eq(&now),
        ))
        .execute(conn)?;
    tracing::debug!(
        milestone_id,
        from = milestone.progress_percentage,
        to = percentage,
        %status,
        "milestone progress derived"
    );

    derive_goal_from_milestones(conn, milestone.goal_id, aggregation)?;
    Ok(Derivation::Written)
}

/// Re-derive a goal's percentage and status from its milestones
pub fn derive_goal_from_milestones(
    conn: &mut SqliteConnection,
    goal_id: i32,
    aggregation: Aggregation,
) -> QueryResult<Derivation> {
    let goal = goals::table
        .find(goal_id)
        .select(Goal::as_select())
        .first(conn)
        .optional()?;
    let Some(goal) = goal else {
        return Ok(Derivation::Missing);
    };

    let tallies = milestone_tallies(conn, goal_id)?;
    let percentage = aggregation.goal_percentage(&tallies);

    if !aggregation.differs(goal.progress_percentage, percentage) {
        tracing::debug!(goal_id, percentage, "goal progress unchanged");
        return Ok(Derivation::Unchanged);
    }

    let status = aggregation.status_for(percentage);
    let now = now_rfc3339();
    diesel::update(goals::table.find(goal_id))
        .set((
            goals::progress_percentage.eq(percentage),
            goals::status.eq(status.as_str()),
            goals::updated_at.eq(&now),
        ))
        .execute(conn)?;
    tracing::debug!(
        goal_id,
        from = goal.progress_percentage,
        to = percentage,
        %status,
        %aggregation,
        "goal progress derived"
    );

    Ok(Derivation::Written)
}

/// Hook run at the end of every task create, update and delete
pub fn on_task_changed(
    conn: &mut SqliteConnection,
    milestone_id: i32,
    aggregation: Aggregation,
) -> QueryResult<()> {
    let goal_id: Option<i32> = milestones::table
        .find(milestone_id)
        .select(milestones::goal_id)
        .first(conn)
        .optional()?;
    let Some(goal_id) = goal_id else {
        tracing::warn!(milestone_id, "task hook found no milestone");
        return Ok(());
    };

    let outcome = derive_milestone_from_tasks(conn, milestone_id, aggregation)?;
    if outcome == Derivation::Unchanged && aggregation.counts_tasks() {
        derive_goal_from_milestones(conn, goal_id, aggregation)?;
    }
    Ok(())
}

/// Hook run after a milestone create, delete, or status-changing update
pub fn on_milestone_changed(
    conn: &mut SqliteConnection,
    goal_id: i32,
    aggregation: Aggregation,
) -> QueryResult<()> {
    derive_goal_from_milestones(conn, goal_id, aggregation)?;
    Ok(())
}
