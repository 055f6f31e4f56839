//! Goal, milestone and task operations
//!
//! Every operation checks that the acting user owns the goal chain, applies
//! its write, and finishes with the explicit propagation hook for the entity
//! it touched. Writes run in one immediate transaction, so a failed cascade
//! rolls back the write that triggered it.

use crate::db::{
    last_insert_id, now_rfc3339, Database, Goal, GoalChangeset, Milestone, MilestoneChangeset,
    NewGoal, NewMilestone, NewTask, Task, TaskChangeset,
};
use crate::error::{AppError, AppResult};
use crate::model::Status;
use crate::progress::{self, Aggregation};
use crate::requests::{
    CreateGoalRequest, CreateMilestoneRequest, CreateTaskRequest, GoalQuery, GoalSort, SortOrder,
    UpdateGoalRequest, UpdateMilestoneRequest, UpdateTaskRequest,
};
use crate::schema::{goals, milestones, tasks};
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::sqlite::{Sqlite, SqliteConnection};
use serde::Serialize;

// ============================================================================
// Read projections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountStats {
    pub total: i64,
    pub completed: i64,
    pub in_progress: i64,
}

impl CountStats {
    fn new(total: i64, completed: i64) -> Self {
        Self {
            total,
            completed,
            in_progress: total - completed,
        }
    }
}

/// Goal with the counts a client shows next to it
#[derive(Debug, Clone, Serialize)]
pub struct GoalView {
    #[serde(flatten)]
    pub goal: Goal,
    pub milestone_count: i64,
    pub task_stats: CountStats,
    pub milestone_stats: CountStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneView {
    #[serde(flatten)]
    pub milestone: Milestone,
    pub task_count: i64,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub milestone: Milestone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub current_page: i64,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub last_page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalPage {
    pub goals: Vec<GoalView>,
    pub pagination: PageMeta,
}

/// Rows written by a full re-derivation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecalcReport {
    pub milestones_checked: usize,
    pub milestones_updated: usize,
    pub goals_checked: usize,
    pub goals_updated: usize,
}

/// Page size bounds for goal listings
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_per_page: i64,
    pub max_per_page: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_per_page: 10,
            max_per_page: 100,
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Entry point for every goal-tree operation.
///
/// The aggregation policy is fixed at construction and handed to each
/// propagation call; nothing is registered globally.
pub struct Tracker {
    db: Database,
    aggregation: Aggregation,
    limits: PageLimits,
}

impl Tracker {
    pub fn new(db: Database, aggregation: Aggregation) -> Self {
        Self {
            db,
            aggregation,
            limits: PageLimits::default(),
        }
    }

    pub fn with_page_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Run `f` inside one immediate transaction
    pub(crate) fn write<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut SqliteConnection) -> AppResult<T>,
    {
        let mut conn = self.db.get_conn()?;
        conn.immediate_transaction(f)
    }

    pub(crate) fn read<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut SqliteConnection) -> AppResult<T>,
    {
        let mut conn = self.db.get_conn()?;
        f(&mut *conn)
    }

    // ========================================================================
    // Goals
    // ========================================================================

    pub fn create_goal(&self, user_id: i32, req: &CreateGoalRequest) -> AppResult<GoalView> {
        req.validate()?;
        let (percentage, status) = progress::resolve_manual(req.status, req.progress_percentage, 0)?
            .unwrap_or((0, Status::Pending));

        self.write(|conn| {
            let now = now_rfc3339();
            diesel::insert_into(goals::table)
                .values(&NewGoal {
                    user_id,
                    title: req.title.trim(),
                    description: req.description.as_deref(),
                    start_date: req.start_date,
                    end_date: req.end_date,
                    priority: req.priority.as_str(),
                    status: status.as_str(),
                    progress_percentage: f64::from(percentage),
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;
            let id = last_insert_id(conn)?;
            tracing::info!(goal_id = id, user_id, "goal created");
            let goal = load_goal(conn, id)?;
            goal_view(conn, goal)
        })
    }

    pub fn get_goal(&self, user_id: i32, goal_id: i32) -> AppResult<GoalView> {
        self.read(|conn| {
            let goal = owned_goal(conn, user_id, goal_id, "view")?;
            goal_view(conn, goal)
        })
    }

    pub fn update_goal(&self, user_id: i32, goal_id: i32, req: &UpdateGoalRequest) -> AppResult<GoalView> {
        req.validate()?;
        self.write(|conn| {
            let goal = owned_goal(conn, user_id, goal_id, "update")?;

            let start = req.start_date.unwrap_or(goal.start_date);
            let end = req.end_date.unwrap_or(goal.end_date);
            if end < start {
                return Err(AppError::invalid(
                    "end_date",
                    "Invalid date range",
                    "End date must be after or equal to start date",
                ));
            }

            let mut manual = None;
            if req.touches_progress() {
                let milestone_count: i64 = milestones::table
                    .filter(milestones::goal_id.eq(goal_id))
                    .count()
                    .get_result(conn)?;
                if milestone_count > 0 {
                    let field = if req.status.is_some() { "status" } else { "progress_percentage" };
                    return Err(AppError::invalid(
                        field,
                        "Progress cannot be manually updated when goal has milestones",
                        "Progress is automatically determined by milestone completion",
                    ));
                }
                let current = goal.progress_percentage.round() as i32;
                manual = progress::resolve_manual(req.status, req.progress_percentage, current)?;
            }

            let now = now_rfc3339();
            let changes = GoalChangeset {
                title: req.title.as_deref().map(str::trim),
                description: req.description.as_ref().map(|d| d.as_deref()),
                start_date: req.start_date,
                end_date: req.end_date,
                priority: req.priority.map(|p| p.as_str()),
                status: manual.map(|(_, s)| s.as_str()),
                progress_percentage: manual.map(|(p, _)| f64::from(p)),
                updated_at: Some(now.as_str()),
            };
            diesel::update(goals::table.find(goal_id))
                .set(&changes)
                .execute(conn)?;

            let goal = load_goal(conn, goal_id)?;
            goal_view(conn, goal)
        })
    }

    /// Delete a goal together with its milestones and their tasks
    pub fn delete_goal(&self, user_id: i32, goal_id: i32) -> AppResult<()> {
        self.write(|conn| {
            owned_goal(conn, user_id, goal_id, "delete")?;
            let milestone_ids = milestones::table
                .filter(milestones::goal_id.eq(goal_id))
                .select(milestones::id);
            let removed_tasks = diesel::delete(tasks::table.filter(tasks::milestone_id.eq_any(milestone_ids)))
                .execute(conn)?;
            let removed_milestones = diesel::delete(milestones::table.filter(milestones::goal_id.eq(goal_id)))
                .execute(conn)?;
            diesel::delete(goals::table.find(goal_id)).execute(conn)?;
            tracing::info!(goal_id, removed_milestones, removed_tasks, "goal deleted");
            Ok(())
        })
    }

    /// One page of the user's goals, filtered and sorted
    pub fn list_goals(&self, user_id: i32, query: &GoalQuery) -> AppResult<GoalPage> {
        let per_page = query
            .per_page
            .unwrap_or(self.limits.default_per_page)
            .clamp(1, self.limits.max_per_page);
        let page = query.page.unwrap_or(1).max(1);
        let offset = (page - 1)
            .checked_mul(per_page)
            .filter(|offset| offset.checked_add(per_page).is_some())
            .ok_or_else(|| AppError::invalid("page", "Invalid query parameters", "The page is out of range."))?;

        self.read(|conn| {
            let total: i64 = filtered_goals(user_id, query).count().get_result(conn)?;
            let rows: Vec<Goal> = sorted_goals(filtered_goals(user_id, query), query)
                .limit(per_page)
                .offset(offset)
                .load(conn)?;

            let returned = rows.len() as i64;
            let goals = rows
                .into_iter()
                .map(|goal| goal_view(conn, goal))
                .collect::<AppResult<Vec<_>>>()?;

            Ok(GoalPage {
                goals,
                pagination: page_meta(page, per_page, offset, total, returned),
            })
        })
    }

    /// Every goal of the user; only search and sorting apply
    pub fn all_goals(&self, user_id: i32, query: &GoalQuery) -> AppResult<Vec<GoalView>> {
        let query = GoalQuery {
            search: query.search.clone(),
            sort_by: query.sort_by,
            sort_order: query.sort_order,
            ..Default::default()
        };
        self.read(|conn| {
            let rows: Vec<Goal> = sorted_goals(filtered_goals(user_id, &query), &query).load(conn)?;
            rows.into_iter().map(|goal| goal_view(conn, goal)).collect()
        })
    }

    // ========================================================================
    // Milestones
    // ========================================================================

    pub fn list_milestones(&self, user_id: i32, goal_id: i32) -> AppResult<Vec<MilestoneView>> {
        self.read(|conn| {
            owned_goal(conn, user_id, goal_id, "view")?;
            let rows: Vec<Milestone> = milestones::table
                .filter(milestones::goal_id.eq(goal_id))
                .order((milestones::due_date.asc(), milestones::id.asc()))
                .select(Milestone::as_select())
                .load(conn)?;
            rows.into_iter().map(|m| milestone_view(conn, m)).collect()
        })
    }

    pub fn create_milestone(
        &self,
        user_id: i32,
        goal_id: i32,
        req: &CreateMilestoneRequest,
    ) -> AppResult<MilestoneView> {
        req.validate()?;
        // A new milestone has no tasks yet, so direct progress is allowed
        let (percentage, status) = progress::resolve_manual(req.status, req.progress_percentage, 0)?
            .unwrap_or((0, Status::Pending));

        self.write(|conn| {
            let goal = owned_goal(conn, user_id, goal_id, "update")?;
            check_milestone_due(&goal, req.due_date)?;

            let now = now_rfc3339();
            diesel::insert_into(milestones::table)
                .values(&NewMilestone {
                    goal_id,
                    title: req.title.trim(),
                    description: req.description.as_deref(),
                    due_date: req.due_date,
                    status: status.as_str(),
                    priority: req.priority.as_str(),
                    progress_percentage: percentage,
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;
            let id = last_insert_id(conn)?;
            tracing::info!(milestone_id = id, goal_id, "milestone created");

            progress::on_milestone_changed(conn, goal_id, self.aggregation)?;
            let milestone = load_milestone(conn, id)?;
            milestone_view(conn, milestone)
        })
    }

    pub fn get_milestone(&self, user_id: i32, goal_id: i32, milestone_id: i32) -> AppResult<MilestoneView> {
        self.read(|conn| {
            let (_, milestone) = owned_milestone_in_goal(conn, user_id, goal_id, milestone_id, "view")?;
            milestone_view(conn, milestone)
        })
    }

    pub fn update_milestone(
        &self,
        user_id: i32,
        goal_id: i32,
        milestone_id: i32,
        req: &UpdateMilestoneRequest,
    ) -> AppResult<MilestoneView> {
        req.validate()?;
        self.write(|conn| {
            let (goal, milestone) = owned_milestone_in_goal(conn, user_id, goal_id, milestone_id, "update")?;

            let mut manual = None;
            if req.touches_progress() {
                let (task_total, _) = progress::task_counts(conn, milestone_id)?;
                if task_total > 0 {
                    let field = if req.status.is_some() { "status" } else { "progress_percentage" };
                    return Err(AppError::invalid(
                        field,
                        "Status cannot be manually updated when milestone has tasks",
                        "Status is automatically determined by task completion",
                    ));
                }
                manual = progress::resolve_manual(
                    req.status,
                    req.progress_percentage,
                    milestone.progress_percentage,
                )?;
            }

            if let Some(due) = req.due_date {
                check_milestone_due(&goal, due)?;
            }

            let now = now_rfc3339();
            let changes = MilestoneChangeset {
                title: req.title.as_deref().map(str::trim),
                description: req.description.as_ref().map(|d| d.as_deref()),
                due_date: req.due_date,
                status: manual.map(|(_, s)| s.as_str()),
                priority: req.priority.map(|p| p.as_str()),
                progress_percentage: manual.map(|(p, _)| p),
                updated_at: Some(now.as_str()),
            };
            diesel::update(milestones::table.find(milestone_id))
                .set(&changes)
                .execute(conn)?;

            let progress_changed = manual.is_some_and(|(p, s)| {
                p != milestone.progress_percentage || s.as_str() != milestone.status
            });
            if progress_changed {
                progress::on_milestone_changed(conn, goal_id, self.aggregation)?;
            }

            let milestone = load_milestone(conn, milestone_id)?;
            milestone_view(conn, milestone)
        })
    }

    /// Delete a milestone and its tasks, then re-derive the goal
    pub fn delete_milestone(&self, user_id: i32, goal_id: i32, milestone_id: i32) -> AppResult<()> {
        self.write(|conn| {
            owned_milestone_in_goal(conn, user_id, goal_id, milestone_id, "delete")?;
            let removed_tasks = diesel::delete(tasks::table.filter(tasks::milestone_id.eq(milestone_id)))
                .execute(conn)?;
            diesel::delete(milestones::table.find(milestone_id)).execute(conn)?;
            tracing::info!(milestone_id, goal_id, removed_tasks, "milestone deleted");

            progress::on_milestone_changed(conn, goal_id, self.aggregation)?;
            Ok(())
        })
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Tasks of a milestone, earliest due first and undated last
    pub fn list_tasks(&self, user_id: i32, milestone_id: i32) -> AppResult<Vec<Task>> {
        self.read(|conn| {
            owned_milestone(conn, user_id, milestone_id, "view")?;
            Ok(tasks_of(conn, milestone_id)?)
        })
    }

    pub fn create_task(&self, user_id: i32, milestone_id: i32, req: &CreateTaskRequest) -> AppResult<TaskView> {
        req.validate()?;
        self.write(|conn| {
            let (goal, milestone) = owned_milestone(conn, user_id, milestone_id, "update")?;
            if let Some(due) = req.due_date {
                check_task_due(&goal, &milestone, due)?;
            }

            let now = now_rfc3339();
            diesel::insert_into(tasks::table)
                .values(&NewTask {
                    milestone_id,
                    title: req.title.trim(),
                    description: req.description.as_deref(),
                    status: req.status.as_str(),
                    priority: req.priority.as_str(),
                    due_date: req.due_date,
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;
            let id = last_insert_id(conn)?;
            tracing::info!(task_id = id, milestone_id, "task created");

            progress::on_task_changed(conn, milestone_id, self.aggregation)?;
            task_view(conn, id)
        })
    }

    pub fn get_task(&self, user_id: i32, milestone_id: i32, task_id: i32) -> AppResult<TaskView> {
        self.read(|conn| {
            let (_, milestone, task) = owned_task(conn, user_id, milestone_id, task_id, "view")?;
            Ok(TaskView { task, milestone })
        })
    }

    pub fn update_task(
        &self,
        user_id: i32,
        milestone_id: i32,
        task_id: i32,
        req: &UpdateTaskRequest,
    ) -> AppResult<TaskView> {
        req.validate()?;
        self.write(|conn| {
            let (goal, milestone, _) = owned_task(conn, user_id, milestone_id, task_id, "update")?;
            if let Some(Some(due)) = req.due_date {
                check_task_due(&goal, &milestone, due)?;
            }

            let now = now_rfc3339();
            let changes = TaskChangeset {
                title: req.title.as_deref().map(str::trim),
                description: req.description.as_ref().map(|d| d.as_deref()),
                status: req.status.map(|s| s.as_str()),
                priority: req.priority.map(|p| p.as_str()),
                due_date: req.due_date,
                updated_at: Some(now.as_str()),
            };
            diesel::update(tasks::table.find(task_id))
                .set(&changes)
                .execute(conn)?;

            progress::on_task_changed(conn, milestone_id, self.aggregation)?;
            task_view(conn, task_id)
        })
    }

    pub fn delete_task(&self, user_id: i32, milestone_id: i32, task_id: i32) -> AppResult<()> {
        self.write(|conn| {
            owned_task(conn, user_id, milestone_id, task_id, "delete")?;
            diesel::delete(tasks::table.find(task_id)).execute(conn)?;
            tracing::info!(task_id, milestone_id, "task deleted");

            progress::on_task_changed(conn, milestone_id, self.aggregation)?;
            Ok(())
        })
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Re-derive every milestone that has tasks and every goal that has
    /// milestones. Standalone milestones and childless goals keep their
    /// manually assigned progress.
    pub fn recalculate_all(&self) -> AppResult<RecalcReport> {
        let aggregation = self.aggregation;
        self.write(|conn| {
            let mut report = RecalcReport::default();

            let task_parents: Vec<i32> = tasks::table
                .select(tasks::milestone_id)
                .distinct()
                .load(conn)?;
            for milestone_id in task_parents {
                report.milestones_checked += 1;
                if progress::derive_milestone_from_tasks(conn, milestone_id, aggregation)?
                    == progress::Derivation::Written
                {
                    report.milestones_updated += 1;
                }
            }

            let milestone_parents: Vec<i32> = milestones::table
                .select(milestones::goal_id)
                .distinct()
                .load(conn)?;
            for goal_id in milestone_parents {
                report.goals_checked += 1;
                if progress::derive_goal_from_milestones(conn, goal_id, aggregation)?
                    == progress::Derivation::Written
                {
                    report.goals_updated += 1;
                }
            }

            tracing::info!(?report, %aggregation, "recalculated progress");
            Ok(report)
        })
    }
}

// ============================================================================
// Lookups and ownership
// ============================================================================

fn load_goal(conn: &mut SqliteConnection, goal_id: i32) -> AppResult<Goal> {
    goals::table
        .find(goal_id)
        .select(Goal::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Goal not found"))
}

fn load_milestone(conn: &mut SqliteConnection, milestone_id: i32) -> AppResult<Milestone> {
    milestones::table
        .find(milestone_id)
        .select(Milestone::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Milestone not found"))
}

fn owned_goal(conn: &mut SqliteConnection, user_id: i32, goal_id: i32, action: &str) -> AppResult<Goal> {
    let goal = load_goal(conn, goal_id)?;
    if goal.user_id != user_id {
        tracing::warn!(goal_id, user_id, action, "ownership check failed");
        return Err(AppError::forbidden(format!(
            "You do not have permission to {} this goal",
            action
        )));
    }
    Ok(goal)
}

/// Milestone addressed through its goal; a milestone under another goal is not found
fn owned_milestone_in_goal(
    conn: &mut SqliteConnection,
    user_id: i32,
    goal_id: i32,
    milestone_id: i32,
    action: &str,
) -> AppResult<(Goal, Milestone)> {
    let goal = owned_goal(conn, user_id, goal_id, action)?;
    let milestone = milestones::table
        .filter(milestones::id.eq(milestone_id))
        .filter(milestones::goal_id.eq(goal_id))
        .select(Milestone::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Milestone not found for this goal"))?;
    Ok((goal, milestone))
}

/// Milestone addressed directly; ownership is checked through its goal
fn owned_milestone(
    conn: &mut SqliteConnection,
    user_id: i32,
    milestone_id: i32,
    action: &str,
) -> AppResult<(Goal, Milestone)> {
    let milestone = load_milestone(conn, milestone_id)?;
    let goal = owned_goal(conn, user_id, milestone.goal_id, action)?;
    Ok((goal, milestone))
}

fn owned_task(
    conn: &mut SqliteConnection,
    user_id: i32,
    milestone_id: i32,
    task_id: i32,
    action: &str,
) -> AppResult<(Goal, Milestone, Task)> {
    let (goal, milestone) = owned_milestone(conn, user_id, milestone_id, action)?;
    let task = tasks::table
        .filter(tasks::id.eq(task_id))
        .filter(tasks::milestone_id.eq(milestone_id))
        .select(Task::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Task not found in this milestone"))?;
    Ok((goal, milestone, task))
}

// ============================================================================
// Date rules
// ============================================================================

fn check_milestone_due(goal: &Goal, due: NaiveDate) -> AppResult<()> {
    if due < goal.start_date || due > goal.end_date {
        return Err(AppError::invalid(
            "due_date",
            "Invalid due date",
            "Due date must be between goal's start date and end date",
        ));
    }
    Ok(())
}

fn check_task_due(goal: &Goal, milestone: &Milestone, due: NaiveDate) -> AppResult<()> {
    if due < goal.start_date {
        return Err(AppError::invalid(
            "due_date",
            "Invalid due date",
            format!(
                "Task due date cannot be earlier than the goal start date ({})",
                goal.start_date
            ),
        ));
    }
    if due > milestone.due_date {
        return Err(AppError::invalid(
            "due_date",
            "Invalid due date",
            format!(
                "Task due date cannot be later than the milestone due date ({})",
                milestone.due_date
            ),
        ));
    }
    Ok(())
}

// ============================================================================
// Projections
// ============================================================================

fn goal_view(conn: &mut SqliteConnection, goal: Goal) -> AppResult<GoalView> {
    let tallies = progress::milestone_tallies(conn, goal.id)?;
    let milestone_count = tallies.len() as i64;
    let total_tasks = tallies.iter().map(|t| t.total_tasks).sum();
    let completed_tasks = tallies.iter().map(|t| t.completed_tasks).sum();
    let completed_milestones = tallies
        .iter()
        .filter(|t| t.status == Status::Completed)
        .count() as i64;

    Ok(GoalView {
        goal,
        milestone_count,
        task_stats: CountStats::new(total_tasks, completed_tasks),
        milestone_stats: CountStats::new(milestone_count, completed_milestones),
    })
}

fn tasks_of(conn: &mut SqliteConnection, milestone_id: i32) -> QueryResult<Vec<Task>> {
    tasks::table
        .filter(tasks::milestone_id.eq(milestone_id))
        .order((tasks::due_date.is_null(), tasks::due_date.asc(), tasks::id.asc()))
        .select(Task::as_select())
        .load(conn)
}

fn milestone_view(conn: &mut SqliteConnection, milestone: Milestone) -> AppResult<MilestoneView> {
    let tasks = tasks_of(conn, milestone.id)?;
    Ok(MilestoneView {
        task_count: tasks.len() as i64,
        milestone,
        tasks,
    })
}

fn task_view(conn: &mut SqliteConnection, task_id: i32) -> AppResult<TaskView> {
    let task = tasks::table
        .find(task_id)
        .select(Task::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Task not found"))?;
    let milestone = load_milestone(conn, task.milestone_id)?;
    Ok(TaskView { task, milestone })
}

// ============================================================================
// Goal listing
// ============================================================================

fn filtered_goals(user_id: i32, query: &GoalQuery) -> goals::BoxedQuery<'static, Sqlite> {
    let mut q = goals::table.filter(goals::user_id.eq(user_id)).into_boxed();

    if let Some(status) = query.status {
        q = q.filter(goals::status.eq(status.as_str()));
    }
    if let Some(priority) = query.priority {
        q = q.filter(goals::priority.eq(priority.as_str()));
    }
    if let Some(start) = query.start_date {
        q = q.filter(goals::start_date.ge(start));
    }
    if let Some(end) = query.end_date {
        q = q.filter(goals::end_date.le(end));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        q = q.filter(
            goals::title
                .like(pattern.clone())
                .escape('\\')
                .or(goals::description.assume_not_null().like(pattern).escape('\\')),
        );
    }
    q
}

/// Match `%`, `_` and `\` literally inside a LIKE pattern
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

macro_rules! order_by {
    ($q:expr, $col:expr, $desc:expr) => {
        if $desc {
            $q.order($col.desc()).then_order_by(goals::id.desc())
        } else {
            $q.order($col.asc()).then_order_by(goals::id.asc())
        }
    };
}

fn sorted_goals(
    q: goals::BoxedQuery<'static, Sqlite>,
    query: &GoalQuery,
) -> goals::BoxedQuery<'static, Sqlite> {
    let desc = query.sort_order == SortOrder::Desc;
    match query.sort_by {
        GoalSort::CreatedAt => order_by!(q, goals::created_at, desc),
        GoalSort::UpdatedAt => order_by!(q, goals::updated_at, desc),
        GoalSort::Title => order_by!(q, goals::title, desc),
        GoalSort::StartDate => order_by!(q, goals::start_date, desc),
        GoalSort::EndDate => order_by!(q, goals::end_date, desc),
        GoalSort::Priority => order_by!(q, goals::priority, desc),
        GoalSort::Status => order_by!(q, goals::status, desc),
        GoalSort::ProgressPercentage => order_by!(q, goals::progress_percentage, desc),
    }
}

/// `offset + per_page` must not overflow; `list_goals` rejects such pages
fn page_meta(page: i64, per_page: i64, offset: i64, total: i64, returned: i64) -> PageMeta {
    let last_page = ((total + per_page - 1) / per_page).max(1);
    let (from, to) = if returned == 0 {
        (None, None)
    } else {
        (Some(offset + 1), Some(offset + returned))
    };
    PageMeta {
        current_page: page,
        from,
        to,
        last_page,
        per_page,
        total,
    }
}
