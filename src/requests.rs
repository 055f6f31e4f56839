//! Typed request bodies and query strings
//!
//! Deserialisation enforces types and enums; `validate` covers the remaining
//! per-request rules. Cross-entity rules (date ranges against parents,
//! ownership) live in the tracker because they need storage.

use crate::error::{AppError, AppResult, FieldErrors};
use crate::model::{Priority, Status};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

pub const MAX_TITLE_LEN: usize = 255;
pub const MIN_PASSWORD_LEN: usize = 8;

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`)
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// Collects field errors; finishes as a single validation failure
#[derive(Default)]
struct Checks {
    errors: FieldErrors,
}

impl Checks {
    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    fn title(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.fail(field, format!("The {} is required.", field));
        } else if value.chars().count() > MAX_TITLE_LEN {
            self.fail(
                field,
                format!("The {} must not be greater than {} characters.", field, MAX_TITLE_LEN),
            );
        }
    }

    fn finish(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation {
                message: "Validation failed".to_string(),
                errors: self.errors,
            })
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        checks.title("name", &self.name);
        if !looks_like_email(&self.email) {
            checks.fail("email", "The email must be a valid email address.");
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            checks.fail(
                "password",
                format!("The password must be at least {} characters.", MIN_PASSWORD_LEN),
            );
        }
        checks.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        if let Some(name) = &self.name {
            checks.title("name", name);
        }
        if let Some(email) = &self.email {
            if !looks_like_email(email) {
                checks.fail("email", "The email must be a valid email address.");
            }
        }
        checks.finish()
    }
}

fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && email.len() <= MAX_TITLE_LEN
        }
        None => false,
    }
}

// ============================================================================
// Goals
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGoalRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub priority: Priority,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub progress_percentage: Option<i32>,
}

impl CreateGoalRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        checks.title("title", &self.title);
        if self.end_date < self.start_date {
            checks.fail("end_date", "End date must be after or equal to start date");
        }
        checks.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateGoalRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub progress_percentage: Option<i32>,
}

impl UpdateGoalRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        if let Some(title) = &self.title {
            checks.title("title", title);
        }
        checks.finish()
    }

    pub fn touches_progress(&self) -> bool {
        self.status.is_some() || self.progress_percentage.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    StartDate,
    EndDate,
    Priority,
    Status,
    ProgressPercentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Query string for goal listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoalQuery {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    /// Goals starting on or after this date
    pub start_date: Option<NaiveDate>,
    /// Goals ending on or before this date
    pub end_date: Option<NaiveDate>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: GoalSort,
    #[serde(default)]
    pub sort_order: SortOrder,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

// ============================================================================
// Milestones
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMilestoneRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub due_date: NaiveDate,
    pub priority: Priority,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub progress_percentage: Option<i32>,
}

impl CreateMilestoneRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        checks.title("title", &self.title);
        checks.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMilestoneRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub progress_percentage: Option<i32>,
}

impl UpdateMilestoneRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        if let Some(title) = &self.title {
            checks.title("title", title);
        }
        checks.finish()
    }

    pub fn touches_progress(&self) -> bool {
        self.status.is_some() || self.progress_percentage.is_some()
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl CreateTaskRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        checks.title("title", &self.title);
        checks.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
}

impl UpdateTaskRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut checks = Checks::default();
        if let Some(title) = &self.title {
            checks.title("title", title);
        }
        checks.finish()
    }
}
