//! HTTP API for the goal tracker
//!
//! `goalify serve` → binds tiny_http and hands every request to [`Api::dispatch`].
//! Dispatch is socket-free so the whole router can be driven from tests.

use crate::config::ApiConfig;
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::requests::{
    CreateGoalRequest, CreateMilestoneRequest, CreateTaskRequest, GoalQuery, LoginRequest,
    RegisterRequest, UpdateGoalRequest, UpdateMilestoneRequest, UpdateProfileRequest,
    UpdateTaskRequest,
};
use crate::tracker::{PageLimits, PageMeta, Tracker};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct Meta<'a> {
    api_version: &'a str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<PageMeta>,
}

/// Response envelope shared by every route
#[derive(Serialize)]
struct ApiResponse<'a> {
    success: bool,
    message: String,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
    meta: Meta<'a>,
}

/// Status and JSON body produced for one request
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

/// Successful route outcome, before it is wrapped in the envelope
struct Done {
    status: u16,
    message: String,
    data: Option<Value>,
    pagination: Option<PageMeta>,
}

fn done<T: Serialize>(status: u16, message: &str, data: &T) -> AppResult<Done> {
    let data = serde_json::to_value(data).map_err(|e| AppError::Server(e.to_string()))?;
    Ok(Done {
        status,
        message: message.to_string(),
        data: Some(data),
        pagination: None,
    })
}

fn done_empty(message: &str) -> AppResult<Done> {
    Ok(Done {
        status: 200,
        message: message.to_string(),
        data: None,
        pagination: None,
    })
}

/// Request router bound to one tracker
pub struct Api {
    tracker: Tracker,
    settings: ApiConfig,
}

impl Api {
    pub fn new(tracker: Tracker, settings: ApiConfig) -> Self {
        let limits = PageLimits {
            default_per_page: settings.default_per_page.max(1),
            max_per_page: settings.max_per_page.max(1),
        };
        Self {
            tracker: tracker.with_page_limits(limits),
            settings,
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Route one request. `url` may carry a query string; `authorization`
    /// is the raw header value.
    pub fn dispatch(&self, method: &Method, url: &str, authorization: Option<&str>, body: &str) -> Reply {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match self.route(method, &segments, query, authorization, body) {
            Ok(outcome) => self.envelope(outcome),
            Err(e) => self.failure(method, path, e),
        }
    }

    fn route(
        &self,
        method: &Method,
        segments: &[&str],
        query: &str,
        authorization: Option<&str>,
        body: &str,
    ) -> AppResult<Done> {
        let t = &self.tracker;
        let user = || bearer(authorization).and_then(|token| t.authenticate(token));

        match (method, segments) {
            // === Accounts ===
            (Method::Post, ["api", "auth", "register"]) => {
                let session = t.register(&parse_body::<RegisterRequest>(body)?)?;
                done(201, "User registered successfully", &session)
            }
            (Method::Post, ["api", "auth", "login"]) => {
                let session = t.login(&parse_body::<LoginRequest>(body)?)?;
                done(200, "Login successful", &session)
            }
            (Method::Post, ["api", "auth", "logout"]) => {
                t.logout(bearer(authorization)?)?;
                done_empty("Successfully logged out")
            }
            (Method::Get, ["api", "auth", "profile"]) => {
                let profile = t.profile(user()?)?;
                done(200, "Profile retrieved successfully", &profile)
            }
            (Method::Put | Method::Patch, ["api", "auth", "profile"]) => {
                let user_id = user()?;
                let profile = t.update_profile(user_id, &parse_body::<UpdateProfileRequest>(body)?)?;
                done(200, "Profile updated successfully", &profile)
            }

            // === Goals ===
            (Method::Get, ["api", "goals"]) => {
                let user_id = user()?;
                let page = t.list_goals(user_id, &parse_query::<GoalQuery>(query)?)?;
                let mut outcome = done(200, "Goals retrieved successfully", &page.goals)?;
                outcome.pagination = Some(page.pagination);
                Ok(outcome)
            }
            (Method::Post, ["api", "goals"]) => {
                let user_id = user()?;
                let goal = t.create_goal(user_id, &parse_body::<CreateGoalRequest>(body)?)?;
                done(201, "Goal created successfully", &goal)
            }
            (Method::Get, ["api", "goals", "all"]) => {
                let user_id = user()?;
                let goals = t.all_goals(user_id, &parse_query::<GoalQuery>(query)?)?;
                done(200, "Goals retrieved successfully", &goals)
            }
            (Method::Get, ["api", "goals", goal]) => {
                let user_id = user()?;
                let goal = t.get_goal(user_id, parse_id(goal, "Goal")?)?;
                done(200, "Goal retrieved successfully", &goal)
            }
            (Method::Put | Method::Patch, ["api", "goals", goal]) => {
                let user_id = user()?;
                let goal_id = parse_id(goal, "Goal")?;
                let goal = t.update_goal(user_id, goal_id, &parse_body::<UpdateGoalRequest>(body)?)?;
                done(200, "Goal updated successfully", &goal)
            }
            (Method::Delete, ["api", "goals", goal]) => {
                let user_id = user()?;
                t.delete_goal(user_id, parse_id(goal, "Goal")?)?;
                done_empty("Goal deleted successfully")
            }

            // === Milestones ===
            (Method::Get, ["api", "goals", goal, "milestones"]) => {
                let user_id = user()?;
                let milestones = t.list_milestones(user_id, parse_id(goal, "Goal")?)?;
                done(200, "Milestones retrieved successfully", &milestones)
            }
            (Method::Post, ["api", "goals", goal, "milestones"]) => {
                let user_id = user()?;
                let goal_id = parse_id(goal, "Goal")?;
                let milestone =
                    t.create_milestone(user_id, goal_id, &parse_body::<CreateMilestoneRequest>(body)?)?;
                done(201, "Milestone created successfully", &milestone)
            }
            (Method::Get, ["api", "goals", goal, "milestones", milestone]) => {
                let user_id = user()?;
                let milestone =
                    t.get_milestone(user_id, parse_id(goal, "Goal")?, parse_id(milestone, "Milestone")?)?;
                done(200, "Milestone retrieved successfully", &milestone)
            }
            (Method::Put | Method::Patch, ["api", "goals", goal, "milestones", milestone]) => {
                let user_id = user()?;
                let (goal_id, milestone_id) = (parse_id(goal, "Goal")?, parse_id(milestone, "Milestone")?);
                let req = parse_body::<UpdateMilestoneRequest>(body)?;
                let milestone = t.update_milestone(user_id, goal_id, milestone_id, &req)?;
                done(200, "Milestone updated successfully", &milestone)
            }
            (Method::Delete, ["api", "goals", goal, "milestones", milestone]) => {
                let user_id = user()?;
                t.delete_milestone(user_id, parse_id(goal, "Goal")?, parse_id(milestone, "Milestone")?)?;
                done_empty("Milestone deleted successfully")
            }

            // === Tasks ===
            (Method::Get, ["api", "milestones", milestone, "tasks"]) => {
                let user_id = user()?;
                let tasks = t.list_tasks(user_id, parse_id(milestone, "Milestone")?)?;
                done(200, "Tasks retrieved successfully", &tasks)
            }
            (Method::Post, ["api", "milestones", milestone, "tasks"]) => {
                let user_id = user()?;
                let milestone_id = parse_id(milestone, "Milestone")?;
                let task = t.create_task(user_id, milestone_id, &parse_body::<CreateTaskRequest>(body)?)?;
                done(201, "Task created successfully", &task)
            }
            (Method::Get, ["api", "milestones", milestone, "tasks", task]) => {
                let user_id = user()?;
                let task = t.get_task(user_id, parse_id(milestone, "Milestone")?, parse_id(task, "Task")?)?;
                done(200, "Task retrieved successfully", &task)
            }
            (Method::Put | Method::Patch, ["api", "milestones", milestone, "tasks", task]) => {
                let user_id = user()?;
                let (milestone_id, task_id) = (parse_id(milestone, "Milestone")?, parse_id(task, "Task")?);
                let task = t.update_task(user_id, milestone_id, task_id, &parse_body::<UpdateTaskRequest>(body)?)?;
                done(200, "Task updated successfully", &task)
            }
            (Method::Delete, ["api", "milestones", milestone, "tasks", task]) => {
                let user_id = user()?;
                t.delete_task(user_id, parse_id(milestone, "Milestone")?, parse_id(task, "Task")?)?;
                done_empty("Task deleted successfully")
            }

            _ => Err(AppError::not_found("Route not found")),
        }
    }

    fn meta(&self, pagination: Option<PageMeta>) -> Meta<'_> {
        Meta {
            api_version: &self.settings.version,
            timestamp: now_rfc3339(),
            pagination,
        }
    }

    fn envelope(&self, outcome: Done) -> Reply {
        let response = ApiResponse {
            success: true,
            message: outcome.message,
            status_code: outcome.status,
            data: outcome.data,
            errors: None,
            meta: self.meta(outcome.pagination),
        };
        self.render(outcome.status, &response)
    }

    fn failure(&self, method: &Method, path: &str, err: AppError) -> Reply {
        let status = err.status_code();
        match &err {
            AppError::Server(detail) | AppError::Unavailable(detail) => {
                tracing::error!(%method, path, status, detail = %detail, "request failed");
            }
            _ => tracing::warn!(%method, path, status, error = %err, "request rejected"),
        }

        let response = ApiResponse {
            success: false,
            message: err.public_message(),
            status_code: status,
            data: None,
            errors: Some(err.field_errors()),
            meta: self.meta(None),
        };
        self.render(status, &response)
    }

    fn render(&self, status: u16, response: &ApiResponse<'_>) -> Reply {
        match serde_json::to_value(response) {
            Ok(body) => Reply { status, body },
            Err(e) => {
                tracing::error!(error = %e, "could not serialize response");
                self.unrenderable()
            }
        }
    }

    /// Hand-built 500 for a response that failed to serialize
    fn unrenderable(&self) -> Reply {
        Reply {
            status: 500,
            body: serde_json::json!({
                "success": false,
                "message": "An error occurred while processing your request",
                "status_code": 500,
                "errors": {},
                "meta": {
                    "api_version": self.settings.version,
                    "timestamp": now_rfc3339(),
                },
            }),
        }
    }
}

/// Token from an `Authorization: Bearer <token>` header
fn bearer(authorization: Option<&str>) -> AppResult<&str> {
    authorization
        .and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
        })
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Unauthenticated".to_string()))
}

fn parse_id(raw: &str, what: &str) -> AppResult<i32> {
    raw.parse()
        .map_err(|_| AppError::not_found(format!("{} not found", what)))
}

/// Field name from serde's "missing field `x`" message
fn missing_field(message: &str) -> Option<&str> {
    let rest = message.split_once("missing field `")?.1;
    rest.split_once('`').map(|(field, _)| field)
}

/// Parse a JSON body. Syntax errors are 400; shape errors are 422.
fn parse_body<T: DeserializeOwned>(body: &str) -> AppResult<T> {
    let value: Value = if body.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(body).map_err(|e| AppError::BadRequest(format!("Malformed JSON: {}", e)))?
    };

    serde_json::from_value(value).map_err(|e| {
        let message = e.to_string();
        let field = missing_field(&message).unwrap_or("body").to_string();
        AppError::invalid(&field, "Validation failed", message)
    })
}

fn parse_query<T: DeserializeOwned>(query: &str) -> AppResult<T> {
    serde_urlencoded::from_str(query)
        .map_err(|e| AppError::invalid("query", "Validation failed", e.to_string()))
}

fn json_header() -> Option<Header> {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).ok()
}

/// Start the API server and block on its request loop
pub fn start_server(api: Api, host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{}:{}", host, port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;

    tracing::info!(%addr, aggregation = %api.tracker.aggregation(), "goalify API listening");

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&api, request) {
            tracing::error!(error = %e, "failed to answer request");
        }
    }

    Ok(())
}

fn handle_request(api: &Api, mut request: Request) -> std::io::Result<()> {
    let method = request.method().clone();
    let url = request.url().to_string();
    let authorization = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string());

    let mut body = String::new();
    let reply = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => api.dispatch(&method, &url, authorization.as_deref(), &body),
        Err(e) => api.failure(&method, &url, AppError::BadRequest(format!("Failed to read body: {}", e))),
    };
    tracing::info!(%method, url = %url, status = reply.status, "handled request");

    let mut response = Response::from_string(reply.body.to_string()).with_status_code(reply.status);
    if let Some(header) = json_header() {
        response = response.with_header(header);
    }
    request.respond(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Request parsing ===

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer(Some("Bearer abc123")).unwrap(), "abc123");
        assert_eq!(bearer(Some("bearer  abc123 ")).unwrap(), "abc123");
        assert!(bearer(Some("Basic abc123")).is_err());
        assert!(bearer(Some("Bearer ")).is_err());
        assert!(bearer(None).is_err());
    }

    #[test]
    fn test_missing_field_extraction() {
        assert_eq!(missing_field("missing field `title` at line 1 column 2"), Some("title"));
        assert_eq!(missing_field("invalid type: string"), None);
    }

    #[test]
    fn test_parse_body_status_codes() {
        let err = parse_body::<LoginRequest>("{not json").unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = parse_body::<LoginRequest>(r#"{"email": "a@b.co"}"#).unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(err.field_errors().contains_key("password"));

        let err = parse_body::<CreateTaskRequest>(r#"{"title": "t", "status": "done", "priority": "low"}"#)
            .unwrap_err();
        assert!(err.field_errors().contains_key("body"));
    }

    #[test]
    fn test_unrenderable_reply_keeps_envelope_shape() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = crate::db::Database::open_at(dir.path().join("serve.db")).unwrap();
        let api = Api::new(Tracker::new(db, crate::progress::Aggregation::TaskWeighted), ApiConfig::default());

        let reply = api.unrenderable();
        assert_eq!(reply.status, 500);
        assert_eq!(reply.body["success"], false);
        assert_eq!(reply.body["status_code"], 500);
        assert!(reply.body["errors"].is_object());
        assert_eq!(reply.body["meta"]["api_version"], "1.0");
        assert!(reply.body["meta"]["timestamp"].is_string());
    }

    #[test]
    fn test_non_numeric_id_is_not_found() {
        assert_eq!(parse_id("abc", "Goal").unwrap_err().to_string(), "Goal not found");
        assert_eq!(parse_id("42", "Goal").unwrap(), 42);
    }
}
