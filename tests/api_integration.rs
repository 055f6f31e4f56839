//! Integration tests for the HTTP API
//!
//! Requests go through `Api::dispatch` against a temporary database, so the
//! full route → validation → write → propagation → envelope path is covered
//! without opening a socket.

use goalify::config::ApiConfig;
use goalify::{Aggregation, Api, Database, Reply, Tracker};
use serde_json::{json, Value};
use tempfile::TempDir;
use tiny_http::Method;

struct Harness {
    _dir: TempDir,
    api: Api,
}

impl Harness {
    fn new(aggregation: Aggregation) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("api.db")).unwrap();
        let api = Api::new(Tracker::new(db, aggregation), ApiConfig::default());
        Self { _dir: dir, api }
    }

    fn call(&self, method: Method, url: &str, token: Option<&str>, body: Value) -> Reply {
        let header = token.map(|t| format!("Bearer {}", t));
        let body = if body.is_null() { String::new() } else { body.to_string() };
        self.api.dispatch(&method, url, header.as_deref(), &body)
    }

    fn raw(&self, method: Method, url: &str, token: &str, body: &str) -> Reply {
        let header = format!("Bearer {}", token);
        self.api.dispatch(&method, url, Some(&header), body)
    }

    /// Register a user and return its bearer token
    fn register(&self, email: &str) -> String {
        let reply = self.call(
            Method::Post,
            "/api/auth/register",
            None,
            json!({"name": "Test User", "email": email, "password": "correct horse"}),
        );
        assert_eq!(reply.status, 201, "register failed: {}", reply.body);
        reply.body["data"]["token"].as_str().unwrap().to_string()
    }

    fn create_goal(&self, token: &str) -> i64 {
        let reply = self.call(
            Method::Post,
            "/api/goals",
            Some(token),
            json!({
                "title": "Run a marathon",
                "description": "Sub four hours",
                "start_date": "2025-01-01",
                "end_date": "2025-12-31",
                "priority": "high"
            }),
        );
        assert_eq!(reply.status, 201, "create goal failed: {}", reply.body);
        reply.body["data"]["id"].as_i64().unwrap()
    }

    fn create_milestone(&self, token: &str, goal: i64, extra: Value) -> i64 {
        let mut body = json!({
            "title": "Half marathon",
            "due_date": "2025-06-01",
            "priority": "medium"
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            body.extend(extra.clone());
        }
        let reply = self.call(Method::Post, &format!("/api/goals/{}/milestones", goal), Some(token), body);
        assert_eq!(reply.status, 201, "create milestone failed: {}", reply.body);
        reply.body["data"]["id"].as_i64().unwrap()
    }

    fn create_task(&self, token: &str, milestone: i64, status: &str) -> i64 {
        let reply = self.call(
            Method::Post,
            &format!("/api/milestones/{}/tasks", milestone),
            Some(token),
            json!({"title": "Long run", "status": status, "priority": "low"}),
        );
        assert_eq!(reply.status, 201, "create task failed: {}", reply.body);
        reply.body["data"]["id"].as_i64().unwrap()
    }

    fn goal(&self, token: &str, goal: i64) -> Value {
        let reply = self.call(Method::Get, &format!("/api/goals/{}", goal), Some(token), Value::Null);
        assert_eq!(reply.status, 200);
        reply.body["data"].clone()
    }

    fn milestone(&self, token: &str, goal: i64, milestone: i64) -> Value {
        let reply = self.call(
            Method::Get,
            &format!("/api/goals/{}/milestones/{}", goal, milestone),
            Some(token),
            Value::Null,
        );
        assert_eq!(reply.status, 200);
        reply.body["data"].clone()
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[test]
fn test_success_envelope_shape() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let reply = h.call(Method::Get, "/api/auth/profile", Some(&token), Value::Null);

    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["success"], json!(true));
    assert_eq!(reply.body["status_code"], json!(200));
    assert_eq!(reply.body["meta"]["api_version"], json!("1.0"));
    assert!(reply.body["meta"]["timestamp"].is_string());
    assert!(reply.body.get("errors").is_none());
    assert_eq!(reply.body["data"]["email"], json!("ada@example.com"));
    assert!(reply.body["data"].get("password_hash").is_none());
}

#[test]
fn test_missing_token_is_unauthorized() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let reply = h.call(Method::Get, "/api/goals", None, Value::Null);

    assert_eq!(reply.status, 401);
    assert_eq!(reply.body["success"], json!(false));
    assert_eq!(reply.body["errors"], json!({}));

    let reply = h.call(Method::Get, "/api/goals", Some("not-a-token"), Value::Null);
    assert_eq!(reply.status, 401);
}

#[test]
fn test_logout_invalidates_token() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");

    let reply = h.call(Method::Post, "/api/auth/logout", Some(&token), Value::Null);
    assert_eq!(reply.status, 200);

    let reply = h.call(Method::Get, "/api/auth/profile", Some(&token), Value::Null);
    assert_eq!(reply.status, 401);

    let reply = h.call(
        Method::Post,
        "/api/auth/login",
        None,
        json!({"email": "ada@example.com", "password": "correct horse"}),
    );
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["data"]["token_type"], json!("bearer"));
}

#[test]
fn test_unknown_route_is_not_found() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let reply = h.call(Method::Get, "/api/projects", Some(&token), Value::Null);
    assert_eq!(reply.status, 404);

    let reply = h.call(Method::Get, "/api/goals/abc", Some(&token), Value::Null);
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body["message"], json!("Goal not found"));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_malformed_json_is_bad_request() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let reply = h.raw(Method::Post, "/api/goals", &token, "{\"title\": ");

    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["success"], json!(false));
}

#[test]
fn test_missing_field_is_reported_under_its_name() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let reply = h.call(
        Method::Post,
        "/api/goals",
        Some(&token),
        json!({"title": "No dates", "priority": "low", "end_date": "2025-02-01"}),
    );

    assert_eq!(reply.status, 422);
    assert!(reply.body["errors"]["start_date"].is_array(), "{}", reply.body);
}

#[test]
fn test_goal_end_before_start_rejected() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let reply = h.call(
        Method::Post,
        "/api/goals",
        Some(&token),
        json!({"title": "Backwards", "start_date": "2025-05-01", "end_date": "2025-04-01", "priority": "low"}),
    );

    assert_eq!(reply.status, 422);
    assert!(reply.body["errors"]["end_date"].is_array());
}

#[test]
fn test_milestone_due_outside_goal_rejected() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);

    let reply = h.call(
        Method::Post,
        &format!("/api/goals/{}/milestones", goal),
        Some(&token),
        json!({"title": "Too late", "due_date": "2026-01-15", "priority": "low"}),
    );
    assert_eq!(reply.status, 422);
    assert_eq!(reply.body["message"], json!("Invalid due date"));
    assert_eq!(
        reply.body["errors"]["due_date"][0],
        json!("Due date must be between goal's start date and end date")
    );
}

#[test]
fn test_bad_query_parameter_rejected() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let reply = h.call(Method::Get, "/api/goals?sort_by=colour", Some(&token), Value::Null);

    assert_eq!(reply.status, 422);
    assert!(reply.body["errors"]["query"].is_array());
}

// =============================================================================
// Ownership
// =============================================================================

#[test]
fn test_foreign_goal_is_forbidden() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let owner = h.register("ada@example.com");
    let intruder = h.register("eve@example.com");
    let goal = h.create_goal(&owner);
    let milestone = h.create_milestone(&owner, goal, json!({}));

    let reply = h.call(Method::Get, &format!("/api/goals/{}", goal), Some(&intruder), Value::Null);
    assert_eq!(reply.status, 403);

    let reply = h.call(
        Method::Post,
        &format!("/api/milestones/{}/tasks", milestone),
        Some(&intruder),
        json!({"title": "Sneaky", "status": "completed", "priority": "low"}),
    );
    assert_eq!(reply.status, 403);

    // Nothing was written, so the owner's milestone is still untouched
    assert_eq!(h.milestone(&owner, goal, milestone)["task_count"], json!(0));
}

#[test]
fn test_task_under_wrong_milestone_not_found() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);
    let first = h.create_milestone(&token, goal, json!({}));
    let second = h.create_milestone(&token, goal, json!({}));
    let task = h.create_task(&token, first, "pending");

    let reply = h.call(
        Method::Delete,
        &format!("/api/milestones/{}/tasks/{}", second, task),
        Some(&token),
        Value::Null,
    );
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body["message"], json!("Task not found in this milestone"));
}

// =============================================================================
// Progress propagation
// =============================================================================

#[test]
fn test_task_weighted_scenario() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);

    // Milestone A: 1 of 4 tasks done; milestone B: standalone, completed
    let a = h.create_milestone(&token, goal, json!({}));
    h.create_task(&token, a, "completed");
    for _ in 0..3 {
        h.create_task(&token, a, "pending");
    }
    let b = h.create_milestone(&token, goal, json!({"status": "completed"}));

    assert_eq!(h.milestone(&token, goal, a)["progress_percentage"], json!(25));
    assert_eq!(h.milestone(&token, goal, b)["progress_percentage"], json!(100));

    let g = h.goal(&token, goal);
    let pct = g["progress_percentage"].as_f64().unwrap();
    assert!((pct - 40.0).abs() < 1e-9, "goal at {}", pct);
    assert_eq!(g["status"], json!("in_progress"));
    assert_eq!(g["milestone_count"], json!(2));
    assert_eq!(g["task_stats"], json!({"total": 4, "completed": 1, "in_progress": 3}));
}

#[test]
fn test_milestone_weighted_scenario() {
    let h = Harness::new(Aggregation::MilestoneWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);

    let a = h.create_milestone(&token, goal, json!({}));
    h.create_milestone(&token, goal, json!({}));
    h.create_milestone(&token, goal, json!({}));
    let task = h.create_task(&token, a, "pending");

    let reply = h.call(
        Method::Put,
        &format!("/api/milestones/{}/tasks/{}", a, task),
        Some(&token),
        json!({"status": "completed"}),
    );
    assert_eq!(reply.status, 200, "{}", reply.body);
    assert_eq!(reply.body["data"]["milestone"]["status"], json!("completed"));

    // 1 of 3 milestones -> round(33.3)
    let g = h.goal(&token, goal);
    assert_eq!(g["progress_percentage"].as_f64(), Some(33.0));
    assert_eq!(g["status"], json!("in_progress"));
}

#[test]
fn test_milestone_with_tasks_rejects_manual_status() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);
    let m = h.create_milestone(&token, goal, json!({}));
    h.create_task(&token, m, "pending");

    let reply = h.call(
        Method::Put,
        &format!("/api/goals/{}/milestones/{}", goal, m),
        Some(&token),
        json!({"status": "completed"}),
    );
    assert_eq!(reply.status, 422);
    assert!(reply.body["errors"]["status"].is_array());
    assert_eq!(h.milestone(&token, goal, m)["status"], json!("pending"));
}

#[test]
fn test_in_progress_needs_partial_percentage() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);
    let m = h.create_milestone(&token, goal, json!({}));

    let reply = h.call(
        Method::Put,
        &format!("/api/goals/{}/milestones/{}", goal, m),
        Some(&token),
        json!({"status": "in_progress"}),
    );
    assert_eq!(reply.status, 422);
    assert!(reply.body["errors"]["progress_percentage"].is_array());

    let reply = h.call(
        Method::Put,
        &format!("/api/goals/{}/milestones/{}", goal, m),
        Some(&token),
        json!({"status": "in_progress", "progress_percentage": 60}),
    );
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["data"]["progress_percentage"], json!(60));
}

#[test]
fn test_delete_milestone_rederives_goal() {
    let h = Harness::new(Aggregation::MilestoneWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);
    h.create_milestone(&token, goal, json!({"status": "completed"}));
    let pending = h.create_milestone(&token, goal, json!({}));
    assert_eq!(h.goal(&token, goal)["progress_percentage"].as_f64(), Some(50.0));

    let reply = h.call(
        Method::Delete,
        &format!("/api/goals/{}/milestones/{}", goal, pending),
        Some(&token),
        Value::Null,
    );
    assert_eq!(reply.status, 200);
    assert!(reply.body.get("data").is_none());

    let g = h.goal(&token, goal);
    assert_eq!(g["progress_percentage"].as_f64(), Some(100.0));
    assert_eq!(g["status"], json!("completed"));
}

// =============================================================================
// Listing
// =============================================================================

#[test]
fn test_goal_listing_pagination_meta() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    for _ in 0..3 {
        h.create_goal(&token);
    }

    let reply = h.call(Method::Get, "/api/goals?per_page=2&page=1", Some(&token), Value::Null);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["data"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        reply.body["meta"]["pagination"],
        json!({"current_page": 1, "from": 1, "to": 2, "last_page": 2, "per_page": 2, "total": 3})
    );

    let reply = h.call(Method::Get, "/api/goals/all?search=marathon", Some(&token), Value::Null);
    assert_eq!(reply.body["data"].as_array().map(Vec::len), Some(3));
}

#[test]
fn test_page_beyond_range_is_rejected() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    h.create_goal(&token);

    let reply = h.call(Method::Get, "/api/goals?page=9223372036854775807", Some(&token), Value::Null);
    assert_eq!(reply.status, 422);
    assert!(reply.body["errors"]["page"].is_array());
    assert!(reply.body["meta"]["pagination"].is_null());

    let reply = h.call(Method::Get, "/api/goals?page=50", Some(&token), Value::Null);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["data"], json!([]));
    assert!(reply.body["meta"]["pagination"]["from"].is_null());
}

#[test]
fn test_search_wildcard_is_literal() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    h.create_goal(&token);

    let reply = h.call(Method::Get, "/api/goals/all?search=%25", Some(&token), Value::Null);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["data"], json!([]));
}

#[test]
fn test_tasks_listed_by_due_date_nulls_last() {
    let h = Harness::new(Aggregation::TaskWeighted);
    let token = h.register("ada@example.com");
    let goal = h.create_goal(&token);
    let m = h.create_milestone(&token, goal, json!({}));

    for (title, due) in [("undated", Value::Null), ("later", json!("2025-05-01")), ("sooner", json!("2025-02-01"))] {
        let reply = h.call(
            Method::Post,
            &format!("/api/milestones/{}/tasks", m),
            Some(&token),
            json!({"title": title, "status": "pending", "priority": "low", "due_date": due}),
        );
        assert_eq!(reply.status, 201, "{}", reply.body);
    }

    let reply = h.call(Method::Get, &format!("/api/milestones/{}/tasks", m), Some(&token), Value::Null);
    let titles: Vec<&str> = reply.body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["sooner", "later", "undated"]);
}
