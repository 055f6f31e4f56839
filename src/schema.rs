// Goalify schema - goal tracking tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

// ============================================================================
// Accounts
// ============================================================================

diesel::table! {
    users (id) {
        id -> Integer,
        name -> Text,
        email -> Text,
        password_hash -> Text,
        password_salt -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    api_tokens (id) {
        id -> Integer,
        user_id -> Integer,
        token_hash -> Text,              // SHA-256 of the bearer token
        created_at -> Text,
        revoked_at -> Nullable<Text>,
    }
}

// ============================================================================
// Goal tree: goals -> milestones -> tasks
// ============================================================================

diesel::table! {
    goals (id) {
        id -> Integer,
        user_id -> Integer,
        title -> Text,
        description -> Nullable<Text>,
        start_date -> Date,
        end_date -> Date,
        priority -> Text,
        status -> Text,
        progress_percentage -> Double,   // derived, never computed on read
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    milestones (id) {
        id -> Integer,
        goal_id -> Integer,
        title -> Text,
        description -> Nullable<Text>,
        due_date -> Date,
        status -> Text,
        priority -> Text,
        progress_percentage -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    tasks (id) {
        id -> Integer,
        milestone_id -> Integer,
        title -> Text,
        description -> Nullable<Text>,
        status -> Text,
        priority -> Text,
        due_date -> Nullable<Date>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(api_tokens -> users (user_id));
diesel::joinable!(goals -> users (user_id));
diesel::joinable!(milestones -> goals (goal_id));
diesel::joinable!(tasks -> milestones (milestone_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    api_tokens,
    goals,
    milestones,
    tasks,
);
