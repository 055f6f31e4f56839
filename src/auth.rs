//! Accounts and bearer tokens
//!
//! Passwords are stored as a salted SHA-256 digest. Bearer tokens are random
//! and only their digest is persisted, so a leaked database cannot be replayed
//! against the API.

use crate::db::{last_insert_id, now_rfc3339, ApiToken, NewApiToken, NewUser, User};
use crate::error::{AppError, AppResult};
use crate::requests::{LoginRequest, RegisterRequest, UpdateProfileRequest};
use crate::schema::{api_tokens, users};
use crate::tracker::Tracker;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Token issued on register or login
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
    pub token_type: &'static str,
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn hash_password(password: &str, salt: &str) -> String {
    digest(&format!("{}:{}", salt, password))
}

fn new_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn email_taken(conn: &mut SqliteConnection, email: &str, except: Option<i32>) -> QueryResult<bool> {
    let mut q = users::table.filter(users::email.eq(email)).into_boxed();
    if let Some(id) = except {
        q = q.filter(users::id.ne(id));
    }
    let count: i64 = q.count().get_result(conn)?;
    Ok(count > 0)
}

fn issue_token(conn: &mut SqliteConnection, user: User) -> AppResult<AuthSession> {
    let token = new_token();
    let now = now_rfc3339();
    diesel::insert_into(api_tokens::table)
        .values(&NewApiToken {
            user_id: user.id,
            token_hash: &digest(&token),
            created_at: &now,
        })
        .execute(conn)?;
    Ok(AuthSession {
        user,
        token,
        token_type: "bearer",
    })
}

fn load_user(conn: &mut SqliteConnection, user_id: i32) -> AppResult<User> {
    users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::Unauthorized("Unauthenticated".to_string()))
}

impl Tracker {
    pub fn register(&self, req: &RegisterRequest) -> AppResult<AuthSession> {
        req.validate()?;
        let email = normalize_email(&req.email);

        self.write(|conn| {
            if email_taken(conn, &email, None)? {
                return Err(AppError::invalid(
                    "email",
                    "Validation failed",
                    "The email has already been taken.",
                ));
            }

            let salt = uuid::Uuid::new_v4().simple().to_string();
            let now = now_rfc3339();
            diesel::insert_into(users::table)
                .values(&NewUser {
                    name: req.name.trim(),
                    email: &email,
                    password_hash: &hash_password(&req.password, &salt),
                    password_salt: &salt,
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;
            let id = last_insert_id(conn)?;
            let user = load_user(conn, id)?;
            tracing::info!(user_id = user.id, "user registered");
            issue_token(conn, user)
        })
    }

    pub fn login(&self, req: &LoginRequest) -> AppResult<AuthSession> {
        let email = normalize_email(&req.email);
        self.write(|conn| {
            let user = users::table
                .filter(users::email.eq(&email))
                .select(User::as_select())
                .first(conn)
                .optional()?;

            match user {
                Some(user) if hash_password(&req.password, &user.password_salt) == user.password_hash => {
                    tracing::info!(user_id = user.id, "user logged in");
                    issue_token(conn, user)
                }
                _ => {
                    tracing::warn!("login rejected");
                    Err(AppError::Unauthorized("Invalid credentials".to_string()))
                }
            }
        })
    }

    /// Resolve a bearer token to its user id
    pub fn authenticate(&self, token: &str) -> AppResult<i32> {
        let hash = digest(token);
        self.read(|conn| {
            let token: Option<ApiToken> = api_tokens::table
                .filter(api_tokens::token_hash.eq(&hash))
                .filter(api_tokens::revoked_at.is_null())
                .select(ApiToken::as_select())
                .first(conn)
                .optional()?;
            token
                .map(|t| t.user_id)
                .ok_or_else(|| AppError::Unauthorized("Unauthenticated".to_string()))
        })
    }

    /// Revoke the presented token; other sessions of the user stay valid
    pub fn logout(&self, token: &str) -> AppResult<()> {
        let hash = digest(token);
        self.write(|conn| {
            let now = now_rfc3339();
            let revoked = diesel::update(
                api_tokens::table
                    .filter(api_tokens::token_hash.eq(&hash))
                    .filter(api_tokens::revoked_at.is_null()),
            )
            .set(api_tokens::revoked_at.eq(Some(now.as_str())))
            .execute(conn)?;
            if revoked == 0 {
                return Err(AppError::Unauthorized("Unauthenticated".to_string()));
            }
            Ok(())
        })
    }

    pub fn profile(&self, user_id: i32) -> AppResult<User> {
        self.read(|conn| load_user(conn, user_id))
    }

    pub fn update_profile(&self, user_id: i32, req: &UpdateProfileRequest) -> AppResult<User> {
        req.validate()?;
        let email = req.email.as_deref().map(normalize_email);

        self.write(|conn| {
            if let Some(email) = &email {
                if email_taken(conn, email, Some(user_id))? {
                    return Err(AppError::invalid(
                        "email",
                        "Validation failed",
                        "The email has already been taken.",
                    ));
                }
            }

            let now = now_rfc3339();
            diesel::update(users::table.find(user_id))
                .set((
                    req.name.as_deref().map(|n| users::name.eq(n.trim())),
                    email.as_deref().map(|e| users::email.eq(e)),
                    users::updated_at.eq(&now),
                ))
                .execute(conn)?;
            load_user(conn, user_id)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Database;
    use crate::progress::Aggregation;
    use tempfile::TempDir;

    /// Register a user and return its id
    pub(crate) fn register_user(t: &Tracker, email: &str) -> i32 {
        t.register(&RegisterRequest {
            name: "Test User".to_string(),
            email: email.to_string(),
            password: "correct horse".to_string(),
        })
        .unwrap()
        .user
        .id
    }

    fn tracker() -> (TempDir, Tracker) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("auth.db")).unwrap();
        (dir, Tracker::new(db, Aggregation::default()))
    }

    #[test]
    fn test_register_then_authenticate() {
        let (_dir, t) = tracker();
        let session = t
            .register(&RegisterRequest {
                name: "Ada".into(),
                email: "Ada@Example.com".into(),
                password: "analytical".into(),
            })
            .unwrap();
        assert_eq!(session.user.email, "ada@example.com");
        assert_eq!(session.token_type, "bearer");
        assert_eq!(t.authenticate(&session.token).unwrap(), session.user.id);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (_dir, t) = tracker();
        register_user(&t, "ada@example.com");
        let err = t
            .register(&RegisterRequest {
                name: "Ada again".into(),
                email: "ADA@example.com".into(),
                password: "analytical".into(),
            })
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(err.field_errors().contains_key("email"));
    }

    #[test]
    fn test_login_checks_password() {
        let (_dir, t) = tracker();
        register_user(&t, "ada@example.com");

        let ok = t.login(&LoginRequest {
            email: "ada@example.com".into(),
            password: "correct horse".into(),
        });
        assert!(ok.is_ok());

        let err = t
            .login(&LoginRequest {
                email: "ada@example.com".into(),
                password: "wrong horse".into(),
            })
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_logout_revokes_only_that_token() {
        let (_dir, t) = tracker();
        let first = t
            .register(&RegisterRequest {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password: "analytical".into(),
            })
            .unwrap();
        let second = t
            .login(&LoginRequest {
                email: "ada@example.com".into(),
                password: "analytical".into(),
            })
            .unwrap();

        t.logout(&first.token).unwrap();
        assert_eq!(t.authenticate(&first.token).unwrap_err().status_code(), 401);
        assert!(t.authenticate(&second.token).is_ok());
        assert!(t.logout(&first.token).is_err());
    }

    #[test]
    fn test_tokens_stored_as_digest() {
        let (_dir, t) = tracker();
        let session = t
            .register(&RegisterRequest {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password: "analytical".into(),
            })
            .unwrap();

        let stored: Vec<String> = t
            .read(|conn| Ok(api_tokens::table.select(api_tokens::token_hash).load(conn)?))
            .unwrap();
        assert_eq!(stored, vec![digest(&session.token)]);
    }

    #[test]
    fn test_update_profile() {
        let (_dir, t) = tracker();
        let ada = register_user(&t, "ada@example.com");
        register_user(&t, "eve@example.com");

        let user = t
            .update_profile(
                ada,
                &UpdateProfileRequest {
                    name: Some("Ada Lovelace".into()),
                    email: None,
                },
            )
            .unwrap();
        assert_eq!(user.name, "Ada Lovelace");
        assert_eq!(user.email, "ada@example.com");

        let err = t
            .update_profile(
                ada,
                &UpdateProfileRequest {
                    name: None,
                    email: Some("eve@example.com".into()),
                },
            )
            .unwrap_err();
        assert!(err.field_errors().contains_key("email"));
    }
}
