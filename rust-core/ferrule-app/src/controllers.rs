//! Demo controllers: user CRUD over `usersimple` and session login.

use chrono::Local;
use ferrule_core::{
    BoxFuture, ConnectionRegistry, Controller, DbValue, Direction, Error, FieldError, Input, QueryBuilder, Response,
    Result, SessionConfig, SessionStore, ValidationErrors,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

const USERS: &str = "usersimple";

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn id_param(params: &Input) -> Result<i64> {
    params.str("id").and_then(|id| id.parse().ok()).ok_or_else(|| {
        let mut errors = ValidationErrors::new();
        errors.add(FieldError::invalid_type("id", "an integer"));
        Error::Validation(errors)
    })
}

fn field(data: &Map<String, Value>, key: &str) -> DbValue {
    data.get(key).cloned().map_or(DbValue::Null, DbValue::from)
}

fn not_found(controller: &str, method: &str) -> Error {
    Error::MethodNotFound {
        controller: controller.to_string(),
        method: method.to_string(),
    }
}

/// Users resource
pub struct AppController {
    db: Arc<ConnectionRegistry>,
    user: Option<Value>,
}

impl AppController {
    /// Controller over the default connection of `db`
    #[must_use]
    pub const fn new(db: Arc<ConnectionRegistry>) -> Self {
        Self { db, user: None }
    }

    fn query(&self) -> Result<QueryBuilder> {
        self.db.default_query()
    }

    async fn index(&self) -> Result<Response> {
        let mut query = self.query()?;
        let rows = query
            .select(["id", "name", "username"], USERS)
            .where_eq([("deleted", 0_i64)])
            .order_by("id", Direction::Desc)
            .limit(10)
            .get()
            .await?;
        Ok(Response::json(&json!({ "data": rows }), 200))
    }

    async fn show(&self, params: &Input) -> Result<Response> {
        let id = id_param(params)?;
        let mut query = self.query()?;
        let row = query
            .select(["id", "name", "username", "created_at"], USERS)
            .where_eq([("id", id), ("deleted", 0)])
            .first()
            .await?;

        Ok(match row {
            Some(row) => Response::json(&json!({ "data": row }), 200),
            None => Response::json(&json!({ "error": "User not found" }), 404),
        })
    }

    async fn store(&self, input: &Input) -> Result<Response> {
        let data = input.validate(&[("name", "required|string|max:100"), ("username", "required|email")])?;
        let stamp = now();
        let id = self
            .query()?
            .insert(
                USERS,
                [
                    ("name", field(&data, "name")),
                    ("username", field(&data, "username")),
                    ("created_at", DbValue::from(stamp.as_str())),
                    ("updated_at", DbValue::from(stamp)),
                ],
            )
            .await?;

        info!(id, by = ?self.user.as_ref().and_then(|u| u.get("sub")), "User created");
        Ok(Response::json(&json!({ "data": id }), 201))
    }

    async fn update(&self, input: &Input, params: &Input) -> Result<Response> {
        let id = id_param(params)?;
        let data = input.validate(&[("name", "string|max:100"), ("username", "email")])?;

        let mut changes: Vec<(&str, DbValue)> = ["name", "username"]
            .into_iter()
            .filter(|key| data.contains_key(*key))
            .map(|key| (key, field(&data, key)))
            .collect();
        changes.push(("updated_at", DbValue::from(now())));

        let mut query = self.query()?;
        let rows = query.update(USERS, changes)?.where_eq([("id", id)]).execute().await?;
        Ok(Response::json(&json!({ "data": rows }), 200))
    }

    async fn delete(&self, params: &Input) -> Result<Response> {
        let id = id_param(params)?;
        let mut query = self.query()?;
        let rows = query.delete(USERS)?.where_eq([("id", id)]).execute().await?;
        Ok(Response::json(&json!({ "data": rows }), 200))
    }
}

impl Controller for AppController {
    fn has_method(&self, method: &str) -> bool {
        matches!(method, "index" | "show" | "store" | "update" | "delete")
    }

    fn call<'a>(&'a mut self, method: &'a str, input: Input, params: Input) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            match method {
                "index" => self.index().await,
                "show" => self.show(&params).await,
                "store" => self.store(&input).await,
                "update" => self.update(&input, &params).await,
                "delete" => self.delete(&params).await,
                _ => Err(not_found("AppController", method)),
            }
        })
    }

    fn set_user_data(&mut self, data: Value) {
        self.user = Some(data);
    }

    fn user_data(&self) -> Option<&Value> {
        self.user.as_ref()
    }
}

/// Login: trade a verified token for a session
pub struct AuthController {
    sessions: Arc<dyn SessionStore>,
    config: SessionConfig,
    user: Option<Value>,
}

impl AuthController {
    /// Controller opening sessions in `sessions`
    #[must_use]
    pub const fn new(sessions: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            sessions,
            config,
            user: None,
        }
    }

    /// Store the token claims under `user` in a new session
    fn session(&self) -> Result<Response> {
        let claims = self.user.clone().ok_or_else(|| Error::Unauthorized {
            reason: "Token required".to_string(),
        })?;

        let id = self.sessions.create();
        self.sessions.put(&id, "user", claims.clone());
        info!("Session opened");

        Ok(Response::json(&json!({ "data": claims }), 201)
            .with_header("Set-Cookie", &self.config.cookie_header(&id)))
    }

    fn me(&self) -> Response {
        Response::json(&json!({ "data": self.user }), 200)
    }
}

impl Controller for AuthController {
    fn has_method(&self, method: &str) -> bool {
        matches!(method, "index" | "session" | "me")
    }

    fn call<'a>(&'a mut self, method: &'a str, _input: Input, _params: Input) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            match method {
                "index" => Ok(Response::json(&json!({ "message": "AuthController index" }), 200)),
                "session" => self.session(),
                "me" => Ok(self.me()),
                _ => Err(not_found("AuthController", method)),
            }
        })
    }

    fn set_user_data(&mut self, data: Value) {
        self.user = Some(data);
    }

    fn user_data(&self) -> Option<&Value> {
        self.user.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_core::MemorySessionStore;

    #[test]
    fn test_id_param() {
        assert_eq!(id_param(&Input::from_pairs([("id", "42")])).unwrap(), 42);

        let err = id_param(&Input::from_pairs([("id", "abc")])).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(id_param(&Input::default()).is_err());
    }

    #[tokio::test]
    async fn test_session_requires_claims() {
        let store = Arc::new(MemorySessionStore::new());
        let mut auth = AuthController::new(store.clone(), SessionConfig::default());

        let err = auth.call("session", Input::default(), Input::default()).await.unwrap_err();
        assert_eq!(err.status(), 401);
        assert!(store.is_empty());

        auth.set_user_data(json!({ "sub": "ann" }));
        let resp = auth.call("session", Input::default(), Input::default()).await.unwrap();
        assert_eq!(resp.status, 201);
        assert!(resp.header("set-cookie").unwrap().starts_with("FERRULE_SESSION="));
        assert_eq!(store.len(), 1);
    }
}
