//! Route table and controller wiring.

use crate::controllers::{AppController, AuthController};
use ferrule_core::{
    AuthSession, AuthToken, Config, ConnectionRegistry, ControllerRegistry, Dispatcher, GroupAttributes, Method,
    MiddlewareRef, Result, Router, SessionStore,
};
use std::sync::Arc;

/// Build the route table
///
/// # Errors
///
/// Returns `Error::InvalidHandlerRef` for a malformed handler string.
pub fn router(config: &Config, sessions: &Arc<dyn SessionStore>) -> Result<Router> {
    let token: MiddlewareRef = Arc::new(AuthToken::from_config(&config.auth));
    let session = AuthSession::new("user", Arc::clone(sessions)).with_config(config.session.clone());

    let mut router = Router::new();
    router.get("", "AuthController@index")?;

    router.get("users", "AppController@index")?;
    router.post("users", "AppController@store")?;
    router.add_route(Method::Get, "users/{id}", "AppController@show", vec![Arc::clone(&token)])?;
    router.put("users/{id}", "AppController@update")?;
    router.delete("users/{id}", "AppController@delete")?;

    router.group(GroupAttributes::new().prefix("auth").middleware_ref(token), |r| {
        r.post("session", "AuthController@session")?;
        Ok(())
    })?;
    router.group(GroupAttributes::new().prefix("account").middleware(session), |r| {
        r.get("me", "AuthController@me")?;
        Ok(())
    })?;

    Ok(router)
}

/// Register the controllers the route table names
pub fn controllers(config: &Config, db: &Arc<ConnectionRegistry>, sessions: &Arc<dyn SessionStore>) -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();

    let db = Arc::clone(db);
    registry.register("AppController", move || Box::new(AppController::new(Arc::clone(&db))));

    let sessions = Arc::clone(sessions);
    let session_config = config.session.clone();
    registry.register("AuthController", move || {
        Box::new(AuthController::new(Arc::clone(&sessions), session_config.clone()))
    });

    registry
}

/// Router plus controllers
///
/// # Errors
///
/// Same as [`router`].
pub fn dispatcher(config: &Config, db: &Arc<ConnectionRegistry>, sessions: &Arc<dyn SessionStore>) -> Result<Dispatcher> {
    Ok(Dispatcher::new(router(config, sessions)?, controllers(config, db, sessions)))
}
