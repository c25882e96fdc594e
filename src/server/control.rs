//! Administrative control channel.
//!
//! Served on its own listener so it can stay on loopback while the OPDS
//! routes face the network. The CLI talks to it through [`ControlClient`].

use super::handlers::blocking;
use crate::db::SyncStats;
use crate::error::{AppError, Result};
use crate::server::AppState;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

/// New user request.
#[derive(Debug, Serialize, Deserialize)]
pub struct NewUser {
    /// User name.
    pub name: String,
    /// Plain-text password.
    pub password: String,
}

/// Rename request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Rename {
    /// New user name.
    pub new_name: String,
}

/// Password change request.
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordChange {
    /// New plain-text password.
    pub password: String,
}

/// Create the control router.
pub fn control_router(state: AppState) -> Router {
    Router::new()
        .route("/scan", post(scan))
        .route("/dump", get(dump))
        .route("/users", post(add_user))
        .route("/users/{name}", delete(delete_user))
        .route("/users/{name}/name", put(change_username))
        .route("/users/{name}/password", put(change_password))
        .with_state(state)
}

async fn scan(State(state): State<AppState>) -> Result<Json<SyncStats>> {
    let stats = blocking(move || state.rescan()).await?;
    Ok(Json(stats))
}

async fn dump(State(state): State<AppState>) -> Result<String> {
    let db = state.db.clone();
    blocking(move || db.dump()).await
}

async fn add_user(State(state): State<AppState>, Json(req): Json<NewUser>) -> Result<StatusCode> {
    let db = state.db.clone();
    blocking(move || db.add_user(&req.name, &req.password)).await?;
    Ok(StatusCode::CREATED)
}

async fn delete_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.db.delete_user(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_username(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<Rename>,
) -> Result<StatusCode> {
    state.db.change_username(&name, &req.new_name)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PasswordChange>,
) -> Result<StatusCode> {
    let db = state.db.clone();
    blocking(move || db.change_password(&name, &req.password)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Typed client of the control channel.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base_url: String,
    http: reqwest::Client,
}

impl ControlClient {
    /// Create a client for a control channel base URL (`http://host:port`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Trigger a synchronous rescan.
    pub async fn scan(&self) -> Result<SyncStats> {
        let response = self.send(self.http.post(self.url("/scan"))).await?;
        let response = expect_success(response, |_| None).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid scan response: {}", e)))
    }

    /// Text dump of every table.
    pub async fn dump(&self) -> Result<String> {
        let response = self.send(self.http.get(self.url("/dump"))).await?;
        let response = expect_success(response, |_| None).await?;
        response
            .text()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid dump response: {}", e)))
    }

    /// Create a user.
    pub async fn add_user(&self, name: &str, password: &str) -> Result<()> {
        let body = NewUser {
            name: name.to_string(),
            password: password.to_string(),
        };
        let response = self
            .send(self.http.post(self.url("/users")).json(&body))
            .await?;
        expect_success(response, |status| match status {
            StatusCode::CONFLICT => Some(AppError::UserExists(name.to_string())),
            StatusCode::BAD_REQUEST => Some(AppError::EmptyPassword),
            _ => None,
        })
        .await?;
        Ok(())
    }

    /// Delete a user.
    pub async fn delete_user(&self, name: &str) -> Result<()> {
        let response = self
            .send(self.http.delete(self.user_url(name, "")))
            .await?;
        expect_success(response, |status| match status {
            StatusCode::NOT_FOUND => Some(AppError::UserNotFound(name.to_string())),
            StatusCode::CONFLICT => Some(AppError::NotEnoughUsers),
            _ => None,
        })
        .await?;
        Ok(())
    }

    /// Rename a user.
    pub async fn change_username(&self, name: &str, new_name: &str) -> Result<()> {
        let body = Rename {
            new_name: new_name.to_string(),
        };
        let response = self
            .send(self.http.put(self.user_url(name, "/name")).json(&body))
            .await?;
        expect_success(response, |status| match status {
            StatusCode::NOT_FOUND => Some(AppError::UserNotFound(name.to_string())),
            StatusCode::CONFLICT => Some(AppError::UserExists(new_name.to_string())),
            _ => None,
        })
        .await?;
        Ok(())
    }

    /// Replace a user's password.
    pub async fn change_password(&self, name: &str, password: &str) -> Result<()> {
        let body = PasswordChange {
            password: password.to_string(),
        };
        let response = self
            .send(self.http.put(self.user_url(name, "/password")).json(&body))
            .await?;
        expect_success(response, |status| match status {
            StatusCode::NOT_FOUND => Some(AppError::UserNotFound(name.to_string())),
            StatusCode::BAD_REQUEST => Some(AppError::EmptyPassword),
            _ => None,
        })
        .await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn user_url(&self, name: &str, suffix: &str) -> String {
        format!(
            "{}/users/{}{}",
            self.base_url,
            urlencoding::encode(name),
            suffix
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request.send().await.map_err(|e| {
            AppError::Internal(format!(
                "Control channel unreachable at {}: {}",
                self.base_url, e
            ))
        })
    }
}

/// Map an error status back to the named condition the server reported.
async fn expect_success(
    response: reqwest::Response,
    named: impl FnOnce(StatusCode) -> Option<AppError>,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if let Some(err) = named(status) {
        return Err(err);
    }

    let message = response.text().await.unwrap_or_default();
    Err(AppError::Internal(format!(
        "Control request failed ({}): {}",
        status, message
    )))
}
