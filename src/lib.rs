pub mod auth;
pub mod chat;
pub mod config;
pub mod rooms;
pub mod session;
pub mod store;
pub mod users;
pub mod ws;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::{
    Json, Router,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use oauth2::reqwest;
use serde_json::{Value, json};
use tracing::error;

use chat::{Chat, ChatError};
use store::StoreError;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub chat: Chat,
    pub clients: auth::Clients,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(auth::me))
        .route("/users", get(users::list))
        .route("/ws", get(ws::chat_ws))
        .merge(auth::router())
        .nest("/r", rooms::router())
        .with_state(app_state)
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
}

impl GetField for Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        use ChatError::*;
        match self.0.downcast_ref::<ChatError>() {
            Some(AuthFailed(_) | Unauthenticated) => StatusCode::UNAUTHORIZED,
            Some(AlreadyAuthenticated) => StatusCode::CONFLICT,
            Some(RoomNotFound(_) | UnknownUser(_)) => StatusCode::NOT_FOUND,
            Some(InvalidRoomKey(_) | EmptyBody | EmptyUsername | NoContext) => StatusCode::BAD_REQUEST,
            Some(WriteFailed(_) | Store(_) | SubscriptionError(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}\n\n{}", self.0, self.0.backtrace());
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(ChatError);
apperr_impl!(StoreError);
apperr_impl!(serde_json::Error);
apperr_impl!(tower_sessions::session::Error);
apperr_impl!(reqwest::Error);
apperr_impl!(oauth2::url::ParseError);

/// Lock a mutex, carrying on past poisoning. Guarded state here is always
/// left consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
