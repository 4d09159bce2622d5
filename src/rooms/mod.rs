mod msg;
mod new;
mod room;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use msg::{MessageView, render_markdown};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(new::new_room))
        .route("/{key}", get(room::room))
        .route("/{key}/messages", get(room::messages))
}
