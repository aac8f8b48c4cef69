use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod errors;
pub(crate) mod extractors;
pub mod handlers;
pub mod password;
pub mod services;
pub mod signup;
pub mod token;
pub mod token_store;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
