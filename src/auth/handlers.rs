use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthToken, ConfirmSignUpInput, PublicUser, RefreshAuthTokenInput, SignInInput,
            SignUpInput, SignUpOutput,
        },
        extractors::AuthUser,
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-up-confirm", post(sign_up_confirm))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-in/refresh", post(refresh))
        .route("/auth/sign-out", post(sign_out))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    (3..=50).contains(&email.len()) && EMAIL_RE.is_match(email)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

fn require(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if !(4..=50).contains(&password.chars().count()) {
        warn!("password length out of range");
        return Err(ApiError::validation("Password must be 4 to 50 characters"));
    }
    Ok(())
}

fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::validation("Invalid email"));
    }
    Ok(email)
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpInput>, JsonRejection>,
) -> Result<Json<SignUpOutput>, ApiError> {
    let mut input = body(payload)?;
    input.name = input.name.trim().to_string();
    if !(2..=50).contains(&input.name.chars().count()) {
        return Err(ApiError::validation("Name must be 2 to 50 characters"));
    }
    input.email = normalize_email(&input.email)?;
    check_password(&input.password)?;

    let output = state.sign_up.sign_up(input).await?;
    Ok(Json(output))
}

#[instrument(skip(state, payload))]
pub async fn sign_up_confirm(
    State(state): State<AppState>,
    payload: Result<Json<ConfirmSignUpInput>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let input = body(payload)?;
    require(&input.token, "token")?;
    require(&input.code, "code")?;

    state.confirm_sign_up.confirm(input).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Json<SignInInput>, JsonRejection>,
) -> Result<Json<AuthToken>, ApiError> {
    let mut input = body(payload)?;
    input.email = normalize_email(&input.email)?;
    check_password(&input.password)?;

    let token = state.auth.sign_in(input).await?;
    Ok(Json(token))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshAuthTokenInput>, JsonRejection>,
) -> Result<Json<AuthToken>, ApiError> {
    let input = body(payload)?;
    require(&input.auth_token, "auth_token")?;
    require(&input.refresh_token, "refresh_token")?;

    let token = state.auth.refresh_token(input).await?;
    Ok(Json(token))
}

#[instrument(skip(state, auth))]
pub async fn sign_out(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.auth.sign_out(&auth.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state.auth.me(auth.user_id).await?;
    Ok(Json(user.into()))
}
