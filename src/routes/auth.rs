use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::jwt::AuthUser;
use crate::models::user::{LoginRequest, LoginResponse, SignupRequest, User};

#[utoipa::path(
    post,
    path = "/auth/signup",
    tag = "Auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid username, email or password"),
        (status = 409, description = "Username or email already in use")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    AppJson(payload): AppJson<SignupRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = state
        .authenticator
        .signup(&payload.username, payload.email.as_deref(), &payload.password)
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Request body is not a valid login request"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    // Unknown usernames look the same as wrong passwords from outside.
    let token = match state.authenticator.login(&payload.username, &payload.password).await {
        Err(AppError::NotFound(_)) => return Err(AppError::InvalidCredentials),
        other => other?,
    };

    Ok(Json(LoginResponse { token }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Missing, invalid or expired token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let user = state.authenticator.current_user(auth.user_id).await?;
    Ok(Json(user))
}
