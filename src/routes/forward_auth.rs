use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::app::AppState;
use crate::authz::Verdict;
use crate::jwt::AuthUser;

pub const X_USER_ID: &str = "x-user-id";
pub const X_USERNAME: &str = "x-username";
pub const X_USER_ROLES: &str = "x-user-roles";

/// Endpoint for the reverse proxy's forward-auth middleware.
///
/// Accepts any method; the decision reads only the `X-Forwarded-*` headers,
/// never the method of the subrequest itself. Responds with a bare status
/// code and on 200 sets the identity headers for the upstream.
#[utoipa::path(
    get,
    path = "/forward-auth",
    tag = "Forward Auth",
    params(
        ("X-Forwarded-Uri" = Option<String>, Header, description = "Original request URI"),
        ("X-Forwarded-Method" = Option<String>, Header, description = "Original request method"),
        ("X-Forwarded-Host" = Option<String>, Header, description = "Original request host")
    ),
    responses(
        (status = 200, description = "Request may be forwarded"),
        (status = 401, description = "Missing, invalid or expired token"),
        (status = 403, description = "Authenticated but not permitted"),
        (status = 500, description = "Check could not be completed")
    ),
    security((), ("bearerAuth" = []))
)]
pub async fn forward_auth(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.forward.decide(&headers).await.into_response()
}

impl IntoResponse for Verdict {
    fn into_response(self) -> Response {
        match self {
            Verdict::Allow(None) => StatusCode::OK.into_response(),
            Verdict::Allow(Some(user)) => match identity_headers(&user) {
                Some(headers) => (StatusCode::OK, headers).into_response(),
                None => {
                    tracing::error!(user_id = user.user_id, "identity cannot be encoded as headers");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
            Verdict::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            Verdict::Forbidden => StatusCode::FORBIDDEN.into_response(),
            Verdict::Internal => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

fn identity_headers(user: &AuthUser) -> Option<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(X_USER_ID, HeaderValue::from(user.user_id));
    headers.insert(X_USERNAME, HeaderValue::from_str(&user.username).ok()?);
    headers.insert(X_USER_ROLES, HeaderValue::from_str(&user.roles.join(",")).ok()?);
    Some(headers)
}
