use axum::http::{header, HeaderMap};

use super::actions;
use super::resolver::PermissionResolver;
use crate::jwt::{bearer_token, AuthUser, SessionCodec};

pub const X_FORWARDED_URI: &str = "x-forwarded-uri";
pub const X_FORWARDED_METHOD: &str = "x-forwarded-method";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// The original request as described by the proxy's forwarding headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedRequest {
    pub method: Option<String>,
    /// Decoded path with query string, fragment and dot segments removed.
    /// `None` when the header is absent or the path cannot be normalized.
    pub path: Option<String>,
    pub host: Option<String>,
}

impl ForwardedRequest {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            method: text(X_FORWARDED_METHOD),
            path: text(X_FORWARDED_URI).and_then(|uri| normalize_path(strip_query(&uri))),
            host: text(X_FORWARDED_HOST),
        }
    }

    /// `(resource, action)` the request needs, if both can be derived.
    pub fn requirement(&self) -> Option<(String, String)> {
        let resource = extract_resource(self.path.as_deref()?)?;
        let action = map_method_to_action(self.method.as_deref()?);
        if action.is_empty() {
            return None;
        }
        Some((resource.to_string(), action))
    }
}

fn strip_query(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    &uri[..end]
}

/// Percent-decodes `path` and resolves `.` and `..` segments, collapsing
/// empty ones. Returns `None` for anything that could be read two ways: a
/// relative path, invalid UTF-8, a `..` above the root, and leftover `%`,
/// backslash or control characters after one round of decoding.
pub fn normalize_path(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }

    let decoded = urlencoding::decode(path).ok()?;
    if decoded.chars().any(|c| c == '%' || c == '\\' || c.is_control()) {
        return None;
    }

    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => segments.push(segment),
        }
    }

    Some(format!("/{}", segments.join("/")))
}

/// First path segment after an optional leading `api` segment.
///
/// `/api/users/42` and `/users` both yield `users`; `/` and `/api` yield none.
pub fn extract_resource(path: &str) -> Option<&str> {
    let mut segments = strip_query(path).split('/').filter(|s| !s.is_empty());
    match segments.next()? {
        "api" => segments.next(),
        first => Some(first),
    }
}

pub fn map_method_to_action(method: &str) -> String {
    match method.to_ascii_uppercase().as_str() {
        "GET" => actions::READ.to_string(),
        "POST" => actions::CREATE.to_string(),
        "PUT" | "PATCH" => actions::UPDATE.to_string(),
        "DELETE" => actions::DELETE.to_string(),
        _ => method.to_ascii_lowercase(),
    }
}

/// Outcome of a forward-auth decision. Only `Allow` lets the proxy forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow(Option<AuthUser>),
    Unauthorized,
    Forbidden,
    Internal,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Allow(_) => "allow",
            Verdict::Unauthorized => "unauthorized",
            Verdict::Forbidden => "forbidden",
            Verdict::Internal => "internal",
        }
    }
}

#[derive(Clone)]
pub struct ForwardAuth {
    codec: SessionCodec,
    resolver: PermissionResolver,
    public_paths: Vec<String>,
}

impl ForwardAuth {
    pub fn new(codec: SessionCodec, resolver: PermissionResolver, public_paths: Vec<String>) -> Self {
        Self {
            codec,
            resolver,
            public_paths,
        }
    }

    /// A prefix matches the path itself or any path below it, so `/health`
    /// covers `/health/live` but not `/healthz`.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            if prefix.is_empty() {
                return false;
            }
            match path.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            }
        })
    }

    pub async fn decide(&self, headers: &HeaderMap) -> Verdict {
        let request = ForwardedRequest::from_headers(headers);
        let verdict = self.evaluate(&request, headers).await;

        match &verdict {
            Verdict::Allow(_) => tracing::debug!(
                method = request.method.as_deref(),
                host = request.host.as_deref(),
                path = request.path.as_deref(),
                verdict = verdict.label(),
                "forward-auth decision"
            ),
            _ => tracing::info!(
                method = request.method.as_deref(),
                host = request.host.as_deref(),
                path = request.path.as_deref(),
                verdict = verdict.label(),
                "forward-auth denied"
            ),
        }

        verdict
    }

    async fn evaluate(&self, request: &ForwardedRequest, headers: &HeaderMap) -> Verdict {
        let token = headers
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().ok().and_then(bearer_token));

        if request.path.as_deref().is_some_and(|path| self.is_public(path)) {
            // Identity is forwarded when a valid token happens to be present.
            let identity = token
                .flatten()
                .and_then(|token| self.codec.verify(token).ok())
                .map(AuthUser::from);
            return Verdict::Allow(identity);
        }

        let Some(Some(token)) = token else {
            return Verdict::Unauthorized;
        };

        let user = match self.codec.verify(token) {
            Ok(claims) => AuthUser::from(claims),
            Err(err) => {
                tracing::debug!(kind = err.kind(), "forward-auth token rejected");
                return Verdict::Unauthorized;
            }
        };

        let Some((resource, action)) = request.requirement() else {
            return Verdict::Forbidden;
        };

        match self.resolver.check(user.user_id, &resource, &action).await {
            Ok(true) => Verdict::Allow(Some(user)),
            Ok(false) => Verdict::Forbidden,
            Err(err) => {
                tracing::error!(error = %err, user_id = user.user_id, %resource, %action, "permission check failed");
                Verdict::Internal
            }
        }
    }
}
