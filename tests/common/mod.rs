#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use authgate::db::{self, CredentialStore, SqliteStore};
use authgate::jwt::JwtConfig;
use authgate::{create_app_with_config, AppConfig};

pub const TEST_SECRET: &[u8] = b"integration-test-secret-0123456789";

pub struct TestApp {
    pub router: Router,
    pub store: SqliteStore,
    _dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub fn test_config() -> AppConfig {
    AppConfig::new(JwtConfig::new(TEST_SECRET.to_vec(), 4))
}

pub async fn spawn_app() -> Result<TestApp> {
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("authgate.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;
    db::migrate(&pool).await?;

    let router = create_app_with_config(pool.clone(), test_config()).await?;
    Ok(TestApp {
        router,
        store: SqliteStore::new(pool),
        _dir: dir,
    })
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> Result<TestResponse> {
        let resp = self.router.clone().oneshot(req).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(TestResponse { status, headers, body })
    }

    pub async fn json(&self, method: &str, uri: &str, token: Option<&str>, payload: Option<Value>) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = match payload {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))?,
            None => builder.body(Body::empty())?,
        };
        self.send(req).await
    }

    /// Signs up and logs in; returns the user id and a session token.
    pub async fn register(&self, username: &str, password: &str) -> Result<(i64, String)> {
        let resp = self
            .json(
                "POST",
                "/auth/signup",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await?;
        assert_eq!(resp.status, StatusCode::CREATED, "signup failed: {}", resp.body);
        let user_id = resp.body["id"].as_i64().context("signup response has no id")?;

        let resp = self
            .json(
                "POST",
                "/auth/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await?;
        assert_eq!(resp.status, StatusCode::OK, "login failed: {}", resp.body);
        let token = resp.body["token"].as_str().context("login response has no token")?.to_string();

        Ok((user_id, token))
    }

    /// Gives `user_id` a role (created if missing) granting every listed pair.
    pub async fn grant(&self, user_id: i64, role: &str, pairs: &[(&str, &str)]) -> Result<i64> {
        let role = match self.store.find_role_by_name(role).await {
            Ok(existing) => existing,
            Err(_) => self.store.insert_role(role, None).await?,
        };
        for (resource, action) in pairs {
            let permission = match self.store.insert_permission(resource, action, None).await {
                Ok(permission) => permission,
                Err(_) => self
                    .store
                    .list_permissions(Some(*resource))
                    .await?
                    .into_iter()
                    .find(|p| p.action == *action)
                    .context("permission lookup failed")?,
            };
            self.store.insert_role_permission(role.id, permission.id).await?;
        }
        self.store.insert_user_role(user_id, role.id).await?;
        Ok(role.id)
    }
}
