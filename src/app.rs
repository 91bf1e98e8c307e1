use std::sync::Arc;

use axum::http::Method;
use axum::routing::{any, get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authenticator::Authenticator;
use crate::authz::{ForwardAuth, PermissionResolver};
use crate::config::AppConfig;
use crate::db::{CredentialStore, SqliteStore};
use crate::errors::AppError;
use crate::jwt::SessionCodec;
use crate::routes::{auth, forward_auth, health, rbac};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub authenticator: Arc<Authenticator>,
    pub resolver: PermissionResolver,
    pub forward: Arc<ForwardAuth>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: &AppConfig) -> Self {
        let store: Arc<dyn CredentialStore> =
            Arc::new(SqliteStore::new(pool).with_timeout(config.store_timeout));
        Self::with_store(store, config)
    }

    pub fn with_store(store: Arc<dyn CredentialStore>, config: &AppConfig) -> Self {
        let codec = SessionCodec::new(&config.jwt);
        let resolver = PermissionResolver::new(store.clone());
        let forward = ForwardAuth::new(codec.clone(), resolver.clone(), config.public_paths.clone());

        Self {
            authenticator: Arc::new(Authenticator::new(store.clone(), codec)),
            store,
            resolver,
            forward: Arc::new(forward),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AppConfig::from_env()?;
    create_app_with_config(pool, config).await
}

pub async fn create_app_with_config(pool: SqlitePool, config: AppConfig) -> Result<Router, AppError> {
    config.jwt.validate()?;
    let state = AppState::new(pool, &config);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .nest("/rbac", rbac::routes())
        .route("/health", get(health::health))
        .route("/forward-auth", any(forward_auth::forward_auth))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
