pub mod auth;
pub mod forward_auth;
pub mod health;
pub mod rbac;
