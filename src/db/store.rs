use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::rbac::{CascadeReport, Permission, Role};
use crate::models::user::{DbUser, NewUser};

/// Durable storage for users, roles, permissions and their join relations.
///
/// Implementations report a missing entity as `AppError::NotFound` and a
/// violated uniqueness constraint as `AppError::Conflict`, and abort any call
/// that exceeds their deadline with `AppError::Internal`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    // Users
    async fn find_user_by_username(&self, username: &str) -> AppResult<DbUser>;
    async fn find_user_by_id(&self, user_id: i64) -> AppResult<DbUser>;
    async fn insert_user(&self, user: NewUser) -> AppResult<DbUser>;

    // Roles
    async fn insert_role(&self, name: &str, description: Option<&str>) -> AppResult<Role>;
    async fn find_role_by_id(&self, role_id: i64) -> AppResult<Role>;
    async fn find_role_by_name(&self, name: &str) -> AppResult<Role>;
    async fn list_roles(&self) -> AppResult<Vec<Role>>;
    async fn update_role(&self, role_id: i64, name: &str, description: Option<&str>) -> AppResult<Role>;
    /// Removes the role's user and permission memberships, then the role,
    /// in one transaction.
    async fn delete_role(&self, role_id: i64) -> AppResult<CascadeReport>;

    // Permissions
    async fn insert_permission(
        &self,
        resource: &str,
        action: &str,
        description: Option<&str>,
    ) -> AppResult<Permission>;
    async fn find_permission_by_id(&self, permission_id: i64) -> AppResult<Permission>;
    async fn list_permissions(&self, resource: Option<&str>) -> AppResult<Vec<Permission>>;
    async fn update_permission(
        &self,
        permission_id: i64,
        resource: &str,
        action: &str,
        description: Option<&str>,
    ) -> AppResult<Permission>;
    /// Removes the permission's role memberships, then the permission, in one
    /// transaction.
    async fn delete_permission(&self, permission_id: i64) -> AppResult<CascadeReport>;

    // Joins
    async fn find_roles_for_user(&self, user_id: i64) -> AppResult<Vec<Role>>;
    async fn find_permissions_for_role(&self, role_id: i64) -> AppResult<Vec<Permission>>;
    /// Returns false when the pair already existed.
    async fn insert_user_role(&self, user_id: i64, role_id: i64) -> AppResult<bool>;
    /// Returns false when there was nothing to remove.
    async fn delete_user_role(&self, user_id: i64, role_id: i64) -> AppResult<bool>;
    async fn insert_role_permission(&self, role_id: i64, permission_id: i64) -> AppResult<bool>;
    async fn delete_role_permission(&self, role_id: i64, permission_id: i64) -> AppResult<bool>;

    /// Number of grants of `(resource, action)` reachable from the user's roles.
    async fn count_user_permission_match(&self, user_id: i64, resource: &str, action: &str) -> AppResult<i64>;
}
