use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::CredentialStore;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{CascadeReport, Permission, Role};

/// Answers RBAC questions over the user → role → permission graph.
///
/// The model is purely additive: a user's effective permissions are the union
/// of the permissions of every role the user holds.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub async fn roles_for_user(&self, user_id: i64) -> AppResult<Vec<Role>> {
        self.store.find_roles_for_user(user_id).await
    }

    pub async fn permissions_for_role(&self, role_id: i64) -> AppResult<Vec<Permission>> {
        self.store.find_permissions_for_role(role_id).await
    }

    /// Effective permission set, ordered by `(resource, action)`. A permission
    /// granted through several roles appears once.
    pub async fn permissions_for_user(&self, user_id: i64) -> AppResult<Vec<Permission>> {
        let roles = self.roles_for_user(user_id).await?;

        let mut effective: BTreeMap<(String, String), Permission> = BTreeMap::new();
        for role in &roles {
            for permission in self.permissions_for_role(role.id).await? {
                effective
                    .entry((permission.resource.clone(), permission.action.clone()))
                    .or_insert(permission);
            }
        }

        Ok(effective.into_values().collect())
    }

    /// Point query answered by a single join-and-count in the store.
    pub async fn check(&self, user_id: i64, resource: &str, action: &str) -> AppResult<bool> {
        let matches = self
            .store
            .count_user_permission_match(user_id, resource, action)
            .await?;
        let allowed = matches > 0;

        tracing::debug!(user_id, resource, action, allowed, "permission check");
        Ok(allowed)
    }

    /// Grants `permission_id` to `role_id`. Granting an existing pair succeeds
    /// and returns false.
    pub async fn assign_permission_to_role(&self, role_id: i64, permission_id: i64) -> AppResult<bool> {
        self.store.find_role_by_id(role_id).await?;
        self.store.find_permission_by_id(permission_id).await?;

        let created = self.store.insert_role_permission(role_id, permission_id).await?;
        tracing::info!(target: "audit", role_id, permission_id, created, "permission assigned to role");
        Ok(created)
    }

    pub async fn remove_permission_from_role(&self, role_id: i64, permission_id: i64) -> AppResult<bool> {
        let removed = self.store.delete_role_permission(role_id, permission_id).await?;
        tracing::info!(target: "audit", role_id, permission_id, removed, "permission removed from role");
        Ok(removed)
    }

    /// Gives `role_id` to `user_id`. Assigning an existing pair succeeds and
    /// returns false.
    pub async fn assign_role_to_user(&self, user_id: i64, role_id: i64) -> AppResult<bool> {
        self.store.find_user_by_id(user_id).await?;
        self.store.find_role_by_id(role_id).await?;

        let created = self.store.insert_user_role(user_id, role_id).await?;
        tracing::info!(target: "audit", user_id, role_id, created, "role assigned to user");
        Ok(created)
    }

    pub async fn remove_role_from_user(&self, user_id: i64, role_id: i64) -> AppResult<bool> {
        let removed = self.store.delete_user_role(user_id, role_id).await?;
        tracing::info!(target: "audit", user_id, role_id, removed, "role removed from user");
        Ok(removed)
    }

    pub async fn delete_role(&self, role_id: i64) -> AppResult<CascadeReport> {
        let report = self.store.delete_role(role_id).await?;
        tracing::info!(
            target: "audit",
            role_id,
            user_roles_removed = report.user_roles_removed,
            role_permissions_removed = report.role_permissions_removed,
            "role deleted"
        );
        Ok(report)
    }

    pub async fn delete_permission(&self, permission_id: i64) -> AppResult<CascadeReport> {
        let report = self.store.delete_permission(permission_id).await?;
        tracing::info!(
            target: "audit",
            permission_id,
            role_permissions_removed = report.role_permissions_removed,
            "permission deleted"
        );
        Ok(report)
    }

    /// Fails with `Forbidden` unless the user may perform `action` on `resource`.
    pub async fn require(&self, user_id: i64, resource: &str, action: &str) -> AppResult<()> {
        if self.check(user_id, resource, action).await? {
            Ok(())
        } else {
            tracing::info!(user_id, resource, action, "permission denied");
            Err(AppError::forbidden(format!("missing permission {resource}:{action}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, SqliteStore};
    use crate::models::user::NewUser;

    struct Fixture {
        store: Arc<SqliteStore>,
        resolver: PermissionResolver,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::new(test_pool().await));
        let resolver = PermissionResolver::new(store.clone());
        Fixture { store, resolver }
    }

    async fn user(store: &SqliteStore, username: &str) -> i64 {
        store
            .insert_user(NewUser {
                username: username.to_string(),
                email: None,
                password_hash: "$argon2id$placeholder".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    fn pairs(permissions: &[Permission]) -> Vec<(String, String)> {
        permissions
            .iter()
            .map(|p| (p.resource.clone(), p.action.clone()))
            .collect()
    }

    #[tokio::test]
    async fn effective_set_is_union_of_role_sets_without_duplicates() {
        let Fixture { store, resolver } = fixture().await;
        let ada = user(&store, "ada").await;
        let editor = store.insert_role("editor", None).await.unwrap();
        let viewer = store.insert_role("viewer", None).await.unwrap();
        let read = store.insert_permission("articles", "read", None).await.unwrap();
        let update = store.insert_permission("articles", "update", None).await.unwrap();
        let users_read = store.insert_permission("users", "read", None).await.unwrap();

        resolver.assign_permission_to_role(editor.id, read.id).await.unwrap();
        resolver.assign_permission_to_role(editor.id, update.id).await.unwrap();
        resolver.assign_permission_to_role(viewer.id, read.id).await.unwrap();
        resolver.assign_permission_to_role(viewer.id, users_read.id).await.unwrap();
        resolver.assign_role_to_user(ada, editor.id).await.unwrap();
        resolver.assign_role_to_user(ada, viewer.id).await.unwrap();

        let effective = resolver.permissions_for_user(ada).await.unwrap();

        let mut expected = Vec::new();
        for role in resolver.roles_for_user(ada).await.unwrap() {
            expected.extend(pairs(&resolver.permissions_for_role(role.id).await.unwrap()));
        }
        expected.sort();
        expected.dedup();

        assert_eq!(pairs(&effective), expected);
        assert_eq!(effective.len(), 3);
    }

    #[tokio::test]
    async fn check_follows_reachability_through_roles() {
        let Fixture { store, resolver } = fixture().await;
        let ada = user(&store, "ada").await;
        let grace = user(&store, "grace").await;
        let editor = store.insert_role("editor", None).await.unwrap();
        let admin = store.insert_role("admin", None).await.unwrap();
        let update = store.insert_permission("articles", "update", None).await.unwrap();
        store.insert_permission("articles", "delete", None).await.unwrap();

        resolver.assign_permission_to_role(editor.id, update.id).await.unwrap();
        resolver.assign_permission_to_role(admin.id, update.id).await.unwrap();
        resolver.assign_role_to_user(ada, editor.id).await.unwrap();
        resolver.assign_role_to_user(ada, admin.id).await.unwrap();

        assert!(resolver.check(ada, "articles", "update").await.unwrap());
        assert!(!resolver.check(ada, "articles", "delete").await.unwrap());
        assert!(!resolver.check(ada, "users", "update").await.unwrap());
        assert!(!resolver.check(grace, "articles", "update").await.unwrap());

        // still granted through the remaining role
        resolver.remove_role_from_user(ada, editor.id).await.unwrap();
        assert!(resolver.check(ada, "articles", "update").await.unwrap());
    }

    #[tokio::test]
    async fn assignment_is_idempotent() {
        let Fixture { store, resolver } = fixture().await;
        let ada = user(&store, "ada").await;
        let role = store.insert_role("editor", None).await.unwrap();
        let perm = store.insert_permission("articles", "read", None).await.unwrap();

        assert!(resolver.assign_permission_to_role(role.id, perm.id).await.unwrap());
        assert!(!resolver.assign_permission_to_role(role.id, perm.id).await.unwrap());
        assert!(resolver.assign_role_to_user(ada, role.id).await.unwrap());
        assert!(!resolver.assign_role_to_user(ada, role.id).await.unwrap());

        assert_eq!(resolver.permissions_for_role(role.id).await.unwrap().len(), 1);
        assert_eq!(resolver.roles_for_user(ada).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn assigning_unknown_entities_is_not_found() {
        let Fixture { store, resolver } = fixture().await;
        let ada = user(&store, "ada").await;
        let role = store.insert_role("editor", None).await.unwrap();

        assert!(matches!(
            resolver.assign_permission_to_role(role.id, 77).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            resolver.assign_role_to_user(ada, 77).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            resolver.assign_role_to_user(77, role.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleted_role_leaves_effective_set() {
        let Fixture { store, resolver } = fixture().await;
        let ada = user(&store, "ada").await;
        let role = store.insert_role("editor", None).await.unwrap();
        let perm = store.insert_permission("articles", "update", None).await.unwrap();
        resolver.assign_permission_to_role(role.id, perm.id).await.unwrap();
        resolver.assign_role_to_user(ada, role.id).await.unwrap();
        assert!(resolver.check(ada, "articles", "update").await.unwrap());

        resolver.delete_role(role.id).await.unwrap();

        assert!(!resolver.check(ada, "articles", "update").await.unwrap());
        assert!(resolver.permissions_for_user(ada).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn require_maps_denial_to_forbidden() {
        let Fixture { store, resolver } = fixture().await;
        let ada = user(&store, "ada").await;

        let err = resolver.require(ada, "roles", "create").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)), "got {err:?}");
    }
}
