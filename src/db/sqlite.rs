use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::store::CredentialStore;
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{CascadeReport, Permission, Role};
use crate::models::user::{DbUser, NewUser};
use crate::utils::utc_now;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at, updated_at";
const ROLE_COLUMNS: &str =
    "r.id AS id, r.name AS name, r.description AS description, r.created_at AS created_at, r.updated_at AS updated_at";
const PERMISSION_COLUMNS: &str = "p.id AS id, p.resource AS resource, p.action AS action, p.description AS description, \
     p.created_at AS created_at, p.updated_at AS updated_at";

/// `CredentialStore` backed by a sqlx sqlite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(op, timeout_ms = self.timeout.as_millis() as u64, "credential store call exceeded its deadline");
                Err(AppError::internal(format!("{op} timed out")))
            }
        }
    }

    async fn fetch_role(&self, role_id: i64) -> AppResult<Role> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.id = ?");
        sqlx::query_as::<_, Role>(&sql)
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| store_error(err, "role"))?
            .ok_or_else(|| AppError::not_found("role not found"))
    }

    async fn fetch_permission(&self, permission_id: i64) -> AppResult<Permission> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.id = ?");
        sqlx::query_as::<_, Permission>(&sql)
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| store_error(err, "permission"))?
            .ok_or_else(|| AppError::not_found("permission not found"))
    }
}

/// Maps sqlx failures onto the store's error contract.
fn store_error(err: sqlx::Error, entity: &str) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return AppError::conflict(format!("{entity} already exists"));
        }
        if db.is_foreign_key_violation() {
            return AppError::not_found(format!("{entity} references a missing record"));
        }
    }
    if matches!(err, sqlx::Error::RowNotFound) {
        return AppError::not_found(format!("{entity} not found"));
    }
    AppError::Database(err)
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn ping(&self) -> AppResult<()> {
        self.bounded("ping", async {
            sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&self.pool)
                .await
                .map(|_| ())
                .map_err(AppError::from)
        })
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> AppResult<DbUser> {
        self.bounded("find_user_by_username", async {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
            sqlx::query_as::<_, DbUser>(&sql)
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| store_error(err, "user"))?
                .ok_or_else(|| AppError::not_found("user not found"))
        })
        .await
    }

    async fn find_user_by_id(&self, user_id: i64) -> AppResult<DbUser> {
        self.bounded("find_user_by_id", async {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
            sqlx::query_as::<_, DbUser>(&sql)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| store_error(err, "user"))?
                .ok_or_else(|| AppError::not_found("user not found"))
        })
        .await
    }

    async fn insert_user(&self, user: NewUser) -> AppResult<DbUser> {
        self.bounded("insert_user", async {
            let now = utc_now();
            let result = sqlx::query(
                "INSERT INTO users (username, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|err| store_error(err, "user"))?;

            Ok(DbUser {
                id: result.last_insert_rowid(),
                username: user.username,
                email: user.email,
                password_hash: user.password_hash,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn insert_role(&self, name: &str, description: Option<&str>) -> AppResult<Role> {
        self.bounded("insert_role", async {
            let now = utc_now();
            let result = sqlx::query(
                "INSERT INTO roles (name, description, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(description)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|err| store_error(err, "role"))?;

            Ok(Role {
                id: result.last_insert_rowid(),
                name: name.to_string(),
                description: description.map(str::to_string),
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn find_role_by_id(&self, role_id: i64) -> AppResult<Role> {
        self.bounded("find_role_by_id", self.fetch_role(role_id)).await
    }

    async fn find_role_by_name(&self, name: &str) -> AppResult<Role> {
        self.bounded("find_role_by_name", async {
            let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.name = ?");
            sqlx::query_as::<_, Role>(&sql)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| store_error(err, "role"))?
                .ok_or_else(|| AppError::not_found("role not found"))
        })
        .await
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        self.bounded("list_roles", async {
            let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r ORDER BY r.name");
            sqlx::query_as::<_, Role>(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::from)
        })
        .await
    }

    async fn update_role(&self, role_id: i64, name: &str, description: Option<&str>) -> AppResult<Role> {
        self.bounded("update_role", async {
            let updated = sqlx::query("UPDATE roles SET name = ?, description = ?, updated_at = ? WHERE id = ?")
                .bind(name)
                .bind(description)
                .bind(utc_now())
                .bind(role_id)
                .execute(&self.pool)
                .await
                .map_err(|err| store_error(err, "role"))?
                .rows_affected();

            if updated == 0 {
                return Err(AppError::not_found("role not found"));
            }
            self.fetch_role(role_id).await
        })
        .await
    }

    async fn delete_role(&self, role_id: i64) -> AppResult<CascadeReport> {
        self.bounded("delete_role", async {
            let mut tx = self.pool.begin().await?;

            let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE id = ?")
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(AppError::not_found("role not found"));
            }

            let user_roles_removed = sqlx::query("DELETE FROM user_roles WHERE role_id = ?")
                .bind(role_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            let role_permissions_removed = sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
                .bind(role_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM roles WHERE id = ?")
                .bind(role_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            Ok(CascadeReport {
                user_roles_removed,
                role_permissions_removed,
            })
        })
        .await
    }

    async fn insert_permission(
        &self,
        resource: &str,
        action: &str,
        description: Option<&str>,
    ) -> AppResult<Permission> {
        self.bounded("insert_permission", async {
            let now = utc_now();
            let result = sqlx::query(
                "INSERT INTO permissions (resource, action, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(resource)
            .bind(action)
            .bind(description)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|err| store_error(err, "permission"))?;

            Ok(Permission {
                id: result.last_insert_rowid(),
                resource: resource.to_string(),
                action: action.to_string(),
                description: description.map(str::to_string),
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn find_permission_by_id(&self, permission_id: i64) -> AppResult<Permission> {
        self.bounded("find_permission_by_id", self.fetch_permission(permission_id))
            .await
    }

    async fn list_permissions(&self, resource: Option<&str>) -> AppResult<Vec<Permission>> {
        self.bounded("list_permissions", async {
            let sql = format!(
                "SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE (? IS NULL OR p.resource = ?) ORDER BY p.resource, p.action"
            );
            sqlx::query_as::<_, Permission>(&sql)
                .bind(resource)
                .bind(resource)
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::from)
        })
        .await
    }

    async fn update_permission(
        &self,
        permission_id: i64,
        resource: &str,
        action: &str,
        description: Option<&str>,
    ) -> AppResult<Permission> {
        self.bounded("update_permission", async {
            let updated = sqlx::query(
                "UPDATE permissions SET resource = ?, action = ?, description = ?, updated_at = ? WHERE id = ?",
            )
            .bind(resource)
            .bind(action)
            .bind(description)
            .bind(utc_now())
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(|err| store_error(err, "permission"))?
            .rows_affected();

            if updated == 0 {
                return Err(AppError::not_found("permission not found"));
            }
            self.fetch_permission(permission_id).await
        })
        .await
    }

    async fn delete_permission(&self, permission_id: i64) -> AppResult<CascadeReport> {
        self.bounded("delete_permission", async {
            let mut tx = self.pool.begin().await?;

            let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM permissions WHERE id = ?")
                .bind(permission_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(AppError::not_found("permission not found"));
            }

            let role_permissions_removed = sqlx::query("DELETE FROM role_permissions WHERE permission_id = ?")
                .bind(permission_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM permissions WHERE id = ?")
                .bind(permission_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            Ok(CascadeReport {
                user_roles_removed: 0,
                role_permissions_removed,
            })
        })
        .await
    }

    async fn find_roles_for_user(&self, user_id: i64) -> AppResult<Vec<Role>> {
        self.bounded("find_roles_for_user", async {
            let sql = format!(
                r#"
                SELECT {ROLE_COLUMNS}
                FROM roles r
                INNER JOIN user_roles ur ON r.id = ur.role_id
                WHERE ur.user_id = ?
                ORDER BY r.name
                "#
            );
            sqlx::query_as::<_, Role>(&sql)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::from)
        })
        .await
    }

    async fn find_permissions_for_role(&self, role_id: i64) -> AppResult<Vec<Permission>> {
        self.bounded("find_permissions_for_role", async {
            let sql = format!(
                r#"
                SELECT {PERMISSION_COLUMNS}
                FROM permissions p
                INNER JOIN role_permissions rp ON p.id = rp.permission_id
                WHERE rp.role_id = ?
                ORDER BY p.resource, p.action
                "#
            );
            sqlx::query_as::<_, Permission>(&sql)
                .bind(role_id)
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::from)
        })
        .await
    }

    async fn insert_user_role(&self, user_id: i64, role_id: i64) -> AppResult<bool> {
        self.bounded("insert_user_role", async {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(user_id)
            .bind(role_id)
            .bind(utc_now())
            .execute(&self.pool)
            .await
            .map_err(|err| store_error(err, "user role"))?
            .rows_affected();
            Ok(inserted > 0)
        })
        .await
    }

    async fn delete_user_role(&self, user_id: i64, role_id: i64) -> AppResult<bool> {
        self.bounded("delete_user_role", async {
            let removed = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
                .bind(user_id)
                .bind(role_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
            Ok(removed > 0)
        })
        .await
    }

    async fn insert_role_permission(&self, role_id: i64, permission_id: i64) -> AppResult<bool> {
        self.bounded("insert_role_permission", async {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(role_id)
            .bind(permission_id)
            .bind(utc_now())
            .execute(&self.pool)
            .await
            .map_err(|err| store_error(err, "role permission"))?
            .rows_affected();
            Ok(inserted > 0)
        })
        .await
    }

    async fn delete_role_permission(&self, role_id: i64, permission_id: i64) -> AppResult<bool> {
        self.bounded("delete_role_permission", async {
            let removed = sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
            Ok(removed > 0)
        })
        .await
    }

    async fn count_user_permission_match(&self, user_id: i64, resource: &str, action: &str) -> AppResult<i64> {
        self.bounded("count_user_permission_match", async {
            sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COUNT(1)
                FROM permissions p
                INNER JOIN role_permissions rp ON p.id = rp.permission_id
                INNER JOIN user_roles ur ON ur.role_id = rp.role_id
                WHERE ur.user_id = ? AND p.resource = ? AND p.action = ?
                "#,
            )
            .bind(user_id)
            .bind(resource)
            .bind(action)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from)
        })
        .await
    }
}
