use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "editor")]
    pub name: String,
    #[schema(example = "Can edit articles")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION
// =============================================================================

/// A `(resource, action)` pair; the pair is unique across the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Permission {
    pub id: i64,
    pub resource: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "articles")]
    pub resource: String,
    #[schema(example = "read")]
    pub action: String,
    #[schema(example = "Read articles")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionUpdateRequest {
    pub resource: Option<String>,
    pub action: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PermissionQuery {
    /// Only permissions on this resource.
    pub resource: Option<String>,
}

// =============================================================================
// ASSIGNMENTS
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    pub permission_id: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignmentResponse {
    /// False when the pair was already present.
    pub created: bool,
}

/// Join rows removed by a cascading delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CascadeReport {
    pub user_roles_removed: u64,
    pub role_permissions_removed: u64,
}

// =============================================================================
// CHECKS AND EFFECTIVE PERMISSIONS
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckPermissionRequest {
    pub user_id: i64,
    #[schema(example = "articles")]
    pub resource: String,
    #[schema(example = "read")]
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckPermissionResponse {
    pub has_permission: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: i64,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}
