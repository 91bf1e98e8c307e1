//! RBAC admin API.
//!
//! Every endpoint requires a bearer token and is itself authorized against
//! the RBAC graph: reads need `read` on `roles`, `permissions` or `users`,
//! mutations need `create`, `update` or `delete` on the same resource.
//! Assigning a permission to a role is an `update` of the role; assigning a
//! role to a user is an `update` of the user.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};

use crate::app::AppState;
use crate::authz::{actions, resources};
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::jwt::AuthUser;
use crate::models::rbac::*;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).put(update_role).delete(delete_role))
        .route(
            "/roles/:role_id/permissions",
            get(get_role_permissions).post(assign_permission_to_role),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(remove_permission_from_role),
        )
        // Permissions
        .route("/permissions", get(list_permissions).post(create_permission))
        .route(
            "/permissions/:permission_id",
            get(get_permission).put(update_permission).delete(delete_permission),
        )
        // User role assignments
        .route("/users/:user_id/roles", get(get_user_roles).post(assign_role_to_user))
        .route("/users/:user_id/roles/:role_id", delete(revoke_role_from_user))
        // Effective permissions (computed)
        .route("/users/:user_id/permissions", get(get_user_permissions))
        .route("/check", post(check_permission))
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn assignment_status(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
        (status = 403, description = "Missing roles:read"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Role>>> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::READ).await?;
    Ok(Json(state.store.list_roles().await?))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::CREATE).await?;

    let name = required("name", &req.name)?;
    let role = state.store.insert_role(&name, req.description.as_deref()).await?;
    tracing::info!(target: "audit", actor = auth.user_id, role_id = role.id, name = %role.name, "role created");

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
) -> AppResult<Json<Role>> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::READ).await?;
    Ok(Json(state.store.find_role_by_id(role_id).await?))
}

/// Rename a role or change its description
#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
    AppJson(req): AppJson<RoleUpdateRequest>,
) -> AppResult<Json<Role>> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::UPDATE).await?;

    let current = state.store.find_role_by_id(role_id).await?;
    let name = match req.name.as_deref() {
        Some(name) => required("name", name)?,
        None => current.name,
    };
    let description = req.description.or(current.description);

    let role = state
        .store
        .update_role(role_id, &name, description.as_deref())
        .await?;
    tracing::info!(target: "audit", actor = auth.user_id, role_id, "role updated");

    Ok(Json(role))
}

/// Delete a role together with its user and permission memberships
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role deleted", body = CascadeReport),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
) -> AppResult<Json<CascadeReport>> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::DELETE).await?;
    Ok(Json(state.resolver.delete_role(role_id).await?))
}

/// Get permissions granted by a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Permissions of the role", body = Vec<Permission>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
) -> AppResult<Json<Vec<Permission>>> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::READ).await?;

    state.store.find_role_by_id(role_id).await?;
    Ok(Json(state.resolver.permissions_for_role(role_id).await?))
}

/// Grant a permission to a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 201, description = "Permission granted", body = AssignmentResponse),
        (status = 200, description = "Permission was already granted", body = AssignmentResponse),
        (status = 404, description = "Role or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_permission_to_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
    AppJson(req): AppJson<AssignPermissionToRoleRequest>,
) -> AppResult<(StatusCode, Json<AssignmentResponse>)> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::UPDATE).await?;

    let created = state
        .resolver
        .assign_permission_to_role(role_id, req.permission_id)
        .await?;
    Ok((assignment_status(created), Json(AssignmentResponse { created })))
}

/// Remove a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = i64, Path, description = "Role ID"),
        ("permission_id" = i64, Path, description = "Permission ID"),
    ),
    responses((status = 204, description = "Permission no longer granted by the role")),
    security(("bearerAuth" = []))
)]
pub async fn remove_permission_from_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((role_id, permission_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    state.resolver.require(auth.user_id, resources::ROLES, actions::UPDATE).await?;

    state
        .resolver
        .remove_permission_from_role(role_id, permission_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION ENDPOINTS
// =============================================================================

/// List permissions, optionally for a single resource
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "List of permissions", body = Vec<Permission>)),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PermissionQuery>,
) -> AppResult<Json<Vec<Permission>>> {
    state.resolver.require(auth.user_id, resources::PERMISSIONS, actions::READ).await?;

    let resource = query.resource.as_deref().map(str::trim).filter(|r| !r.is_empty());
    Ok(Json(state.store.list_permissions(resource).await?))
}

/// Create a new permission
#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Resource/action pair already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    state.resolver.require(auth.user_id, resources::PERMISSIONS, actions::CREATE).await?;

    let resource = required("resource", &req.resource)?;
    let action = required("action", &req.action)?;
    let permission = state
        .store
        .insert_permission(&resource, &action, req.description.as_deref())
        .await?;
    tracing::info!(
        target: "audit",
        actor = auth.user_id,
        permission_id = permission.id,
        resource = %permission.resource,
        action = %permission.action,
        "permission created"
    );

    Ok((StatusCode::CREATED, Json(permission)))
}

/// Get a permission by ID
#[utoipa::path(
    get,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(("permission_id" = i64, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission", body = Permission),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(permission_id): Path<i64>,
) -> AppResult<Json<Permission>> {
    state.resolver.require(auth.user_id, resources::PERMISSIONS, actions::READ).await?;
    Ok(Json(state.store.find_permission_by_id(permission_id).await?))
}

/// Change a permission's resource, action or description
#[utoipa::path(
    put,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(("permission_id" = i64, Path, description = "Permission ID")),
    request_body = PermissionUpdateRequest,
    responses(
        (status = 200, description = "Permission updated", body = Permission),
        (status = 404, description = "Permission not found"),
        (status = 409, description = "Resource/action pair already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(permission_id): Path<i64>,
    AppJson(req): AppJson<PermissionUpdateRequest>,
) -> AppResult<Json<Permission>> {
    state.resolver.require(auth.user_id, resources::PERMISSIONS, actions::UPDATE).await?;

    let current = state.store.find_permission_by_id(permission_id).await?;
    let resource = match req.resource.as_deref() {
        Some(resource) => required("resource", resource)?,
        None => current.resource,
    };
    let action = match req.action.as_deref() {
        Some(action) => required("action", action)?,
        None => current.action,
    };
    let description = req.description.or(current.description);

    let permission = state
        .store
        .update_permission(permission_id, &resource, &action, description.as_deref())
        .await?;
    tracing::info!(target: "audit", actor = auth.user_id, permission_id, "permission updated");

    Ok(Json(permission))
}

/// Delete a permission and its role memberships
#[utoipa::path(
    delete,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(("permission_id" = i64, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission deleted", body = CascadeReport),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(permission_id): Path<i64>,
) -> AppResult<Json<CascadeReport>> {
    state.resolver.require(auth.user_id, resources::PERMISSIONS, actions::DELETE).await?;
    Ok(Json(state.resolver.delete_permission(permission_id).await?))
}

// =============================================================================
// USER ASSIGNMENT ENDPOINTS
// =============================================================================

/// Get roles held by a user
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Roles of the user", body = Vec<Role>),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Vec<Role>>> {
    state.resolver.require(auth.user_id, resources::USERS, actions::READ).await?;

    state.store.find_user_by_id(user_id).await?;
    Ok(Json(state.resolver.roles_for_user(user_id).await?))
}

/// Give a role to a user
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = AssignmentResponse),
        (status = 200, description = "Role was already assigned", body = AssignmentResponse),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
    AppJson(req): AppJson<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<AssignmentResponse>)> {
    state.resolver.require(auth.user_id, resources::USERS, actions::UPDATE).await?;

    let created = state.resolver.assign_role_to_user(user_id, req.role_id).await?;
    Ok((assignment_status(created), Json(AssignmentResponse { created })))
}

/// Take a role away from a user
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = i64, Path, description = "User ID"),
        ("role_id" = i64, Path, description = "Role ID"),
    ),
    responses((status = 204, description = "User no longer holds the role")),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role_from_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, role_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    state.resolver.require(auth.user_id, resources::USERS, actions::UPDATE).await?;

    state.resolver.remove_role_from_user(user_id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Effective permissions of a user (union over all held roles)
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/permissions",
    tag = "RBAC",
    params(("user_id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissions),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> AppResult<Json<EffectivePermissions>> {
    state.resolver.require(auth.user_id, resources::USERS, actions::READ).await?;

    state.store.find_user_by_id(user_id).await?;
    let roles = state
        .resolver
        .roles_for_user(user_id)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();
    let permissions = state.resolver.permissions_for_user(user_id).await?;

    Ok(Json(EffectivePermissions {
        user_id,
        roles,
        permissions,
    }))
}

/// Ask whether a user may perform an action on a resource
#[utoipa::path(
    post,
    path = "/rbac/check",
    tag = "RBAC",
    request_body = CheckPermissionRequest,
    responses((status = 200, description = "Decision", body = CheckPermissionResponse)),
    security(("bearerAuth" = []))
)]
pub async fn check_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<CheckPermissionRequest>,
) -> AppResult<Json<CheckPermissionResponse>> {
    state.resolver.require(auth.user_id, resources::PERMISSIONS, actions::READ).await?;

    let has_permission = state
        .resolver
        .check(req.user_id, &req.resource, &req.action)
        .await?;
    Ok(Json(CheckPermissionResponse { has_permission }))
}
