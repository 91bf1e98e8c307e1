//! Authorization: RBAC resolution and the reverse-proxy forward-auth adapter.

mod forward;
mod resolver;

pub use forward::{extract_resource, map_method_to_action, normalize_path, ForwardAuth, ForwardedRequest, Verdict};
pub use resolver::PermissionResolver;

/// Resources guarding the admin API itself.
pub mod resources {
    pub const ROLES: &str = "roles";
    pub const PERMISSIONS: &str = "permissions";
    pub const USERS: &str = "users";
}

/// Actions produced by the method mapping.
pub mod actions {
    pub const READ: &str = "read";
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}
