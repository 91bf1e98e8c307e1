use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::auth::signup,
		routes::auth::login,
		routes::auth::me,
		routes::health::health,
		routes::forward_auth::forward_auth,
		routes::rbac::list_roles,
		routes::rbac::create_role,
		routes::rbac::get_role,
		routes::rbac::update_role,
		routes::rbac::delete_role,
		routes::rbac::get_role_permissions,
		routes::rbac::assign_permission_to_role,
		routes::rbac::remove_permission_from_role,
		routes::rbac::list_permissions,
		routes::rbac::create_permission,
		routes::rbac::get_permission,
		routes::rbac::update_permission,
		routes::rbac::delete_permission,
		routes::rbac::get_user_roles,
		routes::rbac::assign_role_to_user,
		routes::rbac::revoke_role_from_user,
		routes::rbac::get_user_permissions,
		routes::rbac::check_permission
	),
	components(
		schemas(
			models::user::User,
			models::user::SignupRequest,
			models::user::LoginRequest,
			models::user::LoginResponse,
			models::rbac::Role,
			models::rbac::RoleCreateRequest,
			models::rbac::RoleUpdateRequest,
			models::rbac::Permission,
			models::rbac::PermissionCreateRequest,
			models::rbac::PermissionUpdateRequest,
			models::rbac::AssignRoleRequest,
			models::rbac::AssignPermissionToRoleRequest,
			models::rbac::AssignmentResponse,
			models::rbac::CascadeReport,
			models::rbac::CheckPermissionRequest,
			models::rbac::CheckPermissionResponse,
			models::rbac::EffectivePermissions,
			routes::health::HealthResponse
		)
	),
	tags(
		(name = "Auth", description = "Signup, login and the current session"),
		(name = "Health", description = "Liveness and store reachability"),
		(name = "Forward Auth", description = "Reverse-proxy authorization endpoint"),
		(name = "RBAC", description = "Roles, permissions and assignments")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	if let Some(root) = doc.as_object_mut() {
		ensure_security_components(root);
		ensure_servers(root, port);
	}
	add_examples(&mut doc);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
	map.entry(key.to_string())
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
}

fn ensure_security_components(root: &mut Map<String, Value>) {
	let Some(components) = object_entry(root, "components") else { return; };
	let Some(schemes) = object_entry(components, "securitySchemes") else { return; };

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn ensure_servers(root: &mut Map<String, Value>, port: u16) {
	root.entry("servers".to_string())
		.or_insert_with(|| json!([{ "url": format!("http://localhost:{port}") }]));
}

fn add_examples(doc: &mut Value) {
	let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else { return; };

	for item in paths.values_mut() {
		let Some(operations) = item.as_object_mut() else { continue; };
		for operation in operations.values_mut() {
			apply_request_examples(operation);
		}
	}
}

fn apply_request_examples(operation: &mut Value) {
	let Some(request_body) = operation.get_mut("requestBody") else { return; };
	let Some(content) = request_body.get_mut("content").and_then(Value::as_object_mut) else { return; };
	let Some(app_json) = content.get_mut("application/json").and_then(Value::as_object_mut) else { return; };
	let Some(schema) = app_json.get("schema").and_then(Value::as_object) else { return; };
	let Some(reference) = schema.get("$ref").and_then(Value::as_str) else { return; };

	let example = match reference {
		"#/components/schemas/SignupRequest" => Some(json!({
			"username": "ada",
			"email": "ada@example.com",
			"password": "S3cureP@ssw0rd"
		})),
		"#/components/schemas/LoginRequest" => Some(json!({
			"username": "ada",
			"password": "S3cureP@ssw0rd"
		})),
		"#/components/schemas/CheckPermissionRequest" => Some(json!({
			"user_id": 1,
			"resource": "users",
			"action": "read"
		})),
		_ => None,
	};

	if let Some(example) = example {
		app_json.insert("example".to_string(), example);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn document_lists_every_route_and_bearer_scheme() {
		let doc = serde_json::to_value(build_openapi(8080).unwrap()).unwrap();

		let paths = doc["paths"].as_object().unwrap();
		for path in [
			"/auth/signup",
			"/auth/login",
			"/auth/me",
			"/health",
			"/forward-auth",
			"/rbac/roles/{role_id}/permissions/{permission_id}",
			"/rbac/users/{user_id}/permissions",
			"/rbac/check",
		] {
			assert!(paths.contains_key(path), "missing {path}");
		}

		assert_eq!(doc["components"]["securitySchemes"]["bearerAuth"]["scheme"], "bearer");
		assert_eq!(doc["servers"][0]["url"], "http://localhost:8080");
		let forward = doc["paths"]["/forward-auth"]["get"]["description"].as_str().unwrap_or_default();
		assert!(forward.contains("any method"), "{forward}");
		assert_eq!(
			doc["paths"]["/auth/login"]["post"]["requestBody"]["content"]["application/json"]["example"]["username"],
			"ada"
		);
	}
}
