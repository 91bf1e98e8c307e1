use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use authgate::authz::PermissionResolver;
use authgate::config;
use authgate::db::{self, CredentialStore, SqliteStore};
use authgate::errors::AppError;

#[derive(Parser, Debug)]
#[command(author, version, about = "authgate admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    Migrate,
    /// Create a role
    CreateRole {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Create a (resource, action) permission
    CreatePermission {
        resource: String,
        action: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Grant a permission to a role, creating the permission if needed
    Grant {
        role: String,
        resource: String,
        action: String,
    },
    /// Give a role to a user
    Assign { username: String, role: String },
    /// Check whether a user may perform an action on a resource
    Check {
        username: String,
        resource: String,
        action: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();

    let cli = Cli::parse();
    let pool = db::init(&config::database_url()?).await?;

    let store = Arc::new(SqliteStore::new(pool));
    let resolver = PermissionResolver::new(store.clone());

    match cli.command {
        Commands::Migrate => println!("Migrations applied"),
        Commands::CreateRole { name, description } => {
            let role = store.insert_role(&name, description.as_deref()).await?;
            println!("Created role {} (id {})", role.name, role.id);
        }
        Commands::CreatePermission {
            resource,
            action,
            description,
        } => {
            let permission = store
                .insert_permission(&resource, &action, description.as_deref())
                .await?;
            println!(
                "Created permission {}:{} (id {})",
                permission.resource, permission.action, permission.id
            );
        }
        Commands::Grant { role, resource, action } => {
            let role = store
                .find_role_by_name(&role)
                .await
                .with_context(|| format!("role {role} does not exist"))?;
            let permission = find_or_create_permission(&*store, &resource, &action).await?;
            let created = resolver
                .assign_permission_to_role(role.id, permission.id)
                .await?;
            if created {
                println!("Granted {resource}:{action} to {}", role.name);
            } else {
                println!("{} already grants {resource}:{action}", role.name);
            }
        }
        Commands::Assign { username, role } => {
            let user = store
                .find_user_by_username(&username)
                .await
                .with_context(|| format!("user {username} does not exist"))?;
            let role = store
                .find_role_by_name(&role)
                .await
                .with_context(|| format!("role {role} does not exist"))?;
            let created = resolver.assign_role_to_user(user.id, role.id).await?;
            if created {
                println!("Assigned {} to {}", role.name, user.username);
            } else {
                println!("{} already holds {}", user.username, role.name);
            }
        }
        Commands::Check {
            username,
            resource,
            action,
        } => {
            let user = store
                .find_user_by_username(&username)
                .await
                .with_context(|| format!("user {username} does not exist"))?;
            let allowed = resolver.check(user.id, &resource, &action).await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
            if !allowed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn find_or_create_permission(
    store: &dyn CredentialStore,
    resource: &str,
    action: &str,
) -> anyhow::Result<authgate::models::rbac::Permission> {
    match store.insert_permission(resource, action, None).await {
        Ok(permission) => Ok(permission),
        Err(AppError::Conflict(_)) => store
            .list_permissions(Some(resource))
            .await?
            .into_iter()
            .find(|permission| permission.action == action)
            .with_context(|| format!("permission {resource}:{action} vanished")),
        Err(err) => Err(err.into()),
    }
}
