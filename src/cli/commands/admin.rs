use clap::Subcommand;
use serde_json::json;

use crate::auth::{hash_password, upsert_admin};
use crate::cli::utils::output_success;
use crate::cli::{open_database, OutputFormat};

#[derive(Subcommand)]
pub enum AdminCommands {
    #[command(about = "Create an admin, or reset the password of an existing one")]
    Create {
        #[arg(help = "Admin email address")]
        email: String,
        #[arg(long, env = "ADMIN_PASSWORD", help = "Password (reads ADMIN_PASSWORD when omitted)")]
        password: String,
    },

    #[command(about = "Print a password hash for seeding admin_users by hand")]
    HashPassword {
        #[arg(help = "Plain-text password")]
        password: String,
    },
}

pub async fn handle(cmd: AdminCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AdminCommands::Create { email, password } => {
            if password.len() < 12 {
                anyhow::bail!("admin passwords must be at least 12 characters");
            }
            let db = open_database(crate::config::config())?;
            let id = upsert_admin(db.pool(), &email, &password).await?;
            db.close().await;
            output_success(
                &output_format,
                &format!("Admin {} ready ({})", email, id),
                Some(json!({ "id": id, "email": email })),
            )
        }
        AdminCommands::HashPassword { password } => {
            let hash = hash_password(&password);
            output_success(&output_format, &hash, Some(json!({ "hash": hash })))
        }
    }
}
