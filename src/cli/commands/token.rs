use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::cli::utils::output_success;
use crate::cli::{load_state, OutputFormat};
use crate::security::TokenSigner;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Print the current payment link for a quote")]
    Quote {
        #[arg(help = "Quote id")]
        id: Uuid,
    },

    #[command(about = "Print the email preferences link for an address")]
    Preferences {
        #[arg(help = "Customer email address")]
        email: String,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Quote { id } => {
            let state = load_state()?;
            let quotes = state.quotes();
            let quote = quotes.get(id).await?;
            let url = quotes.payment_link(&quote)?;
            output_success(&output_format, &url, Some(json!({ "quote_id": id, "payment_url": url })))
        }
        TokenCommands::Preferences { email } => {
            let config = crate::config::config();
            let signer = TokenSigner::new(&config.security.link_secret);
            let token = signer.issue_preference_token(&email);
            let url = format!(
                "{}/api/notifications/preferences?token={}",
                config.server.public_url.trim_end_matches('/'),
                token
            );
            output_success(&output_format, &url, Some(json!({ "email": email, "url": url })))
        }
    }
}
