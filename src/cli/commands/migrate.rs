use crate::cli::utils::output_success;
use crate::cli::{open_database, OutputFormat};

pub async fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let config = crate::config::config();
    let db = open_database(config)?;
    db.migrate().await?;
    db.close().await;
    output_success(&output_format, "Migrations applied", None)
}
