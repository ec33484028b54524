use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::{load_state, OutputFormat};

#[derive(Subcommand)]
pub enum AutomationCommands {
    #[command(about = "Process due tasks once and exit (for cron-driven deployments)")]
    RunOnce,
}

pub async fn handle(cmd: AutomationCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AutomationCommands::RunOnce => {
            let state = load_state()?;
            let report = state.automation().run_once().await?;
            state.db.close().await;
            output_success(
                &output_format,
                &format!(
                    "Processed {} task(s): {} sent, {} skipped, {} retried, {} failed",
                    report.picked, report.completed, report.skipped, report.retried, report.failed
                ),
                Some(json!({ "report": report })),
            )
        }
    }
}
