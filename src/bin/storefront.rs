use clap::Parser;
use catering_storefront::cli::{utils::output_error, Cli, OutputFormat};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    catering_storefront::init_tracing();

    let cli = Cli::parse();
    let output_format = OutputFormat::from_cli(&cli);

    if let Err(e) = catering_storefront::cli::run(cli).await {
        match std::env::var("CLI_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => output_error(&output_format, &format!("{e:?}")),
            _ => output_error(&output_format, &e.to_string()),
        }
        std::process::exit(1);
    }
}
