use catering_storefront::cli::commands::serve::{handle, ServeArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();
    catering_storefront::init_tracing();

    let port = std::env::var("PORT").ok().and_then(|s| s.parse::<u16>().ok());

    handle(ServeArgs {
        port,
        host: "0.0.0.0".to_string(),
        no_automation: false,
    })
    .await
}
