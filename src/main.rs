use media_relay::Config;
use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "media_relay=info,tower_http=info".to_string()),
        )
        .init();

    let result = match Config::from_env() {
        Ok(config) => media_relay::run(config).await,
        Err(error) => Err(error),
    };

    if let Err(error) = result {
        error!("Server error: {error}");
        std::process::exit(1);
    }
}
