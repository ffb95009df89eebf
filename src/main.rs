mod bot;
mod llm;
mod modes;
mod pipeline;
mod telegram;

use anyhow::Result;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

/// | Env var      | Default | Description                     |
/// |--------------|---------|---------------------------------|
/// | `LOG_LEVEL`  | `info`  | `EnvFilter` directive           |
/// | `LOG_FORMAT` | text    | `json` for structured output    |
fn init_tracing() {
    let filter = EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();
    modes::run_from_env().await
}
