//! Keystone command-line front end.
//!
//! Commands:
//! - `status <user-id>`: provider snapshots and the default model, as JSON
//! - `validate <provider>`: check the key in `KEYSTONE_API_KEY` against the
//!   provider without storing it
//!
//! Configuration comes from `KEYSTONE_*` environment variables; log verbosity
//! from `RUST_LOG`, and `KEYSTONE_LOG_FORMAT=json` switches to JSON lines.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;
use zeroize::Zeroizing;

use keystone_service::middleware::selector;
use keystone_service::providers::{RetryConfig, with_retry};
use keystone_service::{CredentialError, Engine, EngineConfig, FilePersistence, Provider, Validator};

const ENV_API_KEY: &str = "KEYSTONE_API_KEY";
const ENV_LOG_FORMAT: &str = "KEYSTONE_LOG_FORMAT";

/// sysexits.h EX_TEMPFAIL: the provider could not be reached.
const EXIT_TEMPFAIL: i32 = 75;

const USAGE: &str = "usage: keystone-service <command>

commands:
  status <user-id>      show provider snapshots and the default model
  validate <provider>   validate the key in KEYSTONE_API_KEY";

/// Initialize structured logging with tracing. Logs go to stderr so stdout
/// stays machine-readable.
fn init_logging() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn status(config: &EngineConfig, user_id: &str) -> Result<()> {
    let persistence = Arc::new(FilePersistence::new(&config.store_path));
    let engine = Engine::from_config(config, persistence)
        .await
        .context("Failed to initialize engine")?;

    let snapshots = engine.resolver().resolve_all(user_id).await;
    let available = selector::available_providers(&snapshots);
    let default_model = selector::default_model(&snapshots);

    let report = json!({
        "user_id": user_id,
        "available_providers": available,
        "default_model": default_model,
        "providers": snapshots,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn validate(config: &EngineConfig, provider: Provider) -> Result<()> {
    let raw_key = Zeroizing::new(
        std::env::var(ENV_API_KEY).with_context(|| format!("{ENV_API_KEY} is not set"))?,
    );
    let validator = Validator::from_config(config);
    let retry = RetryConfig::default();

    let outcome = tokio::select! {
        outcome = with_retry(&retry, || validator.validate(provider, &raw_key)) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, aborting validation");
            bail!("validation interrupted");
        }
    };

    let report = json!({
        "provider": provider,
        "outcome": outcome,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(e) = outcome.into_result(provider) {
        eprintln!("{e}");
        let code = match e {
            CredentialError::ValidationTransientFailure { .. } => EXIT_TEMPFAIL,
            _ => 1,
        };
        std::process::exit(code);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = EngineConfig::from_env().context("Invalid configuration")?;

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["status", user_id] => status(&config, user_id).await,
        ["validate", provider] => {
            let provider: Provider = provider.parse()?;
            validate(&config, provider).await
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}
