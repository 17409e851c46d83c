//! Waits for the result of one diagnosis job the way the result page does:
//! poll every interval, give up after the attempt budget, stop on Ctrl-C.
//!
//! Usage: poll <diagnosis-id>

use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use outfit_diagnosis::config::PollerConfig;
use outfit_diagnosis::models::token::CorrelationToken;
use outfit_diagnosis::services::poller::{HttpResultSource, PollOutcome, PollPolicy, PollSession};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let config = PollerConfig::from_env().expect("Failed to load poller configuration");

    let Some(raw_id) = std::env::args().nth(1) else {
        eprintln!("Usage: poll <diagnosis-id>");
        return ExitCode::from(2);
    };
    let token = match CorrelationToken::parse(&raw_id) {
        Ok(token) => token,
        Err(e) => {
            eprintln!("Invalid diagnosis id: {e}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let policy = PollPolicy {
        interval: config.poll_interval(),
        max_attempts: config.max_attempts(),
    };
    let source = HttpResultSource::new(&config.api_base_url);
    let mut session = PollSession::new(token, policy);

    tracing::info!(
        token = %session.token(),
        base_url = %config.api_base_url,
        interval_ms = policy.interval.as_millis() as u64,
        max_attempts = policy.max_attempts,
        "Waiting for diagnosis result"
    );

    match session.run(&source, &cancel).await {
        PollOutcome::Found { result, .. } => {
            println!("{}", result.as_str());
            ExitCode::SUCCESS
        }
        PollOutcome::Failed { error, .. } => {
            eprintln!("Failed to fetch the diagnosis result: {error}");
            ExitCode::FAILURE
        }
        PollOutcome::TimedOut { attempts } => {
            eprintln!("No result after {attempts} attempts; start a new diagnosis");
            ExitCode::from(3)
        }
        PollOutcome::Cancelled { .. } => ExitCode::from(130),
    }
}
