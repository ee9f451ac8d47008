// Main entry point for the road test appointment monitor

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monitor_core::{
    BaseBrowser, BaseChannel, Config, ConsoleChannel, CycleStatus, Dispatcher, EmailChannel,
    Engine, HttpBrowser, NotificationMethod, PollScheduler, SchedulerConfig, SeenLedger,
    SessionManager, SmsChannel, StopCause, TransientKind,
};

#[derive(Parser)]
#[command(name = "monitor")]
#[command(about = "Road test appointment monitor")]
#[command(version)]
struct Cli {
    /// Check appointments once and exit
    #[arg(long)]
    once: bool,

    /// Verify login and run one extraction pass without dispatching real alerts
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,monitor_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Road test appointment monitor starting");
    tracing::info!("License type: {}", config.license_type);
    tracing::info!("Preferred city: {}", config.preferred_city);
    tracing::info!(
        "Test centres: {}",
        if config.preferred_centers.is_empty() {
            "any in city".to_string()
        } else {
            config.preferred_centers.join(", ")
        }
    );
    tracing::info!("Earliest acceptable date: {}", config.earliest_acceptable_date);
    tracing::info!(
        "Notification channels: {}",
        config
            .notification_methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!("Check interval: {}s", config.check_interval.as_secs());

    let browser: Arc<dyn BaseBrowser> = Arc::new(
        HttpBrowser::new(&config.browser_config()).context("Failed to build automation layer")?,
    );
    let session = SessionManager::new(
        browser.clone(),
        config.credentials(),
        config.login_url.clone(),
        config.booking_url.clone(),
    );

    let ledger = match &config.ledger_path {
        Some(path) => SeenLedger::load(path).context("Failed to load dedup ledger")?,
        None => SeenLedger::in_memory(),
    };

    let dispatcher = if cli.test {
        // Dry runs never touch real channels.
        Dispatcher::new(vec![Box::new(ConsoleChannel)])
    } else {
        build_dispatcher(&config)?
    };

    let mut engine = Engine::new(
        browser,
        session,
        config.criteria(),
        config.preferences(),
        ledger,
        dispatcher,
        config.booking_url.clone(),
    );

    if cli.test {
        tracing::info!("Running in test mode: one extraction pass, no alerts");
        let report = engine.probe().await;
        return Ok(exit_code_for(&report.status));
    }

    let mut scheduler = PollScheduler::new(SchedulerConfig {
        interval: config.check_interval,
        ..SchedulerConfig::default()
    });

    if cli.once {
        let report = scheduler.run_once(&mut engine).await;
        return Ok(exit_code_for(&report.status));
    }

    // Continuous mode with Ctrl-C cancellation
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    match scheduler.run(&mut engine, shutdown_rx).await {
        StopCause::Shutdown => Ok(ExitCode::SUCCESS),
        StopCause::Fatal(_) => Ok(ExitCode::FAILURE),
    }
}

fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    let mut channels: Vec<Box<dyn BaseChannel>> = Vec::new();
    for method in &config.notification_methods {
        match method {
            NotificationMethod::Console => channels.push(Box::new(ConsoleChannel)),
            NotificationMethod::Email => {
                let settings = config
                    .email
                    .as_ref()
                    .context("email channel selected but settings missing")?;
                channels.push(Box::new(
                    EmailChannel::new(settings).context("Failed to build email channel")?,
                ));
            }
            NotificationMethod::Sms => {
                let settings = config
                    .sms
                    .as_ref()
                    .context("SMS channel selected but settings missing")?;
                channels.push(Box::new(SmsChannel::new(settings)));
            }
        }
    }
    Ok(Dispatcher::new(channels))
}

/// Run-once exit status: a clean cycle is success regardless of findings;
/// auth failures and fatal errors are hard errors.
fn exit_code_for(status: &CycleStatus) -> ExitCode {
    match status {
        CycleStatus::Ok => ExitCode::SUCCESS,
        CycleStatus::TransientError(TransientKind::Auth) => ExitCode::FAILURE,
        CycleStatus::TransientError(_) => ExitCode::SUCCESS,
        CycleStatus::FatalError(_) => ExitCode::FAILURE,
    }
}
