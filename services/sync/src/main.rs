mod classify;
mod context;
mod downstream;
mod gateway;
mod ledger;
mod notify;
mod orchestrator;
mod terminal;
mod watermark;

#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use punchsync_common::types::ServiceInfo;
use punchsync_config::{init_tracing, AppConfig, ErrorTail};
use punchsync_db::ledger::sqlite_repository::SqliteLedgerRepository;
use punchsync_db::watermark::sqlite_repository::SqliteWatermarkRepository;

use crate::context::{SyncContext, SystemClock};
use crate::downstream::client::ErpNextClient;
use crate::notify::{LogNotifier, Notifier, SmtpNotifier, WebhookNotifier};
use crate::orchestrator::Orchestrator;
use crate::terminal::http::HttpTerminalDriver;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info", 0);
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let error_tail = init_tracing(&config.log_level, config.sync.error_tail_lines);
    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    match run(config, error_tail, once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "punchsync exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig, error_tail: ErrorTail, once: bool) -> anyhow::Result<()> {
    let info = ServiceInfo::new("punchsync");
    tracing::info!(
        service = %info.name,
        version = %info.version,
        instance_id = %info.instance_id,
        terminals = config.terminals.len(),
        once,
        "starting"
    );

    let pool = punchsync_db::create_pool(&config.database_url)
        .await
        .context("failed to open state store")?;

    let notifier: Arc<dyn Notifier> = match (&config.notifier.webhook_url, &config.notifier.smtp) {
        (Some(url), _) => Arc::new(WebhookNotifier::new(url.clone()).context("webhook notifier")?),
        (None, Some(smtp)) => {
            tracing::info!(server = %smtp.server, to = %smtp.to, "escalations sent by email");
            Arc::new(SmtpNotifier::new(smtp).context("SMTP notifier")?)
        }
        (None, None) => {
            tracing::info!("no alert channel configured, escalations go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let ctx = SyncContext {
        clock: Arc::new(SystemClock),
        notifier,
        error_tail,
        shutdown,
    };

    let driver = HttpTerminalDriver::new().context("terminal HTTP client")?;
    let client = ErpNextClient::new(config.downstream.clone()).context("ERPNext client")?;

    let mut orchestrator = Orchestrator::new(
        &config,
        driver,
        client,
        SqliteWatermarkRepository::new(pool.clone()),
        SqliteLedgerRepository::new(pool.clone()),
        ctx,
    );

    if once {
        orchestrator.run_once().await.context("sync batch failed")?;
    } else {
        orchestrator.run().await;
    }

    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, using Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown requested, finishing in-flight deliveries");
    shutdown.cancel();
}
