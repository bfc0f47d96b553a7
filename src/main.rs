// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use gofer_bot::{run_dispatcher, GoferBot, NoTranscriber, Transcriber, WhisperHttp};
use gofer_channel::{Messaging, TelegramMessaging};
use gofer_persist::{write_restart_context, AuditLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    let mut config = gofer_config::from_env()?;

    if let Some(cmd) = &args.command {
        match cmd {
            Commands::ShowConfig => {
                config.bot_token = "<redacted>".into();
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }
            Commands::CheckCron => {
                let path = config.working_dir.join("cron.yaml");
                let manifest = gofer_scheduler::load_manifest(&path)
                    .with_context(|| format!("validating {}", path.display()))?;
                println!("{} job(s) OK", manifest.jobs.len());
                return Ok(());
            }
        }
    }

    // The MCP config is loaded once, env-interpolated, and re-written for
    // the agent process; the agent never sees raw `${VAR}` references.
    if let Some(path) = config.mcp_config.take() {
        let mcp = gofer_config::load_mcp_config(&path)
            .with_context(|| format!("loading MCP config {}", path.display()))?;
        std::fs::create_dir_all(&config.temp_dir)
            .with_context(|| format!("creating {}", config.temp_dir.display()))?;
        let resolved = config.temp_dir.join("mcp.json");
        std::fs::write(&resolved, serde_json::to_string_pretty(&mcp.to_agent_json())?)
            .with_context(|| format!("writing {}", resolved.display()))?;
        config.mcp_config = Some(resolved);
    }

    let config = Arc::new(config);
    let messaging = Arc::new(TelegramMessaging::new(&config.bot_token));
    match messaging.get_me().await {
        Ok(me) => info!(username = %me.username, "connected to the chat platform"),
        Err(e) => warn!(error = %e, "could not fetch bot identity"),
    }

    let audit = Arc::new(AuditLog::new(config.audit.path.clone(), config.audit.json));
    let transcriber: Arc<dyn Transcriber> = match &config.transcription.api_key {
        Some(key) => Arc::new(WhisperHttp::new(
            key.clone(),
            config.transcription.endpoint.clone(),
        )),
        None => Arc::new(NoTranscriber),
    };

    let messaging_port: Arc<dyn Messaging> = Arc::clone(&messaging) as _;
    let bot = GoferBot::new(Arc::clone(&config), messaging_port, audit, transcriber);
    bot.startup().await?;
    bot.start_background();

    let dispatcher = tokio::spawn(run_dispatcher(
        Arc::clone(&bot),
        messaging.bot().clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT, shutting down");
        }
        _ = sigterm() => {
            info!("SIGTERM, writing restart context before exit");
            match write_restart_context(
                &config.working_dir,
                &bot.inflight_summary(),
                chrono::Utc::now(),
            ) {
                Ok(path) => info!(path = %path.display(), "restart context saved"),
                Err(e) => warn!(error = %e, "restart context not written"),
            }
        }
        _ = bot.wait_for_shutdown() => {
            info!("shutdown requested in-band (/restart)");
        }
    }

    dispatcher.abort();
    Ok(())
}

async fn sigterm() {
    #[cfg(unix)]
    {
        let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        stream.recv().await;
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("GOFER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
