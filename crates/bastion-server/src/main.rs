//! Bastion - authorization server and operator CLI
//!
//! Exit codes: 0 on success, 1 on a usage error, 2 when the command fails.

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use axum::Router;
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod config;
mod output;
mod services;
mod tasks;

use bastion_core::RequestContext;
use bastion_policy::SCHEMA;
use bastion_token::{generate_pem_pair, IssueRequest};
use cli::{Cli, Commands, TokenCommand};
use config::{Backend, Settings};
use output::Output;
use services::Services;

const EXIT_USAGE: u8 = 1;
const EXIT_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Help and version go to stdout and are not errors.
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bastion=debug,tower_http=debug"));

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let out = Output::new(cli.raw);
    match cli.command {
        Commands::Serve => serve(&load_settings()?).await,
        Commands::Migrate => {
            let settings = load_settings()?;
            if settings.database.backend != Backend::Postgres {
                bail!("migrate requires database.backend = postgres");
            }
            Services::build(&settings, true).await?;
            out.emit(&json!({ "migrated": true }), |_| "migrations applied".to_string())
        }
        Commands::Keygen => {
            let pair = generate_pem_pair()?;
            out.emit(&pair, |p| format!("{}{}", p.private_key_pem, p.public_key_pem))
        }
        Commands::Token { command } => {
            let services = Services::build(&load_settings()?, false).await?;
            let ctx = RequestContext::background();
            match command {
                TokenCommand::Issue {
                    subject,
                    kind,
                    domain,
                    relation,
                } => {
                    let mut request = IssueRequest::new(subject, kind);
                    if let Some(domain) = domain {
                        request = request.in_domain(domain);
                    }
                    if let Some(relation) = relation {
                        request = request.with_relation(relation);
                    }
                    let issued = services.tokens.issue(&ctx, &request).await?;
                    out.emit(&issued, |t| t.token.clone())
                }
                TokenCommand::Identify { token } => {
                    let identity = services.tokens.identify(&ctx, &token).await?;
                    out.emit(&identity, |i| {
                        format!("{} {} expires {}", i.kind, i.subject, i.expires_at.to_rfc3339())
                    })
                }
            }
        }
        Commands::Check {
            subject,
            permission,
            object,
        } => {
            let services = Services::build(&load_settings()?, false).await?;
            let allowed = services
                .authz
                .check(&RequestContext::background(), &subject, &permission, &object)
                .await?;
            let verdict = if allowed { "allowed" } else { "denied" };
            out.emit(&json!({ "allowed": allowed }), |_| verdict.to_string())
        }
        Commands::Schema => {
            let rendered = SCHEMA.to_string();
            out.emit(&json!({ "schema": rendered }), |_| rendered.clone())
        }
        Commands::Purge => {
            let services = Services::build(&load_settings()?, false).await?;
            let summary = tasks::purge_once(&services.tokens, &services.domains).await?;
            out.emit(&summary, |s| {
                format!(
                    "nonces={} domains={} invitations={} tombstones={}",
                    s.nonces,
                    s.domains.len(),
                    s.invitations,
                    s.tombstones
                )
            })
        }
    }
}

fn load_settings() -> Result<Settings> {
    Settings::load().context("Failed to load configuration")
}

async fn serve(settings: &Settings) -> Result<()> {
    info!(
        "Starting Bastion authorization server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let services = Services::build(settings, true).await?;
    services.bootstrap(settings).await?;
    if settings.server.service_api_key.is_empty() {
        info!("No service API key configured; /auth service endpoints are disabled");
    }

    let shutdown = CancellationToken::new();
    let background = tasks::spawn_background(
        services.tokens.clone(),
        services.domains.clone(),
        shutdown.clone(),
    );

    let app = create_app(services.app_state(settings));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            error!(error = %e, "background task panicked");
        }
    }
    info!("Server shutdown complete");
    Ok(())
}

fn create_app(state: bastion_api::AppState) -> Router {
    bastion_api::create_router(state)
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
