use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::io;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sid_trace_audit::ad_client::ActiveDirectoryClient;
use sid_trace_audit::config::Cli;
use sid_trace_audit::observer::ConsoleObserver;
use sid_trace_audit::StaleSidAuditor;

const BANNER: &str = concat!("find-old-sid-traces - v", env!("CARGO_PKG_VERSION"));

/// Console logging on stderr so stdout carries only the report.
///
/// The returned guard flushes buffered log lines when dropped and must be
/// kept alive until exit.
fn init_tracing(default_level: &str, ansi: bool) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(io::stderr());

    let console_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(ansi)
        .with_target(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.missing_dc() {
        println!("[!] Option --dc-ip <fqdn> is required.");
        Cli::command().print_help()?;
        std::process::exit(1);
    }

    let _guard = init_tracing(cli.log_level(), !cli.no_colors);
    if !cli.quiet {
        println!("{}\n", BANNER);
    }

    let credentials = match cli.credentials() {
        Ok(credentials) => credentials,
        Err(e) => {
            println!("Error creating credentials: {}", e);
            return Ok(());
        }
    };
    let config = cli.into_config().context("invalid configuration")?;
    if !config.output.colors {
        colored::control::set_override(false);
    }
    info!(
        "Auditing {} via {}:{} (LDAPS: {}, SACL: {}, workers: {})",
        config.domain,
        config.connection.server,
        config.connection.port,
        config.connection.use_ldaps,
        config.connection.include_sacl,
        config.scan.workers
    );

    let client = ActiveDirectoryClient::new(&config.connection, credentials);
    let observer = Arc::new(ConsoleObserver {
        quiet: config.output.quiet,
    });
    let auditor = StaleSidAuditor::new(Arc::new(client), config.domain.clone(), config.scan.clone())
        .with_observer(observer);

    let outcome = auditor.run().await;

    if let Some(path) = &config.output.output_file {
        match outcome.report.write_json(path, &config.domain) {
            Ok(()) => info!(
                "Wrote {} affected objects to {}",
                outcome.report.affected_objects(),
                path.display()
            ),
            Err(e) => error!("Could not write results to {}: {}", path.display(), e),
        }
    }

    println!("[+] Done.");
    Ok(())
}
