use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

use pg_rusty_profiler::cli::CliArguments;
use pg_rusty_profiler::monitoring::{start_http_server, AdminState, LogSink};
use pg_rusty_profiler::{start_proxy_server, ProfileHistory, ProfileRegistry, ProfilerConfig};

macro_rules! fatal {
    ($err:expr, $msg:literal) => {{
        error!(fatal = true, error = %$err, $msg);
        process::exit(1);
    }};
    ($err:expr, $msg:literal, $($key:tt = $val:expr),+) => {{
        error!(fatal = true, error = %$err, $($key = %$val),+, $msg);
        process::exit(1);
    }};
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let cli_args = CliArguments::parse();

    let config = ProfilerConfig::try_from(&cli_args)
        .unwrap_or_else(|e| fatal!(e, "Invalid profiler configuration"));

    info!(
        downstream = %cli_args.downstream,
        upstream = %cli_args.upstream,
        slow_query_ms = config.thresholds.slow_query_ms,
        n1_threshold = config.thresholds.n1_pattern_threshold,
        "Starting query profiler"
    );

    let history = Arc::new(ProfileHistory::new(config.max_history));
    let registry = ProfileRegistry::new(config);
    registry.add_sink(Arc::new(LogSink));
    registry.add_sink(history.clone());

    let admin_state = AdminState::new(registry.clone(), history);
    let admin_address = cli_args.admin_address;
    tokio::spawn(async move {
        if let Err(e) = start_http_server(admin_address, admin_state).await {
            fatal!(e, "Admin HTTP server failed", addr = admin_address);
        }
    });

    tokio::select! {
        res = start_proxy_server(cli_args.downstream, cli_args.upstream, registry.clone()) => {
            if let Err(e) = res {
                fatal!(e, "Proxy server failed", addr = cli_args.downstream);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(active_profiles = registry.active_count(), "Shutting down");
        }
    }
}
