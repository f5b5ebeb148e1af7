//! redir-tunnel: transparent TCP tunnel through an HTTP CONNECT proxy
//!
//! This is the main entry point for the tunnel process.
//!
//! # Usage
//!
//! ```bash
//! # Tunnel redirected connections arriving on 9090 through the proxy on 8080
//! ./redir-tunnel 8080 9090
//!
//! # Run with environment overrides
//! REDIR_TUNNEL_LOG_LEVEL=debug ./redir-tunnel 8080 9090
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use redir_tunnel::config::{
    LogConfig, LogFormat, TunnelConfig, ENV_CONNECT_TIMEOUT_SECS, ENV_LOG_FORMAT, ENV_LOG_LEVEL,
    USAGE_ARGS,
};
use redir_tunnel::connection::{run_accept_loop, TunnelHandler};
use redir_tunnel::redirect::{default_destination_resolver, RedirectListener};
use redir_tunnel::upstream::HttpConnectDialer;

/// Print the error and a one-line usage string, then exit non-zero
fn usage_error(program: &str, message: &str) -> ! {
    eprintln!("Error: {message}\nUsage: {program} {USAGE_ARGS}");
    std::process::exit(1);
}

fn print_help(program: &str) {
    println!(
        r"redir-tunnel v{version}

Transparent TCP tunnel: relays NAT-redirected connections to their original
destination through an HTTP CONNECT proxy on 127.0.0.1.

USAGE:
    {program} {USAGE_ARGS}

ENVIRONMENT:
    {ENV_LOG_LEVEL}              Override log level (trace, debug, info, warn, error)
    {ENV_LOG_FORMAT}             Override log format (text, json)
    {ENV_CONNECT_TIMEOUT_SECS}   Override the CONNECT timeout [default: 5]

EXAMPLE:
    # Send uid 1000's outbound HTTP through the tunnel
    iptables -t nat -A OUTPUT -p tcp --dport 80 -m owner --uid-owner 1000 \
        -j REDIRECT --to-ports 9090

    {program} 8080 9090
",
        version = redir_tunnel::VERSION
    );
}

/// Parse arguments, exiting on `--help`, `--version` or bad input
fn parse_args() -> TunnelConfig {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "redir-tunnel".into());
    let rest: Vec<String> = args.collect();

    match rest.first().map(String::as_str) {
        Some("-h" | "--help") => {
            print_help(&program);
            std::process::exit(0);
        }
        Some("-v" | "--version") => {
            println!("redir-tunnel v{}", redir_tunnel::VERSION);
            std::process::exit(0);
        }
        _ => {}
    }

    TunnelConfig::from_args_with_env(&rest).unwrap_or_else(|e| usage_error(&program, &e.to_string()))
}

/// Initialize logging
fn init_logging(log: &LogConfig) {
    let level = match log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "tokio=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(log.target);

    match log.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let config = parse_args();
    init_logging(&config.log);

    info!("Starting redir-tunnel v{}", redir_tunnel::VERSION);
    info!(
        "Upstream proxy {} (connect timeout {}s)",
        config.upstream.proxy_url, config.upstream.connect_timeout_secs
    );

    let listener = RedirectListener::bind(&config.listen)
        .with_context(|| format!("failed to listen on {}", config.listen.address))?;

    info!(
        "Proxy server with PID {} listening on {}",
        std::process::id(),
        listener.local_addr()
    );

    let dialer = HttpConnectDialer::new(config.upstream.proxy_target());
    let handler = Arc::new(TunnelHandler::new(
        default_destination_resolver(),
        Arc::new(dialer),
    ));

    // In-flight connections are dropped with the process
    tokio::select! {
        () = run_accept_loop(listener, handler) => {}
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
