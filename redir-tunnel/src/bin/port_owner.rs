//! port-owner: print the PID of the process listening on a local TCP port
//!
//! ```bash
//! ./port-owner 8080
//! ```
//!
//! Exit status is 0 with the PID on stdout, 1 when no process owns the
//! port, and 2 on bad usage.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use redir_tunnel::owner::PortOwnerResolver;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "port-owner".into());

    let port = match (args.next(), args.next()) {
        (Some(port), None) => match port.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                eprintln!("Error: Port could not be parsed as a uint16\nUsage: {program} <port>");
                return ExitCode::from(2);
            }
        },
        _ => {
            eprintln!("Error: Not enough arguments provided\nUsage: {program} <port>");
            return ExitCode::from(2);
        }
    };

    match PortOwnerResolver::new().resolve_owner(port) {
        Ok(pid) => {
            println!("{pid}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
