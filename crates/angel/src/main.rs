use std::process;

use angel::error::{CLIENT_CHANNEL, EXIT_IO, EXIT_USAGE};
use angel::{
    AngelError, ClientChannel, Orchestrator, OrchestratorConfig, Oversight, PassiveOversight,
    ProcessSupervisor,
};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if matches!(args.first().map(String::as_str), Some("--help" | "-h")) {
        print_usage();
        process::exit(EXIT_USAGE);
    }

    let channel = match ClientChannel::from_args(&args) {
        Ok(channel) => channel,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            print_usage();
            process::exit(EXIT_USAGE);
        }
    };

    angel::logging::init_tracing();
    tracing::info!("angel {}", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start event loop: {e}");
            process::exit(EXIT_IO);
        }
    };

    let code = match runtime.block_on(run(channel)) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "Angel failed");
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    process::exit(code);
}

fn print_usage() {
    eprintln!("Usage: angel [<inFd> <outFd> | <pipeName>]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <inFd> <outFd>   Descriptors to read from and write to the client");
    eprintln!("  <pipeName>       Named pipe created by the client");
    eprintln!();
    eprintln!("With no arguments the client is on stdin/stdout.");
}

async fn run(channel: ClientChannel) -> Result<(), AngelError> {
    let config = OrchestratorConfig::from_env();
    let client = channel
        .open(&config.pipe_dir)
        .await
        .map_err(|e| AngelError::io(CLIENT_CHANNEL, e))?;

    let mut orchestrator =
        Orchestrator::new(config).with_supervisor(ProcessSupervisor::exit_process_on_death());
    let handoff = orchestrator.run(client).await?;

    tracing::debug!("Handing off to oversight");
    PassiveOversight::new().oversee(handoff).await
}
