mod cli;
mod replay;
mod scan;

use clap::Parser;
use codescan::{TelemetryOptions, telemetry};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let options = TelemetryOptions::from(&cli.telemetry);
    let _telemetry_guard = telemetry::enter_runtime(&options);
    if options.print_metrics {
        if let Err(err) = telemetry::init_metrics_recorder() {
            tracing::warn!("metrics disabled: {err:#}");
        }
    }

    let result = cli::handle_command(cli.command, options.clone());

    if options.print_metrics {
        if let Some(handle) = telemetry::prometheus_handle() {
            println!("{}", handle.render());
        }
    }
    result
}
