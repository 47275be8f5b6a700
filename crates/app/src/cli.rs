use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codescan::{
    CaptureFacility, CapturePosition, CodeType, ScriptedFacility, TelemetryOptions,
    config::{ProbeCliArgs, ScanCliArgs, TelemetryArgs},
};
use serde_json::json;

use crate::scan;

#[derive(Debug, Parser)]
#[command(
    name = "codescan",
    version,
    about = "Scan QR codes and barcodes from a camera or a recorded detection stream"
)]
pub struct Cli {
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan until a code is found (or until cancelled with --continuous).
    Scan(ScanCliArgs),
    /// Check whether the capture device can detect the given code types.
    Probe(ProbeCliArgs),
}

pub fn handle_command(command: Command, telemetry: TelemetryOptions) -> Result<()> {
    match command {
        Command::Scan(args) => scan::run(args.into_config(telemetry)?),
        Command::Probe(args) => run_probe(args),
    }
}

fn run_probe(args: ProbeCliArgs) -> Result<()> {
    let facility: Arc<dyn CaptureFacility> = match args.simulate {
        Some(available) => {
            Arc::new(ScriptedFacility::new(available).with_device(CapturePosition::Back))
        }
        None => scan::camera_facility(None)?,
    };
    let supported = codescan::supports(&facility, Some(&args.types))
        .context("capability probe failed")?;

    let checked = if args.types.is_empty() {
        vec![CodeType::Qr]
    } else {
        args.types
    };
    let checked: Vec<&str> = checked.iter().map(|ty| ty.as_str()).collect();
    println!("{}", json!({ "types": checked, "supported": supported }));
    Ok(())
}
