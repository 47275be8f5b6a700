//! Engine configuration and the command-line surface that produces it.
//!
//! `ScanCliArgs` is parsed by clap and translated once into a `ScanConfig`, which the
//! engine and the front end use without re-reading flags.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Args;
use codescan_capture::{CapturePosition, CodeType};

/// Ordered, duplicate-free set of symbologies the engine reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedTypeSet {
    types: Vec<CodeType>,
}

impl AcceptedTypeSet {
    pub fn new(types: impl IntoIterator<Item = CodeType>) -> Self {
        let mut unique = Vec::new();
        for ty in types {
            if !unique.contains(&ty) {
                unique.push(ty);
            }
        }
        Self { types: unique }
    }

    pub fn contains(&self, ty: CodeType) -> bool {
        self.types.contains(&ty)
    }

    pub fn as_slice(&self) -> &[CodeType] {
        &self.types
    }

    pub fn iter(&self) -> impl Iterator<Item = CodeType> + '_ {
        self.types.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Members also present in `available`, in accepted order.
    pub fn intersect(&self, available: &[CodeType]) -> Vec<CodeType> {
        self.iter().filter(|ty| available.contains(ty)).collect()
    }
}

impl Default for AcceptedTypeSet {
    fn default() -> Self {
        Self::new([CodeType::DataMatrix])
    }
}

impl FromIterator<CodeType> for AcceptedTypeSet {
    fn from_iter<I: IntoIterator<Item = CodeType>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Settings fixed when an engine is built. Only `stop_on_first_match` may change later.
pub struct EngineConfig {
    pub accepted_types: AcceptedTypeSet,
    pub capture_position: CapturePosition,
    pub stop_on_first_match: bool,
}

impl EngineConfig {
    /// Accept `types` from the back camera, stopping at the first match.
    pub fn new(types: impl IntoIterator<Item = CodeType>) -> Self {
        Self {
            accepted_types: AcceptedTypeSet::new(types),
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: CapturePosition) -> Self {
        self.capture_position = position;
        self
    }

    pub fn with_stop_on_first_match(mut self, stop: bool) -> Self {
        self.stop_on_first_match = stop;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            accepted_types: AcceptedTypeSet::default(),
            capture_position: CapturePosition::Back,
            stop_on_first_match: true,
        }
    }
}

#[derive(Clone, Debug)]
/// Optional telemetry knobs for tracing and metrics.
pub struct TelemetryOptions {
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Write a Chrome trace JSON file capturing scanner spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Install the Prometheus recorder and print its exposition on exit.
    pub print_metrics: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            chrome_trace_path: None,
            print_metrics: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Where detection batches come from.
pub enum ScanSource {
    /// Batches read from a JSON-lines file and replayed at a fixed interval.
    Replay { path: PathBuf, interval: Duration },
    /// A local camera analyzed by OpenCV.
    Device {
        width: i32,
        height: i32,
        fps: f64,
    },
}

#[derive(Clone, Debug)]
/// Canonical configuration for one scanning run.
pub struct ScanConfig {
    pub engine: EngineConfig,
    pub source: ScanSource,
    pub telemetry: TelemetryOptions,
}

/// Flags shared by every subcommand.
#[derive(Debug, Args)]
pub struct TelemetryArgs {
    /// Emit verbose logging (state transitions, every batch).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue, global = true)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH", global = true)]
    pub chrome_trace: Option<PathBuf>,
    /// Print Prometheus metrics when the command finishes.
    #[arg(long = "metrics", action = clap::ArgAction::SetTrue, global = true)]
    pub metrics: bool,
}

impl From<&TelemetryArgs> for TelemetryOptions {
    fn from(args: &TelemetryArgs) -> Self {
        Self {
            default_filter: if args.verbose { "debug" } else { "info" }.to_string(),
            chrome_trace_path: args.chrome_trace.clone(),
            print_metrics: args.metrics,
        }
    }
}

/// CLI arguments accepted by the `scan` subcommand.
#[derive(Debug, Args)]
pub struct ScanCliArgs {
    /// Code type to accept; repeat for several (default: qr).
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<CodeType>,
    /// Camera position to scan from.
    #[arg(long = "position", value_name = "back|front", default_value = "back")]
    pub position: CapturePosition,
    /// Keep scanning after the first accepted code.
    #[arg(long = "continuous", action = clap::ArgAction::SetTrue)]
    pub continuous: bool,
    /// Replay detection batches from a JSON-lines file instead of a camera.
    #[arg(long = "replay", value_name = "PATH")]
    pub replay: Option<PathBuf>,
    /// Delay between replayed batches in milliseconds.
    #[arg(long = "interval-ms", value_name = "MS", requires = "replay")]
    pub interval_ms: Option<u64>,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", conflicts_with = "replay")]
    pub width: Option<i32>,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", conflicts_with = "replay")]
    pub height: Option<i32>,
    /// Capture frame rate.
    #[arg(long = "fps", value_name = "FPS", conflicts_with = "replay")]
    pub fps: Option<f64>,
}

impl ScanCliArgs {
    pub fn into_config(self, telemetry: TelemetryOptions) -> Result<ScanConfig> {
        let types = if self.types.is_empty() {
            vec![CodeType::Qr]
        } else {
            self.types
        };

        let source = match self.replay {
            Some(path) => {
                let interval = Duration::from_millis(self.interval_ms.unwrap_or(250));
                ScanSource::Replay { path, interval }
            }
            None => {
                let width = self.width.unwrap_or(1280);
                let height = self.height.unwrap_or(720);
                if width <= 0 || height <= 0 {
                    bail!("Capture width and height must be positive integers");
                }
                let fps = self.fps.unwrap_or(30.0);
                if !(fps > 0.0 && fps <= 240.0) {
                    bail!("--fps must be between 0 and 240");
                }
                ScanSource::Device { width, height, fps }
            }
        };

        Ok(ScanConfig {
            engine: EngineConfig::new(types)
                .with_position(self.position)
                .with_stop_on_first_match(!self.continuous),
            source,
            telemetry,
        })
    }
}

/// CLI arguments accepted by the `probe` subcommand.
#[derive(Debug, Args)]
pub struct ProbeCliArgs {
    /// Code type to check; repeat for several (default: qr).
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<CodeType>,
    /// Probe a scripted facility reporting these types instead of a camera.
    #[arg(long = "simulate", value_name = "TYPE", value_delimiter = ',')]
    pub simulate: Option<Vec<CodeType>>,
}
