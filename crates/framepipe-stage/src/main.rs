//! framepipe: run one pipeline stage as its own process.
//!
//! # Usage
//!
//! ```bash
//! framepipe --rate 30 serve camera --rows 480 --cols 640 --color bgr
//! framepipe relay camera camera.copy
//! RUST_LOG=debug framepipe view camera.copy
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use framepipe_node::PixelColor;
use framepipe_stage::{
    Monitor, Relay, RunSummary, Stage, StageBody, StageConfig, StageError, TestFrame,
};

#[derive(Parser, Debug)]
#[command(name = "framepipe", version)]
#[command(about = "Run a framepipe pipeline stage")]
struct Cli {
    /// Iterations per second. Unpaced if omitted.
    #[arg(short = 'r', long, visible_alias = "fps", global = true)]
    rate: Option<f64>,

    /// Stop after this many samples (0 runs until shutdown or upstream close).
    #[arg(
        short = 'n',
        long,
        visible_alias = "num-frames",
        global = true,
        default_value_t = 0
    )]
    num_samples: u64,

    /// How long to wait for input channels to appear.
    #[arg(long, global = true, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Payload slots of the output channel.
    #[arg(long, global = true, default_value_t = 1)]
    capacity: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a static test frame on a channel.
    Serve {
        /// Output channel name.
        sink: String,

        /// Raw pixel file to serve instead of a synthetic gradient.
        #[arg(short = 'f', long)]
        test_image: Option<PathBuf>,

        /// Pixel color format: mono, bgr, rgb or hsv.
        #[arg(short = 'C', long, default_value = "bgr")]
        color: PixelColor,

        #[arg(long, default_value_t = 480)]
        rows: u32,

        #[arg(long, default_value_t = 640)]
        cols: u32,
    },
    /// Watch a channel and log what arrives.
    View {
        /// Input channel name.
        source: String,
    },
    /// Republish one channel under another name.
    Relay {
        /// Input channel name.
        source: String,
        /// Output channel name.
        sink: String,
    },
}

fn main() -> ExitCode {
    framepipe_stage::logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(summary) => {
            tracing::info!(
                iterations = summary.iterations,
                published = summary.published,
                end = %summary.end,
                "exiting"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "stage failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<RunSummary, StageError> {
    let mut config = match cli.rate {
        Some(hz) => StageConfig::from_rate(hz)?,
        None => StageConfig::default(),
    };
    config.sample_limit = Some(cli.num_samples);
    config.connect_timeout = Duration::from_millis(cli.connect_timeout_ms);
    config.capacity = cli.capacity;

    let body: StageBody = match cli.command {
        Command::Serve {
            sink,
            test_image,
            color,
            rows,
            cols,
        } => {
            config.output = Some(sink);
            match test_image {
                Some(path) => TestFrame::load(path, rows, cols, color)?,
                None => TestFrame::gradient(rows, cols, color)?,
            }
            .into()
        }
        Command::View { source } => {
            config.inputs.push(source);
            Monitor::new().into()
        }
        Command::Relay { source, sink } => {
            config.inputs.push(source);
            config.output = Some(sink);
            Relay::new().into()
        }
    };

    let mut stage = Stage::new(config, body);
    framepipe_stage::signal::install(stage.interrupt().clone())?;
    stage.run()
}
