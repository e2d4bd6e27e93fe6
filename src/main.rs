use anyhow::{Context, Result, bail};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::process;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilder, SerialPortBuilderExt, StopBits};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tiny_lib::constants::{HEARTBEAT_TICKS, SERIAL_BAUD, TINY_RATE};
use tiny_lib::{AlignConfig, Event, TinyDriver, TinyError};

/// Tag echoed back by the box when a confirmed clock reset is requested
const RESET_TAG: u32 = 0xCAFE_BEEF;

/// Monitor a tiny-v1 relay box on a serial line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial device node the box is attached to.
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,
    /// Reset the box clock after aligning and wait for the acknowledge.
    #[arg(short, long)]
    reset: bool,
    /// Print events as JSON lines instead of log messages.
    #[arg(long)]
    json: bool,
    /// How long each alignment round waits for the box to answer.
    #[arg(long, default_value_t = 300)]
    response_timeout_ms: u64,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}

/// Line settings the box expects: 115384 baud, 8N1, no flow control.
fn serial_builder(path: &str) -> SerialPortBuilder {
    tokio_serial::new(path, SERIAL_BAUD)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Monitor failed: {:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let port = serial_builder(&cli.port)
        .open_native_async()
        .with_context(|| format!("Failed to open serial port at {}", cli.port))?;
    info!("Connected to {} at {} baud", cli.port, SERIAL_BAUD);

    let config = AlignConfig {
        response_timeout: Duration::from_millis(cli.response_timeout_ms),
        ..AlignConfig::default()
    };
    let mut tiny = TinyDriver::connect(port, config)
        .await
        .context("Failed to align with the box")?;

    if cli.reset {
        match tiny.reset_clock_confirmed(RESET_TAG, Duration::from_secs(1)).await {
            Ok(()) => info!("Reset successful"),
            Err(TinyError::Timeout(_)) => warn!("Timeout waiting for reset acknowledge"),
            Err(e) => return Err(e).context("Clock reset failed"),
        }
    }

    // two missed heartbeats means the box has gone away
    let liveness = Duration::from_secs_f64(2.0 * HEARTBEAT_TICKS as f64 / TINY_RATE as f64);

    loop {
        let event = match tokio::time::timeout(liveness, tiny.next_event()).await {
            Ok(event) => event.context("Serial read failed")?,
            Err(_) => bail!("No heartbeat from the box for {:?}", liveness),
        };

        if cli.json {
            println!("{}", serde_json::to_string(&event)?);
        } else if matches!(event, Event::Heartbeat { .. }) {
            debug!("Received: {}", event);
        } else {
            info!("Received: {}", event);
        }
    }
}
