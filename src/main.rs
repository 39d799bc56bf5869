use std::io;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, Level};

use ramfiller::controller::{self, Config};
use ramfiller::FillerError;

#[derive(Parser)]
#[command(name = "ramfiller")]
#[command(about = "Does what it says on the tin. It fills up RAM", long_about = None)]
#[command(version)]
struct Args {
    /// Blocks of memory to fill (one block is --block-size bytes)
    size: u64,

    /// Size of a single block in bytes
    #[arg(short, long, default_value_t = 1_073_741_824)]
    block_size: u64,

    /// Don't rewrite memory in the background
    #[arg(short = 'u', long)]
    no_refresh: bool,

    /// Delay between element writes in milliseconds
    #[arg(short, long, default_value_t = 10)]
    delay: u64,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{err:#}");
        process::exit(exit_code(&err));
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting ramfiller");

    let config = Config {
        units: args.size,
        block_bytes: args.block_size,
        refresh: !args.no_refresh,
        delay: Duration::from_millis(args.delay),
    };

    controller::run(config, wait_for_release()).await?;
    Ok(())
}

/// Resolves when the user presses enter or sends Ctrl-C.
async fn wait_for_release() -> io::Result<()> {
    println!("Press enter to free memory...");

    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = stdin.read_line(&mut line) => {
            result?;
        }
        result = signal::ctrl_c() => {
            result?;
            info!("Interrupt received, releasing memory");
        }
    }
    Ok(())
}

/// Configuration problems exit with their own code so scripts can tell
/// them from allocation and runtime failures.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<FillerError>()
        .map(FillerError::exit_code)
        .unwrap_or(1)
}
