use anyhow::Result;
use clap::Parser;

use sdat_tools::inspect::{inspect, InspectArgs};
use sdat_tools::strip::{strip, StripArgs};
use sdat_tools::time::{time, TimeArgs};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
enum Cli {
    Inspect(InspectArgs),
    Strip(StripArgs),
    Time(TimeArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse_from(wild::args()) {
        Cli::Inspect(args) => inspect(&args),
        Cli::Strip(args) => strip(args),
        Cli::Time(args) => time(args),
    }
}
