use std::{io, path::PathBuf};

use clap::Parser;
use geostream_host::{HostConfig, RunOptions, SimulatedProvider, prelude::*, run};
use geostream_logic::{Coordinate, GeolocationService};
use log::info;

#[derive(Parser)]
#[command(version, about = "Print coordinates from a simulated location provider")]
struct Cli {
    /// JSON file with service and simulation settings, flags below override it
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Ask for "always" access instead of "when in use"
    #[arg(long)]
    always: bool,

    /// Simulate the user refusing the permission prompt
    #[arg(long)]
    deny: bool,

    /// Print a single fix then exit
    #[arg(long, conflicts_with = "count")]
    once: bool,

    /// Stop after this many fixes, runs until interrupted if not set
    #[arg(long)]
    count: Option<usize>,

    /// Milliseconds between fixes
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Seed for the simulated track
    #[arg(long)]
    seed: Option<u64>,

    /// Latitude the simulated track starts at
    #[arg(long, allow_hyphen_values = true, requires = "start_long")]
    start_lat: Option<f64>,

    /// Longitude the simulated track starts at
    #[arg(long, allow_hyphen_values = true, requires = "start_lat")]
    start_long: Option<f64>,
}

impl Cli {
    fn config(&self) -> Result<HostConfig> {
        let mut config = match &self.settings {
            Some(path) => HostConfig::load(path)?,
            None => HostConfig::default(),
        };

        let sim = &mut config.simulation;
        if let Some(interval_ms) = self.interval_ms {
            sim.interval_ms = interval_ms;
        }
        if let Some(seed) = self.seed {
            sim.seed = seed;
        }
        if let (Some(lat), Some(long)) = (self.start_lat, self.start_long) {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&long) {
                bail!("Start position {lat}, {long} is out of range");
            }
            sim.start = Coordinate::new(lat, long);
        }
        sim.deny |= self.deny;

        Ok(config)
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            always: self.always,
            once: self.once,
            count: self.count,
        }
    }
}

#[tokio::main]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();
    let config = cli.config().context("Failed to load settings")?;
    let opts = cli.run_options();

    info!("Starting geostream host {}", env!("CARGO_PKG_VERSION"));

    let provider =
        SimulatedProvider::new(config.simulation).context("Failed to start location provider")?;
    let service = GeolocationService::new(provider, config.service);

    let mut stdout = io::stdout();

    let res = tokio::select! {
        res = run(&service, &opts, &mut stdout) => res.map(Some),
        Ok(_) = tokio::signal::ctrl_c() => Ok(None),
    };

    service.teardown();

    match res? {
        Some(printed) => info!("Printed {printed} fix(es)"),
        None => info!("Interrupted, shutting down"),
    }

    Ok(())
}
