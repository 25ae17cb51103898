mod app;
mod config;
mod simulated;

pub use app::{RunOptions, run};
pub use config::{HostConfig, SimulationSettings};
pub use simulated::SimulatedProvider;

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;
