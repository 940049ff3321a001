//! Startup configuration, read once from flags or environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Args, Parser};
use fuel_events::DetectParams;

#[derive(Parser, Debug, Clone)]
#[command(name = "fuel-eventsd", version, about = "Refuel and drain detection service")]
pub struct ServiceCli {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub detection: DetectionConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Detection tunables. Names of the environment variables are part of the deployment contract.
#[derive(Args, Debug, Clone)]
pub struct DetectionConfig {
    #[arg(long, env = "REFUEL_RATE_MIN", default_value_t = 2.5)]
    pub refuel_rate_min: f64,

    #[arg(long, env = "DRAIN_RATE_MIN", default_value_t = 2.0)]
    pub drain_rate_min: f64,

    #[arg(long, env = "MAX_RATE_PLAUSIBLE", default_value_t = 12.0)]
    pub max_rate_plausible: f64,

    #[arg(long, env = "MIN_EVENT_MIN", default_value_t = 3.0)]
    pub min_event_min: f64,

    #[arg(long, env = "TANK_CAPACITY_L", default_value_t = 300.0)]
    pub tank_capacity_l: f64,

    #[arg(long, env = "SAVGOL_WINDOW", default_value_t = 9)]
    pub savgol_window: usize,

    #[arg(long, env = "SAVGOL_POLYORDER", default_value_t = 2)]
    pub savgol_polyorder: usize,

    #[arg(long, env = "MERGE_GAP_MIN", default_value_t = 3.0)]
    pub merge_gap_min: f64,
}

impl DetectionConfig {
    pub fn to_params(&self) -> DetectParams {
        DetectParams {
            refuel_rate_min: self.refuel_rate_min,
            drain_rate_min: self.drain_rate_min,
            max_rate_plausible: self.max_rate_plausible,
            min_event_min: self.min_event_min,
            tank_capacity_l: self.tank_capacity_l,
            savgol_window: self.savgol_window,
            savgol_polyorder: self.savgol_polyorder,
            merge_gap_min: self.merge_gap_min,
        }
    }
}
