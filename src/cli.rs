use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "climate-agent",
    version,
    about = "Polls weather and thermostat APIs into InfluxDB"
)]
pub struct Args {
    /// Path to the YAML (or `.json`) config file. Falls back to CLIMATE_AGENT_CONFIG, then ./config.yaml.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Load and validate the config, then exit.
    #[arg(long, default_value_t = false)]
    pub check_config: bool,
}
