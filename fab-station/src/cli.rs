//! CLI argument parsing for the station binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fabstation")]
#[command(about = "🏭 Fab station - ESP32-S3/H2 unit provisioning")]
#[command(long_about = "🏭 Fab station - ESP32-S3/H2 unit provisioning\n\n\
    Flashes certificates and firmware, brings the S3 into factory mode over its\n\
    console, flashes the H2, and prints a pass/fail report per unit.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Provision one unit
    Provision {
        /// Station config (TOML)
        #[arg(long)]
        config: PathBuf,
        /// Order number recorded in the report
        #[arg(long)]
        order: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Echo factory console lines while provisioning
        #[arg(long)]
        console: bool,
    },
    /// Check the flashing tool is installed and responds
    CheckTool {
        /// Station config; the default tool is checked without one
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List serial ports
    Ports,
    /// List order numbers found in an order export
    Orders {
        #[arg(long)]
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_args_parse() {
        let cli = Cli::try_parse_from([
            "fabstation",
            "provision",
            "--config",
            "station.toml",
            "--order",
            "ORD-1",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Provision {
                config,
                order,
                json,
                console,
            } => {
                assert_eq!(config, PathBuf::from("station.toml"));
                assert_eq!(order.as_deref(), Some("ORD-1"));
                assert!(json);
                assert!(!console);
            }
            _ => panic!("expected provision"),
        }
    }

    #[test]
    fn provision_requires_config() {
        assert!(Cli::try_parse_from(["fabstation", "provision"]).is_err());
    }
}
