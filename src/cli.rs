//! Command-line surface (spec §6): `reflect <interface> [options]`.

use clap::Parser;

use crate::config::{ReflectMode, ReflectorConfig, StatsConfig, StatsFormat};
use crate::error::ReflectorError;

#[derive(Debug, Parser)]
#[command(name = "reflect", about = "Kernel-bypass Layer-2 reflector for active network-measurement traffic")]
pub struct Cli {
    /// Network interface to attach to, e.g. `enp8s0`.
    pub interface: String,

    /// Debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit statistics as JSON instead of the single-line text dashboard.
    #[arg(long)]
    pub json: bool,

    /// Emit statistics as CSV instead of the single-line text dashboard.
    #[arg(long)]
    pub csv: bool,

    /// Enable Rx timestamping and latency statistics.
    #[arg(long)]
    pub latency: bool,

    /// Statistics emission interval, in seconds.
    #[arg(long = "stats-interval", default_value_t = 1)]
    pub stats_interval: u32,

    /// UDP destination port filter (0 = any).
    #[arg(long, default_value_t = 0)]
    pub port: u32,

    /// Disable the source OUI filter.
    #[arg(long = "no-oui-filter")]
    pub no_oui_filter: bool,

    /// Source OUI filter, as three colon-separated hex bytes.
    #[arg(long, default_value = "00:C0:17")]
    pub oui: String,

    /// Reflection scope.
    #[arg(long, value_enum, default_value = "all")]
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Mac,
    MacIp,
    All,
}

impl From<Mode> for ReflectMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mac => ReflectMode::Mac,
            Mode::MacIp => ReflectMode::MacIp,
            Mode::All => ReflectMode::All,
        }
    }
}

impl Cli {
    /// Validate and lower into a [`ReflectorConfig`]. `local_mac` is left at its default and
    /// filled in later, during [`crate::ReflectorController::init`].
    pub fn into_config(self) -> Result<ReflectorConfig, ReflectorError> {
        if self.stats_interval == 0 {
            return Err(ReflectorError::InvalidConfig(
                "--stats-interval must be at least 1".to_string(),
            ));
        }
        if self.port > u32::from(u16::MAX) {
            return Err(ReflectorError::InvalidConfig(format!(
                "--port {} is out of range (0..=65535)",
                self.port
            )));
        }
        if self.json && self.csv {
            return Err(ReflectorError::InvalidConfig(
                "--json and --csv are mutually exclusive".to_string(),
            ));
        }

        let oui_filter = if self.no_oui_filter {
            None
        } else {
            Some(parse_oui(&self.oui)?)
        };

        let format = if self.json {
            StatsFormat::Json
        } else if self.csv {
            StatsFormat::Csv
        } else {
            StatsFormat::Text
        };

        Ok(ReflectorConfig {
            interface: self.interface,
            oui_filter,
            udp_port: if self.port == 0 { None } else { Some(self.port as u16) },
            reflect_mode: self.mode.into(),
            latency: self.latency,
            stats: StatsConfig {
                format,
                interval: std::time::Duration::from_secs(u64::from(self.stats_interval)),
            },
            ..ReflectorConfig::default()
        })
    }
}

fn parse_oui(text: &str) -> Result<[u8; 3], ReflectorError> {
    let malformed = || ReflectorError::InvalidConfig(format!("invalid OUI {text:?}: expected XX:XX:XX"));

    let mut bytes = [0u8; 3];
    let mut parts = text.split(':');
    for byte in bytes.iter_mut() {
        let part = parts.next().ok_or_else(malformed)?;
        *byte = u8::from_str_radix(part, 16).map_err(|_| malformed())?;
    }
    if parts.next().is_some() {
        return Err(malformed());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            interface: "eth0".to_string(),
            verbose: false,
            json: false,
            csv: false,
            latency: false,
            stats_interval: 1,
            port: 0,
            no_oui_filter: false,
            oui: "00:C0:17".to_string(),
            mode: Mode::All,
        }
    }

    #[test]
    fn parses_valid_oui() {
        assert_eq!(parse_oui("00:C0:17").unwrap(), [0x00, 0xC0, 0x17]);
    }

    #[test]
    fn rejects_malformed_oui() {
        assert!(parse_oui("00:C0").is_err());
        assert!(parse_oui("gg:00:00").is_err());
    }

    #[test]
    fn rejects_zero_stats_interval() {
        let cli = Cli { stats_interval: 0, ..base_cli() };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn rejects_port_out_of_range() {
        let cli = Cli { port: 70_000, ..base_cli() };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn rejects_json_and_csv_together() {
        let cli = Cli { json: true, csv: true, ..base_cli() };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn no_oui_filter_flag_clears_the_default_filter() {
        let cli = Cli { no_oui_filter: true, ..base_cli() };
        let config = cli.into_config().unwrap();
        assert_eq!(config.oui_filter, None);
    }

    #[test]
    fn port_zero_means_any_port() {
        let config = base_cli().into_config().unwrap();
        assert_eq!(config.udp_port, None);
    }
}
