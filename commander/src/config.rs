use crate::Result;
use serde::{Deserialize, Serialize};
use show_network::{NetworkConfig, ShowConfig};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CommanderConfig {
    pub network: NetworkConfig,
    pub show: ShowConfig,
    pub audio_file: PathBuf,
    pub sequence_file: PathBuf,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            show: ShowConfig::default(),
            audio_file: PathBuf::from("audio.wav"),
            sequence_file: PathBuf::from("sequence.csv"),
        }
    }
}

pub(crate) fn load_config(file: &Path) -> Result<CommanderConfig> {
    if !file.exists() {
        info!("No configuration at {}, using defaults", file.display());
        return Ok(CommanderConfig::default());
    }
    let file = std::fs::File::open(file)?;
    Ok(serde_yaml::from_reader(&file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn partial_file_keeps_defaults() {
        let config: CommanderConfig = serde_yaml::from_str(
            "network:\n  broadcast_address: 10.0.0.255\nshow:\n  lead_time_seconds: 2.5\naudio_file: show.mp3\n",
        )
        .unwrap();

        assert_eq!(
            config.network.broadcast_address,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 255))
        );
        assert_eq!(config.network.commander_port, 1224);
        assert_eq!(config.network.node_port, 1225);
        assert_eq!(config.show.lead_time_seconds, 2.5);
        assert_eq!(config.show.settle_delay_ms, 1000);
        assert_eq!(config.audio_file, PathBuf::from("show.mp3"));
        assert_eq!(config.sequence_file, PathBuf::from("sequence.csv"));
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = load_config(Path::new("does/not/exist.yaml")).unwrap();
        assert_eq!(config, CommanderConfig::default());
    }
}
