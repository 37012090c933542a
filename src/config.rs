use std::net::Ipv4Addr;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artnet::{ArtNetConfig, PortAddress};
use crate::dmx_types::DMX_CHANNELS;

pub const MAX_NET: u8 = 127;
pub const MAX_SUBNET: u8 = 15;
pub const MAX_UNIVERSE: u8 = 7;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum OutputKind {
    #[default]
    #[strum(serialize = "artnet")]
    ArtNet,
    /// Open DMX USB widget
    #[strum(serialize = "widget")]
    Widget,
}

/// Console settings, read from a `key=value` properties file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub channels: usize,
    pub dimmers: usize,
    pub interface: OutputKind,
    /// Art-Net output target, a node or a directed broadcast address.
    /// Unset sends to every node that answered a poll.
    pub artip: Option<Ipv4Addr>,
    /// Address advertised in poll replies, detected when unset.
    pub local_ip: Option<Ipv4Addr>,
    pub artnet_net: u8,
    pub artnet_subnet: u8,
    pub artnet_universe: u8,
    /// Serial port of the DMX widget
    pub widget: String,
    /// OSC control port, 0 disables the listener
    pub oscport: u16,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            channels: 300,
            dimmers: DMX_CHANNELS,
            interface: OutputKind::ArtNet,
            artip: None,
            local_ip: None,
            artnet_net: 0,
            artnet_subnet: 0,
            artnet_universe: 0,
            widget: String::new(),
            oscport: 7688,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bounded(key: &str, value: &str, max: u8) -> Result<u8, ConfigError> {
    parse_value(key, value)
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Empty values and `none` leave an address unset.
fn parse_address(key: &str, value: &str) -> Result<Option<Ipv4Addr>, ConfigError> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_value(key, value).map(Some)
}

impl ConsoleConfig {
    /// Reads `key=value` lines over the defaults.
    /// Blank lines, `#` comments and unknown keys are skipped.
    pub fn from_properties(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            config.set(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_properties(&text)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "channels" => self.channels = parse_value(key, value)?,
            "dimmers" => {
                let dimmers: usize = parse_value(key, value)?;
                if dimmers == 0 || dimmers > DMX_CHANNELS {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
                self.dimmers = dimmers;
            }
            "interface" => self.interface = parse_value(key, value)?,
            "artip" => self.artip = parse_address(key, value)?,
            "local_ip" => self.local_ip = parse_address(key, value)?,
            "artnet_net" => self.artnet_net = parse_bounded(key, value, MAX_NET)?,
            "artnet_subnet" => self.artnet_subnet = parse_bounded(key, value, MAX_SUBNET)?,
            "artnet_universe" => {
                self.artnet_universe = parse_bounded(key, value, MAX_UNIVERSE)?
            }
            "widget" => self.widget = value.to_string(),
            "oscport" => self.oscport = parse_value(key, value)?,
            _ => debug!("Ignoring unknown setting {key}"),
        }
        Ok(())
    }

    pub fn port_address(&self) -> PortAddress {
        PortAddress::new(self.artnet_net, self.artnet_subnet, self.artnet_universe)
    }

    pub fn artnet_config(&self) -> ArtNetConfig {
        ArtNetConfig {
            local_ip: self.local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            address: self.port_address(),
            unicast_target: self.artip,
            ..Default::default()
        }
    }
}
