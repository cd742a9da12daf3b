use crate::constants::{MAINNET_DEFAULT_PORT, TESTNET_11_DEFAULT_PORT};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DNS zone this seeder is authoritative for.
    pub host: String,
    /// Hostname of the nameserver advertised in NS records.
    pub nameserver: String,
    /// UDP listen address of the DNS server.
    pub listen: String,
    /// TCP listen address of the gRPC server.
    pub grpc_listen: String,
    /// Data directory root; namespaced per network underneath.
    pub app_dir: String,
    /// Bootstrap peer whose probe failure is fatal (`host`, `ip`, or `ip:port`).
    pub default_seeder: Option<String>,
    /// Comma-separated `ip:port` peers inserted as pre-good entries.
    pub known_peers: Option<String>,
    /// HTTP profiling port; None disables the endpoint.
    pub profile: Option<u16>,
    /// Testnet suffix. Only 11 is accepted.
    pub net_suffix: Option<u16>,
    /// Apply the wanted-services bitmask when selecting good addresses.
    pub filter_services: bool,
    pub log_level: String,
    pub nologfiles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            nameserver: String::new(),
            listen: "localhost:5354".to_string(),
            grpc_listen: "localhost:3737".to_string(),
            app_dir: "~/.dnsseeder".to_string(),
            default_seeder: None,
            known_peers: None,
            profile: None,
            net_suffix: None,
            filter_services: false,
            log_level: "info".to_string(),
            nologfiles: false,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse configuration file {}", path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            bail!("please specify a hostname to serve (--host)");
        }
        if self.nameserver.is_empty() {
            bail!("please specify a nameserver (--nameserver)");
        }
        if let Some(port) = self.profile {
            if port < 1024 {
                bail!("the profile port must be between 1024 and 65535");
            }
        }
        if let Some(suffix) = self.net_suffix {
            if suffix != 11 {
                bail!("--net-suffix only supports testnet-11");
            }
        }
        Ok(())
    }

    pub fn network_params(&self) -> NetworkParams {
        match self.net_suffix {
            Some(11) => NetworkParams::Testnet11,
            _ => NetworkParams::Mainnet,
        }
    }

    /// The data-directory root with `~` and `$VAR` references resolved.
    pub fn app_dir(&self) -> PathBuf {
        expand_path(&self.app_dir)
    }
}

/// Network parameters: default peer port, name used to namespace on-disk
/// state, and the upstream DNS seeds used for cold-start bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkParams {
    Mainnet,
    Testnet11,
}

impl NetworkParams {
    pub fn default_port(&self) -> u16 {
        match self {
            NetworkParams::Mainnet => MAINNET_DEFAULT_PORT,
            NetworkParams::Testnet11 => TESTNET_11_DEFAULT_PORT,
        }
    }

    pub fn network_name(&self) -> &'static str {
        match self {
            NetworkParams::Mainnet => "kaspa-mainnet",
            NetworkParams::Testnet11 => "kaspa-testnet-11",
        }
    }

    pub fn dns_seeds(&self) -> &'static [&'static str] {
        match self {
            NetworkParams::Mainnet => &[
                "seeder1.kaspad.net",
                "seeder2.kaspad.net",
                "seeder3.kaspad.net",
                "seeder4.kaspad.net",
                "kaspadns.kaspacalc.net",
                "n-mainnet.kaspa.ws",
            ],
            NetworkParams::Testnet11 => &["seed.testnet.kaspa.org", "seed1-testnet.kaspad.net"],
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_env(raw);
    let mut path = PathBuf::from(&expanded);
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            path = match path.strip_prefix("~") {
                Ok(rest) => home.join(rest),
                Err(_) => path,
            };
        }
    }
    path
}

/// POSIX-style `$VAR` and `${VAR}` substitution. Unset variables expand to
/// the empty string.
fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if braced && next == '}' {
                chars.next();
                break;
            }
            if !braced && !(next.is_ascii_alphanumeric() || next == '_') {
                break;
            }
            name.push(next);
            chars.next();
        }
        if name.is_empty() {
            out.push('$');
        } else if let Ok(value) = std::env::var(&name) {
            out.push_str(&value);
        }
    }
    out
}
