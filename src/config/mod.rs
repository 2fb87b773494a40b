//! Configuration DSL & loader, second stage: converts a generic
//! `cfgparse::ConfigValue` tree into the typed `ResolvedConfig` the master
//! runs with. Parses once at startup, never on the request path, and
//! replaces a YAML-derive pipeline with explicit `TryFrom` conversions
//! that carry `ConfigError` context breadcrumbs, matching cfgparse's own
//! error design.

pub mod display;
pub mod validate;

use std::path::PathBuf;
use std::time::Duration;

use cfgparse::{ConfigError, ConfigValue};

use crate::http::reader::{ReaderOptions, MAX_HEADER};
use crate::net::listener::{Address, ListenerOptions};

pub const DEFAULT_WORKER_PROCESSES: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CLIENT_MAX_BODY_SIZE: usize = 1_048_576;
pub const DEFAULT_DOCUMENT_ROOT: &str = "./www";

#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub address: Address,
    pub options: ListenerOptions,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub worker_processes: usize,
    pub timeout: Duration,
    pub refork_after: Vec<u64>,
    pub rewindable_input: bool,
    pub client_max_body_size: usize,
    pub check_client_connection: bool,
    pub early_hints: bool,
    pub listeners: Vec<ListenerSpec>,
    pub document_root: PathBuf,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            worker_processes: DEFAULT_WORKER_PROCESSES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            refork_after: Vec::new(),
            rewindable_input: true,
            client_max_body_size: DEFAULT_CLIENT_MAX_BODY_SIZE,
            check_client_connection: false,
            early_hints: true,
            listeners: vec![ListenerSpec {
                address: Address::Tcp("0.0.0.0".to_string(), 8080),
                options: ListenerOptions::default(),
            }],
            document_root: PathBuf::from(DEFAULT_DOCUMENT_ROOT),
        }
    }
}

impl ResolvedConfig {
    pub fn listener_specs(&self) -> Vec<(Address, ListenerOptions)> {
        self.listeners.iter().map(|l| (l.address.clone(), l.options.clone())).collect()
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            max_header_bytes: MAX_HEADER,
            client_max_body_size: self.client_max_body_size,
            rewindable_input: self.rewindable_input,
        }
    }

    /// How often a worker reports liveness. Not itself a config key; tied
    /// to `timeout` so a worker always ticks several times within one
    /// murder-lazy-workers deadline.
    pub fn tick_interval(&self) -> Duration {
        (self.timeout / 4).max(Duration::from_millis(250))
    }

    pub fn load(source: &str) -> Result<Self, ConfigError> {
        let tree = cfgparse::parse(source)?;
        ResolvedConfig::try_from(&tree)
    }
}

impl TryFrom<&ConfigValue> for ResolvedConfig {
    type Error = ConfigError;

    fn try_from(value: &ConfigValue) -> Result<Self, ConfigError> {
        let mut config = ResolvedConfig::default();
        let map = match value {
            ConfigValue::Map(entries) => entries,
            _ => return Err(ConfigError::new("top-level configuration must be a mapping", None)),
        };

        for (key, val) in map {
            match key.as_str() {
                "worker_processes" => {
                    config.worker_processes = parse_usize(val)
                        .map_err(|e| e.with_context("worker_processes"))?;
                }
                "timeout" => {
                    let secs = parse_u64(val).map_err(|e| e.with_context("timeout"))?;
                    config.timeout = Duration::from_secs(secs);
                }
                "refork_after" => {
                    config.refork_after = val
                        .as_list()
                        .ok_or_else(|| ConfigError::new("refork_after must be a list", None))
                        .map_err(|e| e.with_context("refork_after"))?
                        .iter()
                        .map(parse_u64)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| e.with_context("refork_after"))?;
                }
                "rewindable_input" => {
                    config.rewindable_input = parse_bool(val).map_err(|e| e.with_context("rewindable_input"))?;
                }
                "client_max_body_size" => {
                    config.client_max_body_size =
                        parse_usize(val).map_err(|e| e.with_context("client_max_body_size"))?;
                }
                "check_client_connection" => {
                    config.check_client_connection =
                        parse_bool(val).map_err(|e| e.with_context("check_client_connection"))?;
                }
                "early_hints" => {
                    config.early_hints = parse_bool(val).map_err(|e| e.with_context("early_hints"))?;
                }
                "document_root" => {
                    config.document_root = PathBuf::from(
                        val.as_scalar().ok_or_else(|| ConfigError::new("document_root must be a scalar", None))?,
                    );
                }
                "listeners" => {
                    let items = val
                        .as_list()
                        .ok_or_else(|| ConfigError::new("listeners must be a list", None))
                        .map_err(|e| e.with_context("listeners"))?;
                    config.listeners = items
                        .iter()
                        .map(ListenerSpec::try_from)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| e.with_context("listeners"))?;
                }
                _ => {
                    netlog::warn!("ignoring unknown configuration key '{key}'");
                }
            }
        }

        Ok(config)
    }
}

impl TryFrom<&ConfigValue> for ListenerSpec {
    type Error = ConfigError;

    fn try_from(value: &ConfigValue) -> Result<Self, ConfigError> {
        let map = match value {
            ConfigValue::Map(entries) => entries,
            ConfigValue::Scalar(s) => {
                let address = Address::parse(s).map_err(|_| ConfigError::new(format!("invalid listener address '{s}'"), None))?;
                return Ok(ListenerSpec { address, options: ListenerOptions::default() });
            }
            _ => return Err(ConfigError::new("listener entry must be a mapping or address scalar", None)),
        };

        let mut options = ListenerOptions::default();
        let mut address = None;
        for (key, val) in map {
            match key.as_str() {
                "addr" => {
                    let s = val.as_scalar().ok_or_else(|| ConfigError::new("addr must be a scalar", None))?;
                    address = Some(Address::parse(s).map_err(|_| ConfigError::new(format!("invalid listener address '{s}'"), None))?);
                }
                "backlog" => options.backlog = parse_usize(val)? as i32,
                "rcvbuf" => options.rcvbuf = Some(parse_usize(val)?),
                "sndbuf" => options.sndbuf = Some(parse_usize(val)?),
                "tcp_nodelay" => options.tcp_nodelay = parse_bool(val)?,
                "reuseport" => options.reuseport = parse_bool(val)?,
                "umask" => options.umask = Some(parse_usize(val)? as u32),
                _ => netlog::warn!("ignoring unknown listener option '{key}'"),
            }
        }

        let address = address.ok_or_else(|| ConfigError::new("listener entry is missing 'addr'", None))?;
        Ok(ListenerSpec { address, options })
    }
}

fn parse_usize(value: &ConfigValue) -> Result<usize, ConfigError> {
    let s = value.as_scalar().ok_or_else(|| ConfigError::new("expected a number", None))?;
    s.parse::<usize>().map_err(|_| ConfigError::new(format!("'{s}' is not a valid number"), None))
}

fn parse_u64(value: &ConfigValue) -> Result<u64, ConfigError> {
    let s = value.as_scalar().ok_or_else(|| ConfigError::new("expected a number", None))?;
    s.parse::<u64>().map_err(|_| ConfigError::new(format!("'{s}' is not a valid number"), None))
}

fn parse_bool(value: &ConfigValue) -> Result<bool, ConfigError> {
    let s = value.as_scalar().ok_or_else(|| ConfigError::new("expected a boolean", None))?;
    match s {
        "true" | "yes" | "on" => Ok(true),
        "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::new(format!("'{other}' is not a valid boolean"), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_worker_processes_and_timeout() {
        let src = "worker_processes: 8\ntimeout: 30\n";
        let config = ResolvedConfig::load(src).unwrap();
        assert_eq!(config.worker_processes, 8);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn loads_refork_after_as_a_list_of_thresholds() {
        let src = "refork_after: [100, 500, 2000]\n";
        let config = ResolvedConfig::load(src).unwrap();
        assert_eq!(config.refork_after, vec![100, 500, 2000]);
    }

    #[test]
    fn loads_listeners_block() {
        let src = "listeners:\n  - addr: 8080\n    backlog: 256\n  - addr: /tmp/reforkd.sock\n";
        let config = ResolvedConfig::load(src).unwrap();
        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[0].options.backlog, 256);
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let src = "worker_processes: 2\nnonsense_key: 1\n";
        assert!(ResolvedConfig::load(src).is_ok());
    }

    #[test]
    fn malformed_number_reports_a_config_error() {
        let src = "worker_processes: not-a-number\n";
        assert!(ResolvedConfig::load(src).is_err());
    }
}
