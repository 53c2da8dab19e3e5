//! Relay configuration: the [`RelayConfig`] an engine is built from, and the
//! on-disk `relay_gui_config.json` format a GUI tab manager collaborator
//! persists tabs to (see `SPEC_FULL.md` §6.3).

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// The pair of role choices (active connect vs. passive listen) for the
/// upstream and downstream sides. The first token governs the upstream
/// role, the second the downstream role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum Mode {
    ConnectListen,
    ListenConnect,
    ConnectConnect,
    ListenListen,
}

impl Mode {
    /// Whether the upstream side actively connects (as opposed to listening).
    pub fn upstream_connects(self) -> bool {
        matches!(self, Mode::ConnectListen | Mode::ConnectConnect)
    }

    /// Whether the downstream side is a multi-client listener (as opposed to
    /// a single outbound connection).
    pub fn downstream_listens(self) -> bool {
        matches!(self, Mode::ConnectListen | Mode::ListenListen)
    }

    fn as_str(self) -> &'static str {
        match self {
            Mode::ConnectListen => "connect-listen",
            Mode::ListenConnect => "listen-connect",
            Mode::ConnectConnect => "connect-connect",
            Mode::ListenListen => "listen-listen",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connect-listen" => Ok(Mode::ConnectListen),
            "listen-connect" => Ok(Mode::ListenConnect),
            "connect-connect" => Ok(Mode::ConnectConnect),
            "listen-listen" => Ok(Mode::ListenListen),
            other => Err(Error::Config(format!("unknown mode `{other}`"))),
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Mode::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Immutable engine configuration: upstream host/port, downstream host/port,
/// mode, dump flag, and reconnect interval.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream_host: String,
    pub upstream_port: u16,
    pub downstream_host: String,
    pub downstream_port: u16,
    pub mode: Mode,
    pub dump: bool,
    pub retry_interval: Duration,
}

impl RelayConfig {
    pub fn new(
        upstream_host: impl Into<String>,
        upstream_port: u16,
        downstream_host: impl Into<String>,
        downstream_port: u16,
        mode: Mode,
        dump: bool,
        retry_interval: Duration,
    ) -> Self {
        Self {
            upstream_host: upstream_host.into(),
            upstream_port,
            downstream_host: downstream_host.into(),
            downstream_port,
            mode,
            dump,
            retry_interval,
        }
    }
}

/// Split a CLI-style `host:port` argument.
///
/// Splits on the last `:` so IPv6 literals without brackets still fail
/// loudly rather than silently truncating an address component.
pub fn parse_host_port(s: &str) -> Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("`{s}` is not in host:port form")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::Config(format!("`{port}` is not a valid port number")))?;
    if host.is_empty() {
        return Err(Error::Config(format!("`{s}` is missing a host")));
    }
    Ok((host.to_string(), port))
}

/// Accepts either a JSON number or a JSON string containing digits — the
/// persisted GUI config round-trips port/retry fields through Tk
/// `StringVar`s, so either shape may be on disk.
fn deserialize_u16_lenient<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u16),
        Str(String),
    }
    match NumOrStr::deserialize(d)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn deserialize_u64_lenient<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }
    match NumOrStr::deserialize(d)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// One persisted relay tab, as written by the GUI tab manager collaborator
/// to `relay_gui_config.json`. Field names match `RelayTab.get_config()` /
/// `apply_config()` verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfigView {
    pub src_host: String,
    #[serde(deserialize_with = "deserialize_u16_lenient")]
    pub src_port: u16,
    pub dst_host: String,
    #[serde(deserialize_with = "deserialize_u16_lenient")]
    pub dst_port: u16,
    pub mode: Mode,
    pub dump: bool,
    #[serde(deserialize_with = "deserialize_u64_lenient")]
    pub retry: u64,
}

impl From<&RelayConfigView> for RelayConfig {
    fn from(view: &RelayConfigView) -> Self {
        RelayConfig::new(
            view.src_host.clone(),
            view.src_port,
            view.dst_host.clone(),
            view.dst_port,
            view.mode,
            view.dump,
            Duration::from_secs(view.retry),
        )
    }
}

/// The `{ "tabs": [...] }` document stored in `relay_gui_config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedConfig {
    #[serde(default)]
    pub tabs: Vec<RelayConfigView>,
}

/// Default config file name, as hard-coded by the GUI collaborator.
pub const CONFIG_FILE_NAME: &str = "relay_gui_config.json";

/// Load persisted tab configuration from `path`.
///
/// A missing file or a parse error both load as an empty configuration,
/// matching the source GUI's `except Exception: return {}` — the file is
/// user-editable scratch state, not something worth failing startup over.
pub fn load_persisted_config(path: impl AsRef<Path>) -> PersistedConfig {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => PersistedConfig::default(),
    }
}

/// Save persisted tab configuration to `path`, pretty-printed.
pub fn save_persisted_config(path: impl AsRef<Path>, config: &PersistedConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port() {
        assert_eq!(
            parse_host_port("127.0.0.1:9000").unwrap(),
            ("127.0.0.1".to_string(), 9000)
        );
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_host_port("localhost").is_err());
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [
            Mode::ConnectListen,
            Mode::ListenConnect,
            Mode::ConnectConnect,
            Mode::ListenListen,
        ] {
            assert_eq!(Mode::from_str(&mode.to_string()).unwrap(), mode);
        }
    }

    #[test]
    fn view_accepts_numeric_or_string_ports() {
        let numeric = r#"{"src_host":"a","src_port":9000,"dst_host":"b","dst_port":9001,
                           "mode":"connect-listen","dump":false,"retry":5}"#;
        let stringy = r#"{"src_host":"a","src_port":"9000","dst_host":"b","dst_port":"9001",
                           "mode":"connect-listen","dump":false,"retry":"5"}"#;
        let v1: RelayConfigView = serde_json::from_str(numeric).unwrap();
        let v2: RelayConfigView = serde_json::from_str(stringy).unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1.src_port, 9000);
        assert_eq!(v1.retry, 5);
    }

    #[test]
    fn missing_config_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay_gui_config.json");
        let cfg = load_persisted_config(&path);
        assert!(cfg.tabs.is_empty());
    }

    #[test]
    fn malformed_config_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay_gui_config.json");
        std::fs::write(&path, b"not json").unwrap();
        let cfg = load_persisted_config(&path);
        assert!(cfg.tabs.is_empty());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay_gui_config.json");
        let config = PersistedConfig {
            tabs: vec![RelayConfigView {
                src_host: "127.0.0.1".into(),
                src_port: 4001,
                dst_host: "0.0.0.0".into(),
                dst_port: 5000,
                mode: Mode::ConnectListen,
                dump: true,
                retry: 5,
            }],
        };
        save_persisted_config(&path, &config).unwrap();
        let loaded = load_persisted_config(&path);
        assert_eq!(loaded, config);
    }
}
