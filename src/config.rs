use crate::error::{CuebridgeError, Result};
use crate::log::LogLevel;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// 설정 파일 경로를 지정하는 환경 변수
pub const CONFIG_PATH_ENV: &str = "CUEBRIDGE_CONFIG";

/// 시작 시 한 번 만들어져 모든 컴포넌트에 참조로 전달되는 설정 객체
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    /// Command-port override. When set, discovery is skipped.
    pub port: Option<u16>,
    /// Used when discovery finds nothing and no override is set.
    pub fallback_port: Option<u16>,
    /// Well-known port of the cue side channel.
    pub cue_port: u16,
    pub paths: OscPaths,
    pub log: LogConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscPaths {
    pub run_code: String,
    pub stop_all: String,
    pub set_bpm: String,
    pub cue: String,
    pub probe: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub max_entries: usize,
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Keep the previously discovered port while it is still listening.
    Sticky,
    /// Always take the most recently bound matching socket.
    MostRecent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Regex matched against the owning process name.
    pub process_pattern: String,
    pub tie_break: TieBreak,
    pub timeout_ms: u64,
    /// Extra ports never considered as the command port. `cue_port` is
    /// always excluded on top of these.
    pub exclude_ports: Vec<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            fallback_port: Some(4557),
            cue_port: 4560,
            paths: OscPaths::default(),
            log: LogConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for OscPaths {
    fn default() -> Self {
        Self {
            run_code: "/run-code".to_string(),
            stop_all: "/stop-all-jobs".to_string(),
            set_bpm: "/bpm".to_string(),
            cue: "/cue".to_string(),
            probe: "/ping".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_entries: crate::log::DEFAULT_CAPACITY,
            level: LogLevel::Info,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            process_pattern: "(?i)sonic".to_string(),
            tie_break: TieBreak::Sticky,
            timeout_ms: 1500,
            exclude_ports: Vec::new(),
        }
    }
}

impl Config {
    /// 기본값 → (선택) JSON5 파일 → 환경 변수 순으로 덮어씀
    pub fn load() -> Result<Self> {
        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        json5::from_str(&text).map_err(|e| {
            CuebridgeError::Config(format!("failed to parse '{}': {}", path.display(), e))
        })
    }

    /// Apply environment overrides. `lookup` is injected so tests don't touch the process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("CUEBRIDGE_OSC_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("CUEBRIDGE_OSC_PORT") {
            self.port = Some(parse_port("CUEBRIDGE_OSC_PORT", &port)?);
        }
        if let Some(port) = lookup("CUEBRIDGE_CUE_PORT") {
            self.cue_port = parse_port("CUEBRIDGE_CUE_PORT", &port)?;
        }
        if let Some(path) = lookup("CUEBRIDGE_OSC_RUN_PATH") {
            self.paths.run_code = path;
        }
        if let Some(path) = lookup("CUEBRIDGE_OSC_STOP_PATH") {
            self.paths.stop_all = path;
        }
        if let Some(path) = lookup("CUEBRIDGE_OSC_BPM_PATH") {
            self.paths.set_bpm = path;
        }
        if let Some(path) = lookup("CUEBRIDGE_OSC_CUE_PATH") {
            self.paths.cue = path;
        }
        if let Some(max) = lookup("CUEBRIDGE_LOG_MAX_ENTRIES") {
            self.log.max_entries = max.trim().parse().map_err(|_| {
                CuebridgeError::Config(format!("CUEBRIDGE_LOG_MAX_ENTRIES: invalid count '{}'", max))
            })?;
        }
        if let Some(level) = lookup("CUEBRIDGE_LOG_LEVEL") {
            self.log.level = level
                .parse()
                .map_err(|e| CuebridgeError::Config(format!("CUEBRIDGE_LOG_LEVEL: {}", e)))?;
        }
        if let Some(tie_break) = lookup("CUEBRIDGE_DISCOVERY_TIE_BREAK") {
            self.discovery.tie_break = match tie_break.trim() {
                "sticky" => TieBreak::Sticky,
                "most_recent" => TieBreak::MostRecent,
                other => {
                    return Err(CuebridgeError::Config(format!(
                        "CUEBRIDGE_DISCOVERY_TIE_BREAK: expected 'sticky' or 'most_recent', got '{}'",
                        other
                    )));
                }
            };
        }
        Ok(())
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| CuebridgeError::Config(format!("{}: invalid port '{}'", key, value)))
}
