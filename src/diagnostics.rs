//! Consolidated health snapshot for the `diagnose` tool.
//!
//! Every sub-check reports its failure as a field value. `run` itself
//! cannot fail.

use crate::config::{CONFIG_PATH_ENV, Config};
use crate::discovery::{Discovery, PortDiscovery};
use crate::log::{LogEntry, RingLog};
use crate::osc::{Channel, Endpoint, OscClient, ProbeOutcome};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `recent_logs`에 포함할 최근 항목 수
pub const RECENT_LOG_WINDOW: usize = 50;

/// 이 시간 안에 수정된 로그 파일은 피어가 실행 중인 것으로 간주
const ACTIVE_LOG_WINDOW: Duration = Duration::from_secs(300);

/// Environment variables echoed back in the report.
const ENV_KEYS: &[&str] = &[
    CONFIG_PATH_ENV,
    "CUEBRIDGE_OSC_HOST",
    "CUEBRIDGE_OSC_PORT",
    "CUEBRIDGE_CUE_PORT",
    "CUEBRIDGE_LOG_LEVEL",
    "CUEBRIDGE_DISCOVERY_TIE_BREAK",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub endpoint: Option<Endpoint>,
    /// Ports considered, most recent first.
    pub candidates: Vec<u16>,
    pub error: Option<String>,
}

impl From<&Discovery> for DiscoveryReport {
    fn from(discovery: &Discovery) -> Self {
        let candidates = discovery.candidates().iter().map(|c| c.port).collect();
        match discovery {
            Discovery::Found { endpoint, .. } => Self {
                endpoint: Some(endpoint.clone()),
                candidates,
                error: None,
            },
            Discovery::NotFound { reason, .. } => Self {
                endpoint: None,
                candidates,
                error: Some(reason.clone()),
            },
        }
    }
}

/// Whether the selected command port is currently bound by the peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortStatus {
    pub listening: bool,
    pub pid: Option<u32>,
    pub process: Option<String>,
    pub error: Option<String>,
}

impl From<&Discovery> for PortStatus {
    fn from(discovery: &Discovery) -> Self {
        match discovery {
            Discovery::Found {
                endpoint,
                candidates,
            } => {
                let owner = candidates.iter().find(|c| c.port == endpoint.port);
                Self {
                    listening: owner.is_some(),
                    pid: owner.map(|c| c.pid),
                    process: owner.map(|c| c.process.clone()),
                    error: None,
                }
            }
            Discovery::NotFound { reason, .. } => Self {
                listening: false,
                pid: None,
                process: None,
                error: Some(reason.clone()),
            },
        }
    }
}

/// A peer log file found on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogFile {
    pub path: String,
    pub size: u64,
    pub modified_ms: Option<f64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub logs: Vec<LogFile>,
    pub port_status: DiscoveryReport,
    pub osc_test: ProbeOutcome,
    pub command_port: Option<u16>,
    pub command_port_status: PortStatus,
    pub recent_logs: Vec<LogEntry>,
    pub environment: Map<String, Value>,
}

pub struct Diagnostics {
    config: Arc<Config>,
    discovery: Arc<PortDiscovery>,
    osc: Arc<OscClient>,
    log: Arc<RingLog>,
    log_files: Vec<PathBuf>,
}

impl Diagnostics {
    pub fn new(
        config: Arc<Config>,
        discovery: Arc<PortDiscovery>,
        osc: Arc<OscClient>,
        log: Arc<RingLog>,
    ) -> Self {
        Self {
            config,
            discovery,
            osc,
            log,
            log_files: default_log_files(),
        }
    }

    /// 검사할 피어 로그 파일 경로를 교체
    pub fn with_log_files(mut self, paths: Vec<PathBuf>) -> Self {
        self.log_files = paths;
        self
    }

    pub fn run(&self) -> DiagnosticReport {
        self.log.info("Running diagnostics");

        // 캐시를 쓰지 않고 매번 새로 탐색
        let discovery = self.discovery.discover();
        let port_status = DiscoveryReport::from(&discovery);

        // 같은 탐색 결과로 엔드포인트를 정하고 프로브 (재탐색 없음)
        let target = self.osc.command_endpoint(&discovery);
        match &target {
            Ok(endpoint) => self.osc.adopt(Channel::Command, endpoint.clone()),
            Err(_) => {
                self.osc.endpoints().clear(Channel::Command);
            }
        }
        let osc_test = self.osc.probe(target);

        let command_port = discovery.endpoint().map(|e| e.port);
        let command_port_status = PortStatus::from(&discovery);

        let logs = self.scan_log_files();

        self.log.info(format!(
            "Diagnostics: command_port={:?}, probe_sent={}, peer_refused={}, log_files={}",
            command_port,
            osc_test.sent,
            osc_test.peer_refused,
            logs.len()
        ));

        DiagnosticReport {
            logs,
            port_status,
            osc_test,
            command_port,
            command_port_status,
            recent_logs: self.log.recent(RECENT_LOG_WINDOW),
            environment: self.environment(),
        }
    }

    fn scan_log_files(&self) -> Vec<LogFile> {
        let now = SystemTime::now();
        self.log_files
            .iter()
            .filter_map(|path| {
                let meta = fs::metadata(path).ok().filter(|m| m.is_file())?;
                let modified = meta.modified().ok();
                let active = modified
                    .and_then(|m| now.duration_since(m).ok())
                    .is_some_and(|age| age <= ACTIVE_LOG_WINDOW);
                Some(LogFile {
                    path: path.display().to_string(),
                    size: meta.len(),
                    modified_ms: modified
                        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs_f64() * 1000.0),
                    active,
                })
            })
            .collect()
    }

    fn environment(&self) -> Map<String, Value> {
        let mut env_map = Map::new();
        env_map.insert("host".into(), json!(self.config.host));
        env_map.insert("port_override".into(), json!(self.config.port));
        env_map.insert("fallback_port".into(), json!(self.config.fallback_port));
        env_map.insert("cue_port".into(), json!(self.config.cue_port));
        env_map.insert("log_level".into(), json!(self.log.min_level()));
        env_map.insert("log_capacity".into(), json!(self.log.capacity()));
        env_map.insert("tie_break".into(), json!(self.config.discovery.tie_break));

        let vars: Map<String, Value> = ENV_KEYS
            .iter()
            .filter_map(|key| env::var(key).ok().map(|v| (key.to_string(), json!(v))))
            .collect();
        env_map.insert("variables".into(), Value::Object(vars));
        env_map
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// 플랫폼별 피어 서버 로그 위치
fn default_log_files() -> Vec<PathBuf> {
    let Some(home) = home_dir() else {
        return Vec::new();
    };
    vec![
        home.join(".sonic-pi/log/server-output.log"),
        home.join("Library/Application Support/Sonic Pi/log/server-output.log"),
        home.join("AppData/Local/sonic-pi/log/server-output.log"),
    ]
}
