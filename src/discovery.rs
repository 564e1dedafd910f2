use crate::config::{Config, TieBreak};
use crate::error::{CuebridgeError, Result};
use crate::log::RingLog;
use crate::osc::endpoint::Endpoint;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;
use tokio::runtime::Runtime;
use tokio::time::{Duration, timeout};

/// One UDP socket bound on this host, as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocketEntry {
    pub process: String,
    pub pid: u32,
    /// File descriptor number inside the owning process.
    pub fd: u32,
    pub addr: String,
    pub port: u16,
}

/// 호스트의 UDP 소켓 테이블을 읽어오는 능력.
/// 플랫폼별 구현을 교체해도 디스패처는 건드리지 않도록 분리합니다.
pub trait SocketTable: Send + Sync {
    fn listening_udp(&self) -> Result<Vec<SocketEntry>>;
}

/// `lsof -nP -iUDP` 기반 구현 (macOS / Linux 공통)
pub struct LsofSocketTable {
    runtime: Runtime,
    timeout: Duration,
}

impl LsofSocketTable {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

impl SocketTable for LsofSocketTable {
    fn listening_udp(&self) -> Result<Vec<SocketEntry>> {
        let output = self.runtime.block_on(async {
            let mut cmd = Command::new("lsof");
            cmd.args(["-nP", "-iUDP"]).kill_on_drop(true);
            // [Time Limit] lsof가 멈추더라도 디스패처 전체가 멈추지 않도록
            match timeout(self.timeout, cmd.output()).await {
                Ok(result) => result.map_err(CuebridgeError::Io),
                Err(_) => Err(CuebridgeError::Discovery(format!(
                    "lsof timed out after {}ms",
                    self.timeout.as_millis()
                ))),
            }
        })?;

        // lsof는 일치하는 항목이 없을 때도 1로 종료하므로 종료 코드는 보지 않음
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_lsof(&stdout))
    }
}

/// Parse `lsof -nP -iUDP` output. Connected sockets (`a->b`) are skipped.
pub fn parse_lsof(output: &str) -> Vec<SocketEntry> {
    let Ok(re) = Regex::new(
        r"^(?P<cmd>\S+)\s+(?P<pid>\d+)\s+\S+\s+(?P<fd>\d+)\S*\s+IPv[46]\s.*\bUDP\s+(?P<addr>\*|\[[^\]]*\]|[^\s:\[]+):(?P<port>\d+)\s*$",
    ) else {
        return Vec::new();
    };

    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(SocketEntry {
                // lsof는 공백을 \x20으로 이스케이프
                process: caps["cmd"].replace("\\x20", " "),
                pid: caps["pid"].parse().ok()?,
                fd: caps["fd"].parse().ok()?,
                addr: caps["addr"].to_string(),
                port: caps["port"].parse().ok()?,
            })
        })
        .collect()
}

/// Result of one discovery pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Discovery {
    Found {
        endpoint: Endpoint,
        candidates: Vec<SocketEntry>,
    },
    NotFound {
        candidates: Vec<SocketEntry>,
        reason: String,
    },
}

impl Discovery {
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            Discovery::Found { endpoint, .. } => Some(endpoint),
            Discovery::NotFound { .. } => None,
        }
    }

    pub fn candidates(&self) -> &[SocketEntry] {
        match self {
            Discovery::Found { candidates, .. } | Discovery::NotFound { candidates, .. } => {
                candidates
            }
        }
    }
}

/// Locates the peer's command port by inspecting the host socket table.
pub struct PortDiscovery {
    table: Box<dyn SocketTable>,
    host: String,
    pattern: Regex,
    tie_break: TieBreak,
    exclude_ports: Vec<u16>,
    last: Mutex<Option<Endpoint>>,
    log: Arc<RingLog>,
}

impl PortDiscovery {
    pub fn new(config: &Config, table: Box<dyn SocketTable>, log: Arc<RingLog>) -> Result<Self> {
        let pattern = Regex::new(&config.discovery.process_pattern).map_err(|e| {
            CuebridgeError::Config(format!(
                "invalid discovery.process_pattern '{}': {}",
                config.discovery.process_pattern, e
            ))
        })?;

        // 큐 포트는 설정과 무관하게 항상 제외
        let mut exclude_ports = config.discovery.exclude_ports.clone();
        if !exclude_ports.contains(&config.cue_port) {
            exclude_ports.push(config.cue_port);
        }

        Ok(Self {
            table,
            host: config.host.clone(),
            pattern,
            tie_break: config.discovery.tie_break,
            exclude_ports,
            last: Mutex::new(None),
            log,
        })
    }

    /// lsof 기반 기본 구성
    pub fn with_lsof(config: &Config, log: Arc<RingLog>) -> Result<Self> {
        let table = LsofSocketTable::new(config.discovery.timeout_ms)?;
        Self::new(config, Box::new(table), log)
    }

    pub fn discover(&self) -> Discovery {
        let entries = match self.table.listening_udp() {
            Ok(entries) => entries,
            Err(e) => {
                let reason = e.to_string();
                self.log
                    .warn(format!("Port discovery failed: {} (no candidates considered)", reason));
                return Discovery::NotFound {
                    candidates: Vec::new(),
                    reason,
                };
            }
        };

        let candidates = self.candidates(entries);
        let ports: Vec<u16> = candidates.iter().map(|c| c.port).collect();

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let previous_port = last
            .as_ref()
            .filter(|e| e.host == self.host)
            .map(|e| e.port);

        let chosen = match (self.tie_break, previous_port) {
            (TieBreak::Sticky, Some(prev)) if ports.contains(&prev) => Some(prev),
            _ => ports.first().copied(),
        };

        let Some(port) = chosen else {
            let reason = format!(
                "no listening UDP socket owned by a process matching '{}'",
                self.pattern.as_str()
            );
            self.log.warn(format!(
                "Port discovery: {} (candidates considered: {:?})",
                reason, ports
            ));
            return Discovery::NotFound { candidates, reason };
        };

        // 같은 포트가 다시 선택되면 이전 Endpoint를 그대로 돌려줌 (멱등성)
        let reused = if previous_port == Some(port) {
            last.clone()
        } else {
            None
        };
        let endpoint = match reused {
            Some(prev) => prev,
            None => {
                let fresh = Endpoint::probed(self.host.clone(), port);
                *last = Some(fresh.clone());
                fresh
            }
        };
        drop(last);

        self.log.info(format!(
            "Port discovery: selected {} (candidates: {:?}, tie-break: {:?})",
            endpoint, ports, self.tie_break
        ));
        Discovery::Found {
            endpoint,
            candidates,
        }
    }

    /// 필터링 후 최근 바인딩 순(pid 내림차순, fd 내림차순)으로 정렬, 포트 중복 제거
    fn candidates(&self, entries: Vec<SocketEntry>) -> Vec<SocketEntry> {
        let mut matching: Vec<SocketEntry> = entries
            .into_iter()
            .filter(|e| self.pattern.is_match(&e.process))
            .filter(|e| is_local_addr(&e.addr))
            .filter(|e| !self.exclude_ports.contains(&e.port))
            .collect();

        matching.sort_by(|a, b| b.pid.cmp(&a.pid).then(b.fd.cmp(&a.fd)));

        let mut seen = Vec::new();
        matching.retain(|e| {
            if seen.contains(&e.port) {
                false
            } else {
                seen.push(e.port);
                true
            }
        });
        matching
    }
}

fn is_local_addr(addr: &str) -> bool {
    matches!(addr, "*" | "0.0.0.0" | "[::]" | "[::1]" | "localhost") || addr.starts_with("127.")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::log::LogLevel;

    /// 테스트용 고정 소켓 테이블 (교체 가능)
    pub struct StaticTable(pub Mutex<Result<Vec<SocketEntry>>>);

    impl StaticTable {
        pub fn with(entries: Vec<SocketEntry>) -> Self {
            Self(Mutex::new(Ok(entries)))
        }

        pub fn set(&self, entries: Vec<SocketEntry>) {
            *self.0.lock().unwrap() = Ok(entries);
        }
    }

    impl SocketTable for Arc<StaticTable> {
        fn listening_udp(&self) -> Result<Vec<SocketEntry>> {
            match &*self.0.lock().unwrap() {
                Ok(entries) => Ok(entries.clone()),
                Err(e) => Err(CuebridgeError::Discovery(e.to_string())),
            }
        }
    }

    pub fn entry(process: &str, pid: u32, fd: u32, addr: &str, port: u16) -> SocketEntry {
        SocketEntry {
            process: process.to_string(),
            pid,
            fd,
            addr: addr.to_string(),
            port,
        }
    }

    fn discovery(table: Arc<StaticTable>, tie_break: TieBreak) -> (PortDiscovery, Arc<RingLog>) {
        let mut config = Config::default();
        config.discovery.tie_break = tie_break;
        let log = Arc::new(RingLog::new(100, LogLevel::Debug));
        let d = PortDiscovery::new(&config, Box::new(table), Arc::clone(&log)).unwrap();
        (d, log)
    }

    const LSOF_SAMPLE: &str = "\
COMMAND     PID USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
ruby       4242 me     12u  IPv4 0x1111111111111111      0t0  UDP 127.0.0.1:51235
ruby       4242 me     14u  IPv4 0x2222222222222222      0t0  UDP *:4560
scsynth    4250 me      5u  IPv4 0x3333333333333333      0t0  UDP 127.0.0.1:4556
Sonic\\x20Pi 4200 me   30u  IPv6 0x4444444444444444      0t0  UDP [::1]:51300
ruby       4242 me     16u  IPv4 0x5555555555555555      0t0  UDP 127.0.0.1:50000->127.0.0.1:4557
mDNSRespo   180 root    8u  IPv4 0x6666666666666666      0t0  UDP *:5353
";

    #[test]
    fn parses_lsof_udp_lines() {
        let entries = parse_lsof(LSOF_SAMPLE);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0], entry("ruby", 4242, 12, "127.0.0.1", 51235));
        assert_eq!(entries[1].addr, "*");
        assert_eq!(entries[3].process, "Sonic Pi");
        assert_eq!(entries[3].addr, "[::1]");
        assert!(entries.iter().all(|e| e.port != 50000));
    }

    #[test]
    fn picks_most_recent_matching_socket() {
        let table = Arc::new(StaticTable::with(vec![
            entry("sonic-pi-server", 100, 3, "127.0.0.1", 51000),
            entry("sonic-pi-server", 200, 7, "127.0.0.1", 52000),
            entry("sonic-pi-server", 200, 4, "127.0.0.1", 53000),
            entry("firefox", 900, 9, "127.0.0.1", 60000),
        ]));
        let (d, _) = discovery(table, TieBreak::MostRecent);
        let found = d.discover();
        assert_eq!(found.endpoint().map(|e| e.port), Some(52000));
        assert_eq!(found.candidates().len(), 3);
    }

    #[test]
    fn excludes_cue_port_and_remote_addresses() {
        let table = Arc::new(StaticTable::with(vec![
            entry("sonic", 300, 9, "*", 4560),
            entry("sonic", 300, 8, "192.168.1.20", 51000),
        ]));
        let (d, log) = discovery(table, TieBreak::Sticky);
        assert!(matches!(d.discover(), Discovery::NotFound { .. }));
        assert!(log.tail(None).iter().any(|e| e.level == LogLevel::Warn));
    }

    #[test]
    fn exclusion_follows_moved_cue_port() {
        let table = Arc::new(StaticTable::with(vec![
            entry("sonic", 300, 9, "*", 4561),
            entry("sonic", 200, 9, "127.0.0.1", 4560),
        ]));
        let config = Config {
            cue_port: 4561,
            ..Config::default()
        };
        let log = Arc::new(RingLog::default());
        let d = PortDiscovery::new(&config, Box::new(table), log).unwrap();
        let found = d.discover();
        assert_eq!(found.endpoint().map(|e| e.port), Some(4560));
        assert_eq!(found.candidates().len(), 1);
    }

    #[test]
    fn repeated_discovery_is_idempotent() {
        let table = Arc::new(StaticTable::with(vec![entry("sonic", 10, 3, "127.0.0.1", 51000)]));
        let (d, _) = discovery(table, TieBreak::MostRecent);
        let first = d.discover();
        let second = d.discover();
        assert_eq!(first, second);
    }

    #[test]
    fn sticky_keeps_previous_port_while_listening() {
        let table = Arc::new(StaticTable::with(vec![entry("sonic", 10, 3, "127.0.0.1", 51000)]));
        let (d, _) = discovery(Arc::clone(&table), TieBreak::Sticky);
        assert_eq!(d.discover().endpoint().map(|e| e.port), Some(51000));

        // 더 최근 소켓이 생겨도 기존 포트 유지
        table.set(vec![
            entry("sonic", 10, 3, "127.0.0.1", 51000),
            entry("sonic", 20, 3, "127.0.0.1", 52000),
        ]);
        assert_eq!(d.discover().endpoint().map(|e| e.port), Some(51000));

        // 기존 포트가 사라지면 가장 최근 소켓으로 이동
        table.set(vec![entry("sonic", 20, 3, "127.0.0.1", 52000)]);
        assert_eq!(d.discover().endpoint().map(|e| e.port), Some(52000));
    }

    #[test]
    fn most_recent_ignores_previous_port() {
        let table = Arc::new(StaticTable::with(vec![entry("sonic", 10, 3, "127.0.0.1", 51000)]));
        let (d, _) = discovery(Arc::clone(&table), TieBreak::MostRecent);
        d.discover();
        table.set(vec![
            entry("sonic", 10, 3, "127.0.0.1", 51000),
            entry("sonic", 20, 3, "127.0.0.1", 52000),
        ]);
        assert_eq!(d.discover().endpoint().map(|e| e.port), Some(52000));
    }

    #[test]
    fn table_errors_become_not_found() {
        let table = Arc::new(StaticTable(Mutex::new(Err(CuebridgeError::Discovery(
            "lsof timed out after 1500ms".to_string(),
        )))));
        let (d, log) = discovery(table, TieBreak::Sticky);
        match d.discover() {
            Discovery::NotFound { reason, candidates } => {
                assert!(reason.contains("timed out"));
                assert!(candidates.is_empty());
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn rejects_invalid_pattern() {
        let mut config = Config::default();
        config.discovery.process_pattern = "(".to_string();
        let table = Arc::new(StaticTable::with(Vec::new()));
        let log = Arc::new(RingLog::default());
        assert!(PortDiscovery::new(&config, Box::new(table), log).is_err());
    }
}
