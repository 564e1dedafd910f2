use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// 링 로그 기본 용량
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// 한 번 추가되면 변경되지 않는 로그 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix epoch 기준 밀리초
    pub ts: f64,
    pub level: LogLevel,
    pub message: String,
}

/// 고정 용량, 삽입 순서 보존, 가득 차면 가장 오래된 항목부터 버리는 진단용 로그.
///
/// 모든 접근은 하나의 Mutex 임계 구역 안에서 일어나므로 `tail()`이
/// 반쯤 기록된 항목을 관찰하는 일은 없습니다.
#[derive(Debug)]
pub struct RingLog {
    inner: Mutex<Ring>,
    capacity: usize,
    min_level: LogLevel,
}

#[derive(Debug)]
struct Ring {
    entries: VecDeque<LogEntry>,
    last_ts: f64,
}

impl RingLog {
    pub fn new(capacity: usize, min_level: LogLevel) -> Self {
        // 용량 0은 의미가 없으므로 최소 1로 보정
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                last_ts: 0.0,
            }),
            capacity,
            min_level,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Append one entry. Never fails; evicts the oldest entry when full.
    pub fn append(&self, level: LogLevel, message: impl Into<String>) {
        if level < self.min_level {
            return;
        }
        let message = message.into();

        match level {
            LogLevel::Debug => tracing::debug!(target: "cuebridge::ring", "{}", message),
            LogLevel::Info => tracing::info!(target: "cuebridge::ring", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "cuebridge::ring", "{}", message),
            LogLevel::Error => tracing::error!(target: "cuebridge::ring", "{}", message),
        }

        let mut ring = self.lock();
        // 시계가 뒤로 가더라도 삽입 순서와 타임스탬프 순서를 일치시킴
        let ts = now_ms().max(ring.last_ts);
        ring.last_ts = ts;
        if ring.entries.len() >= self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(LogEntry { ts, level, message });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.append(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.append(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(LogLevel::Error, message);
    }

    /// Entries with `ts >= since_ms` (all entries when `None`), oldest first.
    pub fn tail(&self, since_ms: Option<f64>) -> Vec<LogEntry> {
        let ring = self.lock();
        match since_ms {
            Some(since) => ring
                .entries
                .iter()
                .filter(|e| e.ts >= since)
                .cloned()
                .collect(),
            None => ring.entries.iter().cloned().collect(),
        }
    }

    /// The newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let ring = self.lock();
        let skip = ring.entries.len().saturating_sub(limit);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // append 도중 패닉이 나도 링 자체는 항상 일관된 상태이므로 poison은 무시
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RingLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, LogLevel::Info)
    }
}

/// Wall-clock milliseconds since the Unix epoch, with sub-millisecond precision.
pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}
