use dashmap::DashMap;
use serde::Serialize;
use std::fmt;

/// Logical channel towards the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Dynamic command port (stop / bpm / cue / probe).
    Command,
    /// Well-known cue port carrying code payloads.
    Cue,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Command => f.write_str("command"),
            Channel::Cue => f.write_str("cue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSource {
    Configured,
    Probed,
}

/// A single UDP destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Unix epoch milliseconds.
    pub discovered_at: f64,
    pub source: EndpointSource,
}

impl Endpoint {
    pub fn configured(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            discovered_at: crate::log::now_ms(),
            source: EndpointSource::Configured,
        }
    }

    pub fn probed(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            discovered_at: crate::log::now_ms(),
            source: EndpointSource::Probed,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

/// 채널당 최대 하나의 활성 엔드포인트.
/// 교체는 항상 통째로 `insert` 하므로 부분 갱신이 관찰되지 않습니다.
#[derive(Debug, Default)]
pub struct EndpointTable {
    active: DashMap<Channel, Endpoint>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: Channel) -> Option<Endpoint> {
        self.active.get(&channel).map(|e| e.value().clone())
    }

    /// Swap in a new endpoint, returning the one it replaced.
    pub fn replace(&self, channel: Channel, endpoint: Endpoint) -> Option<Endpoint> {
        self.active.insert(channel, endpoint)
    }

    pub fn clear(&self, channel: Channel) -> Option<Endpoint> {
        self.active.remove(&channel).map(|(_, e)| e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_swaps_whole_endpoint() {
        let table = EndpointTable::new();
        assert!(table.get(Channel::Command).is_none());

        let first = Endpoint::probed("127.0.0.1", 51000);
        assert!(table.replace(Channel::Command, first.clone()).is_none());

        let second = Endpoint::configured("127.0.0.1", 4557);
        let previous = table.replace(Channel::Command, second.clone());
        assert_eq!(previous, Some(first));
        assert_eq!(table.get(Channel::Command), Some(second));
        assert!(table.get(Channel::Cue).is_none());
    }

    #[test]
    fn clear_removes_only_that_channel() {
        let table = EndpointTable::new();
        table.replace(Channel::Command, Endpoint::probed("127.0.0.1", 51000));
        table.replace(Channel::Cue, Endpoint::configured("127.0.0.1", 4560));
        table.clear(Channel::Command);
        assert!(table.get(Channel::Command).is_none());
        assert_eq!(table.get(Channel::Cue).map(|e| e.port), Some(4560));
    }
}
