pub mod codec;
pub mod endpoint;

use crate::config::Config;
use crate::discovery::{Discovery, PortDiscovery};
use crate::error::{CuebridgeError, Result};
use crate::log::{RingLog, now_ms};
use serde::Serialize;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

pub use codec::{OscMessage, OscType};
pub use endpoint::{Channel, Endpoint, EndpointSource, EndpointTable};

/// 진단 프로브에서 ICMP 거부 응답을 기다리는 시간
const PROBE_WINDOW: Duration = Duration::from_millis(100);

/// Outcome of a single fire-and-forget send. `error` only reflects the local socket operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendOutcome {
    pub attempted_at: f64,
    pub endpoint: Endpoint,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        self.error.is_none()
    }

    /// 로컬 소켓 오류를 Transport 에러로 변환
    pub fn into_result(self) -> Result<Self> {
        match &self.error {
            None => Ok(self),
            Some(reason) => Err(CuebridgeError::Transport {
                endpoint: self.endpoint.addr(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Diagnostic round-trip probe result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub sent: bool,
    pub endpoint: Option<Endpoint>,
    /// The host answered with ICMP port-unreachable: nothing is bound there.
    pub peer_refused: bool,
    pub error: Option<String>,
}

/// Sends OSC datagrams to the peer. Delivery is never confirmed.
pub struct OscClient {
    config: Arc<Config>,
    endpoints: Arc<EndpointTable>,
    discovery: Arc<PortDiscovery>,
    log: Arc<RingLog>,
}

impl OscClient {
    pub fn new(
        config: Arc<Config>,
        endpoints: Arc<EndpointTable>,
        discovery: Arc<PortDiscovery>,
        log: Arc<RingLog>,
    ) -> Self {
        Self {
            config,
            endpoints,
            discovery,
            log,
        }
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    /// Encode `path` + `args` and send one datagram on `channel`.
    ///
    /// Returns `Err` only when no endpoint can be determined or the message
    /// cannot be encoded; local socket failures are reported in `SendOutcome::error`.
    pub fn send(&self, channel: Channel, path: &str, args: Vec<OscType>) -> Result<SendOutcome> {
        let message = OscMessage::new(path, args);
        let packet = message.encode()?;
        let endpoint = self.resolve(channel)?;
        let attempted_at = now_ms();

        let error = send_datagram(&endpoint, &packet).err();
        match &error {
            None => self.log.info(format!(
                "OSC send {} -> {} ({}, {} bytes)",
                message.summary(),
                endpoint,
                channel,
                packet.len()
            )),
            Some(reason) => {
                self.log.error(format!(
                    "OSC send {} -> {} ({}) failed: {}",
                    message.summary(),
                    endpoint,
                    channel,
                    reason
                ));
                // 다음 전송에서 재탐색하도록 활성 엔드포인트 해제 (재전송은 하지 않음)
                if channel == Channel::Command {
                    self.endpoints.clear(channel);
                }
            }
        }

        Ok(SendOutcome {
            attempted_at,
            endpoint,
            error,
        })
    }

    /// Send a harmless message to `target` and briefly listen for an ICMP
    /// port-unreachable. Never returns an error; failures are fields.
    pub fn probe(&self, target: Result<Endpoint>) -> ProbeOutcome {
        let endpoint = match target {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.log.warn(format!("OSC probe skipped: {}", e));
                return ProbeOutcome {
                    sent: false,
                    endpoint: None,
                    peer_refused: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let message = OscMessage::new(self.config.paths.probe.clone(), Vec::new());
        let outcome = message
            .encode()
            .and_then(|packet| probe_datagram(&endpoint, &packet));

        let result = match outcome {
            Ok(peer_refused) => ProbeOutcome {
                sent: true,
                endpoint: Some(endpoint.clone()),
                peer_refused,
                error: peer_refused.then(|| format!("{} refused the datagram", endpoint)),
            },
            Err(e) => ProbeOutcome {
                sent: false,
                endpoint: Some(endpoint.clone()),
                peer_refused: false,
                error: Some(e.to_string()),
            },
        };

        if result.error.is_none() {
            self.log.info(format!("OSC probe {} -> {}: sent", message.addr, endpoint));
        } else {
            self.log.warn(format!(
                "OSC probe {} -> {}: {}",
                message.addr,
                endpoint,
                result.error.as_deref().unwrap_or("failed")
            ));
        }
        result
    }

    /// Swap the active endpoint of `channel`, logging when it changes.
    pub fn adopt(&self, channel: Channel, endpoint: Endpoint) {
        let previous = self.endpoints.replace(channel, endpoint.clone());
        if previous.as_ref().map(|p| p.port) != Some(endpoint.port) {
            self.log.info(format!(
                "Active {} endpoint: {} -> {}",
                channel,
                previous.map(|p| p.addr()).unwrap_or_else(|| "none".to_string()),
                endpoint
            ));
        }
    }

    fn resolve(&self, channel: Channel) -> Result<Endpoint> {
        if let Some(active) = self.endpoints.get(channel) {
            return Ok(active);
        }

        let endpoint = match channel {
            Channel::Cue => Endpoint::configured(self.config.host.clone(), self.config.cue_port),
            Channel::Command => self.resolve_command()?,
        };
        self.adopt(channel, endpoint.clone());
        Ok(endpoint)
    }

    fn resolve_command(&self) -> Result<Endpoint> {
        if let Some(endpoint) = self.override_endpoint() {
            return Ok(endpoint);
        }
        self.command_endpoint(&self.discovery.discover())
    }

    /// 이미 얻은 탐색 결과로 command 엔드포인트 결정 (override → discovery → fallback 순)
    pub fn command_endpoint(&self, discovery: &Discovery) -> Result<Endpoint> {
        if let Some(endpoint) = self.override_endpoint() {
            return Ok(endpoint);
        }

        match discovery {
            Discovery::Found { endpoint, .. } => Ok(endpoint.clone()),
            Discovery::NotFound { reason, .. } => match self.config.fallback_port {
                Some(port) => {
                    self.log.warn(format!(
                        "Falling back to configured command port {} ({})",
                        port, reason
                    ));
                    Ok(Endpoint::configured(self.config.host.clone(), port))
                }
                None => {
                    self.log.error(format!("No command endpoint available: {}", reason));
                    Err(CuebridgeError::EndpointUnavailable {
                        channel: Channel::Command.to_string(),
                    })
                }
            },
        }
    }

    fn override_endpoint(&self) -> Option<Endpoint> {
        self.config
            .port
            .map(|port| Endpoint::configured(self.config.host.clone(), port))
    }
}

fn target_addr(endpoint: &Endpoint) -> std::io::Result<SocketAddr> {
    (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "host resolved to no address"))
}

fn bind_for(target: &SocketAddr) -> std::io::Result<UdpSocket> {
    if target.is_ipv4() {
        UdpSocket::bind(("0.0.0.0", 0))
    } else {
        UdpSocket::bind(("::", 0))
    }
}

fn send_datagram(endpoint: &Endpoint, packet: &[u8]) -> std::result::Result<(), String> {
    let target = target_addr(endpoint).map_err(|e| e.to_string())?;
    let socket = bind_for(&target).map_err(|e| e.to_string())?;
    socket
        .send_to(packet, target)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// 연결된 소켓으로 보내고 짧게 수신 대기: ConnectionRefused면 아무도 바인딩하지 않은 포트
fn probe_datagram(endpoint: &Endpoint, packet: &[u8]) -> Result<bool> {
    let target = target_addr(endpoint)?;
    let socket = bind_for(&target)?;
    socket.connect(target)?;
    socket.send(packet)?;
    socket.set_read_timeout(Some(PROBE_WINDOW))?;

    let mut buf = [0u8; 1536];
    match socket.recv(&mut buf) {
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => Ok(true),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
        Err(e) => Err(CuebridgeError::Io(e)),
        // 피어가 응답을 보냈다면 살아 있는 것
        Ok(_) => Ok(false),
    }
}
