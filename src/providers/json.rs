//! Pre-decoded JSON telemetry over UDP
//!
//! Each datagram is one object `{seq, t_wall?, aircraft?, bios: {...}}`
//! produced by an exporter that already resolved control names.

use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::raw::{bind_receiver, wall_clock};
use crate::config::ReceiverConfig;
use crate::provider::Provider;
use crate::sequence::SequenceGate;
use crate::types::{ControlValue, TelemetryFrame};
use crate::{Result, TutorError};

const MAX_DATAGRAM: usize = 65_535;

pub struct JsonUdpProvider {
    socket: UdpSocket,
    source: String,
    timeout: Duration,
    merge_full_state: bool,
    gate: SequenceGate,
    state: BTreeMap<String, ControlValue>,
    last_gap: u64,
    buffer: Vec<u8>,
}

impl JsonUdpProvider {
    pub async fn bind(config: &ReceiverConfig) -> Result<Self> {
        let socket = bind_receiver(config).await?;
        Ok(Self::from_socket(socket, config))
    }

    pub fn from_socket(socket: UdpSocket, config: &ReceiverConfig) -> Self {
        Self {
            socket,
            source: config.source.clone(),
            timeout: config.timeout(),
            merge_full_state: config.merge_full_state,
            gate: SequenceGate::new(),
            state: BTreeMap::new(),
            last_gap: 0,
            buffer: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|e| TutorError::connection_failed_with_source("local address", Box::new(e)))
    }

    /// Sequence numbers skipped before the most recently accepted frame.
    pub fn last_gap(&self) -> u64 {
        self.last_gap
    }

    /// One timeout-bounded receive; `Ok(None)` on timeout or when the
    /// datagram was dropped.
    pub async fn poll_frame(&mut self) -> Result<Option<TelemetryFrame>> {
        let received = tokio::time::timeout(self.timeout, self.socket.recv_from(&mut self.buffer)).await;
        let len = match received {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(TutorError::connection_failed_with_source("receive datagram", Box::new(e))),
            Ok(Ok((len, _))) => len,
        };
        let datagram = self.buffer[..len].to_vec();
        Ok(self.ingest(&datagram))
    }

    /// Decode one datagram. Malformed, stale or duplicate datagrams yield `None`.
    pub fn ingest(&mut self, datagram: &[u8]) -> Option<TelemetryFrame> {
        let payload: JsonValue = match serde_json::from_slice(datagram) {
            Ok(payload) => payload,
            Err(e) => {
                trace!(error = %e, "Dropping datagram that is not JSON");
                return None;
            }
        };
        let object = payload.as_object()?;
        let Some(bios) = object.get("bios").and_then(JsonValue::as_object) else {
            trace!("Dropping datagram without a bios object");
            return None;
        };
        let Some(seq) = object.get("seq").and_then(JsonValue::as_u64) else {
            trace!("Dropping datagram without an integer seq");
            return None;
        };
        self.last_gap = self.gate.accept(&self.source, seq)?;
        if self.last_gap > 0 {
            debug!(seq, gap = self.last_gap, "Sequence gap in JSON telemetry");
        }

        let delta = control_values(bios);
        let bios = if self.merge_full_state {
            self.state.extend(delta.clone());
            self.state.clone()
        } else {
            delta.clone()
        };
        let t_wall = object.get("t_wall").and_then(JsonValue::as_f64).unwrap_or_else(wall_clock);
        let aircraft = object.get("aircraft").and_then(JsonValue::as_str).unwrap_or_default();

        Some(
            TelemetryFrame::new(seq, t_wall, self.source.clone())
                .with_aircraft(aircraft)
                .with_bios(bios)
                .with_delta(delta),
        )
    }
}

/// Keep values that fit a control: unsigned 16/32-bit integers and strings.
fn control_values(bios: &Map<String, JsonValue>) -> BTreeMap<String, ControlValue> {
    bios.iter()
        .filter_map(|(identifier, value)| {
            let value = match value {
                JsonValue::String(text) => ControlValue::Text(text.clone()),
                other => ControlValue::Integer(other.as_u64().and_then(|n| u32::try_from(n).ok())?),
            };
            Some((identifier.clone(), value))
        })
        .collect()
}

#[async_trait::async_trait]
impl Provider for JsonUdpProvider {
    async fn next_frame(&mut self) -> Result<Option<TelemetryFrame>> {
        loop {
            if let Some(frame) = self.poll_frame().await? {
                return Ok(Some(frame));
            }
        }
    }

    fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn provider(merge_full_state: bool) -> JsonUdpProvider {
        let config = ReceiverConfig {
            host: "127.0.0.1".into(),
            port: 0,
            timeout_ms: 50,
            source: "dcs_bios".into(),
            merge_full_state,
            ..ReceiverConfig::default()
        };
        JsonUdpProvider::bind(&config).await.unwrap()
    }

    #[tokio::test]
    async fn stale_sequence_is_dropped() {
        let mut provider = provider(true).await;
        let first = provider.ingest(br#"{"seq": 2, "t_wall": 1.0, "bios": {"BATTERY": 1}}"#).unwrap();
        assert_eq!(first.seq, 2);

        assert!(provider.ingest(br#"{"seq": 1, "bios": {"BATTERY": 0}}"#).is_none());
        assert!(provider.ingest(br#"{"seq": 2, "bios": {"BATTERY": 0}}"#).is_none());

        let next = provider.ingest(br#"{"seq": 5, "bios": {"APU": "ON"}}"#).unwrap();
        assert_eq!(provider.last_gap(), 2);
        assert_eq!(next.bios["BATTERY"], ControlValue::Integer(1));
        assert_eq!(next.delta.len(), 1);
    }

    #[tokio::test]
    async fn malformed_datagrams_are_dropped() {
        let mut provider = provider(false).await;
        for datagram in [&b"not json"[..], b"[1, 2]", br#"{"seq": 1}"#, br#"{"seq": "1", "bios": {}}"#] {
            assert!(provider.ingest(datagram).is_none());
        }
        let frame = provider.ingest(br#"{"seq": 1, "aircraft": "A-10C", "bios": {"X": 3, "Y": -1}}"#).unwrap();
        assert_eq!(frame.aircraft, "A-10C");
        assert_eq!(frame.bios, frame.delta);
        assert!(!frame.bios.contains_key("Y"));
    }

    #[tokio::test]
    async fn receives_over_socket() {
        let mut provider = provider(true).await;
        let target = provider.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(br#"{"seq": 1, "bios": {"BATTERY": 1}}"#, target).await.unwrap();

        let frame = provider.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.source, "dcs_bios");
        assert_eq!(frame.delta["BATTERY"], ControlValue::Integer(1));
    }
}
