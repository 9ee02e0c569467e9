//! Raw DCS-BIOS export over UDP

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::catalog::ControlCatalog;
use crate::config::ReceiverConfig;
use crate::protocol::ProtocolDecoder;
use crate::provider::Provider;
use crate::types::TelemetryFrame;
use crate::{Result, TutorError};

/// Largest datagram the export stream sends.
const MAX_DATAGRAM: usize = 65_535;

/// Seconds since the Unix epoch.
pub(crate) fn wall_clock() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default()
}

/// Bind `config.host:config.port`, joining the group when the host is a
/// multicast address.
pub(crate) async fn bind_receiver(config: &ReceiverConfig) -> Result<UdpSocket> {
    let addr = config.socket_addr()?;
    let socket = match addr.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), addr.port()))
                .await
                .map_err(|e| TutorError::connection_failed_with_source(format!("bind port {}", addr.port()), Box::new(e)))?;
            socket
                .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                .map_err(|e| TutorError::connection_failed_with_source(format!("join multicast {}", group), Box::new(e)))?;
            socket
        }
        _ => UdpSocket::bind(addr)
            .await
            .map_err(|e| TutorError::connection_failed_with_source(format!("bind {}", addr), Box::new(e)))?,
    };
    info!(%addr, "Telemetry receiver bound");
    Ok(socket)
}

/// Decodes the binary export stream into telemetry frames.
///
/// One datagram may complete several frames; each frame that changed at least
/// one control becomes a [`TelemetryFrame`] with a locally assigned `seq`.
pub struct RawUdpProvider {
    socket: UdpSocket,
    decoder: ProtocolDecoder,
    source: String,
    timeout: Duration,
    merge_full_state: bool,
    queue: VecDeque<TelemetryFrame>,
    next_seq: u64,
    buffer: Vec<u8>,
}

impl RawUdpProvider {
    /// Bind according to `config` and decode with `catalog`.
    pub async fn bind(config: &ReceiverConfig, catalog: &ControlCatalog) -> Result<Self> {
        let socket = bind_receiver(config).await?;
        Ok(Self::from_socket(socket, ProtocolDecoder::new(catalog), config))
    }

    pub fn from_socket(socket: UdpSocket, decoder: ProtocolDecoder, config: &ReceiverConfig) -> Self {
        Self {
            socket,
            decoder,
            source: config.source.clone(),
            timeout: config.timeout(),
            merge_full_state: config.merge_full_state,
            queue: VecDeque::new(),
            next_seq: 1,
            buffer: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|e| TutorError::connection_failed_with_source("local address", Box::new(e)))
    }

    pub fn decoder(&self) -> &ProtocolDecoder {
        &self.decoder
    }

    /// One timeout-bounded receive.
    ///
    /// Returns a queued frame first if one is waiting. Otherwise waits at most
    /// the configured timeout for a datagram and returns `Ok(None)` when
    /// nothing changed in that time.
    pub async fn poll_frame(&mut self) -> Result<Option<TelemetryFrame>> {
        if let Some(frame) = self.queue.pop_front() {
            return Ok(Some(frame));
        }

        let received = tokio::time::timeout(self.timeout, self.socket.recv_from(&mut self.buffer)).await;
        let (len, from) = match received {
            Err(_) => {
                trace!("Receive timed out");
                return Ok(None);
            }
            Ok(Err(e)) => {
                return Err(TutorError::connection_failed_with_source("receive datagram", Box::new(e)));
            }
            Ok(Ok(received)) => received,
        };

        let datagram = self.buffer[..len].to_vec();
        let queued = self.ingest(&datagram, wall_clock());
        trace!(%from, bytes = len, queued, "Datagram decoded");
        Ok(self.queue.pop_front())
    }

    /// Decode one datagram and queue a frame per changed frame.
    /// Returns how many frames were queued.
    pub fn ingest(&mut self, datagram: &[u8], t_wall: f64) -> usize {
        let mut count = 0;
        for body in self.decoder.split_frames(datagram) {
            // Snapshot before the next frame is applied
            let delta = self.decoder.apply_frame(&body);
            if delta.is_empty() {
                continue;
            }
            count += 1;
            let bios = if self.merge_full_state { self.decoder.values().clone() } else { delta.clone() };
            let frame = TelemetryFrame::new(self.next_seq, t_wall, self.source.clone())
                .with_aircraft(self.decoder.aircraft())
                .with_bios(bios)
                .with_delta(delta);
            self.next_seq += 1;
            self.queue.push_back(frame);
        }
        if count > 0 {
            debug!(frames = count, aircraft = self.decoder.aircraft(), "Queued decoded frames");
        }
        count
    }
}

#[async_trait::async_trait]
impl Provider for RawUdpProvider {
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
