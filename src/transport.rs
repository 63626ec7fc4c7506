use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, trace};
use crate::clock::Clock;
use crate::segment::Segment;
use crate::stats::TrafficCounters;

/// This is an abstraction for sending and receiving datagrams on a UDP socket, introduced to
///  facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// Datagrams longer than `max_len` are truncated
    async fn recv_datagram(&self, max_len: usize) -> anyhow::Result<(Vec<u8>, SocketAddr)>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending datagram of {} bytes to {:?}", buf.len(), to);
        self.send_to(buf, to).await?;
        Ok(())
    }

    async fn recv_datagram(&self, max_len: usize) -> anyhow::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; max_len];
        let (num_read, from) = self.recv_from(&mut buf).await?;
        buf.truncate(num_read);
        Ok((buf, from))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Segment { segment: Segment, from: SocketAddr },
    /// A datagram from the peer that failed checksum verification or parsing
    Corrupt { from: SocketAddr },
    TimedOut,
}

/// A segment-level view of the datagram socket for a single connection: serializes and
///  verifies segments, applies the current receive timeout, ignores datagrams from anybody but
///  the peer once the peer is known, and keeps traffic counters.
///
/// Socket errors are logged and otherwise treated as loss - the protocol recovers from them
///  the same way.
pub struct SegmentChannel {
    socket: Arc<dyn DatagramSocket>,
    peer_addr: Option<SocketAddr>,
    max_datagram_len: usize,
    timeout: Option<Duration>,
    clock: Clock,
    counters: TrafficCounters,
}

impl SegmentChannel {
    pub fn new(socket: Arc<dyn DatagramSocket>, peer_addr: Option<SocketAddr>, max_datagram_len: usize, clock: Clock) -> SegmentChannel {
        SegmentChannel {
            socket,
            peer_addr,
            max_datagram_len,
            timeout: None,
            clock,
            counters: TrafficCounters::default(),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn set_peer_addr(&mut self, peer_addr: SocketAddr) {
        debug!("connection peer is {:?}", peer_addr);
        self.peer_addr = Some(peer_addr);
    }

    /// `None` means that receiving blocks until a datagram arrives
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        trace!("receive timeout set to {:?}", timeout);
        self.timeout = timeout;
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn counters(&self) -> TrafficCounters {
        self.counters
    }

    pub async fn send_segment(&mut self, segment: &Segment) {
        let Some(to) = self.peer_addr else {
            error!("no peer address to send {} to - this is a bug", segment);
            return;
        };

        let mut buf = Vec::with_capacity(segment.serialized_len());
        segment.ser(&mut buf);

        info!("snd {:.3} {}", self.clock.elapsed_secs(), segment);
        self.counters.segments_sent += 1;
        self.counters.payload_bytes_sent += segment.payload.len() as u64;

        if let Err(e) = self.socket.send_datagram(to, &buf).await {
            error!("error sending datagram to {:?}: {}", to, e);
        }
    }

    /// The point in time at which a wait that starts now times out, `None` if it never does
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    /// Receives with the current timeout, starting now
    pub async fn recv_segment(&mut self) -> Incoming {
        let deadline = self.deadline();
        self.recv_segment_until(deadline).await
    }

    /// Receives the next segment from the peer, or `TimedOut` once `deadline` has passed.
    ///
    /// Waits that span several received segments pass the same deadline to every call, so that
    ///  ignored or corrupt datagrams do not extend the wait.
    pub async fn recv_segment_until(&mut self, deadline: Option<Instant>) -> Incoming {
        loop {
            let received = match deadline {
                None => self.socket.recv_datagram(self.max_datagram_len).await,
                Some(deadline) => match timeout_at(deadline, self.socket.recv_datagram(self.max_datagram_len)).await {
                    Ok(received) => received,
                    Err(_) => {
                        trace!("receive timed out at deadline {:?}", deadline);
                        return Incoming::TimedOut;
                    }
                },
            };

            let (datagram, from) = match received {
                Ok(received) => received,
                Err(e) => {
                    error!("error receiving datagram: {}", e);
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Incoming::TimedOut;
                    }
                    continue;
                }
            };

            if let Some(peer_addr) = self.peer_addr {
                if from != peer_addr {
                    debug!("ignoring datagram from {:?} which is not the connection peer {:?}", from, peer_addr);
                    continue;
                }
            }

            let segment = match Segment::deser(&datagram) {
                Ok(segment) => segment,
                Err(e) => {
                    debug!("discarding malformed datagram from {:?}: {}", from, e);
                    self.counters.corrupt_discarded += 1;
                    return Incoming::Corrupt { from };
                }
            };
            if !Segment::verify_checksum(&datagram) {
                debug!("discarding segment with wrong checksum from {:?}: {}", from, segment);
                self.counters.corrupt_discarded += 1;
                return Incoming::Corrupt { from };
            }

            info!("rcv {:.3} {}", self.clock.elapsed_secs(), segment);
            self.counters.segments_received += 1;
            self.counters.payload_bytes_received += segment.payload.len() as u64;
            return Incoming::Segment { segment, from };
        }
    }
}
