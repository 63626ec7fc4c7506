use std::cmp::max;
use std::time::Duration;
use anyhow::bail;
use crate::segment::Segment;

pub struct TcpEndConfig {
    /// The MTU of the path between the two endpoints, *including* the IPv4 and UDP headers. The
    ///  largest datagram is `mtu - 28` bytes, and the largest payload per segment is
    ///  `mtu - 28 - 24 = mtu - 52` bytes.
    ///
    /// Fragmentation is never attempted, so this must be supported by the entire path.
    pub mtu: usize,

    /// The sliding window size, in *segments* (not bytes). The sender never has more than this
    ///  number of unacknowledged segments in flight, and the receiver buffers at most this many
    ///  segments' worth of bytes ahead of its delivery position.
    pub sws: usize,

    /// Retransmission timeout before the first RTT sample is available
    pub initial_timeout: Duration,
    /// Fixed receive timeout for the receiver's handshake and teardown steps. The receiver
    ///  has no RTT estimate of its own.
    pub control_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,

    /// The number of attempts at any wait point before the connection is abandoned
    pub max_retries: u32,
    /// After the final teardown ACK, the sender lingers for this many RTOs or control timeouts,
    ///  whichever is longer, so that it can re-acknowledge a repeated FIN
    pub linger_factor: u32,
}

impl TcpEndConfig {
    pub const IP_UDP_HEADER_LEN: usize = 20 + 8;

    pub fn new(mtu: usize, sws: usize) -> TcpEndConfig {
        TcpEndConfig {
            mtu,
            sws,
            initial_timeout: Duration::from_secs(5),
            control_timeout: Duration::from_secs(5),
            min_timeout: Duration::from_millis(1),
            max_timeout: Duration::from_secs(60),
            max_retries: 16,
            linger_factor: 16,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mtu <= Self::IP_UDP_HEADER_LEN + Segment::HEADER_LEN {
            bail!("MTU of {} leaves no room for payload - it must be bigger than {}", self.mtu, Self::IP_UDP_HEADER_LEN + Segment::HEADER_LEN);
        }
        if self.mtu > u16::MAX as usize {
            bail!("MTU of {} exceeds the maximum IP packet size", self.mtu);
        }
        if self.sws == 0 {
            bail!("sliding window size must be at least 1");
        }
        if self.receive_window_bytes() > u32::MAX as u64 / 2 {
            bail!("sliding window of {} segments of {} bytes does not fit into the sequence number space", self.sws, self.max_payload_len());
        }
        if self.min_timeout.is_zero() {
            bail!("minimum timeout must be positive");
        }
        if self.min_timeout > self.max_timeout {
            bail!("minimum timeout {:?} exceeds maximum timeout {:?}", self.min_timeout, self.max_timeout);
        }
        if self.initial_timeout.is_zero() || self.control_timeout.is_zero() {
            bail!("initial and control timeouts must be positive");
        }
        if self.max_retries == 0 {
            bail!("at least one attempt is required");
        }
        if self.linger_factor == 0 {
            bail!("linger factor must be positive");
        }
        Ok(())
    }

    pub fn max_datagram_len(&self) -> usize {
        self.mtu - Self::IP_UDP_HEADER_LEN
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_datagram_len() - Segment::HEADER_LEN
    }

    /// The number of bytes beyond its delivery position that a receiver accepts
    pub fn receive_window_bytes(&self) -> u64 {
        self.sws as u64 * self.max_payload_len() as u64
    }

    /// NB: the receiver re-sends its FIN every `control_timeout`, so the linger must span
    ///  `linger_factor` of those intervals for a run of lost final ACKs and FINs to be detected
    pub fn teardown_linger(&self, rto: Duration) -> Duration {
        max(rto, self.control_timeout) * self.linger_factor
    }
}
