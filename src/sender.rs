use std::cmp::min;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, bail};
use tracing::{debug, info, trace, warn};
use crate::clock::Clock;
use crate::config::TcpEndConfig;
use crate::connection::{bounded_wait, ConnectionPhase, RetryPolicy, Verdict};
use crate::error::{ProtocolError, ProtocolStep};
use crate::file_io::ByteSource;
use crate::rto::RtoEstimator;
use crate::segment::{Flags, Segment};
use crate::send_window::SendWindow;
use crate::stats::SenderStats;
use crate::transport::{DatagramSocket, Incoming, SegmentChannel};

/// The sending endpoint of a connection: connects to the receiver, streams the source through a
///  fixed-size go-back-N window, and closes the connection once every byte is acknowledged.
///
/// Sequence numbers are byte offsets into the source. The FIN carries the source length as its
///  sequence number, and the final ACK the source length + 1.
pub struct Sender<S: ByteSource> {
    config: Arc<TcpEndConfig>,
    channel: SegmentChannel,
    source: S,
    stream_len: u32,
    phase: ConnectionPhase,

    rto: RtoEstimator,
    window: SendWindow,
    /// the acknowledgment number our segments carry, i.e. the receiver's SYN + 1
    peer_ack_number: u32,
    next_seq: u32,
    /// the highest sequence number that was ever sent - go-back-N may move `next_seq` below it
    high_water_mark: u32,
    last_ack: u32,
    any_ack_received: bool,
    /// how often `last_ack` arrived since it advanced or since the last go-back-N
    ack_occurrences: u32,
    consecutive_timeouts: u32,
    handshake_ack: Option<Segment>,

    retransmissions: u64,
    duplicate_acks: u64,
}

impl<S: ByteSource> Sender<S> {
    /// The number of times the same cumulative ACK must arrive to trigger go-back-N
    pub const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

    pub fn new(config: Arc<TcpEndConfig>, socket: Arc<dyn DatagramSocket>, peer_addr: SocketAddr, mut source: S) -> anyhow::Result<Sender<S>> {
        config.validate()?;

        let total_len = source.total_len()?;
        // NB: FIN and the final ACK need two more sequence numbers after the data
        let stream_len = match u32::try_from(total_len) {
            Ok(len) if len <= u32::MAX - 2 => len,
            _ => bail!("source of {} bytes exceeds the sequence number space", total_len),
        };

        let channel = SegmentChannel::new(socket, Some(peer_addr), config.max_datagram_len(), Clock::new());
        let rto = RtoEstimator::new(config.initial_timeout, config.min_timeout, config.max_timeout);
        let window = SendWindow::new(config.sws);

        Ok(Sender {
            config,
            channel,
            source,
            stream_len,
            phase: ConnectionPhase::Closed,
            rto,
            window,
            peer_ack_number: 0,
            next_seq: 0,
            high_water_mark: 0,
            last_ack: 0,
            any_ack_received: false,
            ack_occurrences: 0,
            consecutive_timeouts: 0,
            handshake_ack: None,
            retransmissions: 0,
            duplicate_acks: 0,
        })
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn stream_len(&self) -> u32 {
        self.stream_len
    }

    pub fn last_ack(&self) -> u32 {
        self.last_ack
    }

    pub fn retransmission_timeout(&self) -> Duration {
        self.rto.timeout()
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            traffic: self.channel.counters(),
            retransmissions: self.retransmissions,
            duplicate_acks: self.duplicate_acks,
        }
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        debug!("sender: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    pub async fn run(&mut self) -> anyhow::Result<SenderStats> {
        self.connect().await?;
        self.transfer().await?;
        self.close().await?;
        Ok(self.stats())
    }

    fn take_rtt_sample(&mut self, echoed_timestamp: i64) {
        let sample = self.channel.clock().rtt_sample_nanos(echoed_timestamp);
        let timeout = self.rto.on_sample(sample);
        self.channel.set_timeout(Some(timeout));
    }

    pub async fn connect(&mut self) -> anyhow::Result<()> {
        self.set_phase(ConnectionPhase::Handshake);
        self.channel.set_timeout(Some(self.rto.timeout()));

        let mut syn = Segment::control(Flags::SYN, 0, 0, self.channel.clock().now_nanos());
        let syn_ack = bounded_wait(
            &mut self.channel,
            &mut syn,
            RetryPolicy::resend_on_timeout(ProtocolStep::AwaitSynAck, self.config.max_retries, true),
            |s| if s.is_syn_ack() { Verdict::Accept } else { Verdict::Ignore },
        ).await?
            .ok_or_else(|| anyhow!("handshake ended without SYN+ACK"))?;

        // this is the first RTT sample, initializing the estimator
        self.take_rtt_sample(syn_ack.timestamp);
        self.peer_ack_number = syn_ack.sequence_number.wrapping_add(1);

        let mut ack = Segment::control(Flags::ACK, 0, self.peer_ack_number, self.channel.clock().now_nanos());
        bounded_wait(
            &mut self.channel,
            &mut ack,
            RetryPolicy::linger(ProtocolStep::ConfirmHandshakeAck, self.config.max_retries),
            |s| if s.is_syn_ack() { Verdict::Resend } else { Verdict::Ignore },
        ).await?;
        self.handshake_ack = Some(ack);

        info!("connected to {:?}, RTT estimate {:?}ns, timeout {:?}", self.channel.peer_addr(), self.rto.est_rtt_nanos(), self.rto.timeout());
        Ok(())
    }

    pub async fn transfer(&mut self) -> anyhow::Result<()> {
        self.set_phase(ConnectionPhase::Established);
        self.consecutive_timeouts = 0;

        // NB: the retransmission timer restarts only on ACKs and on retransmission
        let mut deadline = self.channel.deadline();
        loop {
            self.fill().await?;
            if self.is_fully_acknowledged() {
                break;
            }

            match self.channel.recv_segment_until(deadline).await {
                Incoming::Segment { segment, .. } => {
                    if self.on_segment(&segment).await {
                        deadline = self.channel.deadline();
                    }
                }
                Incoming::Corrupt { .. } => {}
                Incoming::TimedOut => {
                    self.on_timeout().await?;
                    deadline = self.channel.deadline();
                }
            }
        }

        info!("all {} bytes were acknowledged", self.stream_len);
        Ok(())
    }

    pub fn is_fully_acknowledged(&self) -> bool {
        self.last_ack >= self.stream_len
    }

    /// Returns `true` if the segment was an ACK that was taken into account
    async fn on_segment(&mut self, segment: &Segment) -> bool {
        if segment.is_syn_ack() {
            // the receiver did not get our handshake ACK
            if let Some(ack) = self.handshake_ack.clone() {
                debug!("receiver repeated its SYN+ACK - resending the handshake ACK");
                self.channel.send_segment(&ack).await;
            }
            false
        }
        else if segment.is_ack() && !segment.is_fin() {
            self.on_ack(segment)
        }
        else {
            trace!("ignoring {} during data transfer", segment);
            false
        }
    }

    /// Sends new data segments while the window has room and unsent data remains
    pub async fn fill(&mut self) -> anyhow::Result<()> {
        let max_payload_len = self.config.max_payload_len() as u32;

        while !self.window.is_full() && self.next_seq < self.stream_len {
            let len = min(max_payload_len, self.stream_len - self.next_seq) as usize;
            let mut payload = vec![0u8; len];
            let num_read = self.source.read_at(self.next_seq as u64, &mut payload)?;
            if num_read != len {
                bail!("source ended at offset {} although it announced {} bytes", self.next_seq as usize + num_read, self.stream_len);
            }

            let segment = Segment::data(self.next_seq, self.peer_ack_number, self.channel.clock().now_nanos(), payload);
            self.channel.send_segment(&segment).await;
            self.window.insert(segment);

            self.next_seq += len as u32;
            self.high_water_mark = self.high_water_mark.max(self.next_seq);
        }
        Ok(())
    }

    /// Returns `false` for an ACK beyond anything that was sent, which is ignored
    pub fn on_ack(&mut self, ack: &Segment) -> bool {
        let ack_number = ack.acknowledgment_number;
        if ack_number > self.high_water_mark {
            warn!("received ACK #{} beyond the highest sent sequence number #{} - ignoring", ack_number, self.high_water_mark);
            return false;
        }

        self.take_rtt_sample(ack.timestamp);
        self.consecutive_timeouts = 0;

        if ack_number == self.last_ack {
            if self.any_ack_received {
                self.duplicate_acks += 1;
            }
            self.any_ack_received = true;
            self.ack_occurrences += 1;
            trace!("ACK #{} received {} times", ack_number, self.ack_occurrences);

            if self.ack_occurrences >= Self::FAST_RETRANSMIT_THRESHOLD {
                self.go_back_n();
            }
        }
        else if ack_number > self.last_ack {
            self.any_ack_received = true;
            self.last_ack = ack_number;
            self.ack_occurrences = 1;
            self.window.evict_below(ack_number);
            if self.next_seq < ack_number {
                // the receiver had buffered data past the go-back-N position
                self.next_seq = ack_number;
            }
        }
        else {
            trace!("received ACK #{} which is below the ack threshold of #{} - ignoring", ack_number, self.last_ack);
        }
        true
    }

    fn go_back_n(&mut self) {
        let num_cleared = self.window.clear();
        debug!("ACK #{} received {} times - going back to resend from there ({} segments were in flight)", self.last_ack, self.ack_occurrences, num_cleared);

        self.retransmissions += num_cleared as u64;
        self.next_seq = self.last_ack;
        self.ack_occurrences = 0;
    }

    pub async fn on_timeout(&mut self) -> anyhow::Result<()> {
        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts >= self.config.max_retries {
            return Err(ProtocolError::RetriesExhausted { step: ProtocolStep::AwaitDataAck, attempts: self.consecutive_timeouts }.into());
        }

        debug!("no ACK within {:?} (#{} in a row) - resending {} segments", self.rto.timeout(), self.consecutive_timeouts, self.window.len());
        let now = self.channel.clock().now_nanos();
        for segment in self.window.segments_mut() {
            segment.timestamp = now;
            self.channel.send_segment(segment).await;
            self.retransmissions += 1;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> anyhow::Result<()> {
        self.set_phase(ConnectionPhase::Teardown);
        self.channel.set_timeout(Some(self.rto.timeout()));

        let fin_seq = self.stream_len;
        let mut fin = Segment::control(Flags::FIN | Flags::ACK, fin_seq, self.peer_ack_number, self.channel.clock().now_nanos());
        let reply = bounded_wait(
            &mut self.channel,
            &mut fin,
            RetryPolicy::resend_on_timeout(ProtocolStep::AwaitFinAck, self.config.max_retries, true),
            |s| if s.is_ack() && !s.is_syn() && s.acknowledgment_number == fin_seq + 1 { Verdict::Accept } else { Verdict::Ignore },
        ).await?
            .ok_or_else(|| anyhow!("teardown ended without an ACK of FIN"))?;

        let peer_fin = if reply.is_fin() {
            // the receiver's ACK got lost, but its FIN acknowledges our FIN as well
            reply
        }
        else {
            self.await_peer_fin().await
        };

        let mut final_ack = Segment::control(Flags::ACK, fin_seq + 1, peer_fin.sequence_number.wrapping_add(1), peer_fin.timestamp);
        self.channel.set_timeout(Some(self.config.teardown_linger(self.rto.timeout())));
        bounded_wait(
            &mut self.channel,
            &mut final_ack,
            RetryPolicy::linger(ProtocolStep::ConfirmFinalAck, self.config.max_retries),
            |s| if s.is_fin() { Verdict::ResendEchoing } else { Verdict::Ignore },
        ).await?;

        self.set_phase(ConnectionPhase::Closed);
        info!("connection to {:?} closed", self.channel.peer_addr());
        Ok(())
    }

    /// NB: there is no timeout here - the receiver lingers on its ACK before it sends its FIN
    async fn await_peer_fin(&mut self) -> Segment {
        let prev_timeout = self.channel.timeout();
        self.channel.set_timeout(None);

        let fin = loop {
            if let Incoming::Segment { segment, .. } = self.channel.recv_segment().await {
                if segment.is_fin() {
                    break segment;
                }
                trace!("ignoring {} while waiting for the receiver's FIN", segment);
            }
        };

        self.channel.set_timeout(prev_timeout);
        fin
    }
}
