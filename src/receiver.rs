use std::sync::Arc;
use anyhow::anyhow;
use tracing::{debug, info, trace};
use crate::clock::Clock;
use crate::config::TcpEndConfig;
use crate::connection::{bounded_wait, ConnectionPhase, RetryPolicy, Verdict};
use crate::error::ProtocolStep;
use crate::file_io::ByteSink;
use crate::receive_buffer::ReceiveBuffer;
use crate::segment::{Flags, Segment};
use crate::stats::ReceiverStats;
use crate::transport::{DatagramSocket, Incoming, SegmentChannel};

/// What the receiver did with a segment during data transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// the segment closed the gap at the delivery position, and this many bytes were written
    Delivered { num_bytes: usize },
    Buffered,
    Duplicate,
    OutOfSequence,
    /// a segment without payload, e.g. a repeated handshake ACK
    Control,
    Fin,
}

/// The receiving endpoint of a connection: accepts a single sender, writes its byte stream to
///  the sink in order, and acknowledges cumulatively.
///
/// Its own segments carry sequence number 0 - it never sends data.
pub struct Receiver<K: ByteSink> {
    config: Arc<TcpEndConfig>,
    channel: SegmentChannel,
    sink: K,
    phase: ConnectionPhase,
    buffer: ReceiveBuffer,
    /// the next byte offset to be delivered, i.e. the cumulative ACK
    expected: u32,
    out_of_sequence_discarded: u64,
}

impl<K: ByteSink> Receiver<K> {
    pub fn new(config: Arc<TcpEndConfig>, socket: Arc<dyn DatagramSocket>, sink: K) -> anyhow::Result<Receiver<K>> {
        config.validate()?;

        let channel = SegmentChannel::new(socket, None, config.max_datagram_len(), Clock::new());
        Ok(Receiver {
            config,
            channel,
            sink,
            phase: ConnectionPhase::Closed,
            buffer: ReceiveBuffer::new(),
            expected: 0,
            out_of_sequence_discarded: 0,
        })
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            traffic: self.channel.counters(),
            out_of_sequence_discarded: self.out_of_sequence_discarded,
        }
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        debug!("receiver: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    pub async fn run(&mut self) -> anyhow::Result<ReceiverStats> {
        let first = self.accept().await?;
        let fin = self.transfer(first).await?;
        self.sink.flush_all()?;
        self.close(&fin).await?;
        Ok(self.stats())
    }

    /// Waits for a SYN and completes the handshake with its sender. If the sender's handshake
    ///  ACK was lost, its first data segment (or its FIN for an empty stream) completes the
    ///  handshake instead and is returned for processing by the data phase.
    pub async fn accept(&mut self) -> anyhow::Result<Option<Segment>> {
        self.set_phase(ConnectionPhase::Handshake);
        self.channel.set_timeout(None);

        let syn = loop {
            match self.channel.recv_segment().await {
                Incoming::Segment { segment, from } if segment.is_syn() && !segment.is_ack() => {
                    self.channel.set_peer_addr(from);
                    break segment;
                }
                Incoming::Segment { segment, from } => {
                    debug!("ignoring {} from {:?} while waiting for SYN", segment, from);
                }
                Incoming::Corrupt { .. } | Incoming::TimedOut => {}
            }
        };

        let mut syn_ack = Segment::control(Flags::SYN | Flags::ACK, 0, syn.sequence_number.wrapping_add(1), syn.timestamp);
        self.channel.set_timeout(Some(self.config.control_timeout));
        let handshake_ack = bounded_wait(
            &mut self.channel,
            &mut syn_ack,
            RetryPolicy::resend_on_timeout(ProtocolStep::AwaitHandshakeAck, self.config.max_retries, false),
            |s| {
                if s.is_syn() && !s.is_ack() {
                    Verdict::ResendEchoing
                }
                else if s.is_ack() && !s.is_syn() {
                    Verdict::Accept
                }
                else {
                    Verdict::Ignore
                }
            },
        ).await?
            .ok_or_else(|| anyhow!("handshake ended without an ACK"))?;

        self.channel.set_timeout(None);
        self.set_phase(ConnectionPhase::Established);
        info!("connection from {:?} established", self.channel.peer_addr());

        if handshake_ack.payload.is_empty() && !handshake_ack.is_fin() {
            Ok(None)
        }
        else {
            debug!("the handshake ACK was lost, {} completed the handshake", handshake_ack);
            Ok(Some(handshake_ack))
        }
    }

    /// Processes segments until the sender's FIN arrives, returning the FIN
    pub async fn transfer(&mut self, first: Option<Segment>) -> anyhow::Result<Segment> {
        if let Some(segment) = first {
            if self.on_segment(&segment).await? == SegmentOutcome::Fin {
                return Ok(segment);
            }
        }

        loop {
            match self.channel.recv_segment().await {
                Incoming::Segment { segment, .. } => {
                    if self.on_segment(&segment).await? == SegmentOutcome::Fin {
                        return Ok(segment);
                    }
                }
                // counted by the channel and never acknowledged
                Incoming::Corrupt { .. } => {}
                Incoming::TimedOut => {}
            }
        }
    }

    /// Handles a checksum-verified segment during data transfer. Everything except FIN is
    ///  answered with the current cumulative ACK, echoing the segment's timestamp.
    pub async fn on_segment(&mut self, segment: &Segment) -> anyhow::Result<SegmentOutcome> {
        if segment.is_syn() {
            trace!("ignoring late {} after the handshake", segment);
            return Ok(SegmentOutcome::Control);
        }

        let seq = segment.sequence_number;
        let outcome = if segment.payload.is_empty() && !segment.is_fin() {
            SegmentOutcome::Control
        }
        else if seq < self.expected || (seq - self.expected) as u64 >= self.config.receive_window_bytes() {
            debug!("received segment #{} outside of the receive window starting at #{} - discarding", seq, self.expected);
            self.out_of_sequence_discarded += 1;
            SegmentOutcome::OutOfSequence
        }
        else if segment.is_fin() {
            if seq == self.expected {
                debug!("received FIN at #{} - all data was delivered", seq);
                return Ok(SegmentOutcome::Fin);
            }
            debug!("received FIN at #{} although data from #{} is still missing - discarding", seq, self.expected);
            self.out_of_sequence_discarded += 1;
            SegmentOutcome::OutOfSequence
        }
        else if !self.buffer.insert(seq, segment.payload.clone()) {
            trace!("segment #{} is already buffered", seq);
            SegmentOutcome::Duplicate
        }
        else if seq == self.expected {
            SegmentOutcome::Delivered { num_bytes: self.deliver()? }
        }
        else {
            trace!("buffering segment #{} until #{} arrives", seq, self.expected);
            SegmentOutcome::Buffered
        };

        let ack = Segment::control(Flags::ACK, 0, self.expected, segment.timestamp);
        self.channel.send_segment(&ack).await;
        Ok(outcome)
    }

    fn deliver(&mut self) -> anyhow::Result<usize> {
        let (expected, ranges) = self.buffer.drain_contiguous(self.expected);

        let mut num_bytes = 0;
        for (offset, bytes) in ranges {
            self.sink.write_at(offset as u64, &bytes)?;
            num_bytes += bytes.len();
        }
        trace!("delivered {} bytes, now expecting #{}", num_bytes, expected);

        self.expected = expected;
        Ok(num_bytes)
    }

    pub async fn close(&mut self, fin: &Segment) -> anyhow::Result<()> {
        self.set_phase(ConnectionPhase::Teardown);
        self.channel.set_timeout(Some(self.config.control_timeout));

        let fin_ack_number = fin.sequence_number.wrapping_add(1);
        let mut ack = Segment::control(Flags::ACK, 0, fin_ack_number, fin.timestamp);
        bounded_wait(
            &mut self.channel,
            &mut ack,
            RetryPolicy::linger(ProtocolStep::ConfirmFinAck, self.config.max_retries),
            |s| if s.is_fin() { Verdict::ResendEchoing } else { Verdict::Ignore },
        ).await?;

        let mut own_fin = Segment::control(Flags::FIN | Flags::ACK, 0, fin_ack_number, self.channel.clock().now_nanos());
        bounded_wait(
            &mut self.channel,
            &mut own_fin,
            RetryPolicy::resend_on_timeout(ProtocolStep::AwaitFinalAck, self.config.max_retries, true),
            |s| {
                let is_final_ack = s.is_ack() && !s.is_fin() && !s.is_syn()
                    && s.payload.is_empty()
                    && s.sequence_number == fin_ack_number
                    && s.acknowledgment_number == 1;
                if is_final_ack { Verdict::Accept } else { Verdict::Ignore }
            },
        ).await?;

        self.set_phase(ConnectionPhase::Closed);
        info!("connection from {:?} closed", self.channel.peer_addr());
        Ok(())
    }
}
