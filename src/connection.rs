use std::fmt::{Display, Formatter};
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::error::{ProtocolError, ProtocolStep};
use crate::segment::Segment;
use crate::transport::{Incoming, SegmentChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Closed,
    Handshake,
    Established,
    Teardown,
}

impl Display for ConnectionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionPhase::Closed => "CLOSED",
            ConnectionPhase::Handshake => "HANDSHAKE",
            ConnectionPhase::Established => "ESTABLISHED",
            ConnectionPhase::Teardown => "TEARDOWN",
        };
        write!(f, "{}", s)
    }
}

/// How a wait point reacts to a received segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// this is the segment we were waiting for
    Accept,
    /// the peer did not get our segment: send it again
    Resend,
    /// the peer repeated the segment we are answering: send our answer again, echoing the
    ///  repeated segment's timestamp so that the peer's RTT sample starts at its latest copy
    ResendEchoing,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutMeaning {
    /// nothing arrived in time: send again
    Resend,
    /// the peer has been silent for a full timeout, so it evidently got our segment
    Success,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub step: ProtocolStep,
    pub on_timeout: TimeoutMeaning,
    pub max_attempts: u32,
    /// give every resent copy a fresh timestamp - only for segments whose timestamp is ours
    ///  rather than an echo of the peer's
    pub restamp: bool,
}

impl RetryPolicy {
    pub fn resend_on_timeout(step: ProtocolStep, max_attempts: u32, restamp: bool) -> RetryPolicy {
        RetryPolicy { step, on_timeout: TimeoutMeaning::Resend, max_attempts, restamp }
    }

    pub fn linger(step: ProtocolStep, max_attempts: u32) -> RetryPolicy {
        RetryPolicy { step, on_timeout: TimeoutMeaning::Success, max_attempts, restamp: false }
    }
}

/// The bounded-retry wait shared by all handshake and teardown steps: sends `segment`, then
///  classifies every arriving segment until one is accepted or - for a lingering wait - the
///  peer stays silent for a full timeout.
///
/// The timeout runs from the most recent transmission of `segment`; segments that are ignored
///  do not extend it.
///
/// Every re-send after a timeout counts as an attempt, and so does a re-send triggered by the
///  peer unless the previous counted attempt is less than one timeout old. The latter happens
///  when several copies of the peer's segment were in flight at once, and they all are answered
///  by a single attempt. The wait fails with [ProtocolError::RetriesExhausted] once
///  `max_attempts` is reached, so a peer that never answers sees exactly `max_attempts` copies
///  of the segment.
///
/// Returns the accepted segment, or `None` if a lingering wait ended in silence.
pub async fn bounded_wait(
    channel: &mut SegmentChannel,
    segment: &mut Segment,
    policy: RetryPolicy,
    mut classify: impl FnMut(&Segment) -> Verdict + Send,
) -> anyhow::Result<Option<Segment>> {
    channel.send_segment(segment).await;

    let mut attempts = Attempts {
        num_counted: 1,
        last_counted: Instant::now(),
    };
    let mut deadline = channel.deadline();
    loop {
        match channel.recv_segment_until(deadline).await {
            Incoming::Segment { segment: received, .. } => match classify(&received) {
                Verdict::Accept => return Ok(Some(received)),
                Verdict::Ignore => {
                    trace!("ignoring {} while {}", received, policy.step);
                }
                Verdict::Resend => {
                    debug!("peer repeated {} while {} - resending {}", received, policy.step, segment);
                    attempts.on_peer_triggered(channel, &policy)?;
                    if policy.restamp {
                        segment.timestamp = channel.clock().now_nanos();
                    }
                    channel.send_segment(segment).await;
                    deadline = channel.deadline();
                }
                Verdict::ResendEchoing => {
                    debug!("peer repeated {} while {} - answering again", received, policy.step);
                    attempts.on_peer_triggered(channel, &policy)?;
                    segment.timestamp = received.timestamp;
                    channel.send_segment(segment).await;
                    deadline = channel.deadline();
                }
            },
            Incoming::Corrupt { .. } => {}
            Incoming::TimedOut => match policy.on_timeout {
                TimeoutMeaning::Success => {
                    trace!("no reaction from peer while {} - done", policy.step);
                    return Ok(None);
                }
                TimeoutMeaning::Resend => {
                    debug!("timeout while {} - resending {}", policy.step, segment);
                    attempts.count(&policy)?;
                    if policy.restamp {
                        segment.timestamp = channel.clock().now_nanos();
                    }
                    channel.send_segment(segment).await;
                    deadline = channel.deadline();
                }
            },
        }
    }
}

struct Attempts {
    num_counted: u32,
    last_counted: Instant,
}

impl Attempts {
    fn count(&mut self, policy: &RetryPolicy) -> anyhow::Result<()> {
        if self.num_counted >= policy.max_attempts {
            return Err(ProtocolError::RetriesExhausted { step: policy.step, attempts: self.num_counted }.into());
        }
        self.num_counted += 1;
        self.last_counted = Instant::now();
        Ok(())
    }

    fn on_peer_triggered(&mut self, channel: &SegmentChannel, policy: &RetryPolicy) -> anyhow::Result<()> {
        if let Some(timeout) = channel.timeout() {
            if self.last_counted.elapsed() < timeout {
                trace!("repeated segment within {:?} of the previous attempt - not counting it", timeout);
                return Ok(());
            }
        }
        self.count(policy)
    }
}
