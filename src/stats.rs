use std::fmt::{Display, Formatter};

/// Per-endpoint traffic, counted by the segment channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    pub segments_sent: u64,
    pub payload_bytes_sent: u64,
    pub segments_received: u64,
    pub payload_bytes_received: u64,
    /// Datagrams that failed checksum verification or could not be parsed as a segment
    pub corrupt_discarded: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub traffic: TrafficCounters,
    pub retransmissions: u64,
    pub duplicate_acks: u64,
}

impl Display for SenderStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Data Transferred: {} bytes", self.traffic.payload_bytes_sent)?;
        writeln!(f, "Packets sent: {}", self.traffic.segments_sent)?;
        writeln!(f, "Retransmissions: {}", self.retransmissions)?;
        write!(f, "Duplicate Acknowledgements: {}", self.duplicate_acks)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub traffic: TrafficCounters,
    pub out_of_sequence_discarded: u64,
}

impl ReceiverStats {
    pub fn checksum_discarded(&self) -> u64 {
        self.traffic.corrupt_discarded
    }
}

impl Display for ReceiverStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Data Received: {} bytes", self.traffic.payload_bytes_received)?;
        writeln!(f, "Packets Received: {}", self.traffic.segments_received)?;
        writeln!(f, "Packets discarded (Out of sequence): {}", self.out_of_sequence_discarded)?;
        write!(f, "Packets discarded (Wrong checksum): {}", self.checksum_discarded())
    }
}
