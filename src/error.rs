use std::fmt::{Display, Formatter};

/// A datagram that can not be parsed as a segment. This is never fatal: the channel discards the
///  datagram and counts it like a checksum failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    TooShort { len: usize },
    LengthMismatch { declared: usize, actual: usize },
}

impl Display for FramingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::TooShort { len } => write!(f, "datagram of {} bytes is shorter than a segment header", len),
            FramingError::LengthMismatch { declared, actual } => write!(f, "header declares {} payload bytes, datagram carries {}", declared, actual),
        }
    }
}

impl std::error::Error for FramingError {}

/// The wait points of the protocol, used to report where a connection gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStep {
    AwaitSynAck,
    ConfirmHandshakeAck,
    AwaitHandshakeAck,
    AwaitDataAck,
    AwaitFinAck,
    ConfirmFinAck,
    AwaitFinalAck,
    ConfirmFinalAck,
}

impl Display for ProtocolStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolStep::AwaitSynAck => "waiting for SYN+ACK",
            ProtocolStep::ConfirmHandshakeAck => "confirming the handshake ACK",
            ProtocolStep::AwaitHandshakeAck => "waiting for the handshake ACK",
            ProtocolStep::AwaitDataAck => "waiting for data ACKs",
            ProtocolStep::AwaitFinAck => "waiting for the ACK of FIN",
            ProtocolStep::ConfirmFinAck => "confirming the ACK of FIN",
            ProtocolStep::AwaitFinalAck => "waiting for the final ACK",
            ProtocolStep::ConfirmFinalAck => "confirming the final ACK",
        };
        write!(f, "{}", s)
    }
}

/// Conditions that terminate a connection. They are propagated as `anyhow::Error` and can be
///  recovered with `downcast_ref` where callers need to distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    RetriesExhausted { step: ProtocolStep, attempts: u32 },
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::RetriesExhausted { step, attempts } => write!(f, "giving up after {} attempts while {}", attempts, step),
        }
    }
}

impl std::error::Error for ProtocolError {}
