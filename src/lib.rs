//! A minimal TCP-like transport running over UDP: a single sender streams a file to a single
//!  receiver, with a three-way handshake, cumulative acknowledgments, a fixed-size go-back-N
//!  send window, adaptive retransmission timeouts and a four-way teardown.
//!
//! ## Design goals
//!
//! * Exactly-once, in-order delivery of the byte stream on a network that loses, duplicates,
//!   reorders and corrupts datagrams
//! * One connection per process and one direction of data flow - the receiver only sends
//!   control segments
//! * Segments never exceed the configured MTU, i.e. there is no IP-level fragmentation
//! * Every retry loop is bounded, so an unreachable peer results in an error rather than a hang
//! * No congestion control, no selective acknowledgments, no window scaling
//!
//! ## Segment format
//!
//! Every UDP datagram carries exactly one segment. All numbers are in network byte order:
//!
//! ```ascii
//!  0: sequence number (u32) - byte offset of the payload in the stream
//!  4: acknowledgment number (u32) - the next byte offset the sender of the segment expects
//!  8: timestamp (i64) - nanoseconds on the sender's clock, echoed back in acknowledgments
//! 16: length and flags (u32):
//!     * payload length in the upper 29 bits
//!     * SYN (0b100), FIN (0b010) and ACK (0b001) in the lower 3 bits
//! 20: reserved (u16), always zero
//! 22: checksum (u16) - ones' complement internet checksum over the entire segment, with the
//!      checksum field itself skipped
//! 24: payload
//! ```
//!
//! With 20 bytes of IP header and 8 bytes of UDP header, an MTU of `mtu` leaves `mtu - 52` bytes
//!  of payload per segment.
//!
//! ## Connection lifecycle
//!
//! ```ascii
//! sender                                 receiver
//!   SYN (seq 0)                  --->
//!                                <---    SYN+ACK (ack 1, echoing the SYN's timestamp)
//!   ACK (ack 1)                  --->
//!   data segments (seq = offset) --->
//!                                <---    ACK (ack = next expected offset)
//!   FIN (seq = stream length)    --->
//!                                <---    ACK (ack = stream length + 1)
//!                                <---    FIN
//!   ACK (seq = stream length + 1)--->
//! ```
//!
//! Both ends linger after acknowledging the peer's FIN, re-acknowledging repeated FINs, so that a
//!  lost final ACK does not leave the peer retrying forever.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod file_io;
pub mod receive_buffer;
pub mod receiver;
pub mod rto;
pub mod segment;
pub mod send_window;
pub mod sender;
pub mod stats;
pub mod transport;


#[cfg(test)]
mod end_to_end;
