use std::fmt::{Display, Formatter};
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use crate::error::FramingError;

bitflags! {
    /// Connection flags, packed into the three low-order bits of the `length_and_flags` field
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct Flags: u32 {
        const SYN = 0b100;
        const FIN = 0b010;
        const ACK = 0b001;
    }
}

/// A single unit of transmission. The payload length is not stored separately: it is the length
///  of `payload`, and it is packed with the flags on the wire.
///
/// `checksum` is the value received on the wire for deserialized segments. Segments created
///  locally leave it at zero, which causes `ser` to compute it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sequence_number: u32,
    pub acknowledgment_number: u32,
    pub timestamp: i64,
    pub flags: Flags,
    pub checksum: u16,
    pub payload: Vec<u8>,
}

impl Segment {
    pub const HEADER_LEN: usize = 24;
    pub const MAX_PAYLOAD_LEN: usize = (u32::MAX >> 3) as usize;

    const FLAGS_BITS: u32 = 3;
    const FLAGS_MASK: u32 = 0b111;
    const OFFSET_CHECKSUM: usize = 22;

    pub fn control(flags: Flags, sequence_number: u32, acknowledgment_number: u32, timestamp: i64) -> Segment {
        Segment {
            sequence_number,
            acknowledgment_number,
            timestamp,
            flags,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    /// Data segments always carry the ACK flag
    pub fn data(sequence_number: u32, acknowledgment_number: u32, timestamp: i64, payload: Vec<u8>) -> Segment {
        assert!(payload.len() <= Self::MAX_PAYLOAD_LEN);
        Segment {
            sequence_number,
            acknowledgment_number,
            timestamp,
            flags: Flags::ACK,
            checksum: 0,
            payload,
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags.contains(Flags::SYN)
    }

    pub fn is_fin(&self) -> bool {
        self.flags.contains(Flags::FIN)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(Flags::ACK)
    }

    pub fn is_syn_ack(&self) -> bool {
        self.flags.contains(Flags::SYN | Flags::ACK)
    }

    pub fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn length_and_flags(&self) -> u32 {
        (self.payload_len() << Self::FLAGS_BITS) | self.flags.bits()
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut raw = Vec::with_capacity(self.serialized_len());
        raw.put_u32(self.sequence_number);
        raw.put_u32(self.acknowledgment_number);
        raw.put_i64(self.timestamp);
        raw.put_u32(self.length_and_flags());
        raw.put_u16(0); // reserved
        raw.put_u16(self.checksum);
        raw.put_slice(&self.payload);

        if self.checksum == 0 {
            let checksum = internet_checksum(&raw);
            raw[Self::OFFSET_CHECKSUM..Self::HEADER_LEN].copy_from_slice(&checksum.to_be_bytes());
        }
        buf.put_slice(&raw);
    }

    /// Parses a segment without looking at the checksum - that is [Segment::verify_checksum]'s job.
    pub fn deser(mut buf: &[u8]) -> Result<Segment, FramingError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(FramingError::TooShort { len: buf.len() });
        }

        let sequence_number = buf.get_u32();
        let acknowledgment_number = buf.get_u32();
        let timestamp = buf.get_i64();
        let length_and_flags = buf.get_u32();
        let _reserved = buf.get_u16();
        let checksum = buf.get_u16();

        let declared = (length_and_flags >> Self::FLAGS_BITS) as usize;
        if declared != buf.remaining() {
            return Err(FramingError::LengthMismatch { declared, actual: buf.remaining() });
        }

        Ok(Segment {
            sequence_number,
            acknowledgment_number,
            timestamp,
            flags: Flags::from_bits_truncate(length_and_flags & Self::FLAGS_MASK),
            checksum,
            payload: buf.to_vec(),
        })
    }

    /// Checks the checksum of a raw datagram against the checksum field embedded in it. This works
    ///  on the raw bytes rather than a parsed segment so that the reserved bits are covered as well.
    pub fn verify_checksum(datagram: &[u8]) -> bool {
        if datagram.len() < Self::HEADER_LEN {
            return false;
        }
        let stored = u16::from_be_bytes([datagram[Self::OFFSET_CHECKSUM], datagram[Self::OFFSET_CHECKSUM + 1]]);
        internet_checksum(datagram) == stored
    }
}

/// RFC 1071 one's complement checksum over a serialized segment, with the checksum field itself
///  treated as zero. An odd trailing byte is padded with a zero byte.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for (idx, chunk) in data.chunks(2).enumerate() {
        if idx * 2 == Segment::OFFSET_CHECKSUM {
            continue;
        }
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => unreachable!(),
        };
        sum += word as u32;
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// The per-segment summary line: `S A F D <seq> <payload len> <ack>`, with `-` for absent flags
impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let flag = |present: bool, c: char| if present { c } else { '-' };
        write!(f, "{} {} {} {} {} {} {}",
               flag(self.is_syn(), 'S'),
               flag(self.is_ack(), 'A'),
               flag(self.is_fin(), 'F'),
               flag(!self.payload.is_empty(), 'D'),
               self.sequence_number,
               self.payload.len(),
               self.acknowledgment_number,
        )
    }
}
