use std::collections::BTreeMap;
use tracing::trace;

/// Payloads that arrived ahead of the receiver's delivery position, keyed by sequence number
#[derive(Default)]
pub struct ReceiveBuffer {
    payloads: BTreeMap<u32, Vec<u8>>,
}

impl ReceiveBuffer {
    pub fn new() -> ReceiveBuffer {
        ReceiveBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn contains(&self, sequence_number: u32) -> bool {
        self.payloads.contains_key(&sequence_number)
    }

    /// Returns `false` if a payload with the same sequence number is already buffered, leaving
    ///  the buffered payload in place
    pub fn insert(&mut self, sequence_number: u32, payload: Vec<u8>) -> bool {
        if self.payloads.contains_key(&sequence_number) {
            return false;
        }
        self.payloads.insert(sequence_number, payload);
        true
    }

    /// Removes the contiguous run of payloads starting at `expected`, returning the new delivery
    ///  position and the byte ranges to write, in offset order.
    ///
    /// Entries entirely below `expected` are dropped, and an entry that overlaps `expected` only
    ///  contributes the bytes from `expected` onwards.
    pub fn drain_contiguous(&mut self, mut expected: u32) -> (u32, Vec<(u32, Vec<u8>)>) {
        let mut ranges = Vec::new();

        while let Some(entry) = self.payloads.first_entry() {
            let sequence_number = *entry.key();
            if sequence_number > expected {
                break;
            }

            let payload = entry.remove();
            let end = sequence_number + payload.len() as u32;
            if end <= expected {
                trace!("dropping buffered segment #{} which is below the delivery position #{}", sequence_number, expected);
                continue;
            }

            let skip = (expected - sequence_number) as usize;
            let bytes = if skip == 0 { payload } else { payload[skip..].to_vec() };
            ranges.push((expected, bytes));
            expected = end;
        }

        (expected, ranges)
    }
}
