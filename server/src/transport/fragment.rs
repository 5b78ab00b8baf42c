use std::time::{Duration, Instant};

use thiserror::Error;

/// Length of the total-length prefix carried by the first fragment.
pub const FRAGMENT_PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    #[error("first fragment of {len} bytes is shorter than its length prefix")]
    MissingPrefix { len: usize },

    #[error("fragment data overruns the declared total of {declared} bytes")]
    Overrun { declared: u32 },

    #[error("fragment arrived with no reassembly in progress")]
    NoReassembly,
}

/// Splits a serialized message unit into fragment chunks of at most
/// `max_chunk` bytes each. The first chunk starts with the unit's total
/// length so the receiver knows when reassembly is complete.
pub fn split_unit(unit: &[u8], max_chunk: usize) -> Vec<Vec<u8>> {
    debug_assert!(max_chunk > FRAGMENT_PREFIX_LEN);

    let mut chunks = Vec::new();
    let mut first = Vec::with_capacity(max_chunk);
    first.extend_from_slice(&(unit.len() as u32).to_le_bytes());
    let first_take = (max_chunk - FRAGMENT_PREFIX_LEN).min(unit.len());
    first.extend_from_slice(&unit[..first_take]);
    chunks.push(first);

    let mut offset = first_take;
    while offset < unit.len() {
        let take = max_chunk.min(unit.len() - offset);
        chunks.push(unit[offset..offset + take].to_vec());
        offset += take;
    }
    chunks
}

/// Accumulates fragment chunks back into the original unit. Fragments
/// arrive through the ordered reliable channel, so reassembly is a
/// sequential append.
pub struct Reassembly {
    message_type: u16,
    declared: u32,
    data: Vec<u8>,
    started_at: Instant,
}

impl Reassembly {
    /// Starts a reassembly from the first fragment chunk.
    pub fn begin(message_type: u16, first_chunk: &[u8], now: Instant) -> Result<Self, FragmentError> {
        if first_chunk.len() < FRAGMENT_PREFIX_LEN {
            return Err(FragmentError::MissingPrefix {
                len: first_chunk.len(),
            });
        }
        let mut prefix = [0u8; FRAGMENT_PREFIX_LEN];
        prefix.copy_from_slice(&first_chunk[..FRAGMENT_PREFIX_LEN]);
        let declared = u32::from_le_bytes(prefix);

        let mut reassembly = Self {
            message_type,
            declared,
            data: Vec::with_capacity(declared as usize),
            started_at: now,
        };
        reassembly.feed(&first_chunk[FRAGMENT_PREFIX_LEN..])?;
        Ok(reassembly)
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), FragmentError> {
        if self.data.len() + chunk.len() > self.declared as usize {
            return Err(FragmentError::Overrun {
                declared: self.declared,
            });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    pub fn message_type(&self) -> u16 {
        self.message_type
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() == self.declared as usize
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.started_at) > timeout
    }

    pub fn into_unit(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_unit_is_one_chunk() {
        let unit = vec![7u8; 10];
        let chunks = split_unit(&unit, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][..4], &10u32.to_le_bytes());
    }

    #[test]
    fn chunks_respect_the_budget() {
        let unit = vec![1u8; 2600];
        let chunks = split_unit(&unit, 1182);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 1182));
        let reassembled: usize = chunks[0].len() - 4 + chunks[1].len() + chunks[2].len();
        assert_eq!(reassembled, 2600);
    }

    #[test]
    fn split_then_reassemble_round_trips() {
        let unit: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let chunks = split_unit(&unit, 700);

        let now = Instant::now();
        let mut reassembly = Reassembly::begin(0x1009, &chunks[0], now).unwrap();
        for chunk in &chunks[1..] {
            assert!(!reassembly.is_complete());
            reassembly.feed(chunk).unwrap();
        }
        assert!(reassembly.is_complete());
        assert_eq!(reassembly.into_unit(), unit);
    }

    #[test]
    fn overrun_is_rejected() {
        let chunks = split_unit(&[1u8; 16], 12);
        let now = Instant::now();
        let mut reassembly = Reassembly::begin(0x1009, &chunks[0], now).unwrap();
        assert_eq!(
            reassembly.feed(&[0u8; 64]),
            Err(FragmentError::Overrun { declared: 16 })
        );
    }

    #[test]
    fn staleness_uses_the_start_time() {
        let chunks = split_unit(&[1u8; 64], 12);
        let start = Instant::now();
        let reassembly = Reassembly::begin(0x1009, &chunks[0], start).unwrap();
        let timeout = Duration::from_secs(5);
        assert!(!reassembly.is_stale(start + Duration::from_secs(4), timeout));
        assert!(reassembly.is_stale(start + Duration::from_secs(6), timeout));
    }
}
