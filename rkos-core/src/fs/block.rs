use super::Tsb;
use crate::constants::disk::{
    BLOCK_OVERHEAD, BLOCK_PAYLOAD, BLOCK_SIZE, NEXT_NONE, STATUS_FREE, STATUS_OCCUPIED,
};

/// One on-disk block: a status byte, a next-block address chaining
/// content blocks together, and a fixed-size payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskBlock {
    pub occupied: bool,
    pub next: Option<Tsb>,
    pub payload: Vec<u8>, // At most BLOCK_PAYLOAD bytes
}

impl DiskBlock {
    pub fn free() -> DiskBlock {
        DiskBlock {
            occupied: false,
            next: None,
            payload: Vec::new(),
        }
    }

    pub fn occupied(next: Option<Tsb>, payload: Vec<u8>) -> DiskBlock {
        DiskBlock {
            occupied: true,
            next,
            payload,
        }
    }

    /// Payload with the zero padding stripped, as stored names and
    /// text content are
    pub fn trimmed_payload(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.payload[..end]
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.occupied && self.trimmed_payload() == name.as_bytes()
    }

    /// Serializes to the fixed stored layout:
    /// [status, next.t, next.s, next.b, payload...]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; BLOCK_SIZE];
        bytes[0] = if self.occupied {
            STATUS_OCCUPIED
        } else {
            STATUS_FREE
        };
        match self.next {
            Some(tsb) => {
                bytes[1] = tsb.track;
                bytes[2] = tsb.sector;
                bytes[3] = tsb.block;
            }
            None => {
                bytes[1] = NEXT_NONE;
                bytes[2] = NEXT_NONE;
                bytes[3] = NEXT_NONE;
            }
        }
        let len = self.payload.len().min(BLOCK_PAYLOAD);
        bytes[BLOCK_OVERHEAD..BLOCK_OVERHEAD + len].copy_from_slice(&self.payload[..len]);
        bytes
    }

    /// Parses a stored value back into a block; anything missing or
    /// short reads as a free block
    pub fn from_bytes(bytes: &[u8]) -> DiskBlock {
        if bytes.len() < BLOCK_OVERHEAD {
            return DiskBlock::free();
        }
        let next = if bytes[1] == NEXT_NONE {
            None
        } else {
            Some(Tsb::new(bytes[1], bytes[2], bytes[3]))
        };
        DiskBlock {
            occupied: bytes[0] == STATUS_OCCUPIED,
            next,
            payload: bytes[BLOCK_OVERHEAD..bytes.len().min(BLOCK_SIZE)].to_vec(),
        }
    }
}

#[cfg(test)]
mod block_tests {
    use super::*;

    #[test]
    fn test_serialized_layout() {
        let block = DiskBlock::occupied(Some(Tsb::new(1, 2, 3)), b"swap".to_vec());
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        assert_eq!(bytes[0], STATUS_OCCUPIED);
        assert_eq!(&bytes[1..4], &[1, 2, 3]);
        assert_eq!(&bytes[4..8], b"swap");
    }

    #[test]
    fn test_round_trip_preserves_chain_terminator() {
        let block = DiskBlock::occupied(None, b"tail".to_vec());
        let parsed = DiskBlock::from_bytes(&block.to_bytes());
        assert!(parsed.occupied);
        assert_eq!(parsed.next, None);
        assert_eq!(parsed.trimmed_payload(), b"tail");
    }

    #[test]
    fn test_missing_value_parses_as_free() {
        let parsed = DiskBlock::from_bytes(&[]);
        assert!(!parsed.occupied);
        assert_eq!(parsed.next, None);
    }
}
