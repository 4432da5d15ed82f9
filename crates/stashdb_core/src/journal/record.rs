//! Journal record types and framing.
//!
//! Frame layout (little endian):
//!
//! ```text
//! magic "SJNL" (4) | format (2) | payload length (4) | CBOR payload | CRC32 (4)
//! ```
//!
//! The CRC covers every byte before it.

use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use serde::{Deserialize, Serialize};
use stashdb_codec::{from_cbor, to_cbor, Key, KeyPath, Value};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SJNL";

/// Current journal format version.
pub const JOURNAL_FORMAT: u16 = 1;

/// magic (4) + format (2) + length (4)
pub(crate) const HEADER_SIZE: usize = 10;

pub(crate) const CRC_SIZE: usize = 4;

/// One mutation inside a commit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalOp {
    /// The database version moved to `version`.
    SetVersion {
        /// New version.
        version: u64,
    },
    /// An object store was created.
    CreateStore {
        /// Store name.
        name: String,
        /// In-line key path, if any.
        key_path: Option<KeyPath>,
        /// Whether the store has a key generator.
        auto_increment: bool,
    },
    /// An object store and all of its records were removed.
    DeleteStore {
        /// Store name.
        name: String,
    },
    /// A record was written.
    Put {
        /// Store name.
        store: String,
        /// Record key.
        key: Key,
        /// Record value.
        value: Value,
    },
    /// A record was removed.
    Delete {
        /// Store name.
        store: String,
        /// Record key.
        key: Key,
    },
    /// Every record of a store was removed.
    Clear {
        /// Store name.
        store: String,
    },
    /// The key generator of a store advanced.
    BumpKeyGenerator {
        /// Store name.
        store: String,
        /// Last number handed out (or observed).
        current: u64,
    },
}

/// A journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// First record of every journal.
    Header {
        /// Database name.
        name: String,
        /// Journal format version.
        format: u16,
    },
    /// Effects of one committed transaction.
    Commit {
        /// Commit sequence number, increasing within the journal.
        sequence: SequenceNumber,
        /// Mutations in execution order.
        ops: Vec<JournalOp>,
    },
}

impl JournalRecord {
    /// Encodes the record into a complete frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the payload exceeds 4 GiB.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = to_cbor(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::data("journal record payload too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_FORMAT.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Outcome of decoding one frame from a byte buffer.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// A valid record and the total frame length.
    Record(JournalRecord, usize),
    /// The buffer ends inside the frame.
    Torn,
}

/// Decodes the frame starting at the beginning of `data`.
///
/// # Errors
///
/// Returns [`CoreError::JournalCorruption`] for a complete frame with a bad
/// magic, unknown format, checksum mismatch or undecodable payload.
pub(crate) fn decode_frame(data: &[u8]) -> CoreResult<FrameRead> {
    if data.len() < HEADER_SIZE {
        return Ok(FrameRead::Torn);
    }
    if data[0..4] != JOURNAL_MAGIC {
        return Err(CoreError::journal_corruption("bad record magic"));
    }
    let format = u16::from_le_bytes([data[4], data[5]]);
    if format != JOURNAL_FORMAT {
        return Err(CoreError::journal_corruption(format!(
            "unsupported journal format {format}"
        )));
    }
    let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;
    if data.len() < total {
        return Ok(FrameRead::Torn);
    }

    let body_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let computed = compute_crc32(&data[..body_end]);
    if stored != computed {
        return Err(CoreError::journal_corruption(format!(
            "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }

    let record = from_cbor(&data[HEADER_SIZE..body_end])
        .map_err(|e| CoreError::journal_corruption(e.to_string()))?;
    Ok(FrameRead::Record(record, total))
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
