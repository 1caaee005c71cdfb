// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Error types for blockcast

use std::io;
use thiserror::Error;

/// Result type for blockcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for blockcast
#[derive(Debug, Error)]
pub enum Error {
    /// Buffer has no room for the requested append or prepend
    #[error("buffer overflow (capacity {capacity})")]
    Overflow {
        /// Capacity of the buffer that rejected the write
        capacity: usize,
    },

    /// Index or slice outside the active region of a buffer
    #[error("index out of range ({index} beyond {len})")]
    OutOfRange {
        /// Offending index (or slice end)
        index: usize,
        /// Active length at the time of the access
        len: usize,
    },

    /// Control record too short or carrying an unknown type byte
    #[error("malformed control record")]
    BadRecord,

    /// File spans more blocks than a 16-bit block number can address
    #[error("file too large for 16-bit block numbering ({blocks} blocks)")]
    FileTooLarge {
        /// Number of blocks the file would need
        blocks: u64,
    },

    /// Recomputed digest does not match the advertised one
    #[error("sha256 mismatch: want {want} got {got}")]
    DigestMismatch {
        /// Digest advertised in the metadata record
        want: String,
        /// Digest recomputed over the received blocks
        got: String,
    },

    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
}
