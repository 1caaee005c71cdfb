// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! # blockcast - file transfer over lossy byte links
//!
//! Moves whole files reliably across byte-oriented, lossy, packet-unaware
//! links (a UART, a simple FSK packet radio) between two endpoints, one of
//! which may be a microcontroller with kilobytes of RAM. The channel is
//! simplex broadcast: no acknowledgements, no retransmit requests.
//! Reliability comes from repetition, per-frame CRC, order-indifferent
//! assembly and an end-to-end SHA-256 check.
//!
//! ## Design Constraints
//!
//! - **Fixed buffers** - hot-path buffers are allocated once and reused
//! - **Zero-copy I/O** - transports read and write buffer storage directly
//! - **Cooperative** - single-threaded `tick` scheduling, no blocking loops
//! - **Survives corruption** - every layer resynchronizes and counts, never
//!   aborts on line noise
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------+
//! |  File agent (FileSender / FileReceiver) |   META + END records, SHA-256,
//! +-----------------------------------------+   commit-on-success
//!           v                    ^
//! +-----------------------------------------+
//! |  Transfer (Sender / Receiver)           |   blocks by number, BitSet
//! +-----------------------------------------+   dedup, repeat policy
//!           v                    ^
//! +-----------------------------------------+
//! |  Link (LinkManager)                     |   5-byte header, CRC-16,
//! +-----------------------------------------+   seqno, channel demux
//!           v                    ^
//! +-----------------------------------------+
//! |  Framer                                 |   SYNC-delimited byte
//! +-----------------------------------------+   stuffing, resync
//!           v                    ^
//! +-----------------------------------------+
//! |  Phy (loopback / stdio / UART / radio)  |
//! +-----------------------------------------+
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Fixed-capacity cursor buffer.
pub mod buffer;

/// Received-block tracking.
pub mod bitset;

/// CRC-16/CCITT, portable and fast variants.
pub mod crc;

/// Error types.
pub mod error;

/// Byte-stuffing packet codec.
pub mod framer;

/// Header/CRC link layer with channel demux.
pub mod link;

/// Packet error injection for harnesses.
pub mod noise;

/// Physical transport adapters.
pub mod phy;

/// Cooperative task runner.
pub mod tasking;

/// Block and file transfer endpoints.
pub mod transfer;

/// Hexascii plumbing and platform facade.
pub mod util;

// Re-exports for convenience
pub use crate::bitset::BitSet;
pub use crate::buffer::Buffer;
pub use crate::error::{Error, Result};
pub use crate::framer::Framer;
pub use crate::link::{Channel, LinkManager, PacketInfo};
pub use crate::phy::{LoopbackPhy, NullPhy, Phy, Recv, StdStreamPhy};
pub use crate::transfer::{FileMeta, FileReceiver, FileSender, Phase, Receiver, Sender};

/// Largest link frame on the wire before byte stuffing, length byte included.
pub const MAX_FRAME: usize = 256;

/// Version of blockcast
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
