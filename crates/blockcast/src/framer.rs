// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Byte-stuffing codec over a raw byte stream.
//!
//! The framer turns discrete payloads into a SYNC-delimited wire stream and
//! recovers them on the far side, resynchronizing after corruption instead
//! of failing. Payload bytes equal to the wire symbols are escaped:
//!
//! ```text
//! Frame   := SYNC Stuffed* SYNC
//! Stuffed := any byte except SYNC or ESC
//!          | ESC SYNC_ESC   (decodes to 0xFF)
//!          | ESC ESC_ESC    (decodes to 0xFE)
//! ```
//!
//! The trailing SYNC of one frame doubles as the opening SYNC of the next,
//! so back-to-back frames cost one delimiter each.

use core::fmt;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::phy::{Phy, Recv};

/// Frame delimiter.
pub const SYNC: u8 = 0xFF;
/// Escape introducer.
pub const ESC: u8 = 0xFE;
/// Escaped stand-in for a SYNC byte in the payload.
pub const SYNC_ESC: u8 = 0xFD;
/// Escaped stand-in for an ESC byte in the payload.
pub const ESC_ESC: u8 = 0xFE;

/// Decoder health counters.
///
/// All of these are expected to tick on a lossy channel; none abort anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct FramerStats {
    /// Refills of the internal receive buffer from the PHY.
    pub fills: u32,
    /// Payloads that exceeded the caller's buffer capacity.
    pub overflows: u32,
    /// Escape sequences with an undefined second byte.
    pub violations: u32,
    /// Frames delivered to the caller.
    pub packets: u32,
    /// Partial frames abandoned mid-decode.
    pub truncations: u32,
    /// Bytes dropped while abandoning those frames.
    pub truncated_bytes: u32,
    /// Bytes discarded while hunting for a SYNC.
    pub junk_bytes: u32,
    /// Delivered frames whose leading length byte disagreed with their size.
    pub bad_plen: u32,
}

impl fmt::Display for FramerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fills:{} overflows:{} violations:{} packets:{} truncs:{} truncbytes:{} junk:{} badplen:{}",
            self.fills,
            self.overflows,
            self.violations,
            self.packets,
            self.truncations,
            self.truncated_bytes,
            self.junk_bytes,
            self.bad_plen
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Hunting for a SYNC; everything else is junk.
    Syncing,
    /// Saw at least one SYNC; skipping any further SYNCs.
    InSync,
    /// Accumulating payload bytes.
    Data,
    /// Saw an ESC; next byte picks the decoded value.
    Escaped,
    /// Dropping bytes until the next SYNC.
    Truncating,
}

/// Packet codec over a byte-streaming PHY.
///
/// Owns its receive fill buffer and transmit stuffing buffer; the caller owns
/// the payload buffer, which accumulates across calls when the PHY runs dry
/// mid-frame.
pub struct Framer<P: Phy> {
    phy: P,
    rx: Buffer,
    tx: Buffer,
    state: DecodeState,
    stats: FramerStats,
}

impl<P: Phy> Framer<P> {
    /// Wrap a PHY in the stuffing codec.
    pub fn new(phy: P) -> Self {
        Self {
            phy,
            rx: Buffer::new(Buffer::DEFAULT_CAPACITY, 0),
            // worst case: every payload byte escapes to two, plus delimiters
            tx: Buffer::new(2 + 2 * crate::MAX_FRAME, 0),
            state: DecodeState::Syncing,
            stats: FramerStats::default(),
        }
    }

    /// Decoder health counters.
    pub fn stats(&self) -> &FramerStats {
        &self.stats
    }

    /// The wrapped transport.
    pub fn phy(&self) -> &P {
        &self.phy
    }

    /// Encode the payload and send it as one frame.
    pub fn send(&mut self, payload: &Buffer) -> Result<()> {
        self.tx.reset();
        self.tx.append(SYNC)?;
        for &b in payload.as_slice() {
            match b {
                SYNC => {
                    self.tx.append(ESC)?;
                    self.tx.append(SYNC_ESC)?;
                }
                ESC => {
                    self.tx.append(ESC)?;
                    self.tx.append(ESC_ESC)?;
                }
                _ => self.tx.append(b)?,
            }
        }
        self.tx.append(SYNC)?;
        self.phy.send(&self.tx);
        Ok(())
    }

    /// Decode the next frame into `out`.
    ///
    /// Returns `Data(len)` with the payload in `out`, `NoData` when the PHY
    /// deadline expires mid-hunt or mid-frame (state is preserved; call again
    /// with the same buffer), or `Eof` when the PHY is gone, in which case
    /// any partial frame is discarded.
    pub fn recv_into(&mut self, out: &mut Buffer, wait_ms: u32) -> Recv {
        loop {
            if self.rx.is_empty() {
                match self.phy.recv_into(&mut self.rx, wait_ms) {
                    Recv::Eof => {
                        if self.state != DecodeState::Syncing || !out.is_empty() {
                            out.reset();
                            self.state = DecodeState::Syncing;
                        }
                        return Recv::Eof;
                    }
                    Recv::NoData => return Recv::NoData,
                    Recv::Data(_) => self.stats.fills += 1,
                }
                if self.rx.is_empty() {
                    return Recv::NoData;
                }
            }

            let byte = self.rx.as_slice()[0];
            match self.state {
                DecodeState::Syncing => {
                    if byte == SYNC {
                        self.state = DecodeState::InSync;
                    } else {
                        self.stats.junk_bytes += 1;
                    }
                    self.consume();
                }

                DecodeState::InSync => {
                    if byte == SYNC {
                        self.consume();
                    } else {
                        self.state = DecodeState::Data;
                    }
                }

                DecodeState::Data => {
                    if byte == SYNC {
                        // leave the SYNC unconsumed: it opens the next frame
                        self.state = DecodeState::Syncing;
                        self.stats.packets += 1;
                        if let Ok(first) = out.get(0) {
                            if first as usize != out.len() - 1 {
                                self.stats.bad_plen += 1;
                            }
                        }
                        return Recv::Data(out.len());
                    } else if byte == ESC {
                        self.state = DecodeState::Escaped;
                        self.consume();
                    } else if out.append(byte).is_ok() {
                        self.consume();
                    } else {
                        self.stats.overflows += 1;
                        self.begin_truncating();
                    }
                }

                DecodeState::Escaped => match byte {
                    SYNC_ESC | ESC_ESC => {
                        let value = if byte == SYNC_ESC { SYNC } else { ESC };
                        if out.append(value).is_ok() {
                            self.state = DecodeState::Data;
                            self.consume();
                        } else {
                            self.stats.overflows += 1;
                            self.begin_truncating();
                        }
                    }
                    _ => {
                        // undefined escape; the byte is re-examined while
                        // truncating, so an escaped SYNC resynchronizes at once
                        self.stats.violations += 1;
                        self.begin_truncating();
                    }
                },

                DecodeState::Truncating => {
                    if byte == SYNC {
                        out.reset();
                        self.state = DecodeState::Syncing;
                    } else {
                        self.stats.truncated_bytes += 1;
                        self.consume();
                    }
                }
            }
        }
    }

    fn consume(&mut self) {
        let _ = self.rx.ltrunc(1);
    }

    fn begin_truncating(&mut self) {
        self.stats.truncations += 1;
        self.state = DecodeState::Truncating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted PHY: replays a byte stream in bounded chunks, then EOF.
    /// Captures sends.
    struct BytePhy {
        data: Vec<u8>,
        idx: usize,
        chunk: usize,
        sent: Vec<u8>,
    }

    impl BytePhy {
        fn new(data: &[u8]) -> Self {
            Self {
                data: data.to_vec(),
                idx: 0,
                chunk: usize::MAX,
                sent: Vec::new(),
            }
        }

        fn chunked(data: &[u8], chunk: usize) -> Self {
            let mut phy = Self::new(data);
            phy.chunk = chunk;
            phy
        }
    }

    impl Phy for BytePhy {
        fn send(&mut self, buf: &Buffer) {
            buf.read_with(|bytes| {
                self.sent.extend_from_slice(bytes);
                bytes.len()
            });
        }

        fn recv_into(&mut self, buf: &mut Buffer, _wait_ms: u32) -> Recv {
            let remaining = self.data.len() - self.idx;
            if remaining == 0 {
                return Recv::Eof;
            }
            let idx = self.idx;
            let chunk = self.chunk;
            let data = &self.data;
            let nb = buf.write_with(|storage| {
                let want = remaining.min(storage.len()).min(chunk);
                storage[..want].copy_from_slice(&data[idx..idx + want]);
                want
            });
            self.idx += nb;
            Recv::Data(nb)
        }
    }

    fn sent_of(framer: &Framer<BytePhy>) -> &[u8] {
        &framer.phy().sent
    }

    #[test]
    fn test_tx_plain_data() {
        let mut framer = Framer::new(BytePhy::new(b""));
        framer.send(&Buffer::filled(b"hello")).unwrap();
        assert_eq!(b"\xFFhello\xFF", sent_of(&framer));
    }

    #[test]
    fn test_tx_sync_in_data() {
        let mut framer = Framer::new(BytePhy::new(b""));
        framer.send(&Buffer::filled(b"**\xFF**")).unwrap();
        assert_eq!(b"\xFF**\xFE\xFD**\xFF", sent_of(&framer));
    }

    #[test]
    fn test_tx_esc_in_data() {
        let mut framer = Framer::new(BytePhy::new(b""));
        framer.send(&Buffer::filled(b"**\xFE**")).unwrap();
        assert_eq!(b"\xFF**\xFE\xFE**\xFF", sent_of(&framer));
    }

    #[test]
    fn test_rx_junk_only_is_eof() {
        let mut framer = Framer::new(BytePhy::new(b"hello"));
        let mut out = Buffer::default();
        assert_eq!(Recv::Eof, framer.recv_into(&mut out, 0));
        assert!(out.is_empty());
        assert_eq!(5, framer.stats().junk_bytes);
        assert_eq!(0, framer.stats().packets);
    }

    #[test]
    fn test_rx_packet() {
        let mut framer = Framer::new(BytePhy::new(b"\xFFhello\xFF"));
        let mut out = Buffer::default();
        assert_eq!(Recv::Data(5), framer.recv_into(&mut out, 0));
        assert_eq!(b"hello", out.as_slice());
    }

    #[test]
    fn test_rx_junk_then_sync() {
        let mut framer = Framer::new(BytePhy::new(b"1234\xFFhello\xFF"));
        let mut out = Buffer::default();
        assert_eq!(Recv::Data(5), framer.recv_into(&mut out, 0));
        assert_eq!(b"hello", out.as_slice());
        assert_eq!(4, framer.stats().junk_bytes);
    }

    #[test]
    fn test_rx_escaped_sync() {
        let mut framer = Framer::new(BytePhy::new(b"\xFF**\xFE\xFD**\xFF"));
        let mut out = Buffer::default();
        framer.recv_into(&mut out, 0);
        assert_eq!(b"**\xFF**", out.as_slice());
    }

    #[test]
    fn test_rx_escaped_esc() {
        let mut framer = Framer::new(BytePhy::new(b"\xFF**\xFE\xFE**\xFF"));
        let mut out = Buffer::default();
        framer.recv_into(&mut out, 0);
        assert_eq!(b"**\xFE**", out.as_slice());
    }

    #[test]
    fn test_rx_back_to_back_frames_share_sync() {
        let mut framer = Framer::new(BytePhy::new(b"\xFFone\xFFtwo\xFF"));
        let mut out = Buffer::default();

        assert_eq!(Recv::Data(3), framer.recv_into(&mut out, 0));
        assert_eq!(b"one", out.as_slice());

        out.reset();
        assert_eq!(Recv::Data(3), framer.recv_into(&mut out, 0));
        assert_eq!(b"two", out.as_slice());

        out.reset();
        assert_eq!(Recv::Eof, framer.recv_into(&mut out, 0));
        assert!(out.is_empty());
    }

    #[test]
    fn test_rx_long_sync_run() {
        let mut framer = Framer::new(BytePhy::new(b"\xFF\xFF\xFF\xFFone\xFF"));
        let mut out = Buffer::default();

        assert_eq!(Recv::Data(3), framer.recv_into(&mut out, 0));
        assert_eq!(b"one", out.as_slice());

        out.reset();
        assert_eq!(Recv::Eof, framer.recv_into(&mut out, 0));
        assert!(out.is_empty());
    }

    #[test]
    fn test_rx_bad_escape_truncates_frame() {
        let mut framer = Framer::new(BytePhy::new(b"\xFFone\xFE\x02rest\xFF\xFFtwo\xFF"));
        let mut out = Buffer::default();

        // the undefined escape kills "one...rest"; "two" survives
        assert_eq!(Recv::Data(3), framer.recv_into(&mut out, 0));
        assert_eq!(b"two", out.as_slice());
        assert_eq!(1, framer.stats().violations);
        assert_eq!(1, framer.stats().truncations);
        assert_eq!(5, framer.stats().truncated_bytes);
    }

    #[test]
    fn test_rx_sync_inside_escape_resyncs_immediately() {
        let mut framer = Framer::new(BytePhy::new(b"\xFFone\xFE\xFFrest\xFF\xFFtwo\xFF"));
        let mut out = Buffer::default();

        // "one" is trashed; the SYNC that broke the escape opens "rest"
        assert_eq!(Recv::Data(4), framer.recv_into(&mut out, 0));
        assert_eq!(b"rest", out.as_slice());

        out.reset();
        assert_eq!(Recv::Data(3), framer.recv_into(&mut out, 0));
        assert_eq!(b"two", out.as_slice());
        assert_eq!(1, framer.stats().violations);
        assert_eq!(0, framer.stats().truncated_bytes);
    }

    #[test]
    fn test_rx_overflow_truncates_and_recovers() {
        let mut wire = vec![SYNC];
        wire.extend(std::iter::repeat(b'x').take(64));
        wire.push(SYNC);
        wire.extend_from_slice(b"ok\xFF");

        let mut framer = Framer::new(BytePhy::new(&wire));
        let mut out = Buffer::new(16, 0);

        assert_eq!(Recv::Data(2), framer.recv_into(&mut out, 0));
        assert_eq!(b"ok", out.as_slice());
        assert_eq!(1, framer.stats().overflows);
        assert_eq!(1, framer.stats().truncations);
        // 64 payload bytes minus the 16 that fit before the overflow
        assert_eq!(48, framer.stats().truncated_bytes);
    }

    #[test]
    fn test_rx_resumes_across_chunked_fills() {
        // 3-byte PHY reads force several fills per frame
        let mut framer = Framer::new(BytePhy::chunked(b"\xFFhello world\xFF", 3));
        let mut out = Buffer::default();
        assert_eq!(Recv::Data(11), framer.recv_into(&mut out, 0));
        assert_eq!(b"hello world", out.as_slice());
        assert!(framer.stats().fills >= 4);
    }

    #[test]
    fn test_round_trip_every_single_byte_payload() {
        for value in 0..=255u8 {
            let mut framer = Framer::new(BytePhy::new(b""));
            framer.send(&Buffer::filled(&[value])).unwrap();

            let wire = framer.phy().sent.clone();
            let mut decoder = Framer::new(BytePhy::new(&wire));
            let mut out = Buffer::default();
            assert_eq!(Recv::Data(1), decoder.recv_into(&mut out, 0), "payload {value:02X}");
            assert_eq!(&[value], out.as_slice());
        }
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let payload: Vec<u8> = (0..=255).collect();
        let mut big = Buffer::new(512, 10);
        big.extend(&payload).unwrap();

        let mut framer = Framer::new(BytePhy::new(b""));
        framer.send(&big).unwrap();

        let wire = framer.phy().sent.clone();
        let mut decoder = Framer::new(BytePhy::new(&wire));
        let mut out = Buffer::new(300, 0);
        assert_eq!(Recv::Data(256), decoder.recv_into(&mut out, 0));
        assert_eq!(payload.as_slice(), out.as_slice());
    }
}
