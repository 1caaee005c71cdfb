// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Link layer: fixed-overhead header, CRC-16 trailer, channel demux.
//!
//! Every framer payload carries a 5-byte header and a 2-byte trailer:
//!
//! ```text
//! 0:     length     total frame bytes minus one (excludes itself only)
//! 1:     seqno      wraps modulo 256; loss detector, not a retransmit handle
//! 2:     channel    bit 7 = control, bits 6..0 select 1 of 128 channels
//! 3..4:  blockno    big-endian 16-bit
//! 5..:   payload
//! last2: crc        CRC-16/CCITT over everything before it, big-endian
//! ```
//!
//! The control twin of a data channel (same low bits, bit 7 set) carries the
//! out-of-band records of that channel: metadata, and the END record that
//! stands in for EOF on a simplex link.

use std::collections::HashMap;

use log::{debug, warn};

use crate::buffer::Buffer;
use crate::crc::crc16;
use crate::error::Result;
use crate::framer::{Framer, FramerStats};
use crate::phy::{Phy, Recv};
use crate::util::hexstr;
use core::fmt;

/// Header bytes per frame.
pub const HEADER_LEN: usize = 5;
/// Trailer bytes per frame.
pub const CRC_LEN: usize = 2;
/// Total framing overhead.
pub const OVERHEAD: usize = HEADER_LEN + CRC_LEN;
/// Largest payload that keeps the length byte in range.
pub const MAX_PAYLOAD: usize = crate::MAX_FRAME - OVERHEAD - 1;
/// First (and only) byte of an END record.
pub const END_BYTE: u8 = 0xFF;

const CONTROL_BIT: u8 = 0x80;

/// 8-bit channel id: bit 7 selects the control sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(u8);

impl Channel {
    /// The well-known link channel.
    pub const LINK: Channel = Channel(0);

    /// Channel from a raw wire id.
    pub const fn new(id: u8) -> Self {
        Channel(id)
    }

    /// Raw wire id.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// True when bit 7 is set.
    pub const fn is_control(self) -> bool {
        self.0 & CONTROL_BIT != 0
    }

    /// The control twin of this channel.
    pub const fn control(self) -> Self {
        Channel(self.0 | CONTROL_BIT)
    }

    /// The data twin of this channel.
    pub const fn data(self) -> Self {
        Channel(self.0 & !CONTROL_BIT)
    }

    /// Logical channel number, 0..128.
    pub const fn index(self) -> u8 {
        self.0 & !CONTROL_BIT
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_control() {
            write!(f, "ctrl:{}", self.index())
        } else {
            write!(f, "data:{}", self.index())
        }
    }
}

/// Addressing carried alongside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// Channel the payload travels on.
    pub channel: Channel,
    /// Block number tag; zero for control records.
    pub blockno: u16,
}

impl PacketInfo {
    /// Info for a data block on `channel` (control bit forced clear).
    pub fn block(channel: Channel, blockno: u16) -> Self {
        Self {
            channel: channel.data(),
            blockno,
        }
    }

    /// Info for a control record on the control twin of `channel`.
    pub fn control(channel: Channel) -> Self {
        Self {
            channel: channel.control(),
            blockno: 0,
        }
    }
}

/// Link health counters. Transient rejections only; nothing here aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    /// Frames sent.
    pub sent: u32,
    /// Frames accepted.
    pub received: u32,
    /// Frames too short to hold the header and trailer.
    pub short_header: u32,
    /// Length byte disagreed with the decoded frame size.
    pub badlen: u32,
    /// CRC trailer mismatches.
    pub crc: u32,
    /// Sequence number jumps.
    pub seqno: u32,
    /// Outbound frames dropped for exceeding the length byte.
    pub dropped_long: u32,
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent:{} recv:{} short:{} badlen:{} crc:{} seqno:{} droplong:{}",
            self.sent,
            self.received,
            self.short_header,
            self.badlen,
            self.crc,
            self.seqno,
            self.dropped_long
        )
    }
}

/// Result of one link-level receive poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRecv {
    /// A frame passed all checks; payload is in the caller's buffer.
    Packet(PacketInfo),
    /// Nothing usable this poll.
    NoData,
    /// The PHY is gone, or (from `recv_for`) the channel's END record landed.
    Eof,
}

/// Handler capability invoked by the demux for a registered channel.
pub type PacketHandler = Box<dyn FnMut(&[u8], &PacketInfo)>;

/// Token returned by [`LinkManager::register`]; used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u32);

/// Shared send/receive endpoint over one framed PHY.
///
/// A sender task and a receiver task in the same loop can share one manager;
/// nothing here is re-entrant and nothing needs to be, the scheduling model
/// is strictly cooperative.
pub struct LinkManager<P: Phy> {
    framer: Framer<P>,
    next_seq: u8,
    expect_seq: u8,
    handlers: HashMap<u8, Vec<(HandlerId, PacketHandler)>>,
    next_handler: u32,
    stats: LinkStats,
}

impl<P: Phy> LinkManager<P> {
    /// Link endpoint over `phy`.
    pub fn new(phy: P) -> Self {
        Self {
            framer: Framer::new(phy),
            next_seq: 0,
            expect_seq: 0,
            handlers: HashMap::new(),
            next_handler: 0,
            stats: LinkStats::default(),
        }
    }

    /// Link health counters.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Framer health counters.
    pub fn framer_stats(&self) -> FramerStats {
        *self.framer.stats()
    }

    /// The underlying transport.
    pub fn phy(&self) -> &P {
        self.framer.phy()
    }

    /// Send a payload, or signal EOF on a data channel.
    ///
    /// With a payload, the frame goes out on `info.channel` as given. With
    /// `None` on a data channel, a one-byte END record goes out on the
    /// channel's control twin instead; that is how EOF crosses a simplex
    /// link. The buffer gains the header and trailer in place; callers reset
    /// it before reuse.
    pub fn send(&mut self, payload: Option<&mut Buffer>, info: &PacketInfo) -> Result<()> {
        match payload {
            Some(buf) => self.send_frame(buf, info.channel, info.blockno),
            None => {
                let mut end = Buffer::new(OVERHEAD + 9, 8);
                end.append(END_BYTE)?;
                self.send_frame(&mut end, info.channel.control(), info.blockno)
            }
        }
    }

    fn send_frame(&mut self, buf: &mut Buffer, channel: Channel, blockno: u16) -> Result<()> {
        let length = buf.len() + OVERHEAD - 1;
        if length > u8::MAX as usize {
            warn!("oversized frame dropped: {length} > 255 ({channel} blockno:{blockno})");
            self.stats.dropped_long += 1;
            return Ok(());
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        buf.prepend(&[
            length as u8,
            seq,
            channel.raw(),
            (blockno >> 8) as u8,
            (blockno & 0xFF) as u8,
        ])?;
        let crc = crc16(buf.as_slice());
        buf.append((crc >> 8) as u8)?;
        buf.append((crc & 0xFF) as u8)?;

        self.framer.send(buf)?;
        self.stats.sent += 1;
        Ok(())
    }

    /// Receive one frame into `buf`, validate it, strip header and trailer.
    ///
    /// Rejected frames are counted and reported as `NoData`; the caller just
    /// polls again. `buf` must arrive reset unless the previous poll said
    /// `NoData` mid-frame, in which case it carries the partial payload.
    pub fn recv_packet(&mut self, buf: &mut Buffer, wait_ms: u32) -> LinkRecv {
        let nb = match self.framer.recv_into(buf, wait_ms) {
            Recv::NoData => return LinkRecv::NoData,
            Recv::Eof => return LinkRecv::Eof,
            Recv::Data(nb) => nb,
        };

        if nb < OVERHEAD {
            debug!("frame too short to have a header: {}", hexstr(buf.as_slice()));
            self.stats.short_header += 1;
            buf.reset();
            return LinkRecv::NoData;
        }

        let frame = buf.as_slice();
        let length = frame[0] as usize;
        if length != nb - 1 {
            debug!("length byte {} disagrees with frame size {}", length, nb);
            self.stats.badlen += 1;
            buf.reset();
            return LinkRecv::NoData;
        }

        let want = crc16(&frame[..nb - CRC_LEN]);
        let got = u16::from_be_bytes([frame[nb - 2], frame[nb - 1]]);
        if want != got {
            debug!(
                "crc failure for:{} expected:{want:04X} got:{got:04X}",
                hexstr(frame)
            );
            self.stats.crc += 1;
            buf.reset();
            return LinkRecv::NoData;
        }

        let seq = frame[1];
        if seq != self.expect_seq {
            warn!(
                "seqno mismatch want:{:02X} got:{:02X}; resyncing",
                self.expect_seq, seq
            );
            self.stats.seqno += 1;
        }
        self.expect_seq = seq.wrapping_add(1);

        let info = PacketInfo {
            channel: Channel::new(frame[2]),
            blockno: u16::from_be_bytes([frame[3], frame[4]]),
        };

        // infallible: length checked above
        let _ = buf.ltrunc(HEADER_LEN);
        let _ = buf.rtrunc(CRC_LEN);
        self.stats.received += 1;
        LinkRecv::Packet(info)
    }

    /// Receive a packet for `channel`, demultiplexing everything else.
    ///
    /// Packets on other channels are fed to their registered handlers and
    /// reported as `NoData`. The END record of `channel` reports `Eof` (after
    /// its own handlers have seen it).
    pub fn recv_for(&mut self, channel: Channel, buf: &mut Buffer, wait_ms: u32) -> LinkRecv {
        match self.recv_packet(buf, wait_ms) {
            LinkRecv::Packet(info) if info.channel == channel => LinkRecv::Packet(info),
            LinkRecv::Packet(info) => {
                self.dispatch(buf, &info);
                let ended = is_end_record(buf.as_slice(), &info, channel);
                buf.reset();
                if ended {
                    LinkRecv::Eof
                } else {
                    LinkRecv::NoData
                }
            }
            other => other,
        }
    }

    /// Invoke every handler registered for the packet's channel.
    pub fn dispatch(&mut self, buf: &Buffer, info: &PacketInfo) {
        if let Some(list) = self.handlers.get_mut(&info.channel.raw()) {
            for (_, handler) in list.iter_mut() {
                handler(buf.as_slice(), info);
            }
        }
    }

    /// Register a handler for a channel; handlers run in registration order.
    pub fn register(&mut self, channel: Channel, handler: PacketHandler) -> HandlerId {
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers
            .entry(channel.raw())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a previously registered handler.
    pub fn deregister(&mut self, channel: Channel, id: HandlerId) {
        if let Some(list) = self.handlers.get_mut(&channel.raw()) {
            list.retain(|(hid, _)| *hid != id);
        }
    }
}

/// END record test: control bit set, same logical channel, first byte 0xFF.
fn is_end_record(payload: &[u8], info: &PacketInfo, channel: Channel) -> bool {
    info.channel.is_control()
        && info.channel.index() == channel.index()
        && payload.first() == Some(&END_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::LoopbackPhy;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Raw link frame with a valid trailer.
    fn link_frame(seq: u8, chan: u8, blockno: u16, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![
            (payload.len() + OVERHEAD - 1) as u8,
            seq,
            chan,
            (blockno >> 8) as u8,
            (blockno & 0xFF) as u8,
        ];
        f.extend_from_slice(payload);
        let crc = crc16(&f);
        f.push((crc >> 8) as u8);
        f.push(crc as u8);
        f
    }

    /// Byte-stuff a frame the way the framer would.
    fn stuff(frame: &[u8]) -> Vec<u8> {
        let mut wire = vec![0xFF];
        for &b in frame {
            match b {
                0xFF => wire.extend_from_slice(&[0xFE, 0xFD]),
                0xFE => wire.extend_from_slice(&[0xFE, 0xFE]),
                _ => wire.push(b),
            }
        }
        wire.push(0xFF);
        wire
    }

    fn manager_with_wire(frames: &[Vec<u8>]) -> LinkManager<LoopbackPhy> {
        let phy = LoopbackPhy::new();
        for f in frames {
            phy.push_bytes(&stuff(f));
        }
        phy.close_tx();
        LinkManager::new(phy)
    }

    #[test]
    fn test_round_trip_via_loopback() {
        let mut lm = LinkManager::new(LoopbackPhy::new());
        let mut tx = Buffer::filled(b"payload");
        lm.send(Some(&mut tx), &PacketInfo::block(Channel::LINK, 3))
            .unwrap();

        let mut rx = Buffer::default();
        let info = match lm.recv_packet(&mut rx, 0) {
            LinkRecv::Packet(info) => info,
            other => panic!("expected packet, got {other:?}"),
        };
        assert_eq!(b"payload", rx.as_slice());
        assert_eq!(Channel::LINK, info.channel);
        assert_eq!(3, info.blockno);
        assert_eq!(1, lm.stats().sent);
        assert_eq!(1, lm.stats().received);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let mut lm = LinkManager::new(LoopbackPhy::new());
        let mut tx = Buffer::default();
        lm.send(Some(&mut tx), &PacketInfo::block(Channel::LINK, 0))
            .unwrap();

        let mut rx = Buffer::default();
        assert!(matches!(lm.recv_packet(&mut rx, 0), LinkRecv::Packet(_)));
        assert!(rx.is_empty());
    }

    #[test]
    fn test_short_header_rejected() {
        let mut lm = manager_with_wire(&[vec![0x02, 0x01, 0x00]]);
        let mut rx = Buffer::default();
        assert_eq!(LinkRecv::NoData, lm.recv_packet(&mut rx, 0));
        assert!(rx.is_empty());
        assert_eq!(1, lm.stats().short_header);
    }

    #[test]
    fn test_badlen_rejected() {
        let mut frame = link_frame(0, 0, 0, b"abc");
        frame[0] += 1;
        let mut lm = manager_with_wire(&[frame]);
        let mut rx = Buffer::default();
        assert_eq!(LinkRecv::NoData, lm.recv_packet(&mut rx, 0));
        assert_eq!(1, lm.stats().badlen);
    }

    #[test]
    fn test_crc_rejected() {
        let mut frame = link_frame(0, 0, 0, b"abc");
        let top = frame.len() - 1;
        frame[top] ^= 0x01;
        let mut lm = manager_with_wire(&[frame]);
        let mut rx = Buffer::default();
        assert_eq!(LinkRecv::NoData, lm.recv_packet(&mut rx, 0));
        assert_eq!(1, lm.stats().crc);
        assert_eq!(LinkRecv::Eof, lm.recv_packet(&mut rx, 0));
    }

    #[test]
    fn test_single_payload_byte_corruption_fails_crc() {
        let mut frame = link_frame(0, 0, 0, b"\x2B");
        frame[5] = 0xFF;
        let mut lm = manager_with_wire(&[frame]);
        let mut rx = Buffer::default();
        assert_eq!(LinkRecv::NoData, lm.recv_packet(&mut rx, 0));
        assert_eq!(1, lm.stats().crc);
    }

    #[test]
    fn test_seqno_jump_warns_and_resyncs() {
        let frames = vec![
            link_frame(0, 0, 0, b"first"),
            // frame with seq 1 lost on the wire
            link_frame(2, 0, 1, b"third"),
            link_frame(3, 0, 2, b"fourth"),
        ];
        let mut lm = manager_with_wire(&frames);
        let mut rx = Buffer::default();

        assert!(matches!(lm.recv_packet(&mut rx, 0), LinkRecv::Packet(_)));
        assert_eq!(b"first", rx.as_slice());
        rx.reset();

        // jump is counted but the frame still comes through
        assert!(matches!(lm.recv_packet(&mut rx, 0), LinkRecv::Packet(_)));
        assert_eq!(b"third", rx.as_slice());
        assert_eq!(1, lm.stats().seqno);
        rx.reset();

        // resynchronized: no further complaints
        assert!(matches!(lm.recv_packet(&mut rx, 0), LinkRecv::Packet(_)));
        assert_eq!(1, lm.stats().seqno);
    }

    #[test]
    fn test_oversized_send_dropped() {
        let phy = LoopbackPhy::new();
        let mut lm = LinkManager::new(phy.clone());
        let mut tx = Buffer::new(300, 10);
        tx.extend(&vec![0xAA; 260]).unwrap();
        lm.send(Some(&mut tx), &PacketInfo::block(Channel::LINK, 0))
            .unwrap();
        assert_eq!(1, lm.stats().dropped_long);
        assert_eq!(0, lm.stats().sent);
        assert_eq!(0, phy.pending());
    }

    #[test]
    fn test_recv_for_dispatches_other_channels() {
        let mut lm = LinkManager::new(LoopbackPhy::new());
        let seen: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_by_handler = Rc::clone(&seen);
        lm.register(
            Channel::LINK.control(),
            Box::new(move |payload, _info| {
                seen_by_handler.borrow_mut().push(payload.to_vec());
            }),
        );

        let mut tx = Buffer::filled(b"\x01meta-ish");
        lm.send(Some(&mut tx), &PacketInfo::control(Channel::LINK))
            .unwrap();

        let mut rx = Buffer::default();
        assert_eq!(LinkRecv::NoData, lm.recv_for(Channel::LINK, &mut rx, 0));
        assert!(rx.is_empty());
        assert_eq!(vec![b"\x01meta-ish".to_vec()], *seen.borrow());
    }

    #[test]
    fn test_recv_for_turns_end_record_into_eof() {
        let mut lm = LinkManager::new(LoopbackPhy::new());
        lm.send(None, &PacketInfo::block(Channel::LINK, 0)).unwrap();

        let mut rx = Buffer::default();
        assert_eq!(LinkRecv::Eof, lm.recv_for(Channel::LINK, &mut rx, 0));
    }

    #[test]
    fn test_deregistered_handler_is_silent() {
        let mut lm = LinkManager::new(LoopbackPhy::new());
        let hits = Rc::new(RefCell::new(0u32));
        let hits_in = Rc::clone(&hits);
        let id = lm.register(
            Channel::LINK.control(),
            Box::new(move |_, _| *hits_in.borrow_mut() += 1),
        );
        lm.deregister(Channel::LINK.control(), id);

        let mut tx = Buffer::filled(b"\x01x");
        lm.send(Some(&mut tx), &PacketInfo::control(Channel::LINK))
            .unwrap();
        let mut rx = Buffer::default();
        assert_eq!(LinkRecv::NoData, lm.recv_for(Channel::LINK, &mut rx, 0));
        assert_eq!(0, *hits.borrow());
    }

    #[test]
    fn test_junk_between_frames_is_survivable() {
        let phy = LoopbackPhy::new();
        phy.push_bytes(b"\x13\x37junk");
        phy.push_bytes(&stuff(&link_frame(0, 0, 7, b"good")));
        phy.close_tx();

        let mut lm = LinkManager::new(phy);
        let mut rx = Buffer::default();
        loop {
            match lm.recv_packet(&mut rx, 0) {
                LinkRecv::Packet(info) => {
                    assert_eq!(7, info.blockno);
                    assert_eq!(b"good", rx.as_slice());
                    break;
                }
                LinkRecv::NoData => continue,
                LinkRecv::Eof => panic!("lost the good frame"),
            }
        }
    }
}
