// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Generic block receiver.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

use crate::bitset::BitSet;
use crate::buffer::Buffer;
use crate::link::{Channel, LinkManager, LinkRecv};
use crate::phy::Phy;
use crate::transfer::{BlockWriter, Phase, ProgressFn};

/// Order-indifferent block assembler.
///
/// Tracks arrivals in a [`BitSet`] once block info is known; duplicates are
/// dropped on the bit test, which is the whole deduplication scheme. Blocks
/// land through the writer capability at `blockno * blocksz`.
pub struct Receiver<P: Phy> {
    link: Rc<RefCell<LinkManager<P>>>,
    channel: Channel,
    writer: Option<BlockWriter>,
    received: Option<BitSet>,
    blocksz: usize,
    rxbuf: Buffer,
    phase: Phase,
    wait_ms: u32,
    progress: Option<ProgressFn>,
}

impl<P: Phy> Receiver<P> {
    /// Receiver listening on `channel`.
    pub fn new(link: Rc<RefCell<LinkManager<P>>>, channel: Channel) -> Self {
        Self {
            link,
            channel,
            writer: None,
            received: None,
            blocksz: 0,
            rxbuf: Buffer::new(crate::MAX_FRAME, 0),
            phase: Phase::Starting,
            wait_ms: 0,
            progress: None,
        }
    }

    /// Install the writer capability blocks land through.
    pub fn set_writer(&mut self, writer: Option<BlockWriter>) {
        self.writer = writer;
    }

    /// Attach a progress callback.
    pub fn set_progress(&mut self, progress: Option<ProgressFn>) {
        self.progress = progress;
    }

    /// Learn the block geometry; allocates the arrival tracker.
    pub fn set_block_info(&mut self, nblocks: usize, blocksz: usize) {
        self.received = Some(BitSet::new(nblocks));
        self.blocksz = blocksz;
        if self.phase == Phase::Starting {
            self.phase = Phase::Transferring;
        }
    }

    /// True once block geometry is known.
    pub fn has_block_info(&self) -> bool {
        self.received.is_some()
    }

    /// Arrival tracker, if block info is known.
    pub fn received(&self) -> Option<&BitSet> {
        self.received.as_ref()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `Finishing` unless already concluded.
    pub fn finish(&mut self) {
        if !matches!(self.phase, Phase::FinishedOk | Phase::FinishedErr) {
            self.phase = Phase::Finishing;
        }
    }

    /// Conclude the transfer.
    pub fn conclude(&mut self, ok: bool) {
        self.phase = if ok { Phase::FinishedOk } else { Phase::FinishedErr };
    }

    /// One receive poll: accept at most one packet for this channel.
    ///
    /// Packets for other channels go through the link's demux; the channel's
    /// END record (or PHY EOF) moves the phase to `Finishing`.
    pub fn poll(&mut self) {
        let result = self
            .link
            .borrow_mut()
            .recv_for(self.channel, &mut self.rxbuf, self.wait_ms);
        match result {
            LinkRecv::Packet(info) => {
                self.accept_block(info.blockno);
                self.rxbuf.reset();
            }
            LinkRecv::NoData => {}
            LinkRecv::Eof => self.finish(),
        }
    }

    fn accept_block(&mut self, blockno: u16) {
        let idx = blockno as usize;
        let Some(bits) = self.received.as_mut() else {
            warn!("block {blockno} arrived before block info; dropped");
            return;
        };
        if idx >= bits.len() {
            warn!("block {blockno} beyond expected range {}; dropped", bits.len());
            return;
        }
        if bits.get(idx) {
            debug!("duplicate block {blockno} dropped");
            return;
        }
        bits.set(idx, true);

        match self.writer.as_mut() {
            Some(write) => write(self.rxbuf.as_slice(), (idx * self.blocksz) as u64),
            None => warn!("writer closed; block {blockno} dropped"),
        }

        let pct = bits.percent();
        let complete = bits.is_complete();
        if let Some(p) = self.progress.as_mut() {
            p(&format!("{pct}% b:{blockno}"), Some(pct));
        }
        if complete {
            self.finish();
        }
    }

    /// One bounded step. The base receiver has no wrap-up work, so reaching
    /// `Finishing` concludes successfully.
    pub fn tick(&mut self) -> bool {
        match self.phase {
            Phase::FinishedOk | Phase::FinishedErr => return false,
            Phase::Finishing => {
                self.conclude(true);
                return false;
            }
            Phase::Starting | Phase::Transferring => {}
        }
        self.poll();
        if self.phase == Phase::Finishing {
            self.conclude(true);
            return false;
        }
        true
    }

    /// Tick until concluded.
    pub fn run(&mut self) {
        while self.tick() {}
    }
}
