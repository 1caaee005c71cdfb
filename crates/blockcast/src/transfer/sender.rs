// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Generic block sender.

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;

use crate::buffer::Buffer;
use crate::link::{Channel, LinkManager, PacketInfo, HEADER_LEN};
use crate::phy::Phy;
use crate::transfer::{BlockChooser, BlockReader, ProgressFn, RepeatChooser};

/// Repeat-broadcast sender: reads blocks at computed offsets and emits them
/// tagged with their block number, then signals EOF with an END record.
pub struct Sender<P: Phy> {
    link: Rc<RefCell<LinkManager<P>>>,
    reader: BlockReader,
    channel: Channel,
    blocksz: usize,
    chooser: Box<dyn BlockChooser>,
    emit_counts: Vec<u16>,
    txbuf: Buffer,
    ticks: u64,
    running: bool,
    progress: Option<ProgressFn>,
}

impl<P: Phy> Sender<P> {
    /// Sender reading `blocksz`-byte blocks, single emission per block.
    pub fn new(link: Rc<RefCell<LinkManager<P>>>, reader: BlockReader, blocksz: usize) -> Self {
        Self {
            link,
            reader,
            channel: Channel::LINK,
            blocksz,
            chooser: Box::new(RepeatChooser::new(0)),
            emit_counts: Vec::new(),
            txbuf: Buffer::new(crate::MAX_FRAME, HEADER_LEN),
            ticks: 0,
            running: true,
            progress: None,
        }
    }

    /// Replace the block-choice policy.
    pub fn set_chooser(&mut self, chooser: Box<dyn BlockChooser>) {
        self.chooser = chooser;
    }

    /// Emit on a different logical channel (control bit forced clear).
    pub fn set_channel(&mut self, channel: Channel) {
        self.channel = channel.data();
    }

    /// Attach a progress callback.
    pub fn set_progress(&mut self, progress: Option<ProgressFn>) {
        self.progress = progress;
    }

    /// True until the reader reports EOF.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ticks consumed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Emission count per block, grown as the cursor advances.
    pub fn emit_counts(&self) -> &[u16] {
        &self.emit_counts
    }

    /// One bounded step: choose a block, read it, emit it.
    ///
    /// Returns false once EOF has been signalled.
    pub fn tick(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.ticks += 1;

        let (blockno, _rep) = self.chooser.choose();
        let offset = self.blocksz as u64 * u64::from(blockno);

        self.txbuf.reset();
        match (self.reader)(&mut self.txbuf, self.blocksz, offset) {
            None => {
                self.running = false;
                let info = PacketInfo::block(self.channel, blockno);
                if let Err(e) = self.link.borrow_mut().send(None, &info) {
                    warn!("EOF signal failed: {e}");
                }
                if let Some(p) = self.progress.as_mut() {
                    p("EOF", None);
                }
                false
            }
            Some(0) => true, // nothing available this tick
            Some(_nb) => {
                let idx = blockno as usize;
                if idx >= self.emit_counts.len() {
                    self.emit_counts.resize(idx + 1, 0);
                }
                self.emit_counts[idx] += 1;

                let info = PacketInfo::block(self.channel, blockno);
                if let Err(e) = self.link.borrow_mut().send(Some(&mut self.txbuf), &info) {
                    warn!("block {blockno} send failed: {e}");
                }
                if let Some(p) = self.progress.as_mut() {
                    p(&format!("b:{blockno}"), None);
                }
                true
            }
        }
    }

    /// Tick until EOF.
    pub fn run(&mut self) {
        while self.tick() {}
    }
}
