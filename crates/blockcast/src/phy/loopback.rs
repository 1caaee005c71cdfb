// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! In-memory byte-queue transport for tests and single-process demos.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::phy::{Phy, Recv};

#[derive(Debug, Default)]
struct Queue {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// Loopback transport over in-memory byte queues.
///
/// `new` gives a single shared queue, so one instance (or its clones) sees
/// its own transmissions: the shape a sender task and receiver task in the
/// same cooperative loop want. `pair` gives two cross-connected endpoints.
/// Clones share the underlying queues.
#[derive(Debug, Clone)]
pub struct LoopbackPhy {
    tx: Rc<RefCell<Queue>>,
    rx: Rc<RefCell<Queue>>,
}

impl LoopbackPhy {
    /// Single shared queue: sends come back on receive.
    pub fn new() -> Self {
        let q = Rc::new(RefCell::new(Queue::default()));
        Self {
            tx: Rc::clone(&q),
            rx: q,
        }
    }

    /// Two endpoints whose sends appear on the other's receive side.
    pub fn pair() -> (Self, Self) {
        let a = Rc::new(RefCell::new(Queue::default()));
        let b = Rc::new(RefCell::new(Queue::default()));
        (
            Self {
                tx: Rc::clone(&a),
                rx: Rc::clone(&b),
            },
            Self { tx: b, rx: a },
        )
    }

    /// Mark the transmit queue closed: once drained, readers get EOF.
    pub fn close_tx(&self) {
        self.tx.borrow_mut().closed = true;
    }

    /// Inject raw bytes into the transmit queue, bypassing any framing.
    ///
    /// Lets tests put line noise between frames.
    pub fn push_bytes(&self, data: &[u8]) {
        self.tx.borrow_mut().bytes.extend(data);
    }

    /// Bytes currently queued for receive.
    pub fn pending(&self) -> usize {
        self.rx.borrow().bytes.len()
    }
}

impl Default for LoopbackPhy {
    fn default() -> Self {
        Self::new()
    }
}

impl Phy for LoopbackPhy {
    fn send(&mut self, buf: &Buffer) {
        let mut q = self.tx.borrow_mut();
        buf.read_with(|bytes| {
            q.bytes.extend(bytes);
            bytes.len()
        });
    }

    fn recv_into(&mut self, buf: &mut Buffer, _wait_ms: u32) -> Recv {
        // Nothing new can arrive while this thread spins, so a deadline
        // collapses to a poll.
        let mut q = self.rx.borrow_mut();
        if q.bytes.is_empty() {
            return if q.closed { Recv::Eof } else { Recv::NoData };
        }
        let nb = buf.write_with(|storage| {
            let want = storage.len().min(q.bytes.len());
            for slot in storage.iter_mut().take(want) {
                *slot = q.bytes.pop_front().unwrap_or(0);
            }
            want
        });
        Recv::Data(nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_recv_round_trip() {
        let mut phy = LoopbackPhy::new();
        phy.send(&Buffer::filled(b"hello world"));

        let mut buf = Buffer::default();
        assert_eq!(Recv::Data(11), phy.recv_into(&mut buf, 0));
        assert_eq!(b"hello world", buf.as_slice());
    }

    #[test]
    fn test_empty_queue_is_nodata_then_eof() {
        let mut phy = LoopbackPhy::new();
        let mut buf = Buffer::default();
        assert_eq!(Recv::NoData, phy.recv_into(&mut buf, 5));
        phy.close_tx();
        assert_eq!(Recv::Eof, phy.recv_into(&mut buf, 5));
    }

    #[test]
    fn test_pair_crosses_over() {
        let (mut a, mut b) = LoopbackPhy::pair();
        a.send(&Buffer::filled(b"ping"));

        let mut buf = Buffer::default();
        assert_eq!(Recv::NoData, a.recv_into(&mut buf, 0));
        assert_eq!(Recv::Data(4), b.recv_into(&mut buf, 0));
        assert_eq!(b"ping", buf.as_slice());
    }

    #[test]
    fn test_recv_clamps_to_buffer_capacity() {
        let mut phy = LoopbackPhy::new();
        phy.push_bytes(&[0xAA; 300]);

        let mut buf = Buffer::new(64, 0);
        assert_eq!(Recv::Data(64), phy.recv_into(&mut buf, 0));
        assert_eq!(236, phy.pending());
    }
}
