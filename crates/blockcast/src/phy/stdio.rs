// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Stdio pipe transport: frames go out on stdout, come in on stdin.
//!
//! Lets a sender and receiver be chained through shells, serial port
//! redirections or the noise pipe.

use std::io::{self, Read, Write};

use log::warn;

use crate::buffer::Buffer;
use crate::phy::{Phy, Recv};

/// Transport over the process's standard streams.
///
/// Reads block until data arrives regardless of `wait_ms` (a pipe has no
/// portable sub-read deadline), so this adapter suits dedicated sender or
/// receiver processes, not shared-loop tasking.
#[derive(Debug, Default)]
pub struct StdStreamPhy {
    output_broken: bool,
}

impl StdStreamPhy {
    /// New stdio transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a send has failed with a broken pipe.
    ///
    /// The CLI treats this as a clean stop, not a transport fault.
    pub fn output_broken(&self) -> bool {
        self.output_broken
    }
}

impl Phy for StdStreamPhy {
    fn send(&mut self, buf: &Buffer) {
        if self.output_broken {
            return;
        }
        let mut broken = false;
        buf.read_with(|bytes| {
            let mut out = io::stdout().lock();
            match out.write_all(bytes).and_then(|()| out.flush()) {
                Ok(()) => bytes.len(),
                Err(e) => {
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        broken = true;
                    } else {
                        warn!("stdout write failed: {e}");
                    }
                    0
                }
            }
        });
        if broken && !self.output_broken {
            warn!("stdout pipe closed; dropping further sends");
            self.output_broken = true;
        }
    }

    fn recv_into(&mut self, buf: &mut Buffer, _wait_ms: u32) -> Recv {
        let mut eof = false;
        let nb = buf.write_with(|storage| {
            let mut stdin = io::stdin().lock();
            match stdin.read(storage) {
                Ok(0) => {
                    eof = true;
                    0
                }
                Ok(nb) => nb,
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    eof = true;
                    0
                }
            }
        });
        if eof {
            Recv::Eof
        } else {
            Recv::Data(nb)
        }
    }
}
