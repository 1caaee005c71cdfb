// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Cooperative round-robin task runner.
//!
//! The unit of progress everywhere in this crate is a `tick` that does a
//! bounded amount of work and says whether the task is still running. The
//! runner just cycles the list, dropping tasks as they finish.

use crate::phy::Phy;
use crate::transfer::{FileReceiver, FileSender, Receiver, Sender};

/// A tickable unit of work.
pub trait Task {
    /// Do one bounded step; false means finished.
    fn tick(&mut self) -> bool;
}

impl<P: Phy> Task for Sender<P> {
    fn tick(&mut self) -> bool {
        Sender::tick(self)
    }
}

impl<P: Phy> Task for Receiver<P> {
    fn tick(&mut self) -> bool {
        Receiver::tick(self)
    }
}

impl<P: Phy> Task for FileSender<P> {
    fn tick(&mut self) -> bool {
        FileSender::tick(self)
    }
}

impl<P: Phy> Task for FileReceiver<P> {
    fn tick(&mut self) -> bool {
        FileReceiver::tick(self)
    }
}

/// Tick every task in turn until all have finished.
pub fn run_all(tasks: &mut Vec<&mut dyn Task>) {
    while !tasks.is_empty() {
        tasks.retain_mut(|task| task.tick());
    }
}
