// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Single-line terminal progress rendering.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use blockcast::transfer::ProgressFn;

const MAXLEN: usize = 79;

/// Textual progress bar scaled to a fixed width.
pub struct ProgressBar {
    value: u8,
    width: usize,
}

impl ProgressBar {
    /// Bar of `width` characters tracking 0..=100.
    pub fn new(width: usize) -> Self {
        Self { value: 0, width }
    }

    /// Update the percent shown.
    pub fn set_value(&mut self, percent: u8) {
        self.value = percent.min(100);
    }

    /// Render as `[####......] (40%)`.
    pub fn render(&self) -> String {
        let filled = self.width * usize::from(self.value) / 100;
        format!(
            "[{}{}] ({}%)",
            "#".repeat(filled),
            ".".repeat(self.width - filled),
            self.value
        )
    }
}

/// Rate-limited single-line progress display on stderr.
pub struct Progresser {
    name: String,
    bar: ProgressBar,
    next: Instant,
    rate: Duration,
    dirty: bool,
}

impl Progresser {
    /// Display prefixed with `name`, updating at most once a second.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bar: ProgressBar::new(20),
            next: Instant::now(),
            rate: Duration::from_secs(1),
            dirty: false,
        }
    }

    /// Update the line; drops updates arriving faster than the rate.
    pub fn update(&mut self, msg: &str, percent: Option<u8>) {
        if let Some(p) = percent {
            self.bar.set_value(p);
        }
        let now = Instant::now();
        if now < self.next {
            return;
        }
        self.next = now + self.rate;

        let mut line = if percent.is_some() {
            format!("{}:{} {}", self.name, self.bar.render(), msg)
        } else {
            format!("{}:{}", self.name, msg)
        };
        line.truncate(MAXLEN);
        eprint!("\r{:MAXLEN$}\r{line}", "");
        let _ = io::stderr().flush();
        self.dirty = true;
    }

    /// Move off the progress line, preserving it.
    pub fn finish(&mut self) {
        if self.dirty {
            eprintln!();
            self.dirty = false;
        }
    }
}

impl Drop for Progresser {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Progress callback rendering through a [`Progresser`].
pub fn progress_fn(name: &str) -> ProgressFn {
    let mut progresser = Progresser::new(name);
    Box::new(move |msg, percent| progresser.update(msg, percent))
}
