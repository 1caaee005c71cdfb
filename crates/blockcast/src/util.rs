// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! Support functions: hexascii plumbing, digest rendering and the small
//! platform facade (clocks, file probing) the transfer layers depend on.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Convert a run of bytes into one line of space-separated hexascii.
pub fn bin_to_hex(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i != 0 {
            result.push(' ');
        }
        result.push_str(&format!("{b:02X}"));
    }
    result
}

/// Convert a line of hexascii into bytes.
///
/// Whitespace between pairs is skipped and invalid digits read as zero; a
/// trailing unpaired digit is dropped. Duff input is not worth failing over
/// here, the link CRC catches anything that matters.
pub fn hex_to_bin(in_hex: &str) -> Vec<u8> {
    fn hexch(ch: u8) -> u8 {
        match ch {
            b'0'..=b'9' => ch - b'0',
            b'a'..=b'f' => ch - b'a' + 10,
            b'A'..=b'F' => ch - b'A' + 10,
            _ => 0,
        }
    }

    let bytes = in_hex.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        if pos + 1 >= bytes.len() {
            break; // truncated pair, return what we got
        }
        out.push((hexch(bytes[pos]) << 4) | hexch(bytes[pos + 1]));
        pos += 2;
    }
    out
}

/// Render bytes as unseparated hexascii.
pub fn hexstr(data: &[u8]) -> String {
    let mut res = String::with_capacity(data.len() * 2);
    for b in data {
        res.push_str(&format!("{b:02X}"));
    }
    res
}

/// Short rendering of a digest: first and last two bytes.
pub fn hashstr(the_hash: &[u8]) -> String {
    if the_hash.len() > 4 {
        format!(
            "{:02X}{:02X}...{:02X}{:02X}",
            the_hash[0],
            the_hash[1],
            the_hash[the_hash.len() - 2],
            the_hash[the_hash.len() - 1]
        )
    } else {
        hexstr(the_hash)
    }
}

/// Final path component as a string, or the whole path if there is none.
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Lossy decode of received filename bytes.
pub fn decode_to_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// File size and SHA-256 of a file's contents.
pub fn file_info(path: &Path) -> io::Result<(u64, [u8; 32])> {
    let size = fs::metadata(path)?.len();

    let mut hasher = Sha256::new();
    let mut f = fs::File::open(path)?;
    let mut block = [0u8; 512]; // typical cluster size on an SD card
    loop {
        let nb = f.read(&mut block)?;
        if nb == 0 {
            break;
        }
        hasher.update(&block[..nb]);
    }
    Ok((size, hasher.finalize().into()))
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic milliseconds since first use, for throttling and deadlines.
pub fn now_ms() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// Sleep for `ms` milliseconds.
pub fn sleep_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}
