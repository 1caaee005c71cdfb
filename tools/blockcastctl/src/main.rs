// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! blockcast command line: send and receive files over framed byte links,
//! plus the stream tools (bin2hex, hex2bin, noise) used to build test rigs.
//!
//! # Usage
//!
//! ```bash
//! # pipe a file from one shell to another
//! blockcastctl send photo.jpg | blockcastctl receive copy.jpg
//!
//! # the same, through a noisy channel
//! blockcastctl send photo.jpg | blockcastctl noise --prob 5 --ebit 1,0 \
//!     | blockcastctl receive copy.jpg
//!
//! # single-process demo over an in-memory link
//! blockcastctl loopback photo.jpg copy.jpg -p
//! ```

mod progress;

use std::cell::RefCell;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, Parser, Subcommand};

use blockcast::noise::{NoiseGenerator, NoiseSpec};
use blockcast::tasking::{run_all, Task};
use blockcast::transfer::ProgressFn;
use blockcast::util::{bin_to_hex, hex_to_bin, now_ms, sleep_ms};
use blockcast::{FileReceiver, FileSender, LinkManager, LoopbackPhy, Phase, Phy, StdStreamPhy};

/// Throttle that keeps a 512+32 byte UART receive buffer ahead of the sender.
const DEFAULT_PPS: u32 = 40;

const DEFAULT_NOISE_PACKET_LEN: usize = 32;

#[derive(Parser)]
#[command(name = "blockcastctl")]
#[command(version = blockcast::VERSION)]
#[command(about = "File transfer over lossy byte links")]
struct Cli {
    /// More diagnostics on stderr (repeat for debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a file as framed packets on stdout
    Send {
        /// File to send
        path: PathBuf,

        /// Show a progress line on stderr
        #[arg(short = 'p', long)]
        progress: bool,

        /// Packets per second; 0 disables throttling
        #[arg(long, default_value_t = DEFAULT_PPS)]
        pps: u32,

        /// Bytes per block
        #[arg(long, default_value_t = 50)]
        block_size: u8,
    },

    /// Receive framed packets on stdin and commit the file
    Receive {
        /// Where to commit the received file
        path: PathBuf,

        /// Show a progress line on stderr
        #[arg(short = 'p', long)]
        progress: bool,
    },

    /// Send and receive in one process over an in-memory link
    Loopback {
        /// File to send
        tx_path: PathBuf,

        /// Where to commit the received copy
        rx_path: PathBuf,

        /// Show a progress line on stderr
        #[arg(short = 'p', long)]
        progress: bool,

        /// Bytes per block
        #[arg(long, default_value_t = 50)]
        block_size: u8,
    },

    /// Convert binary stdin to hexascii lines on stdout
    Bin2hex,

    /// Convert hexascii stdin to binary on stdout
    Hex2bin,

    /// Corrupt a binary stream per an error spec (stdin to stdout)
    Noise {
        /// Bytes per treated packet
        #[arg(long = "len", default_value_t = DEFAULT_NOISE_PACKET_LEN)]
        packet_len: usize,

        /// Percent chance a packet is corrupted at all
        #[arg(long)]
        prob: Option<u8>,

        /// Percent chance a hit packet is dropped outright
        #[arg(long = "edrop")]
        drop: Option<u8>,

        /// Length errors as trunc,extend (e.g. -4,2)
        #[arg(long = "elen", value_parser = parse_i32_pair, allow_hyphen_values = true)]
        len: Option<(i32, i32)>,

        /// Bit flips as count,distance (distance 0 = random)
        #[arg(long = "ebit", value_parser = parse_u32_pair)]
        bit: Option<(u32, u32)>,

        /// Byte corruptions as count,distance
        #[arg(long = "ebyte", value_parser = parse_u32_pair)]
        byte: Option<(u32, u32)>,

        /// Fixed RNG seed for reproducible corruption
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn parse_i32_pair(s: &str) -> std::result::Result<(i32, i32), String> {
    let (a, b) = s
        .split_once(',')
        .ok_or_else(|| format!("expected two comma-separated values, got '{s}'"))?;
    Ok((
        a.trim().parse().map_err(|e| format!("'{a}': {e}"))?,
        b.trim().parse().map_err(|e| format!("'{b}': {e}"))?,
    ))
}

fn parse_u32_pair(s: &str) -> std::result::Result<(u32, u32), String> {
    let (a, b) = parse_i32_pair(s)?;
    if a < 0 || b < 0 {
        return Err(format!("negative value in '{s}'"));
    }
    Ok((a as u32, b as u32))
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Send {
            path,
            progress,
            pps,
            block_size,
        } => do_send(&path, progress, pps, block_size),
        Command::Receive { path, progress } => do_receive(&path, progress),
        Command::Loopback {
            tx_path,
            rx_path,
            progress,
            block_size,
        } => do_loopback(&tx_path, &rx_path, progress, block_size),
        Command::Bin2hex => do_bin2hex(),
        Command::Hex2bin => do_hex2bin(),
        Command::Noise {
            packet_len,
            prob,
            drop,
            len,
            bit,
            byte,
            seed,
        } => {
            let spec = NoiseSpec {
                prob,
                drop,
                len,
                bit,
                byte,
            };
            do_noise(packet_len, spec, seed)
        }
    }
}

fn progress_for(enabled: bool, name: &str) -> Option<ProgressFn> {
    enabled.then(|| progress::progress_fn(name))
}

fn check_block_size(block_size: u8) -> Result<()> {
    if block_size == 0 {
        bail!("block size must be at least 1");
    }
    if block_size as usize > blockcast::link::MAX_PAYLOAD {
        bail!(
            "block size {} exceeds the largest frame payload ({})",
            block_size,
            blockcast::link::MAX_PAYLOAD
        );
    }
    Ok(())
}

fn print_stats<P: Phy>(name: &str, link: &Rc<RefCell<LinkManager<P>>>) {
    let link = link.borrow();
    eprintln!("stats for:{name}");
    eprintln!("  link: {}", link.stats());
    eprintln!("  pkt:  {}", link.framer_stats());
}

fn do_send(path: &Path, progress: bool, pps: u32, block_size: u8) -> Result<()> {
    check_block_size(block_size)?;
    let link = Rc::new(RefCell::new(LinkManager::new(StdStreamPhy::new())));
    let mut sender = FileSender::new(path, Rc::clone(&link), block_size, progress_for(progress, "tx"))
        .with_context(|| format!("cannot send {}", path.display()))?;

    if pps > 0 {
        let budget_ms = 1000 / u64::from(pps).max(1);
        loop {
            let started = now_ms();
            if !sender.tick() {
                break;
            }
            let spent = now_ms() - started;
            if budget_ms > spent {
                sleep_ms(budget_ms - spent);
            }
        }
    } else {
        sender.run();
    }

    print_stats("tx", &link);
    eprintln!(
        "  transfer: ticks:{} blocks:{}",
        sender.sender().ticks(),
        sender.sender().emit_counts().len()
    );
    if link.borrow().phy().output_broken() {
        eprintln!("output pipe closed before the transfer finished");
    }
    Ok(())
}

fn do_receive(path: &Path, progress: bool) -> Result<()> {
    let link = Rc::new(RefCell::new(LinkManager::new(StdStreamPhy::new())));
    let mut receiver = FileReceiver::new(Rc::clone(&link), path, progress_for(progress, "rx"));
    receiver.run();

    print_stats("rx", &link);
    if let Some((got, want)) = receiver.block_counts() {
        eprintln!("  transfer: blocks:{got}/{want}");
    }

    match receiver.phase() {
        Phase::FinishedOk => Ok(()),
        _ => bail!("receive failed; {} not committed", path.display()),
    }
}

fn do_loopback(tx_path: &Path, rx_path: &Path, progress: bool, block_size: u8) -> Result<()> {
    check_block_size(block_size)?;
    let link = Rc::new(RefCell::new(LinkManager::new(LoopbackPhy::new())));
    let mut sender = FileSender::new(
        tx_path,
        Rc::clone(&link),
        block_size,
        progress_for(progress, "tx"),
    )
    .with_context(|| format!("cannot send {}", tx_path.display()))?;
    let mut receiver = FileReceiver::new(Rc::clone(&link), rx_path, progress_for(progress, "rx"));

    let mut tasks: Vec<&mut dyn Task> = vec![&mut sender, &mut receiver];
    run_all(&mut tasks);

    print_stats("loopback", &link);
    match receiver.phase() {
        Phase::FinishedOk => Ok(()),
        _ => bail!("loopback receive failed; {} not committed", rx_path.display()),
    }
}

/// Write to stdout, reporting a broken pipe as a clean stop.
fn pipe_write(data: &[u8]) -> Result<bool> {
    let mut out = io::stdout().lock();
    match out.write_all(data).and_then(|()| out.flush()) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            eprintln!("output pipe closed");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn do_bin2hex() -> Result<()> {
    let mut stdin = io::stdin().lock();
    let mut packet = [0u8; DEFAULT_NOISE_PACKET_LEN];
    loop {
        let nb = stdin.read(&mut packet).context("reading stdin")?;
        if nb == 0 {
            return Ok(());
        }
        let line = format!("{}\n", bin_to_hex(&packet[..nb]));
        if !pipe_write(line.as_bytes())? {
            return Ok(());
        }
    }
}

fn do_hex2bin() -> Result<()> {
    let stdin = io::stdin().lock();
    for line in stdin.lines() {
        let line = line.context("reading stdin")?;
        if !pipe_write(&hex_to_bin(&line))? {
            return Ok(());
        }
    }
    Ok(())
}

fn do_noise(packet_len: usize, spec: NoiseSpec, seed: Option<u64>) -> Result<()> {
    if packet_len == 0 {
        bail!("packet length must be at least 1");
    }
    let mut generator = match seed {
        Some(seed) => NoiseGenerator::with_seed(spec, seed),
        None => NoiseGenerator::new(spec),
    };

    let mut stdin = io::stdin().lock();
    let mut packet = vec![0u8; packet_len];
    loop {
        let nb = read_packet(&mut stdin, &mut packet)?;
        if nb == 0 {
            return Ok(());
        }
        let eof = nb < packet_len;

        let mut data = packet[..nb].to_vec();
        generator.apply(&mut data);
        if !data.is_empty() && !pipe_write(&data)? {
            return Ok(());
        }
        if eof {
            return Ok(());
        }
    }
}

/// Fill `packet` from the reader, tolerating short reads; 0 means EOF.
fn read_packet(reader: &mut impl Read, packet: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < packet.len() {
        let nb = reader.read(&mut packet[filled..]).context("reading stdin")?;
        if nb == 0 {
            break;
        }
        filled += nb;
    }
    Ok(filled)
}
