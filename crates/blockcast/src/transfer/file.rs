// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 blockcast developers

//! File-level transfer agents.
//!
//! The sender advertises file metadata (geometry, SHA-256, name) on the
//! control channel, interleaved with data blocks so a late or lossy receiver
//! still learns it. The receiver captures the first metadata record, collects
//! blocks into a slot store, and commits to the final filename only after the
//! recomputed digest matches the advertised one.

use std::cell::RefCell;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::link::{Channel, HandlerId, LinkManager, PacketInfo, END_BYTE, HEADER_LEN, MAX_PAYLOAD};
use crate::phy::Phy;
use crate::transfer::{BlockReader, Phase, ProgressFn, Receiver, Sender};
use crate::util::{basename, decode_to_str, file_info, hashstr};

/// Type byte of a metadata record.
pub const META_TYPE: u8 = 0x01;

/// Metadata record: fixed fields, then the filename bytes.
const META_FIXED_LEN: usize = 37;

/// Longest filename carried in a metadata record.
const META_NAME_MAX: usize = 200;

/// File metadata advertised on the control channel.
///
/// Wire layout (payload of a control frame):
///
/// ```text
/// 0:     type       0x01
/// 1..2:  nblocks    count of full-size blocks, big-endian
/// 3:     blocksz    bytes per full block
/// 4:     lastblock  bytes in the final partial block, 0 if none
/// 5..36: sha256     digest of the whole file
/// 37..:  filename   optionally null-terminated
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Count of full-size blocks.
    pub nblocks: u16,
    /// Size of a full block.
    pub blocksz: u8,
    /// Size of the final partial block (0 if the file divides evenly).
    pub lastblock: u8,
    /// SHA-256 of the file contents.
    pub sha256: [u8; 32],
    /// Original file name, no directory part.
    pub filename: String,
}

impl FileMeta {
    /// Probe a file and build its metadata.
    pub fn for_file(path: &Path, blocksz: u8) -> Result<Self> {
        debug_assert!(blocksz as usize <= MAX_PAYLOAD);
        let (size, sha256) = file_info(path)?;

        let nblocks = size / u64::from(blocksz);
        if nblocks > u64::from(u16::MAX) {
            return Err(Error::FileTooLarge { blocks: nblocks });
        }

        let mut filename = basename(path);
        while filename.len() > META_NAME_MAX {
            filename.pop();
        }

        Ok(Self {
            nblocks: nblocks as u16,
            blocksz,
            lastblock: (size % u64::from(blocksz)) as u8,
            sha256,
            filename,
        })
    }

    /// Encode to record bytes.
    pub fn to_record(&self) -> Vec<u8> {
        let mut rec = Vec::with_capacity(META_FIXED_LEN + self.filename.len());
        rec.push(META_TYPE);
        rec.extend_from_slice(&self.nblocks.to_be_bytes());
        rec.push(self.blocksz);
        rec.push(self.lastblock);
        rec.extend_from_slice(&self.sha256);
        rec.extend_from_slice(self.filename.as_bytes());
        rec
    }

    /// Decode a record payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < META_FIXED_LEN || payload[0] != META_TYPE {
            return Err(Error::BadRecord);
        }
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&payload[5..37]);
        let name_bytes = &payload[META_FIXED_LEN..];
        Ok(Self {
            nblocks: u16::from_be_bytes([payload[1], payload[2]]),
            blocksz: payload[3],
            lastblock: payload[4],
            sha256,
            filename: decode_to_str(name_bytes).trim_end_matches('\0').to_string(),
        })
    }

    /// Blocks on the wire, counting the partial one.
    pub fn total_blocks(&self) -> u32 {
        u32::from(self.nblocks) + u32::from(self.lastblock > 0)
    }

    /// Length of the file described.
    pub fn file_len(&self) -> u64 {
        u64::from(self.nblocks) * u64::from(self.blocksz) + u64::from(self.lastblock)
    }
}

/// Metadata goes out on each of the first `START_META` ticks.
pub const START_META: u64 = 1;

/// ...and every this-many ticks afterwards.
pub const META_EVERY_N: u64 = 2000;

/// File sender: block sender plus periodic metadata broadcast.
pub struct FileSender<P: Phy> {
    inner: Sender<P>,
    link: Rc<RefCell<LinkManager<P>>>,
    meta: FileMeta,
    meta_record: Vec<u8>,
    metabuf: Buffer,
    ticks: u64,
}

impl<P: Phy> FileSender<P> {
    /// Sender for `path`, reading `blocksz`-byte blocks.
    pub fn new(
        path: &Path,
        link: Rc<RefCell<LinkManager<P>>>,
        blocksz: u8,
        progress: Option<ProgressFn>,
    ) -> Result<Self> {
        let meta = FileMeta::for_file(path, blocksz)?;
        let meta_record = meta.to_record();

        let mut file = fs::File::open(path)?;
        let file_len = meta.file_len();
        let reader: BlockReader = Box::new(move |buf, nbytes, offset| {
            if offset >= file_len {
                return None; // EOF
            }
            let want = nbytes.min((file_len - offset) as usize);
            let mut chunk = [0u8; crate::MAX_FRAME];
            let read = file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.read_exact(&mut chunk[..want]));
            if let Err(e) = read {
                warn!("read failed at offset {offset}: {e}");
                return None;
            }
            buf.extend(&chunk[..want]).ok()?;
            Some(want)
        });

        let mut inner = Sender::new(Rc::clone(&link), reader, blocksz as usize);
        inner.set_progress(progress);

        info!(
            "sending {} ({} bytes, {} blocks, sha:{})",
            meta.filename,
            meta.file_len(),
            meta.total_blocks(),
            hashstr(&meta.sha256)
        );

        Ok(Self {
            inner,
            link,
            meta,
            meta_record,
            metabuf: Buffer::new(crate::MAX_FRAME, HEADER_LEN),
            ticks: 0,
        })
    }

    /// Metadata being advertised.
    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    /// The wrapped block sender (for stats).
    pub fn sender(&self) -> &Sender<P> {
        &self.inner
    }

    fn send_meta(&mut self) {
        self.metabuf.reset();
        if self.metabuf.extend(&self.meta_record).is_err() {
            warn!("metadata record does not fit the frame; not sent");
            return;
        }
        let info = PacketInfo::control(Channel::LINK);
        if let Err(e) = self.link.borrow_mut().send(Some(&mut self.metabuf), &info) {
            warn!("meta send failed: {e}");
        }
    }

    /// One bounded step: metadata on schedule, otherwise the next block.
    pub fn tick(&mut self) -> bool {
        if !self.inner.is_running() {
            return false;
        }
        let n = self.ticks;
        self.ticks += 1;
        if n < START_META || n % META_EVERY_N == 0 {
            self.send_meta();
            return true;
        }
        self.inner.tick()
    }

    /// Tick until the whole file (and the END record) has gone out.
    pub fn run(&mut self) {
        while self.tick() {}
    }
}

#[derive(Debug, Default)]
struct RxShared {
    meta: Option<FileMeta>,
    end_seen: bool,
    meta_conflicts: u32,
}

/// Slot-per-block assembly storage, written out sequentially on commit.
#[derive(Debug)]
struct BlockStore {
    slots: Vec<Option<Vec<u8>>>,
}

impl BlockStore {
    fn new(nslots: usize) -> Self {
        Self {
            slots: vec![None; nslots],
        }
    }

    fn put(&mut self, idx: usize, data: &[u8]) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = Some(data.to_vec());
        } else {
            warn!("slot {idx} beyond store; dropped");
        }
    }
}

fn control_record(shared: &RefCell<RxShared>, payload: &[u8]) {
    match payload.first() {
        Some(&META_TYPE) => match FileMeta::decode(payload) {
            Ok(meta) => {
                let mut s = shared.borrow_mut();
                match &s.meta {
                    None => s.meta = Some(meta),
                    Some(have) if *have != meta => {
                        s.meta_conflicts += 1;
                        warn!("metadata disagrees with first capture; keeping first");
                    }
                    Some(_) => {}
                }
            }
            Err(_) => warn!("short metadata record ignored"),
        },
        Some(&END_BYTE) => shared.borrow_mut().end_seen = true,
        Some(t) => debug!("unknown control record type 0x{t:02X} ignored"),
        None => {}
    }
}

/// File receiver: block receiver plus metadata capture, integrity check and
/// commit-on-success.
pub struct FileReceiver<P: Phy> {
    base: Receiver<P>,
    link: Rc<RefCell<LinkManager<P>>>,
    shared: Rc<RefCell<RxShared>>,
    store: Option<Rc<RefCell<BlockStore>>>,
    handler: Option<HandlerId>,
    out_path: PathBuf,
}

impl<P: Phy> FileReceiver<P> {
    /// Receiver committing to `out_path` on success.
    pub fn new(
        link: Rc<RefCell<LinkManager<P>>>,
        out_path: &Path,
        progress: Option<ProgressFn>,
    ) -> Self {
        let shared = Rc::new(RefCell::new(RxShared::default()));
        let shared_in = Rc::clone(&shared);
        let handler = link.borrow_mut().register(
            Channel::LINK.control(),
            Box::new(move |payload, _info| control_record(&shared_in, payload)),
        );

        let mut base = Receiver::new(Rc::clone(&link), Channel::LINK);
        base.set_progress(progress);

        Self {
            base,
            link,
            shared,
            store: None,
            handler: Some(handler),
            out_path: out_path.to_path_buf(),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.base.phase()
    }

    /// Metadata captured so far, if any.
    pub fn meta(&self) -> Option<FileMeta> {
        self.shared.borrow().meta.clone()
    }

    /// `(received, expected)` block counts once metadata is known.
    pub fn block_counts(&self) -> Option<(usize, usize)> {
        self.base.received().map(|bits| (bits.count_set(), bits.len()))
    }

    /// Metadata records that disagreed with the first capture.
    pub fn meta_conflicts(&self) -> u32 {
        self.shared.borrow().meta_conflicts
    }

    fn adopt_meta(&mut self) {
        if self.base.has_block_info() {
            return;
        }
        let Some(meta) = self.shared.borrow().meta.clone() else {
            return;
        };

        let total = meta.total_blocks() as usize;
        let blocksz = u64::from(meta.blocksz);
        let store = Rc::new(RefCell::new(BlockStore::new(total)));
        let store_in = Rc::clone(&store);
        self.base.set_writer(Some(Box::new(move |data, offset| {
            store_in.borrow_mut().put((offset / blocksz) as usize, data);
        })));
        self.base.set_block_info(total, meta.blocksz as usize);
        self.store = Some(store);

        info!(
            "receiving {} ({} bytes, {} blocks, sha:{})",
            meta.filename,
            meta.file_len(),
            total,
            hashstr(&meta.sha256)
        );
    }

    fn commit(&mut self) -> Result<()> {
        let meta = self.shared.borrow().meta.clone().ok_or(Error::BadRecord)?;
        let store = self.store.as_ref().ok_or(Error::BadRecord)?;
        let store = store.borrow();

        let mut hasher = Sha256::new();
        let mut missing = 0usize;
        for slot in &store.slots {
            match slot {
                Some(block) => hasher.update(block),
                None => missing += 1,
            }
        }
        if missing > 0 {
            warn!("{missing} blocks never arrived");
        }
        let digest: [u8; 32] = hasher.finalize().into();
        if digest != meta.sha256 {
            return Err(Error::DigestMismatch {
                want: hashstr(&meta.sha256),
                got: hashstr(&digest),
            });
        }

        let mut part = self.out_path.as_os_str().to_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        let write_out = (|| -> Result<()> {
            let mut f = fs::File::create(&part)?;
            for slot in store.slots.iter().flatten() {
                f.write_all(slot)?;
            }
            f.flush()?;
            Ok(())
        })();
        if let Err(e) = write_out {
            let _ = fs::remove_file(&part);
            return Err(e);
        }
        fs::rename(&part, &self.out_path)?;
        Ok(())
    }

    fn end_transfer(&mut self) {
        if let Some(id) = self.handler.take() {
            self.link
                .borrow_mut()
                .deregister(Channel::LINK.control(), id);
        }
        match self.commit() {
            Ok(()) => {
                info!("committed {}", self.out_path.display());
                self.base.conclude(true);
            }
            Err(e) => {
                warn!("transfer aborted: {e}");
                self.base.conclude(false);
            }
        }
        self.store = None; // release the slots either way
    }

    /// One bounded step.
    pub fn tick(&mut self) -> bool {
        match self.base.phase() {
            Phase::FinishedOk | Phase::FinishedErr => return false,
            Phase::Finishing => {
                self.end_transfer();
                return false;
            }
            Phase::Starting | Phase::Transferring => {}
        }

        self.adopt_meta();
        self.base.poll();
        if self.shared.borrow().end_seen {
            self.base.finish();
        }
        if self.base.phase() == Phase::Finishing {
            self.end_transfer();
            return false;
        }
        true
    }

    /// Tick until committed or aborted.
    pub fn run(&mut self) {
        while self.tick() {}
    }
}

impl<P: Phy> Drop for FileReceiver<P> {
    fn drop(&mut self) {
        if let Some(id) = self.handler.take() {
            if let Ok(mut link) = self.link.try_borrow_mut() {
                link.deregister(Channel::LINK.control(), id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_round_trip() {
        let meta = FileMeta {
            nblocks: 5,
            blocksz: 50,
            lastblock: 6,
            sha256: [0xAB; 32],
            filename: "photo.jpg".to_string(),
        };
        let rec = meta.to_record();
        assert_eq!(META_TYPE, rec[0]);
        assert_eq!(META_FIXED_LEN + 9, rec.len());
        assert_eq!(meta, FileMeta::decode(&rec).unwrap());
    }

    #[test]
    fn test_meta_layout() {
        let meta = FileMeta {
            nblocks: 0x0102,
            blocksz: 50,
            lastblock: 0,
            sha256: [0; 32],
            filename: String::new(),
        };
        let rec = meta.to_record();
        assert_eq!(&[0x01, 0x01, 0x02, 50, 0], &rec[..5]);
        assert_eq!(258, meta.total_blocks());
        assert_eq!(0x0102 * 50, meta.file_len());
    }

    #[test]
    fn test_meta_counts_partial_block() {
        let meta = FileMeta {
            nblocks: 5,
            blocksz: 50,
            lastblock: 6,
            sha256: [0; 32],
            filename: String::new(),
        };
        assert_eq!(6, meta.total_blocks());
        assert_eq!(256, meta.file_len());
    }

    #[test]
    fn test_meta_decode_rejects_short_record() {
        assert!(matches!(
            FileMeta::decode(&[META_TYPE, 0, 1]),
            Err(Error::BadRecord)
        ));
        assert!(matches!(FileMeta::decode(&[]), Err(Error::BadRecord)));
    }

    #[test]
    fn test_meta_decode_strips_null_terminator() {
        let mut rec = FileMeta {
            nblocks: 1,
            blocksz: 10,
            lastblock: 0,
            sha256: [0; 32],
            filename: "a.bin".to_string(),
        }
        .to_record();
        rec.push(0);
        assert_eq!("a.bin", FileMeta::decode(&rec).unwrap().filename);
    }

    #[test]
    fn test_for_file_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geom.bin");
        fs::write(&path, vec![7u8; 256]).unwrap();

        let meta = FileMeta::for_file(&path, 50).unwrap();
        assert_eq!(5, meta.nblocks);
        assert_eq!(50, meta.blocksz);
        assert_eq!(6, meta.lastblock);
        assert_eq!("geom.bin", meta.filename);
        assert_eq!(256, meta.file_len());
    }
}
