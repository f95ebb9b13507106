//! WAL manager implementation.
//!
//! The WAL manager appends framed records to a single log file next to the
//! page store, batches them in memory until a flush, and scans the file back
//! during recovery. A frame that is short or fails its checksum marks the end
//! of the usable log.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use super::record::{
    Lsn, PageRecord, WalRecord, FRAME_HEADER_SIZE, FRAME_TRAILER_SIZE, MAX_BODY_SIZE,
};
use crate::error::{Error, Result};
use crate::storage::page::{PageBuf, PageId, PAGE_SIZE};
use crate::transaction::TransactionId;

const WAL_MAGIC: &[u8; 8] = b"BURROWWL";
const WAL_VERSION: u32 = 1;
/// Magic, page size, version and base LSN.
pub const WAL_HEADER_SIZE: u64 = 24;

/// Suffix appended to the store path to name its log.
pub const WAL_SUFFIX: &str = "-wal";

/// Location of the log belonging to a store file.
pub fn wal_path(store_path: &Path) -> PathBuf {
    let mut name: OsString = store_path.as_os_str().to_owned();
    name.push(WAL_SUFFIX);
    PathBuf::from(name)
}

/// WAL manager configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path of the log file.
    pub path: PathBuf,
    /// Whether a flush waits for the data to reach stable storage.
    pub sync_on_commit: bool,
}

impl WalConfig {
    pub fn for_store(store_path: &Path, sync_on_commit: bool) -> Self {
        WalConfig {
            path: wal_path(store_path),
            sync_on_commit,
        }
    }
}

/// Position in the log that a failed commit can be undone back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalMark {
    file_len: u64,
    buffered: usize,
    next_lsn: Lsn,
}

/// Result of scanning the log at open.
#[derive(Debug, Default)]
pub struct Replay {
    /// Page records of committed transactions, in LSN order.
    pub records: Vec<PageRecord>,
    /// Number of committed transactions found.
    pub committed: usize,
    /// Transactions that logged pages but never reached a commit marker.
    pub discarded: usize,
    /// Highest LSN seen in a valid frame.
    pub last_lsn: Lsn,
    /// Whether the scan stopped at a damaged or partial frame.
    pub torn_tail: bool,
}

struct FrameScan {
    records: Vec<WalRecord>,
    valid_len: u64,
    torn: bool,
}

/// WAL manager for handling write-ahead logging.
pub struct WalManager {
    config: WalConfig,
    file: File,
    /// Frames appended since the last flush.
    buffer: Vec<u8>,
    /// Bytes of the file holding complete frames, header included.
    file_len: u64,
    base_lsn: Lsn,
    next_lsn: Lsn,
    flushed_lsn: Lsn,
}

impl WalManager {
    /// Open the log, creating it with an empty body if it does not exist.
    pub fn open(config: WalConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let len = file.metadata()?.len();
        let base_lsn = if len < WAL_HEADER_SIZE {
            if len > 0 {
                warn!(
                    "WAL {} has a partial header, reinitializing",
                    config.path.display()
                );
            }
            Self::write_header(&mut file, Lsn(0))?;
            Lsn(0)
        } else {
            Self::read_header(&mut file)?
        };

        debug!("Opened WAL {} at base {}", config.path.display(), base_lsn);
        Ok(WalManager {
            config,
            file,
            buffer: Vec::new(),
            file_len: len.max(WAL_HEADER_SIZE),
            base_lsn,
            next_lsn: base_lsn.next(),
            flushed_lsn: base_lsn,
        })
    }

    /// Scan a log without opening it for writing. Returns `None` when the
    /// log does not exist.
    pub fn replay_file(path: &Path) -> Result<Option<Replay>> {
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(path)?;
        if file.metadata()?.len() < WAL_HEADER_SIZE {
            return Ok(Some(Replay::default()));
        }
        let base_lsn = Self::read_header(&mut file)?;
        let scan = Self::scan_frames(&mut file, base_lsn)?;
        Ok(Some(Self::committed_records(scan, base_lsn)))
    }

    fn write_header(file: &mut File, base_lsn: Lsn) -> Result<()> {
        let mut header = Vec::with_capacity(WAL_HEADER_SIZE as usize);
        header.extend_from_slice(WAL_MAGIC);
        header.write_u32::<LittleEndian>(PAGE_SIZE as u32)?;
        header.write_u32::<LittleEndian>(WAL_VERSION)?;
        header.write_u64::<LittleEndian>(base_lsn.0)?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.sync_all()?;
        Ok(())
    }

    fn read_header(file: &mut File) -> Result<Lsn> {
        let mut header = [0u8; WAL_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        if &header[0..8] != WAL_MAGIC {
            return Err(Error::corruption("WAL header has a bad magic number"));
        }
        let mut cursor = Cursor::new(&header[8..]);
        let page_size = cursor.read_u32::<LittleEndian>()?;
        if page_size as usize != PAGE_SIZE {
            return Err(Error::corruption(format!(
                "WAL written with page size {}, expected {}",
                page_size, PAGE_SIZE
            )));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != WAL_VERSION {
            return Err(Error::corruption(format!(
                "unsupported WAL version {}",
                version
            )));
        }
        Ok(Lsn(cursor.read_u64::<LittleEndian>()?))
    }

    /// Read frames until the end of the file or the first damaged frame.
    fn scan_frames(file: &mut File, base_lsn: Lsn) -> Result<FrameScan> {
        let mut data = Vec::new();
        file.seek(SeekFrom::Start(WAL_HEADER_SIZE))?;
        file.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        let mut last_lsn = base_lsn;
        let mut torn = false;

        while pos < data.len() {
            if data.len() - pos < FRAME_HEADER_SIZE {
                torn = true;
                break;
            }
            let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
            len_bytes.copy_from_slice(&data[pos..pos + FRAME_HEADER_SIZE]);
            let body_len = u32::from_le_bytes(len_bytes) as usize;
            let frame_len = FRAME_HEADER_SIZE + body_len + FRAME_TRAILER_SIZE;
            if body_len == 0 || body_len > MAX_BODY_SIZE || data.len() - pos < frame_len {
                torn = true;
                break;
            }

            let body = &data[pos + FRAME_HEADER_SIZE..pos + FRAME_HEADER_SIZE + body_len];
            let mut sum_bytes = [0u8; FRAME_TRAILER_SIZE];
            sum_bytes.copy_from_slice(&data[pos + FRAME_HEADER_SIZE + body_len..pos + frame_len]);
            if u64::from_le_bytes(sum_bytes) != WalRecord::body_checksum(body) {
                torn = true;
                break;
            }

            let record = match WalRecord::decode_body(body) {
                Ok(record) if record.lsn() > last_lsn => record,
                _ => {
                    torn = true;
                    break;
                }
            };
            last_lsn = record.lsn();
            records.push(record);
            pos += frame_len;
        }

        Ok(FrameScan {
            records,
            valid_len: WAL_HEADER_SIZE + pos as u64,
            torn,
        })
    }

    /// Keep the page records whose transaction logged a commit marker.
    fn committed_records(scan: FrameScan, base_lsn: Lsn) -> Replay {
        let mut pending: HashMap<TransactionId, Vec<PageRecord>> = HashMap::new();
        let mut replay = Replay {
            last_lsn: base_lsn,
            torn_tail: scan.torn,
            ..Replay::default()
        };

        for record in scan.records {
            replay.last_lsn = record.lsn();
            match record {
                WalRecord::Page(page) => {
                    pending.entry(page.transaction_id).or_default().push(page);
                }
                WalRecord::Commit { transaction_id, .. } => {
                    if let Some(pages) = pending.remove(&transaction_id) {
                        replay.records.extend(pages);
                    }
                    replay.committed += 1;
                }
            }
        }

        replay.discarded = pending.len();
        replay.records.sort_by_key(|r| r.lsn);
        replay
    }

    /// Scan the log and drop any damaged tail so new frames follow the last
    /// valid one.
    pub fn replay(&mut self) -> Result<Replay> {
        debug_assert!(self.buffer.is_empty());
        let scan = Self::scan_frames(&mut self.file, self.base_lsn)?;
        let valid_len = scan.valid_len;
        let replay = Self::committed_records(scan, self.base_lsn);

        if replay.torn_tail {
            warn!(
                "WAL {} ends in a damaged frame at byte {}, truncating",
                self.config.path.display(),
                valid_len
            );
            self.file.set_len(valid_len)?;
            self.file.sync_all()?;
        }
        self.file_len = valid_len;
        if replay.last_lsn >= self.next_lsn {
            self.next_lsn = replay.last_lsn.next();
        }
        self.flushed_lsn = replay.last_lsn;

        debug!(
            "WAL replay found {} committed and {} incomplete transactions up to {}",
            replay.committed, replay.discarded, replay.last_lsn
        );
        Ok(replay)
    }

    fn allocate_lsn(&mut self) -> Lsn {
        let lsn = self.next_lsn;
        self.next_lsn = lsn.next();
        lsn
    }

    /// Buffer the before and after image of one page.
    pub fn append(
        &mut self,
        transaction_id: TransactionId,
        page_id: PageId,
        before: Option<&PageBuf>,
        after: &PageBuf,
    ) -> Result<Lsn> {
        let lsn = self.allocate_lsn();
        WalRecord::encode_page_frame(transaction_id, page_id, before, after, lsn, &mut self.buffer)?;
        Ok(lsn)
    }

    /// Buffer the commit marker that makes a transaction's pages replayable.
    pub fn append_commit(&mut self, transaction_id: TransactionId) -> Result<Lsn> {
        let lsn = self.allocate_lsn();
        WalRecord::encode_commit_frame(transaction_id, lsn, &mut self.buffer)?;
        Ok(lsn)
    }

    /// Write buffered frames and, if configured, wait for stable storage.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.file_len))?;
        self.file.write_all(&self.buffer)?;
        if self.config.sync_on_commit {
            self.file.sync_data()?;
        }
        self.file_len += self.buffer.len() as u64;
        self.buffer.clear();
        self.flushed_lsn = self.last_lsn();
        Ok(())
    }

    pub fn mark(&self) -> WalMark {
        WalMark {
            file_len: self.file_len,
            buffered: self.buffer.len(),
            next_lsn: self.next_lsn,
        }
    }

    /// Forget everything appended after `mark`, including bytes a failed
    /// flush may have left in the file.
    pub fn rollback_to(&mut self, mark: WalMark) -> Result<()> {
        self.buffer.truncate(mark.buffered);
        if self.file.metadata()?.len() > mark.file_len {
            self.file.set_len(mark.file_len)?;
        }
        self.file_len = mark.file_len;
        self.next_lsn = mark.next_lsn;
        self.flushed_lsn = self.flushed_lsn.min(self.last_lsn());
        Ok(())
    }

    /// Empty the log after its contents reached the page store. LSNs keep
    /// counting from `base_lsn`.
    pub fn reset(&mut self, base_lsn: Lsn) -> Result<()> {
        debug_assert!(self.buffer.is_empty());
        Self::write_header(&mut self.file, base_lsn)?;
        self.buffer.clear();
        self.file_len = WAL_HEADER_SIZE;
        self.base_lsn = base_lsn;
        if base_lsn >= self.next_lsn {
            self.next_lsn = base_lsn.next();
        }
        self.flushed_lsn = self.last_lsn();
        debug!("Reset WAL {} to base {}", self.config.path.display(), base_lsn);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Bytes in the log, buffered frames included.
    pub fn size(&self) -> u64 {
        self.file_len + self.buffer.len() as u64
    }

    pub fn base_lsn(&self) -> Lsn {
        self.base_lsn
    }

    /// LSN of the most recently appended record.
    pub fn last_lsn(&self) -> Lsn {
        Lsn(self.next_lsn.0 - 1)
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::zeroed_page;
    use tempfile::TempDir;

    fn create_test_wal_manager() -> (WalManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig::for_store(&temp_dir.path().join("test.db"), false);
        let manager = WalManager::open(config).unwrap();
        (manager, temp_dir)
    }

    fn image(byte: u8) -> Box<PageBuf> {
        let mut page = zeroed_page();
        page.fill(byte);
        page
    }

    fn reopen(manager: WalManager) -> WalManager {
        let config = manager.config.clone();
        drop(manager);
        WalManager::open(config).unwrap()
    }

    fn log_transaction(manager: &mut WalManager, txn: u64, pages: &[(u64, u8)]) -> Lsn {
        let txn = TransactionId::new(txn);
        for &(page, byte) in pages {
            manager.append(txn, PageId(page), None, &image(byte)).unwrap();
        }
        manager.append_commit(txn).unwrap()
    }

    #[test]
    fn test_wal_path() {
        assert_eq!(
            wal_path(Path::new("/tmp/data.db")),
            PathBuf::from("/tmp/data.db-wal")
        );
    }

    #[test]
    fn test_append_assigns_increasing_lsns() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        let txn = TransactionId::new(1);

        let first = manager.append(txn, PageId(2), None, &image(1)).unwrap();
        let second = manager.append(txn, PageId(3), Some(&image(0)), &image(2)).unwrap();
        let commit = manager.append_commit(txn).unwrap();

        assert_eq!(first, Lsn(1));
        assert!(first < second && second < commit);
        assert_eq!(manager.last_lsn(), commit);
        assert_eq!(manager.flushed_lsn(), Lsn(0));
    }

    #[test]
    fn test_flush_and_replay() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        log_transaction(&mut manager, 1, &[(2, 10), (3, 11)]);
        let commit = log_transaction(&mut manager, 2, &[(2, 20)]);
        manager.flush().unwrap();
        assert_eq!(manager.flushed_lsn(), commit);

        let mut manager = reopen(manager);
        let replay = manager.replay().unwrap();
        assert_eq!(replay.committed, 2);
        assert_eq!(replay.discarded, 0);
        assert_eq!(replay.last_lsn, commit);
        assert!(!replay.torn_tail);

        let pages: Vec<(u64, u8)> = replay
            .records
            .iter()
            .map(|r| (r.page_id.0, r.after[0]))
            .collect();
        assert_eq!(pages, vec![(2, 10), (3, 11), (2, 20)]);

        // New records continue after the replayed ones.
        let next = manager.append_commit(TransactionId::new(3)).unwrap();
        assert!(next > commit);
    }

    #[test]
    fn test_replay_skips_uncommitted() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        log_transaction(&mut manager, 1, &[(2, 1)]);
        manager
            .append(TransactionId::new(2), PageId(3), None, &image(2))
            .unwrap();
        manager.flush().unwrap();

        let mut manager = reopen(manager);
        let replay = manager.replay().unwrap();
        assert_eq!(replay.committed, 1);
        assert_eq!(replay.discarded, 1);
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.records[0].page_id, PageId(2));
    }

    #[test]
    fn test_unflushed_records_are_lost() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        log_transaction(&mut manager, 1, &[(2, 1)]);

        let mut manager = reopen(manager);
        let replay = manager.replay().unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.committed, 0);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        log_transaction(&mut manager, 1, &[(2, 1)]);
        manager.flush().unwrap();
        let good_len = manager.size();
        log_transaction(&mut manager, 2, &[(3, 2)]);
        manager.flush().unwrap();

        // Cut the second transaction in the middle of its page image.
        let path = manager.path().to_path_buf();
        drop(manager);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(good_len + 100).unwrap();
        drop(file);

        let mut manager = WalManager::open(WalConfig {
            path: path.clone(),
            sync_on_commit: false,
        })
        .unwrap();
        let replay = manager.replay().unwrap();
        assert!(replay.torn_tail);
        assert_eq!(replay.committed, 1);
        assert_eq!(replay.records.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_checksum_mismatch_ends_log() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        log_transaction(&mut manager, 1, &[(2, 1)]);
        manager.flush().unwrap();
        let good_len = manager.size();
        log_transaction(&mut manager, 2, &[(3, 2)]);
        manager.flush().unwrap();

        let path = manager.path().to_path_buf();
        drop(manager);
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(good_len + 200)).unwrap();
        file.write_all(&[0xAB]).unwrap();
        drop(file);

        let replay = WalManager::replay_file(&path).unwrap().unwrap();
        assert!(replay.torn_tail);
        assert_eq!(replay.committed, 1);
    }

    #[test]
    fn test_rollback_to_mark() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        let committed = log_transaction(&mut manager, 1, &[(2, 1)]);
        manager.flush().unwrap();

        let mark = manager.mark();
        log_transaction(&mut manager, 2, &[(3, 2)]);
        manager.flush().unwrap();
        manager.rollback_to(mark).unwrap();
        assert_eq!(manager.last_lsn(), committed);

        let mut manager = reopen(manager);
        let replay = manager.replay().unwrap();
        assert_eq!(replay.committed, 1);
        assert_eq!(replay.last_lsn, committed);
    }

    #[test]
    fn test_reset_keeps_lsns_increasing() {
        let (mut manager, _temp_dir) = create_test_wal_manager();
        let commit = log_transaction(&mut manager, 1, &[(2, 1)]);
        manager.flush().unwrap();

        manager.reset(commit).unwrap();
        assert_eq!(manager.size(), WAL_HEADER_SIZE);

        let mut manager = reopen(manager);
        assert_eq!(manager.base_lsn(), commit);
        let replay = manager.replay().unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.last_lsn, commit);
        assert!(manager.append_commit(TransactionId::new(2)).unwrap() > commit);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad-wal");
        std::fs::write(&path, vec![7u8; WAL_HEADER_SIZE as usize]).unwrap();

        let result = WalManager::open(WalConfig {
            path,
            sync_on_commit: false,
        });
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_replay_file_missing_log() {
        let temp_dir = TempDir::new().unwrap();
        let replay = WalManager::replay_file(&temp_dir.path().join("none-wal")).unwrap();
        assert!(replay.is_none());
    }
}
