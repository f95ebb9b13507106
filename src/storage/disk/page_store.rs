use crate::error::{Error, Result};
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::meta_page::MetaPage;
use crate::storage::page::{stamp_checksum, verify_checksum, zeroed_page, PageBuf, PageId};
use crate::storage::wal::Lsn;
use crate::storage::PAGE_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Fixed-size page I/O over the single backing file.
///
/// `read_raw` and `write_raw` are the only places page contents touch the
/// file. Checksums are stamped on write and verified on read.
pub struct PageStore {
    file: File,
    path: PathBuf,
    read_only: bool,
}

impl PageStore {
    /// Create a new store holding a meta page and an empty root leaf.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut store = Self {
            file,
            path: path.to_path_buf(),
            read_only: false,
        };

        let root = PageId(1);
        let mut meta = zeroed_page();
        MetaPage::init(&mut meta, root);
        let mut leaf = zeroed_page();
        BTreeLeafPage::new().write_to(&mut leaf);

        store.write_raw(PageId::META, &meta)?;
        store.write_raw(root, &leaf)?;
        store.sync()?;

        Ok(store)
    }

    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        let mut store = Self {
            file,
            path: path.to_path_buf(),
            read_only,
        };

        if store.num_pages()? == 0 {
            return Err(Error::corruption(format!(
                "{} has no meta page",
                path.display()
            )));
        }
        let meta = store.read_raw(PageId::META)?;
        MetaPage::validate(&meta)?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn read_raw(&mut self, page_id: PageId) -> Result<Box<PageBuf>> {
        let mut buf = zeroed_page();
        self.file.seek(SeekFrom::Start(page_id.offset()))?;
        self.file.read_exact(buf.as_mut())?;
        verify_checksum(page_id, &buf)?;
        Ok(buf)
    }

    pub fn write_raw(&mut self, page_id: PageId, data: &PageBuf) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut buf = zeroed_page();
        buf.copy_from_slice(data);
        stamp_checksum(&mut buf);

        self.file.seek(SeekFrom::Start(page_id.offset()))?;
        self.file.write_all(buf.as_ref())?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if !self.read_only {
            self.file.sync_all()?;
        }
        Ok(())
    }

    pub fn num_pages(&self) -> Result<u64> {
        let file_size = self.file.metadata()?.len();
        Ok(file_size / PAGE_SIZE as u64)
    }

    pub fn read_meta(&mut self) -> Result<Box<PageBuf>> {
        let meta = self.read_raw(PageId::META)?;
        MetaPage::validate(&meta)?;
        Ok(meta)
    }

    /// Record how far the WAL has been folded into this file.
    pub fn set_checkpoint_lsn(&mut self, lsn: Lsn) -> Result<()> {
        let mut meta = self.read_meta()?;
        MetaPage::set_checkpoint_lsn(&mut meta, lsn);
        self.write_raw(PageId::META, &meta)?;
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{PageType, PAGE_BODY_OFFSET};
    use tempfile::tempdir;

    fn page_filled(byte: u8) -> Box<PageBuf> {
        let mut page = zeroed_page();
        PageType::Leaf.stamp(&mut page);
        page[PAGE_BODY_OFFSET..].fill(byte);
        page
    }

    #[test]
    fn test_create_and_open() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let store = PageStore::create(&file_path)?;
            assert_eq!(store.num_pages()?, 2);
        }

        {
            let mut store = PageStore::open(&file_path, false)?;
            let meta = store.read_meta()?;
            assert_eq!(MetaPage::root_page_id(&meta), PageId(1));
            assert_eq!(MetaPage::page_count(&meta), 2);
        }

        Ok(())
    }

    #[test]
    fn test_create_existing_fails() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        PageStore::create(&file_path)?;
        assert!(PageStore::create(&file_path).is_err());
        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::create(&dir.path().join("test.db"))?;

        store.write_raw(PageId(2), &page_filled(42))?;
        let read = store.read_raw(PageId(2))?;
        assert_eq!(read[PAGE_BODY_OFFSET], 42);
        assert_eq!(read[PAGE_SIZE - 1], 42);

        Ok(())
    }

    #[test]
    fn test_page_boundary() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::create(&dir.path().join("test.db"))?;

        store.write_raw(PageId(2), &page_filled(1))?;
        store.write_raw(PageId(3), &page_filled(2))?;

        let read = store.read_raw(PageId(2))?;
        assert!(read[PAGE_BODY_OFFSET..].iter().all(|&b| b == 1));
        let read = store.read_raw(PageId(3))?;
        assert!(read[PAGE_BODY_OFFSET..].iter().all(|&b| b == 2));

        Ok(())
    }

    #[test]
    fn test_file_growth_leaves_readable_hole() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::create(&dir.path().join("test.db"))?;

        store.write_raw(PageId(6), &page_filled(6))?;
        assert_eq!(store.num_pages()?, 7);

        let hole = store.read_raw(PageId(4))?;
        assert!(hole.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_short_read_is_io_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut store = PageStore::create(&dir.path().join("test.db"))?;

        let result = store.read_raw(PageId(10));
        assert!(matches!(result, Err(Error::Io(_))));

        Ok(())
    }

    #[test]
    fn test_checksum_mismatch_detected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        {
            let mut store = PageStore::create(&file_path)?;
            store.write_raw(PageId(2), &page_filled(9))?;
            store.sync()?;
        }

        // Flip a byte behind the store's back.
        {
            let mut file = OpenOptions::new().write(true).open(&file_path)?;
            file.seek(SeekFrom::Start(PageId(2).offset() + 100))?;
            file.write_all(&[0xFF])?;
        }

        let mut store = PageStore::open(&file_path, false)?;
        assert!(matches!(
            store.read_raw(PageId(2)),
            Err(Error::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn test_open_rejects_foreign_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("junk.db");
        std::fs::write(&file_path, vec![0u8; PAGE_SIZE * 2])?;

        assert!(matches!(
            PageStore::open(&file_path, false),
            Err(Error::Corruption(_))
        ));
        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let result = PageStore::open(&dir.path().join("nonexistent.db"), false);
        assert!(matches!(result, Err(Error::Io(_))));
        Ok(())
    }

    #[test]
    fn test_read_only_refuses_writes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        PageStore::create(&file_path)?;

        let mut store = PageStore::open(&file_path, true)?;
        assert!(store.is_read_only());
        assert!(matches!(
            store.write_raw(PageId(2), &page_filled(1)),
            Err(Error::ReadOnly)
        ));
        Ok(())
    }

    #[test]
    fn test_checkpoint_lsn_persists() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        {
            let mut store = PageStore::create(&file_path)?;
            store.set_checkpoint_lsn(Lsn(41))?;
        }
        let mut store = PageStore::open(&file_path, false)?;
        assert_eq!(MetaPage::checkpoint_lsn(&*store.read_meta()?), Lsn(41));
        Ok(())
    }
}
