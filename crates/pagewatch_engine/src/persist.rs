use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pagewatch_core::{NewPage, NewSite, Page, PageId, PageQuery, Site, SiteChanges, SiteId, UserId};
use tempfile::NamedTempFile;
use thiserror::Error;
use watch_logging::watch_info;

use crate::store::{SiteStore, StoreError, Tables};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Directory(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure a directory exists; create it if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Directory(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    }
    Ok(())
}

/// Replaces a file's content by writing a temp file next to it and renaming.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    target: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(target: PathBuf) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn write(&self, content: &str) -> Result<(), PersistError> {
        let dir = self
            .target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        ensure_dir(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.target).map_err(|e| PersistError::Io(e.error))?;
        Ok(())
    }
}

/// Store kept in memory and saved to a RON file after every mutation.
///
/// A failed save rolls the in-memory tables back, so memory never runs ahead of disk.
///
/// Every mutation clones the tables and then writes and syncs the file on the
/// calling thread while holding the lock. Fine for a single process with a
/// handful of sites; a busy multi-writer deployment wants a real database.
#[derive(Debug)]
pub struct RonFileStore {
    writer: AtomicFileWriter,
    tables: Mutex<Tables>,
}

impl RonFileStore {
    /// Opens `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = match fs::read_to_string(&path) {
            Ok(text) => ron::from_str(&text).map_err(|err| {
                StoreError::Corrupt(format!("{}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Tables::default(),
            Err(err) => return Err(PersistError::Io(err).into()),
        };
        watch_info!("store.opened path={}", path.display());
        Ok(Self {
            writer: AtomicFileWriter::new(path),
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.target()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let tables = self.lock()?;
        Ok(f(&tables))
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.lock()?;
        let before = tables.clone();
        let value = match f(&mut tables) {
            Ok(value) => value,
            Err(err) => {
                *tables = before;
                return Err(err);
            }
        };
        if *tables != before {
            if let Err(err) = self.save(&tables) {
                *tables = before;
                return Err(err);
            }
        }
        Ok(value)
    }

    fn save(&self, tables: &Tables) -> Result<(), StoreError> {
        let text = ron::ser::to_string_pretty(tables, ron::ser::PrettyConfig::new())
            .map_err(|err| StoreError::Serialize(err.to_string()))?;
        self.writer.write(&text)?;
        Ok(())
    }
}

#[async_trait]
impl SiteStore for RonFileStore {
    async fn list_sites(&self, owner: Option<UserId>) -> Result<Vec<Site>, StoreError> {
        self.read(|t| t.sites(owner))
    }

    async fn get_site(&self, id: SiteId) -> Result<Site, StoreError> {
        self.read(|t| t.site(id))?
    }

    async fn insert_site(&self, site: NewSite) -> Result<SiteId, StoreError> {
        self.mutate(|t| Ok(t.insert_site(site)))
    }

    async fn update_site(&self, id: SiteId, changes: &SiteChanges) -> Result<u64, StoreError> {
        self.mutate(|t| Ok(t.update_site(id, changes)))
    }

    async fn delete_site(&self, id: SiteId, delete_pages: bool) -> Result<u64, StoreError> {
        self.mutate(|t| Ok(t.delete_site(id, delete_pages)))
    }

    async fn insert_page(&self, page: NewPage) -> Result<PageId, StoreError> {
        self.mutate(|t| t.insert_page(page))
    }

    async fn set_site_last_url(&self, id: SiteId, url: &str) -> Result<(), StoreError> {
        self.mutate(|t| t.set_site_last_url(id, url))
    }

    async fn record_page(&self, page: NewPage, last_url: &str) -> Result<PageId, StoreError> {
        self.mutate(|t| t.record_page(page, last_url))
    }

    async fn list_pages(&self, query: &PageQuery) -> Result<Vec<Page>, StoreError> {
        self.read(|t| t.pages(query))
    }

    async fn set_page_read(&self, id: PageId, read: bool) -> Result<(), StoreError> {
        self.mutate(|t| t.set_page_read(id, read))
    }

    async fn delete_page(&self, id: PageId) -> Result<(), StoreError> {
        self.mutate(|t| t.delete_page(id))
    }
}
