use git2::{Index, IndexEntry, IndexTime, Oid};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempPath;

use crate::error::{Result, StageError};
use crate::types::StagingIndexEntry;

const GIT_IDXENTRY_INTENT_TO_ADD: u16 = 1 << 13;
const GIT_IDXENTRY_STAGESHIFT: u16 = 12;
const GIT_IDXENTRY_STAGEMASK: u16 = 0x3000;
const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_TYPE_FILE: u32 = 0o100000;
const MODE_REGULAR: u32 = 0o100644;
const CHECKSUM_LEN: u64 = 20;

/// Identifies one on-disk version of the index file: its size and trailing
/// checksum. Any write by git or by us changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFingerprint {
    len: u64,
    checksum: Vec<u8>,
}

/// A read-only copy of the index together with the fingerprint of the file
/// it was read from.
pub struct IndexSnapshot {
    pub index: Index,
    pub fingerprint: Option<IndexFingerprint>,
}

impl IndexSnapshot {
    pub fn entry(&self, path: &str) -> Option<IndexEntry> {
        self.index.get_path(Path::new(path), 0)
    }

    pub fn entries(&self) -> Vec<StagingIndexEntry> {
        self.index.iter().map(|e| to_staging_entry(&e)).collect()
    }
}

/// Reads and rewrites the index file under `<git-dir>/index.lock`, the same
/// lock git itself takes.
#[derive(Debug, Clone)]
pub struct IndexEditor {
    git_dir: PathBuf,
    index_path: PathBuf,
    lock_path: PathBuf,
}

impl IndexEditor {
    pub fn new(git_dir: &Path) -> Self {
        Self {
            git_dir: git_dir.to_path_buf(),
            index_path: git_dir.join("index"),
            lock_path: git_dir.join("index.lock"),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Fingerprint of the index file, or `None` if it does not exist.
    pub fn fingerprint(&self) -> Result<Option<IndexFingerprint>> {
        let mut file = match File::open(&self.index_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        let mut checksum = Vec::new();
        if len >= CHECKSUM_LEN {
            file.seek(SeekFrom::End(-(CHECKSUM_LEN as i64)))?;
            file.take(CHECKSUM_LEN).read_to_end(&mut checksum)?;
        }
        Ok(Some(IndexFingerprint { len, checksum }))
    }

    /// Read the index without taking the lock.
    pub fn snapshot(&self) -> Result<IndexSnapshot> {
        let fingerprint = self.fingerprint()?;
        let index = Index::open(&self.index_path)?;
        Ok(IndexSnapshot { index, fingerprint })
    }

    pub fn read_entries(&self) -> Result<Vec<StagingIndexEntry>> {
        Ok(self.snapshot()?.entries())
    }

    /// Take the index lock.
    ///
    /// `seen` is the fingerprint observed when the caller read the index
    /// (`None` if it did not exist). If the file changed since, the lock is
    /// released and [`StageError::ConcurrentModification`] is returned.
    pub fn lock(&self, seen: Option<&IndexFingerprint>) -> Result<IndexLock> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StageError::LockUnavailable(self.lock_path.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!("acquired {}", self.lock_path.display());

        let mut lock = IndexLock {
            lock_path: self.lock_path.clone(),
            index_path: self.index_path.clone(),
            staged: None,
            index: None,
            committed: false,
        };

        let current = self.fingerprint()?;
        if current.as_ref() != seen {
            return Err(StageError::ConcurrentModification(
                "the index was rewritten by another process".to_string(),
            ));
        }

        // Edit a private copy so a crash never leaves a half-written index.
        let staged = tempfile::Builder::new()
            .prefix("index.linestage")
            .tempfile_in(&self.git_dir)?
            .into_temp_path();
        if current.is_some() {
            fs::copy(&self.index_path, &staged)?;
        } else {
            fs::remove_file(&staged)?;
        }
        lock.index = Some(Index::open(&staged)?);
        lock.staged = Some(staged);

        Ok(lock)
    }
}

/// Exclusive access to the index. Dropping it without [`IndexLock::commit`]
/// discards every edit and releases the lock.
pub struct IndexLock {
    lock_path: PathBuf,
    index_path: PathBuf,
    staged: Option<TempPath>,
    index: Option<Index>,
    committed: bool,
}

impl IndexLock {
    fn index(&mut self) -> Result<&mut Index> {
        self.index
            .as_mut()
            .ok_or_else(|| StageError::ConcurrentModification("index lock already released".into()))
    }

    pub fn entry(&self, path: &str) -> Option<IndexEntry> {
        self.index
            .as_ref()
            .and_then(|index| index.get_path(Path::new(path), 0))
    }

    /// Whether `path` already points at `oid` as a regular entry.
    pub fn is_current(&self, path: &str, oid: Oid) -> bool {
        self.entry(path)
            .is_some_and(|e| e.id == oid && e.flags_extended & GIT_IDXENTRY_INTENT_TO_ADD == 0)
    }

    /// Point `path` at `oid`, keeping the existing entry's stat data when
    /// there is one.
    pub fn replace_entry(&mut self, path: &str, oid: Oid, mode: u32, size: usize) -> Result<()> {
        let mut entry = self.entry(path).unwrap_or_else(|| IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: MODE_REGULAR,
            uid: 0,
            gid: 0,
            file_size: 0,
            id: oid,
            flags: 0,
            flags_extended: 0,
            path: path.as_bytes().to_vec(),
        });

        entry.id = oid;
        if mode != 0 {
            entry.mode = mode;
        }
        entry.file_size = size as u32;
        entry.mtime = now();
        // A staged intent-to-add entry is a real entry from now on.
        entry.flags_extended &= !GIT_IDXENTRY_INTENT_TO_ADD;

        self.index()?.add(&entry)?;
        tracing::debug!("index entry {} -> {}", path, oid);
        Ok(())
    }

    /// Remove `path` from the index. Returns whether an entry existed.
    pub fn remove_entry(&mut self, path: &str) -> Result<bool> {
        if self.entry(path).is_none() {
            return Ok(false);
        }
        self.index()?.remove(Path::new(path), 0)?;
        tracing::debug!("index entry {} removed", path);
        Ok(true)
    }

    /// Replace every entry with the entries of `source`.
    pub fn replace_all(&mut self, source: &Index) -> Result<()> {
        let index = self.index()?;
        index.clear()?;
        for entry in source.iter() {
            index.add(&entry)?;
        }
        Ok(())
    }

    /// Write the edited index and swap it into place.
    pub fn commit(mut self) -> Result<()> {
        self.index()?.write()?;
        self.index = None;
        if let Some(staged) = self.staged.take() {
            staged.persist(&self.index_path).map_err(|e| e.error)?;
        }
        self.committed = true;
        fs::remove_file(&self.lock_path)?;
        tracing::debug!("committed {}", self.index_path.display());
        Ok(())
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.lock_path) {
            tracing::warn!("failed to release {}: {}", self.lock_path.display(), e);
        }
    }
}

/// Modes other than regular files (symlinks, submodules) become `0o100644`.
pub fn regular_mode(mode: u32) -> u32 {
    if mode & MODE_TYPE_MASK == MODE_TYPE_FILE {
        mode
    } else {
        MODE_REGULAR
    }
}

fn now() -> IndexTime {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    IndexTime::new(elapsed.as_secs() as i32, elapsed.subsec_nanos())
}

pub fn to_staging_entry(entry: &IndexEntry) -> StagingIndexEntry {
    StagingIndexEntry {
        path: String::from_utf8_lossy(&entry.path).into_owned(),
        object_id: entry.id,
        mode: entry.mode,
        size: entry.file_size,
        mtime: entry.mtime.seconds(),
        stage: ((entry.flags & GIT_IDXENTRY_STAGEMASK) >> GIT_IDXENTRY_STAGESHIFT) as u8,
    }
}
