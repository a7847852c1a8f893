//! Filesystem store: one directory per state
//!
//! Layout under the factory root:
//!
//! ```text
//! {root}/{STATE}/{hex(key)}         content
//! {root}/_mod/{STATE}/{hex(key)}    modification time, decimal epoch seconds
//! ```
//!
//! Item keys are hex-encoded into file names so any key is a valid path
//! component. Hex doubles the length, so keys are limited to
//! [`MAX_KEY_LEN`] bytes to stay within the usual 255 byte file name limit.

use shep_core::{
    canonical_name, check_item_key, next_timestamp, ShepError, ShepResult, Store, StoreFactory,
    Timestamp, MODIFIED_PREFIX,
};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CloseFlag, StoreCache};

/// Longest item key whose file name fits in 255 bytes
pub const MAX_KEY_LEN: usize = 127;

fn file_name(key: &str) -> String {
    hex::encode(key.as_bytes())
}

fn key_from_file_name(name: &str) -> Option<String> {
    let bytes = hex::decode(name).ok()?;
    String::from_utf8(bytes).ok()
}

/// Read a file, mapping "not found" to `None`
fn read_optional(path: &Path) -> ShepResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove a file, mapping "not found" to `false`
fn remove_optional(path: &Path) -> ShepResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Filesystem store for a single state
pub struct FsStore {
    name: String,
    dir: PathBuf,
    mod_dir: PathBuf,
    flag: CloseFlag,
}

impl FsStore {
    fn check_key(key: &str) -> ShepResult<()> {
        check_item_key(key)?;
        if key.len() > MAX_KEY_LEN {
            return Err(ShepError::InvalidKey(format!(
                "{} bytes, filesystem keys are limited to {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        Ok(())
    }
    
    fn content_path(&self, key: &str) -> ShepResult<PathBuf> {
        Self::check_key(key)?;
        Ok(self.dir.join(file_name(key)))
    }
    
    fn modified_path(&self, key: &str) -> ShepResult<PathBuf> {
        Self::check_key(key)?;
        Ok(self.mod_dir.join(file_name(key)))
    }
    
    /// Directory holding this state's items
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

impl Store for FsStore {
    fn name(&self) -> &str {
        &self.name
    }
    
    fn put(&self, key: &str, content: &[u8]) -> ShepResult<()> {
        self.flag.check()?;
        fs::write(self.content_path(key)?, content)?;
        Ok(())
    }
    
    fn get(&self, key: &str) -> ShepResult<Option<Vec<u8>>> {
        self.flag.check()?;
        read_optional(&self.content_path(key)?)
    }
    
    fn contains(&self, key: &str) -> ShepResult<bool> {
        self.flag.check()?;
        Ok(self.content_path(key)?.is_file())
    }
    
    fn remove(&self, key: &str) -> ShepResult<bool> {
        self.flag.check()?;
        remove_optional(&self.modified_path(key)?)?;
        remove_optional(&self.content_path(key)?)
    }
    
    fn replace(&self, key: &str, content: &[u8]) -> ShepResult<()> {
        self.flag.check()?;
        let path = self.content_path(key)?;
        if !path.is_file() {
            return Err(ShepError::KeyNotFound {
                state: self.name.clone(),
                key: key.to_string(),
            });
        }
        fs::write(path, content)?;
        Ok(())
    }
    
    fn list(&self) -> ShepResult<Vec<(String, Vec<u8>)>> {
        self.flag.check()?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file = entry.file_name();
            let Some(key) = file.to_str().and_then(key_from_file_name) else {
                warn!("Skipping foreign file {:?} in store {}", file, self.name);
                continue;
            };
            entries.push((key, fs::read(entry.path())?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
    
    fn modified(&self, key: &str) -> ShepResult<Option<Timestamp>> {
        self.flag.check()?;
        match read_optional(&self.modified_path(key)?)? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)?;
                text.trim()
                    .parse::<Timestamp>()
                    .map(Some)
                    .map_err(|e| ShepError::Decode(format!("timestamp for {}: {}", key, e)))
            }
            None => Ok(None),
        }
    }
    
    fn register_modify_after(
        &self,
        key: &str,
        previous: Option<Timestamp>,
    ) -> ShepResult<Timestamp> {
        let ts = next_timestamp(self.modified(key)?.max(previous));
        // timestamp directory appears with the first tracked item
        fs::create_dir_all(&self.mod_dir)?;
        fs::write(self.modified_path(key)?, ts.to_string())?;
        Ok(ts)
    }
}

/// Directory-per-state backend rooted at one directory
///
/// A partition exists once its directory exists, whether or not it
/// holds items.
pub struct FsStoreFactory {
    root: PathBuf,
    cache: StoreCache,
}

impl FsStoreFactory {
    /// Open (or create) a filesystem backend at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> ShepResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(MODIFIED_PREFIX))?;
        info!("Opened filesystem store factory at {}", root.display());
        Ok(Self {
            root,
            cache: StoreCache::new(),
        })
    }
    
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StoreFactory for FsStoreFactory {
    fn add(&self, name: &str) -> ShepResult<Arc<dyn Store>> {
        let flag = self.cache.flag();
        self.cache.get_or_create(name, |name| {
            let dir = self.root.join(name);
            let mod_dir = self.root.join(MODIFIED_PREFIX).join(name);
            fs::create_dir_all(&dir)?;
            debug!("Created filesystem store {} at {}", name, dir.display());
            let store: Arc<dyn Store> = Arc::new(FsStore {
                name: name.to_string(),
                dir,
                mod_dir,
                flag,
            });
            Ok(store)
        })
    }
    
    fn lookup(&self, name: &str) -> ShepResult<Option<Arc<dyn Store>>> {
        self.cache.flag().check()?;
        let name = canonical_name(name)?;
        if !self.root.join(&name).is_dir() {
            return Ok(None);
        }
        self.add(&name).map(Some)
    }
    
    fn ls(&self) -> ShepResult<Vec<String>> {
        self.cache.flag().check()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(dir) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // canonical names are upper case and never start with '_'
            if canonical_name(&dir).map(|n| n == dir).unwrap_or(false) {
                names.push(dir);
            }
        }
        names.sort();
        Ok(names)
    }
    
    fn close(&self) -> ShepResult<()> {
        self.cache.close();
        info!("Closed filesystem store factory at {}", self.root.display());
        Ok(())
    }
    
    fn is_closed(&self) -> bool {
        self.cache.is_closed()
    }
}
