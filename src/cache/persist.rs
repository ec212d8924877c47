//! Disk Mirror Module
//!
//! Mirrors partitions to a directory so cached responses survive restarts.
//!
//! Layout: `<root>/<partition>/<sha256(key)>.body` and
//! `<root>/<partition>/<sha256(key)>.meta.json`. Both files are written to a
//! temporary name and renamed into place, body first. The metadata carries
//! the body's sha256, so a crash between the two renames leaves a pair that
//! fails verification on load instead of a new body under old metadata.
//!
//! These are blocking calls; the store reaches them through `MirrorWriter`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cache::{CacheEntry, RequestKey};
use crate::classify::RouteClass;
use crate::error::{GatewayError, Result};

const BODY_EXT: &str = "body";
const META_EXT: &str = "meta.json";

/// Entry metadata persisted next to the body.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    cached_at: u64,
    route_class: RouteClass,
    sequence: u64,
    body_len: usize,
    body_sha256: String,
}

/// A partition read back from disk.
#[derive(Debug)]
pub struct LoadedPartition {
    pub name: String,
    pub entries: Vec<(u64, CacheEntry)>,
    /// Entries skipped because their files were missing or inconsistent
    pub discarded: usize,
}

// == Disk Mirror ==
#[derive(Debug, Clone)]
pub struct DiskMirror {
    root: PathBuf,
}

impl DiskMirror {
    /// Opens (and creates if needed) the mirror root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(partition)
    }

    pub fn create_partition(&self, partition: &str) -> Result<()> {
        fs::create_dir_all(self.partition_dir(partition))?;
        Ok(())
    }

    pub fn remove_partition(&self, partition: &str) -> Result<()> {
        let dir = self.partition_dir(partition);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    // == Write Entry ==
    pub fn write_entry(&self, partition: &str, entry: &CacheEntry, sequence: u64) -> Result<()> {
        let dir = self.partition_dir(partition);
        let stem = file_stem(&entry.key);

        write_atomic(&dir, &format!("{}.{}", stem, BODY_EXT), &entry.body)?;

        let meta = EntryMeta {
            key: entry.key.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            cached_at: entry.cached_at,
            route_class: entry.route_class,
            sequence,
            body_len: entry.body.len(),
            body_sha256: body_digest(&entry.body),
        };
        let json = serde_json::to_vec(&meta)
            .map_err(|e| GatewayError::CacheUnavailable(e.to_string()))?;
        write_atomic(&dir, &format!("{}.{}", stem, META_EXT), &json)?;
        Ok(())
    }

    pub fn remove_entry(&self, partition: &str, key: &RequestKey) -> Result<()> {
        let dir = self.partition_dir(partition);
        let stem = file_stem(key);
        // Meta first: without it the entry is invisible on the next load
        remove_if_exists(&dir.join(format!("{}.{}", stem, META_EXT)))?;
        remove_if_exists(&dir.join(format!("{}.{}", stem, BODY_EXT)))?;
        Ok(())
    }

    // == Load ==
    /// Reads every partition directory under the root.
    pub fn load(&self) -> Result<Vec<LoadedPartition>> {
        let mut partitions = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = dir_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            partitions.push(self.load_partition(&name, &dir_entry.path())?);
        }
        Ok(partitions)
    }

    fn load_partition(&self, name: &str, dir: &Path) -> Result<LoadedPartition> {
        let mut entries = Vec::new();
        let mut discarded = 0;

        for file in fs::read_dir(dir)? {
            let path = file?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(&format!(".{}", META_EXT)) else {
                continue;
            };

            match read_entry(dir, stem, &path) {
                Some(loaded) => entries.push(loaded),
                None => {
                    warn!(partition = name, file = file_name, "Discarding unreadable cache entry");
                    discarded += 1;
                }
            }
        }

        Ok(LoadedPartition {
            name: name.to_string(),
            entries,
            discarded,
        })
    }
}

fn read_entry(dir: &Path, stem: &str, meta_path: &Path) -> Option<(u64, CacheEntry)> {
    let meta: EntryMeta = serde_json::from_slice(&fs::read(meta_path).ok()?).ok()?;
    let body = fs::read(dir.join(format!("{}.{}", stem, BODY_EXT))).ok()?;
    if body.len() != meta.body_len
        || body_digest(&body) != meta.body_sha256
        || file_stem(&meta.key) != stem
    {
        return None;
    }

    let entry = CacheEntry {
        key: meta.key,
        status: meta.status,
        headers: meta.headers,
        body: Bytes::from(body),
        cached_at: meta.cached_at,
        route_class: meta.route_class,
    };
    Some((meta.sequence, entry))
}

fn file_stem(key: &RequestKey) -> String {
    hex::encode(Sha256::digest(key.as_str().as_bytes()))
}

fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn write_atomic(dir: &Path, file_name: &str, contents: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{}.tmp", file_name));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(file_name))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
