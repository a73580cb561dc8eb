//! Change detection against a persistent signature cache.
//!
//! Signatures are `(size, mtime_ns, content_hash)`. The hash is a streaming
//! FNV-1a over fixed-size chunks; files are never loaded wholesale. With
//! `deep_check`, a size/mtime mismatch is confirmed by hash before a file is
//! classified as modified, so an `mtime`-only touch stays `unchanged`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::walker::WalkedFile;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// FNV-1a 64-bit, seeded for incremental chunk feeding.
#[derive(Debug, Clone, Copy)]
pub struct StreamingHash(u64);

impl Default for StreamingHash {
    fn default() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }
}

impl StreamingHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

/// Hash a byte slice in one call (small inputs, tests).
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut hash = StreamingHash::new();
    hash.update(data);
    hash.finish()
}

/// Hash a file by streaming fixed-size chunks.
pub fn hash_file(path: &Path) -> std::io::Result<u64> {
    let mut file = std::fs::File::open(path)?;
    let mut hash = StreamingHash::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hash.update(&buf[..n]);
    }
    Ok(hash.finish())
}

/// Per-file change signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub size: u64,
    pub mtime_ns: i64,
    pub content_hash: Option<u64>,
}

/// How a path changed relative to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Modified,
    Unchanged,
    Deleted,
}

/// Classification of one walked path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub rel_path: String,
    pub kind: ChangeKind,
    pub old_sig: Option<Signature>,
    pub new_sig: Option<Signature>,
}

/// The persistent `path → signature` map, loaded at scan start and flushed
/// only after a successful scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureCache {
    entries: HashMap<String, Signature>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Signature)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Signature> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Signature)> {
        self.entries.iter()
    }
}

/// Classifies walker output against the signature cache.
///
/// The detector owns the cache for the duration of a scan; the updated cache
/// is taken back with [`ChangeDetector::into_cache`] once the scan commits.
#[derive(Debug)]
pub struct ChangeDetector {
    cache: SignatureCache,
    visited: HashMap<String, ()>,
    deep_check: bool,
}

impl ChangeDetector {
    pub fn new(cache: SignatureCache, deep_check: bool) -> Self {
        Self {
            cache,
            visited: HashMap::new(),
            deep_check,
        }
    }

    /// Classify one walked file and update the in-memory cache entry.
    pub fn classify(&mut self, file: &WalkedFile) -> ChangeRecord {
        self.visited.insert(file.rel_path.clone(), ());
        let old = self.cache.entries.get(&file.rel_path).copied();

        let record = match old {
            None => {
                let new_sig = self.signature_of(file);
                ChangeRecord {
                    rel_path: file.rel_path.clone(),
                    kind: ChangeKind::New,
                    old_sig: None,
                    new_sig: Some(new_sig),
                }
            }
            Some(old_sig) => {
                if old_sig.size == file.size && old_sig.mtime_ns == file.mtime_ns {
                    ChangeRecord {
                        rel_path: file.rel_path.clone(),
                        kind: ChangeKind::Unchanged,
                        old_sig: Some(old_sig),
                        new_sig: Some(old_sig),
                    }
                } else if self.deep_check {
                    // Confirm by content before declaring a modification.
                    let new_sig = self.signature_of(file);
                    let kind = match (old_sig.content_hash, new_sig.content_hash) {
                        (Some(old_hash), Some(new_hash)) if old_hash == new_hash => {
                            debug!(path = %file.rel_path, "mtime changed, content identical");
                            ChangeKind::Unchanged
                        }
                        _ => ChangeKind::Modified,
                    };
                    ChangeRecord {
                        rel_path: file.rel_path.clone(),
                        kind,
                        old_sig: Some(old_sig),
                        new_sig: Some(new_sig),
                    }
                } else {
                    let new_sig = Signature {
                        size: file.size,
                        mtime_ns: file.mtime_ns,
                        content_hash: None,
                    };
                    ChangeRecord {
                        rel_path: file.rel_path.clone(),
                        kind: ChangeKind::Modified,
                        old_sig: Some(old_sig),
                        new_sig: Some(new_sig),
                    }
                }
            }
        };

        if let Some(new_sig) = record.new_sig {
            self.cache.entries.insert(file.rel_path.clone(), new_sig);
        }
        record
    }

    fn signature_of(&self, file: &WalkedFile) -> Signature {
        let content_hash = if self.deep_check {
            hash_file(&file.abs_path).ok()
        } else {
            None
        };
        Signature {
            size: file.size,
            mtime_ns: file.mtime_ns,
            content_hash,
        }
    }

    /// After the walk: every cache entry not visited this scan is deleted.
    pub fn finish(&mut self) -> Vec<ChangeRecord> {
        let gone: Vec<String> = self
            .cache
            .entries
            .keys()
            .filter(|path| !self.visited.contains_key(*path))
            .cloned()
            .collect();
        gone.into_iter()
            .map(|path| {
                let old_sig = self.cache.entries.remove(&path);
                ChangeRecord {
                    rel_path: path,
                    kind: ChangeKind::Deleted,
                    old_sig,
                    new_sig: None,
                }
            })
            .collect()
    }

    /// Take back the updated cache for flushing. Call only after a
    /// successful scan; dropping the detector discards partial progress.
    pub fn into_cache(self) -> SignatureCache {
        self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn walked(dir: &Path, rel: &str, content: &str, mtime_ns: i64) -> WalkedFile {
        let abs = dir.join(rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(&abs, content).unwrap();
        WalkedFile {
            abs_path: abs,
            rel_path: rel.to_string(),
            size: content.len() as u64,
            mtime_ns,
        }
    }

    #[test]
    fn hash_is_deterministic_and_discriminating() {
        let a = hash_bytes(b"guid: abc");
        let b = hash_bytes(b"guid: abc");
        let c = hash_bytes(b"guid: xyz");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn streaming_hash_matches_one_shot() {
        let data = b"a longer buffer that gets split into pieces";
        let mut streaming = StreamingHash::new();
        for chunk in data.chunks(7) {
            streaming.update(chunk);
        }
        assert_eq!(streaming.finish(), hash_bytes(data));
    }

    #[test]
    fn hash_file_streams_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let content = vec![0xabu8; HASH_CHUNK_SIZE * 2 + 17];
        std::fs::write(&path, &content).unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(&content));
    }

    #[test]
    fn new_then_unchanged_then_modified() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = ChangeDetector::new(SignatureCache::new(), true);

        let file = walked(dir.path(), "Assets/a.meta", "guid: 1", 100);
        assert_eq!(detector.classify(&file).kind, ChangeKind::New);

        // Same signature: unchanged.
        assert_eq!(detector.classify(&file).kind, ChangeKind::Unchanged);

        // Content change with new mtime: modified.
        let file = walked(dir.path(), "Assets/a.meta", "guid: 22", 200);
        assert_eq!(detector.classify(&file).kind, ChangeKind::Modified);
    }

    #[test]
    fn deep_check_saves_mtime_only_touch() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = ChangeDetector::new(SignatureCache::new(), true);

        let file = walked(dir.path(), "Assets/a.meta", "guid: 1", 100);
        detector.classify(&file);

        // Same bytes, bumped mtime.
        let touched = WalkedFile {
            mtime_ns: 999,
            ..file.clone()
        };
        let record = detector.classify(&touched);
        assert_eq!(record.kind, ChangeKind::Unchanged);

        // The refreshed mtime is remembered, so the next pass is cheap.
        let again = detector.classify(&touched);
        assert_eq!(again.kind, ChangeKind::Unchanged);
        assert_eq!(again.old_sig.unwrap().mtime_ns, 999);
    }

    #[test]
    fn shallow_check_flags_mtime_only_touch() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = ChangeDetector::new(SignatureCache::new(), false);

        let file = walked(dir.path(), "Assets/a.meta", "guid: 1", 100);
        detector.classify(&file);

        let touched = WalkedFile {
            mtime_ns: 999,
            ..file
        };
        assert_eq!(detector.classify(&touched).kind, ChangeKind::Modified);
    }

    #[test]
    fn unvisited_entries_become_deleted() {
        let cache = SignatureCache::from_entries([
            (
                "Assets/kept.meta".to_string(),
                Signature {
                    size: 7,
                    mtime_ns: 100,
                    content_hash: None,
                },
            ),
            (
                "Assets/gone.meta".to_string(),
                Signature {
                    size: 9,
                    mtime_ns: 100,
                    content_hash: None,
                },
            ),
        ]);
        let mut detector = ChangeDetector::new(cache, false);
        let kept = WalkedFile {
            abs_path: PathBuf::from("/nonexistent"),
            rel_path: "Assets/kept.meta".into(),
            size: 7,
            mtime_ns: 100,
        };
        detector.classify(&kept);

        let deleted = detector.finish();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].rel_path, "Assets/gone.meta");
        assert_eq!(deleted[0].kind, ChangeKind::Deleted);

        // Deleted entries leave the cache.
        assert!(detector.into_cache().get("Assets/gone.meta").is_none());
    }
}
