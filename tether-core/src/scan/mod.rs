//! File discovery and change detection.

pub mod signature;
pub mod walker;

pub use signature::{
    hash_bytes, hash_file, ChangeDetector, ChangeKind, ChangeRecord, Signature, SignatureCache,
};
pub use walker::{FileWalker, WalkEvent, WalkedFile};
