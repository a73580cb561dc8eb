//! File parsing: dispatch table and parser implementations.
//!
//! No parser hierarchy; each parser is a plain function and the pool picks
//! one by extension.

pub mod meta;
pub mod script;
pub mod unity_yaml;

use std::path::Path;
use std::time::Instant;

pub use meta::{companion_path, extract_guid_only, parse_meta, ImporterKind, MetaFile};
pub use script::{parse_script, ScriptInfo};
pub use unity_yaml::{parse_unity_file, InternalReference, UnityAssetRefs, UnityReference};

use crate::error::ParseError;

/// Which parser handles a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Meta,
    UnityYaml,
    Script,
}

/// Extension → parser dispatch table.
pub fn parser_for(rel_path: &str) -> Option<ParserKind> {
    let ext = rel_path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "meta" => Some(ParserKind::Meta),
        "prefab" | "unity" | "scene" | "asset" | "mat" | "controller" | "anim" => {
            Some(ParserKind::UnityYaml)
        }
        "cs" => Some(ParserKind::Script),
        _ => None,
    }
}

/// Output of one parsed file.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRecord {
    Meta {
        rel_path: String,
        meta: MetaFile,
    },
    Asset {
        rel_path: String,
        refs: UnityAssetRefs,
    },
    Script {
        rel_path: String,
        info: ScriptInfo,
    },
}

impl ParsedRecord {
    pub fn rel_path(&self) -> &str {
        match self {
            Self::Meta { rel_path, .. }
            | Self::Asset { rel_path, .. }
            | Self::Script { rel_path, .. } => rel_path,
        }
    }
}

/// Parse one file through the dispatch table.
///
/// `deadline` bounds the slow Unity YAML parser; meta and script files are
/// small enough that their reads complete or fail on their own.
/// `tree_threshold` is the byte size above which the Unity parser abandons
/// per-document tree building for the flat streaming scan.
pub fn parse_file(
    abs_path: &Path,
    rel_path: &str,
    deadline: Option<Instant>,
    tree_threshold: u64,
) -> Result<Option<ParsedRecord>, ParseError> {
    match parser_for(rel_path) {
        Some(ParserKind::Meta) => Ok(Some(ParsedRecord::Meta {
            rel_path: rel_path.to_string(),
            meta: parse_meta(abs_path, rel_path)?,
        })),
        Some(ParserKind::UnityYaml) => Ok(Some(ParsedRecord::Asset {
            rel_path: rel_path.to_string(),
            refs: parse_unity_file(abs_path, rel_path, deadline, tree_threshold)?,
        })),
        Some(ParserKind::Script) => Ok(Some(ParsedRecord::Script {
            rel_path: rel_path.to_string(),
            info: parse_script(abs_path, rel_path)?,
        })),
        None => Ok(None),
    }
}
