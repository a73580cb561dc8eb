//! Reference extraction from Unity's multi-document YAML flavor.
//!
//! Unity asset files are a stream of tagged documents:
//!
//! ```text
//! %YAML 1.1
//! %TAG !u! tag:unity3d.com,2011:
//! --- !u!21 &2100000
//! Material:
//!   m_Shader: {fileID: 46, guid: 0000000000000000f000000000000000, type: 3}
//! ```
//!
//! Extraction runs two paths. The structured path is the default: documents
//! are read off the line stream one at a time and parsed into a small
//! mapping/sequence tree, which recovers the full dotted `context_path` and
//! the owning mapping key (`component_type`) for every reference scalar. A
//! document whose YAML refuses to tree-parse falls back to a raw text scan
//! with an indent stack — same reference grammar, best-effort context. Files
//! above the configured threshold (default 16 MiB) skip document buffering
//! entirely and use the raw scan for the whole stream, keeping memory flat
//! at one line.

use std::io::BufRead;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tracing::debug;

use crate::error::ParseError;
use tether_graphs::{DependencyKind, Guid, Strength};

/// Lines between deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^--- !u!(\d+) &(-?\d+)").expect("header regex"))
}

fn external_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\{\s*fileID:\s*(-?\d+)\s*,\s*guid:\s*([0-9a-fA-F]{32})\s*,\s*type:\s*(\d+)\s*\}",
        )
        .expect("external ref regex")
    })
}

fn internal_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\s*fileID:\s*(-?\d+)\s*\}").expect("internal ref regex"))
}

fn key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*):").expect("key regex"))
}

/// A `--- !u!<classId> &<fileId>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub class_id: i64,
    pub file_id: i64,
    /// The document's root mapping key, e.g. `MeshRenderer`.
    pub root_key: Option<String>,
}

/// An external `{fileID, guid, type}` reference, source GUID not yet bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnityReference {
    pub target: Guid,
    pub dep_kind: DependencyKind,
    pub strength: Strength,
    pub context_path: String,
    /// Key of the mapping that owns the reference's entry.
    pub component_type: Option<String>,
    pub property_name: Option<String>,
    /// FileID of the document the reference appears in.
    pub source_file_id: i64,
    pub type_id: i64,
}

/// A `{fileID}` reference within the same file; feeds the local component
/// graph, never a cross-asset edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalReference {
    pub source_file_id: i64,
    pub target_file_id: i64,
    pub context_path: String,
}

/// Everything extracted from one Unity asset file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnityAssetRefs {
    pub documents: Vec<DocumentInfo>,
    /// Sorted by `(target, dep_kind, context_path)` and deduplicated, so
    /// repeated parses of the same bytes compare equal.
    pub references: Vec<UnityReference>,
    pub internal: Vec<InternalReference>,
    /// Documents whose YAML would not tree-parse and went through the raw
    /// text fallback instead.
    pub fallback_documents: usize,
}

/// Map `(class_id, property context)` to an edge kind and strength.
///
/// The table keys off the innermost property name first, then falls back to
/// the owning class. Anything unmapped is `indirect`/`weak`.
fn classify_reference(class_id: i64, property: &str) -> (DependencyKind, Strength) {
    match property {
        "m_Shader" => return (DependencyKind::Shader, Strength::Important),
        "m_Script" => return (DependencyKind::Script, Strength::Important),
        "m_ParentPrefab" | "m_SourcePrefab" | "m_Prefab" => {
            return (DependencyKind::PrefabInstance, Strength::Strong)
        }
        "m_SceneAsset" => return (DependencyKind::SceneInstance, Strength::Strong),
        "m_Mesh" | "m_SharedMesh" => return (DependencyKind::Mesh, Strength::Strong),
        "m_Controller" | "m_AnimatorController" => {
            return (DependencyKind::Animation, Strength::Strong)
        }
        _ => {}
    }
    if property.contains("Material") {
        return (DependencyKind::Material, Strength::Strong);
    }
    if property.contains("Texture") || property == "m_Sprite" || property == "m_MainTex" {
        return (DependencyKind::Texture, Strength::Medium);
    }
    if property.contains("AudioClip") || (class_id == 82 && property.contains("Clip")) {
        return (DependencyKind::Audio, Strength::Medium);
    }
    if property.contains("AnimationClip") || property.contains("Motion") {
        return (DependencyKind::Animation, Strength::Medium);
    }
    match class_id {
        // PrefabInstance documents reference their source prefab.
        1001 => (DependencyKind::PrefabInstance, Strength::Strong),
        _ => (DependencyKind::Indirect, Strength::Weak),
    }
}

#[derive(Debug, Clone, Copy)]
struct DocHeader {
    class_id: i64,
    file_id: i64,
}

// ── Structured path: per-document tree ─────────────────────────────

/// One significant line of a buffered document body.
#[derive(Debug)]
struct BodyLine {
    indent: usize,
    /// Content after the indent, trailing whitespace stripped.
    text: String,
}

impl BodyLine {
    fn is_dash(&self) -> bool {
        self.text == "-" || self.text.starts_with("- ")
    }
}

/// The document tree the structured path builds. Flow-style values
/// (`{...}`, `[...]`, plain text) stay as scalars; the reference grammar is
/// matched against them afterwards.
#[derive(Debug, PartialEq)]
enum YamlNode {
    Scalar(String),
    Mapping(Vec<(String, YamlNode)>),
    Sequence(Vec<YamlNode>),
}

/// Split `key: rest`; `None` when the line is not a mapping entry.
fn split_key(text: &str) -> Option<(&str, &str)> {
    let caps = key_re().captures(text)?;
    let whole = caps.get(0)?;
    let key = caps.get(1)?;
    Some((key.as_str(), text[whole.end()..].trim()))
}

/// Event-driven tree builder over one document's buffered lines.
///
/// Deliberately strict: anything that doesn't look like Unity's serializer
/// output (consistent two-space nesting, dashes at or below their key's
/// indent) errors out and sends the document to the raw-scan fallback.
struct TreeParser<'a> {
    lines: &'a [BodyLine],
    pos: usize,
}

impl<'a> TreeParser<'a> {
    fn new(lines: &'a [BodyLine]) -> Self {
        Self { lines, pos: 0 }
    }

    fn peek(&self) -> Option<&'a BodyLine> {
        self.lines.get(self.pos)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn parse_document(mut self) -> Result<YamlNode, String> {
        let root = self.parse_mapping(0)?;
        if self.pos < self.lines.len() {
            return Err(format!("unparsed content at line {}", self.pos));
        }
        Ok(root)
    }

    fn parse_mapping(&mut self, indent: usize) -> Result<YamlNode, String> {
        let mut entries: Vec<(String, YamlNode)> = Vec::new();
        while let Some(line) = self.peek() {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                // A deeper non-key line is a multi-line scalar continuation
                // and is skipped; a deeper key or dash means the structure
                // was misread.
                if line.is_dash() || split_key(&line.text).is_some() {
                    return Err(format!("unexpected indentation at line {}", self.pos));
                }
                self.bump();
                continue;
            }
            if line.is_dash() {
                // A sequence at this level belongs to the caller's key.
                break;
            }
            let Some((key, rest)) = split_key(&line.text) else {
                return Err(format!("expected a mapping key at line {}", self.pos));
            };
            let key = key.to_string();
            let rest = rest.to_string();
            self.bump();
            let value = if rest.is_empty() {
                self.parse_value_block(indent)?
            } else {
                YamlNode::Scalar(rest)
            };
            entries.push((key, value));
        }
        Ok(YamlNode::Mapping(entries))
    }

    /// Value of a key with nothing inline: a deeper mapping, a sequence at
    /// this or deeper indent (Unity puts dashes at the key's own column),
    /// or empty.
    fn parse_value_block(&mut self, key_indent: usize) -> Result<YamlNode, String> {
        match self.peek() {
            Some(next) if next.is_dash() && next.indent >= key_indent => {
                self.parse_sequence(next.indent)
            }
            Some(next) if next.indent > key_indent => self.parse_mapping(next.indent),
            _ => Ok(YamlNode::Scalar(String::new())),
        }
    }

    fn parse_sequence(&mut self, indent: usize) -> Result<YamlNode, String> {
        let mut items = Vec::new();
        while let Some(line) = self.peek() {
            if line.indent != indent || !line.is_dash() {
                break;
            }
            let rest = line
                .text
                .strip_prefix('-')
                .unwrap_or("")
                .trim_start()
                .to_string();
            self.bump();
            if rest.is_empty() {
                match self.peek() {
                    Some(next) if next.indent > indent => {
                        items.push(self.parse_mapping(next.indent)?);
                    }
                    _ => items.push(YamlNode::Scalar(String::new())),
                }
            } else if let Some((key, inline)) = split_key(&rest) {
                let key = key.to_string();
                let inline = inline.to_string();
                items.push(self.parse_inline_item(indent, key, inline)?);
            } else {
                items.push(YamlNode::Scalar(rest));
            }
        }
        Ok(YamlNode::Sequence(items))
    }

    /// A `- key: ...` item: the inline first entry plus any continuation
    /// keys aligned two columns past the dash.
    fn parse_inline_item(
        &mut self,
        dash_indent: usize,
        key: String,
        inline: String,
    ) -> Result<YamlNode, String> {
        let item_indent = dash_indent + 2;
        let first = if inline.is_empty() {
            self.parse_value_block(item_indent)?
        } else {
            YamlNode::Scalar(inline)
        };
        let mut entries = vec![(key, first)];
        while let Some(line) = self.peek() {
            if line.indent != item_indent || line.is_dash() {
                break;
            }
            let Some((k, rest)) = split_key(&line.text) else {
                break;
            };
            let k = k.to_string();
            let rest = rest.to_string();
            self.bump();
            let value = if rest.is_empty() {
                self.parse_value_block(item_indent)?
            } else {
                YamlNode::Scalar(rest)
            };
            entries.push((k, value));
        }
        Ok(YamlNode::Mapping(entries))
    }
}

/// Walk a parsed document, emitting references with full context. Returns
/// the root mapping key.
fn walk_document(root: &YamlNode, header: DocHeader, out: &mut UnityAssetRefs) -> Option<String> {
    let YamlNode::Mapping(entries) = root else {
        return None;
    };
    let root_key = entries.first().map(|(k, _)| k.clone());
    let mut path = String::new();
    for (key, value) in entries {
        walk_entry(key, value, None, &mut path, header, out);
    }
    root_key
}

fn walk_entry(
    key: &str,
    value: &YamlNode,
    owner: Option<&str>,
    path: &mut String,
    header: DocHeader,
    out: &mut UnityAssetRefs,
) {
    let rollback = path.len();
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(key);
    match value {
        YamlNode::Scalar(text) => emit_refs(text, key, owner, path, header, out),
        YamlNode::Mapping(entries) => {
            for (k, v) in entries {
                walk_entry(k, v, Some(key), path, header, out);
            }
        }
        YamlNode::Sequence(items) => walk_sequence(key, items, owner, path, header, out),
    }
    path.truncate(rollback);
}

fn walk_sequence(
    key: &str,
    items: &[YamlNode],
    owner: Option<&str>,
    path: &mut String,
    header: DocHeader,
    out: &mut UnityAssetRefs,
) {
    for (i, item) in items.iter().enumerate() {
        let rollback = path.len();
        path.push_str(&format!("[{i}]"));
        match item {
            YamlNode::Scalar(text) => emit_refs(text, key, owner, path, header, out),
            YamlNode::Mapping(entries) => {
                for (k, v) in entries {
                    walk_entry(k, v, Some(key), path, header, out);
                }
            }
            YamlNode::Sequence(nested) => walk_sequence(key, nested, owner, path, header, out),
        }
        path.truncate(rollback);
    }
}

/// Match the reference grammar against one scalar and record hits.
fn emit_refs(
    text: &str,
    property: &str,
    owner: Option<&str>,
    context_path: &str,
    header: DocHeader,
    out: &mut UnityAssetRefs,
) {
    for caps in external_ref_re().captures_iter(text) {
        let Ok(target) = Guid::parse(&caps[2]) else {
            continue;
        };
        if target.is_zero() {
            continue; // Unity's null reference
        }
        let (dep_kind, strength) = classify_reference(header.class_id, property);
        out.references.push(UnityReference {
            target,
            dep_kind,
            strength,
            context_path: context_path.to_string(),
            component_type: owner.map(str::to_string),
            property_name: Some(property.to_string()),
            source_file_id: header.file_id,
            type_id: caps[3].parse().unwrap_or(0),
        });
    }
    for caps in internal_ref_re().captures_iter(text) {
        let Ok(target_file_id) = caps[1].parse::<i64>() else {
            continue;
        };
        if target_file_id == 0 {
            continue;
        }
        out.internal.push(InternalReference {
            source_file_id: header.file_id,
            target_file_id,
            context_path: context_path.to_string(),
        });
    }
}

// ── Fallback path: raw text scan with an indent stack ──────────────

struct ScanFrame {
    indent: usize,
    key: String,
    seq_count: usize,
}

/// Best-effort context tracking for documents the tree builder rejected.
struct ScanContext {
    class_id: i64,
    file_id: i64,
    root_key: Option<String>,
    stack: Vec<ScanFrame>,
}

impl ScanContext {
    fn new(header: DocHeader) -> Self {
        Self {
            class_id: header.class_id,
            file_id: header.file_id,
            root_key: None,
            stack: Vec::new(),
        }
    }

    fn context_path(&self, seq_index: Option<usize>) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.stack.len() + 1);
        if let Some(root) = &self.root_key {
            parts.push(root);
        }
        for frame in &self.stack {
            parts.push(&frame.key);
        }
        let mut path = parts.join(".");
        if let Some(idx) = seq_index {
            path.push_str(&format!("[{idx}]"));
        }
        path
    }

    fn property_name(&self) -> Option<&str> {
        self.stack.last().map(|f| f.key.as_str())
    }
}

/// Process one content line through the fallback scanner.
fn scan_line(ctx: &mut ScanContext, indent: usize, content: &str, out: &mut UnityAssetRefs) {
    let (content, seq_index) = if let Some(rest) = content.strip_prefix("- ") {
        // Sequence items keep their parent key; dashes may sit at the
        // parent's own indent level.
        while ctx.stack.last().is_some_and(|frame| frame.indent > indent) {
            ctx.stack.pop();
        }
        let idx = ctx.stack.last_mut().map(|parent| {
            let idx = parent.seq_count;
            parent.seq_count += 1;
            idx
        });
        (rest, idx)
    } else {
        (content, None)
    };

    if seq_index.is_none() {
        if let Some(caps) = key_re().captures(content) {
            let key = caps[1].to_string();
            if indent == 0 && ctx.root_key.is_none() {
                ctx.root_key = Some(key);
            } else {
                while ctx.stack.last().is_some_and(|frame| frame.indent >= indent) {
                    ctx.stack.pop();
                }
                ctx.stack.push(ScanFrame {
                    indent,
                    key,
                    seq_count: 0,
                });
            }
        }
    }

    let header = DocHeader {
        class_id: ctx.class_id,
        file_id: ctx.file_id,
    };
    let property = ctx
        .property_name()
        .or(ctx.root_key.as_deref())
        .unwrap_or_default()
        .to_string();
    let context_path = ctx.context_path(seq_index);
    emit_refs(
        content,
        &property,
        ctx.root_key.as_deref(),
        &context_path,
        header,
        out,
    );
}

/// Fallback for one buffered document.
fn scan_document(header: DocHeader, body: &[BodyLine], out: &mut UnityAssetRefs) {
    let mut ctx = ScanContext::new(header);
    for line in body {
        scan_line(&mut ctx, line.indent, &line.text, out);
    }
    out.documents.push(DocumentInfo {
        class_id: header.class_id,
        file_id: header.file_id,
        root_key: ctx.root_key,
    });
}

// ── Entry points ───────────────────────────────────────────────────

/// Parse a Unity asset file.
///
/// Files up to `tree_threshold` bytes use the structured per-document tree
/// path; larger files use the raw streaming scan so memory stays flat at
/// one line.
pub fn parse_unity_file(
    abs_path: &Path,
    rel_path: &str,
    deadline: Option<Instant>,
    tree_threshold: u64,
) -> Result<UnityAssetRefs, ParseError> {
    let file = std::fs::File::open(abs_path).map_err(|e| ParseError::MalformedYaml {
        path: rel_path.to_string(),
        detail: e.to_string(),
    })?;
    let size = file.metadata().map_or(0, |m| m.len());
    let reader = std::io::BufReader::new(file);
    if size > tree_threshold {
        debug!(path = %rel_path, size, "File above tree threshold, raw scan");
        scan_reader(reader, rel_path, deadline)
    } else {
        parse_structured(reader, rel_path, deadline)
    }
}

/// Parse Unity asset content from memory (tests, small buffers). Uses the
/// structured path.
pub fn parse_unity_str(content: &str, rel_path: &str) -> Result<UnityAssetRefs, ParseError> {
    parse_structured(content.as_bytes(), rel_path, None)
}

/// Structured reader: buffer one document at a time, tree-parse it, and
/// fall back to the raw scan for documents that refuse.
fn parse_structured(
    reader: impl BufRead,
    rel_path: &str,
    deadline: Option<Instant>,
) -> Result<UnityAssetRefs, ParseError> {
    let mut out = UnityAssetRefs::default();
    let mut current: Option<(DocHeader, Vec<BodyLine>)> = None;

    each_line(reader, rel_path, deadline, |trimmed| {
        if let Some(header) = parse_header(trimmed) {
            if let Some((done, body)) = current.take() {
                finish_document(done, &body, &mut out);
            }
            current = Some((header, Vec::new()));
            return;
        }
        if let Some((_, body)) = current.as_mut() {
            let indent = trimmed.len() - trimmed.trim_start().len();
            body.push(BodyLine {
                indent,
                text: trimmed[indent..].to_string(),
            });
        }
    })?;

    if let Some((done, body)) = current.take() {
        finish_document(done, &body, &mut out);
    }
    finalize(&mut out);
    Ok(out)
}

fn finish_document(header: DocHeader, body: &[BodyLine], out: &mut UnityAssetRefs) {
    match TreeParser::new(body).parse_document() {
        Ok(root) => {
            let root_key = walk_document(&root, header, out);
            out.documents.push(DocumentInfo {
                class_id: header.class_id,
                file_id: header.file_id,
                root_key,
            });
        }
        Err(reason) => {
            debug!(file_id = header.file_id, reason, "Document fell back to raw scan");
            out.fallback_documents += 1;
            scan_document(header, body, out);
        }
    }
}

/// Raw streaming scan over the whole stream; never buffers a document.
fn scan_reader(
    reader: impl BufRead,
    rel_path: &str,
    deadline: Option<Instant>,
) -> Result<UnityAssetRefs, ParseError> {
    let mut out = UnityAssetRefs::default();
    let mut ctx: Option<ScanContext> = None;

    each_line(reader, rel_path, deadline, |trimmed| {
        if let Some(header) = parse_header(trimmed) {
            if let Some(done) = ctx.take() {
                out.documents.push(DocumentInfo {
                    class_id: done.class_id,
                    file_id: done.file_id,
                    root_key: done.root_key,
                });
            }
            ctx = Some(ScanContext::new(header));
            return;
        }
        if let Some(ctx) = ctx.as_mut() {
            let indent = trimmed.len() - trimmed.trim_start().len();
            scan_line(ctx, indent, &trimmed[indent..], &mut out);
        }
    })?;

    if let Some(done) = ctx.take() {
        out.documents.push(DocumentInfo {
            class_id: done.class_id,
            file_id: done.file_id,
            root_key: done.root_key,
        });
    }
    finalize(&mut out);
    Ok(out)
}

fn parse_header(line: &str) -> Option<DocHeader> {
    let caps = header_re().captures(line)?;
    Some(DocHeader {
        class_id: caps[1].parse().unwrap_or(0),
        file_id: caps[2].parse().unwrap_or(0),
    })
}

/// Drive a reader line by line with a reused buffer, skipping blanks and
/// directives, checking the deadline periodically.
fn each_line(
    mut reader: impl BufRead,
    rel_path: &str,
    deadline: Option<Instant>,
    mut handle: impl FnMut(&str),
) -> Result<(), ParseError> {
    let mut line = String::with_capacity(256);
    let mut line_no: u64 = 0;
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| ParseError::MalformedYaml {
                path: rel_path.to_string(),
                detail: format!("line {line_no}: {e}"),
            })?;
        if read == 0 {
            return Ok(());
        }
        line_no += 1;
        if line_no % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ParseError::Timeout {
                        path: rel_path.to_string(),
                        seconds: 0,
                    });
                }
            }
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        handle(trimmed);
    }
}

/// Stabilize output: sort by the edge identity tuple and collapse
/// duplicates, so repeated parses of the same bytes compare equal.
fn finalize(out: &mut UnityAssetRefs) {
    out.references.sort_by(|a, b| {
        (&a.target, a.dep_kind, &a.context_path).cmp(&(&b.target, b.dep_kind, &b.context_path))
    });
    out.references.dedup_by(|a, b| {
        a.target == b.target && a.dep_kind == b.dep_kind && a.context_path == b.context_path
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER_PREFAB: &str = "\
%YAML 1.1
%TAG !u! tag:unity3d.com,2011:
--- !u!1 &1000000
GameObject:
  m_Name: Player
  m_Component:
  - component: {fileID: 4000000}
  - component: {fileID: 2300000}
--- !u!4 &4000000
Transform:
  m_GameObject: {fileID: 1000000}
  m_Children: []
--- !u!23 &2300000
MeshRenderer:
  m_GameObject: {fileID: 1000000}
  m_Materials:
  - {fileID: 2100000, guid: 0000000000000000000000000000bbbb, type: 2}
";

    #[test]
    fn extracts_material_reference_with_context() {
        let refs = parse_unity_str(PLAYER_PREFAB, "Assets/Player.prefab").unwrap();
        assert_eq!(refs.references.len(), 1);
        let r = &refs.references[0];
        assert_eq!(r.target.as_str(), "0000000000000000000000000000bbbb");
        assert_eq!(r.dep_kind, DependencyKind::Material);
        assert_eq!(r.context_path, "MeshRenderer.m_Materials[0]");
        assert_eq!(r.component_type.as_deref(), Some("MeshRenderer"));
        assert_eq!(r.property_name.as_deref(), Some("m_Materials"));
        assert_eq!(r.source_file_id, 2300000);
        assert_eq!(r.type_id, 2);
    }

    #[test]
    fn structured_path_is_the_default() {
        let refs = parse_unity_str(PLAYER_PREFAB, "x.prefab").unwrap();
        assert_eq!(refs.fallback_documents, 0, "well-formed input never falls back");
    }

    #[test]
    fn splits_documents_and_tracks_ids() {
        let refs = parse_unity_str(PLAYER_PREFAB, "x.prefab").unwrap();
        assert_eq!(refs.documents.len(), 3);
        assert_eq!(refs.documents[0].class_id, 1);
        assert_eq!(refs.documents[0].file_id, 1_000_000);
        assert_eq!(refs.documents[0].root_key.as_deref(), Some("GameObject"));
        assert_eq!(refs.documents[2].class_id, 23);
    }

    #[test]
    fn internal_refs_build_local_graph_not_edges() {
        let refs = parse_unity_str(PLAYER_PREFAB, "x.prefab").unwrap();
        // component links + m_GameObject backrefs
        assert!(refs.internal.len() >= 4);
        assert!(refs
            .internal
            .iter()
            .any(|i| i.source_file_id == 1_000_000 && i.target_file_id == 4_000_000));
        // None of them show up as external references.
        assert_eq!(refs.references.len(), 1);
    }

    #[test]
    fn whitespace_variants_accepted() {
        let content = "\
--- !u!21 &2100000
Material:
  m_Shader: {fileID: 46,guid: 00000000000000000000000000000abc,type: 3}
  m_Other: {  fileID:  47 ,  guid:  00000000000000000000000000000abd ,  type:  3  }
";
        let refs = parse_unity_str(content, "m.mat").unwrap();
        assert_eq!(refs.references.len(), 2);
    }

    #[test]
    fn shader_reference_classified_by_rule_table() {
        let content = "\
--- !u!21 &2100000
Material:
  m_Shader: {fileID: 46, guid: 00000000000000000000000000000abc, type: 3}
";
        let refs = parse_unity_str(content, "m.mat").unwrap();
        assert_eq!(refs.references[0].dep_kind, DependencyKind::Shader);
    }

    #[test]
    fn texture_env_reference_classified() {
        let content = "\
--- !u!21 &2100000
Material:
  m_SavedProperties:
    m_TexEnvs:
    - _MainTex:
        m_Texture: {fileID: 2800000, guid: 00000000000000000000000000000abc, type: 3}
";
        let refs = parse_unity_str(content, "m.mat").unwrap();
        assert_eq!(refs.references[0].dep_kind, DependencyKind::Texture);
    }

    #[test]
    fn nested_reference_reports_owning_mapping() {
        // The owning mapping key is the nearest enclosing mapping, not the
        // document root.
        let content = "\
--- !u!21 &2100000
Material:
  m_SavedProperties:
    m_TexEnvs:
    - _MainTex:
        m_Texture: {fileID: 2800000, guid: 00000000000000000000000000000abc, type: 3}
";
        let refs = parse_unity_str(content, "m.mat").unwrap();
        let r = &refs.references[0];
        assert_eq!(r.component_type.as_deref(), Some("_MainTex"));
        assert_eq!(r.property_name.as_deref(), Some("m_Texture"));
        assert_eq!(
            r.context_path,
            "Material.m_SavedProperties.m_TexEnvs[0]._MainTex.m_Texture"
        );
    }

    #[test]
    fn script_reference_classified() {
        let content = "\
--- !u!114 &11400000
MonoBehaviour:
  m_Script: {fileID: 11500000, guid: 00000000000000000000000000000abc, type: 3}
";
        let refs = parse_unity_str(content, "x.asset").unwrap();
        assert_eq!(refs.references[0].dep_kind, DependencyKind::Script);
        assert_eq!(refs.references[0].strength, Strength::Important);
    }

    #[test]
    fn unmapped_reference_defaults_to_indirect_weak() {
        let content = "\
--- !u!114 &11400000
MonoBehaviour:
  m_SomeCustomField: {fileID: 100, guid: 00000000000000000000000000000abc, type: 2}
";
        let refs = parse_unity_str(content, "x.asset").unwrap();
        assert_eq!(refs.references[0].dep_kind, DependencyKind::Indirect);
        assert_eq!(refs.references[0].strength, Strength::Weak);
    }

    #[test]
    fn zero_guid_skipped() {
        let content = "\
--- !u!23 &2300000
MeshRenderer:
  m_Materials:
  - {fileID: 0, guid: 00000000000000000000000000000000, type: 2}
";
        let refs = parse_unity_str(content, "x.prefab").unwrap();
        assert!(refs.references.is_empty());
    }

    #[test]
    fn guid_case_normalized() {
        let content = "\
--- !u!21 &2100000
Material:
  m_Shader: {fileID: 46, guid: 00000000000000000000000000000ABC, type: 3}
";
        let refs = parse_unity_str(content, "m.mat").unwrap();
        assert_eq!(refs.references[0].target.as_str(), "00000000000000000000000000000abc");
    }

    #[test]
    fn repeated_parse_is_identical() {
        let a = parse_unity_str(PLAYER_PREFAB, "x.prefab").unwrap();
        let b = parse_unity_str(PLAYER_PREFAB, "x.prefab").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn output_sorted_and_deduplicated() {
        let content = "\
--- !u!114 &1
MonoBehaviour:
  m_B: {fileID: 1, guid: 000000000000000000000000000000bb, type: 2}
  m_A: {fileID: 1, guid: 000000000000000000000000000000aa, type: 2}
--- !u!114 &2
MonoBehaviour:
  m_A: {fileID: 1, guid: 000000000000000000000000000000aa, type: 2}
";
        let refs = parse_unity_str(content, "x.asset").unwrap();
        // Sorted by target; the duplicate (target, kind, context) collapses.
        assert_eq!(refs.references.len(), 2);
        assert!(refs.references[0].target < refs.references[1].target);
    }

    #[test]
    fn negative_file_ids_parse() {
        let content = "\
--- !u!1001 &-1000
PrefabInstance:
  m_SourcePrefab: {fileID: 100100000, guid: 000000000000000000000000000000aa, type: 3}
";
        let refs = parse_unity_str(content, "x.prefab").unwrap();
        assert_eq!(refs.documents[0].file_id, -1000);
        assert_eq!(refs.references[0].dep_kind, DependencyKind::PrefabInstance);
    }

    #[test]
    fn malformed_documents_fall_back_to_raw_scan() {
        // Broken indentation and a dangling tag; the tree builder refuses
        // and the raw scan still pulls the references out.
        let content = "\
--- !u!21 &2100000
Material:
   m_Shader: {fileID: 46, guid: 00000000000000000000000000000abc, type: 3}
  bad indent here: [
--- !u!x broken header
  m_Tex: {fileID: 1, guid: 000000000000000000000000000000dd, type: 2}
";
        let refs = parse_unity_str(content, "m.mat").unwrap();
        assert_eq!(refs.references.len(), 2);
        assert_eq!(refs.fallback_documents, 1);
    }

    #[test]
    fn raw_scan_and_tree_agree_on_references() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Player.prefab");
        std::fs::write(&path, PLAYER_PREFAB).unwrap();

        let tree = parse_unity_file(&path, "Player.prefab", None, 16 * 1024 * 1024).unwrap();
        // A zero threshold forces every file onto the raw scan.
        let scanned = parse_unity_file(&path, "Player.prefab", None, 0).unwrap();

        assert_eq!(tree.fallback_documents, 0);
        assert_eq!(scanned.fallback_documents, 0);
        assert_eq!(tree.references, scanned.references);
        assert_eq!(tree.documents, scanned.documents);
    }

    #[test]
    fn deadline_exceeded_reports_timeout() {
        let mut content = String::from("--- !u!1 &1\nGameObject:\n");
        for i in 0..3000 {
            content.push_str(&format!("  m_Field{i}: 1\n"));
        }
        let deadline = Instant::now() - std::time::Duration::from_secs(1);
        let err = parse_structured(content.as_bytes(), "big.unity", Some(deadline)).unwrap_err();
        assert!(matches!(err, ParseError::Timeout { .. }));
    }
}
