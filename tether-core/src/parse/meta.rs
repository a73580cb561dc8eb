//! `.meta` side-car parsing.
//!
//! A meta file is a single YAML root mapping: `fileFormatVersion`, `guid`,
//! exactly one importer key, and a handful of optional bundle fields. The
//! importer subtree is carried opaquely; only known fields are validated.

use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::error::ParseError;
use tether_graphs::{AssetKind, Guid};

/// The Unity importer named by a meta file's top-level key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ImporterKind {
    TextureImporter,
    ModelImporter,
    AudioImporter,
    MonoImporter,
    NativeFormatImporter,
    DefaultImporter,
    PluginImporter,
    AssemblyDefinitionImporter,
    PackageManifestImporter,
    FontImporter,
    VideoClipImporter,
    ShaderImporter,
    ComputeShaderImporter,
    SpeedTreeImporter,
    SubstanceImporter,
    Unknown,
}

impl ImporterKind {
    const KNOWN: &'static [(&'static str, ImporterKind)] = &[
        ("TextureImporter", Self::TextureImporter),
        ("ModelImporter", Self::ModelImporter),
        ("AudioImporter", Self::AudioImporter),
        ("MonoImporter", Self::MonoImporter),
        ("NativeFormatImporter", Self::NativeFormatImporter),
        ("DefaultImporter", Self::DefaultImporter),
        ("PluginImporter", Self::PluginImporter),
        ("AssemblyDefinitionImporter", Self::AssemblyDefinitionImporter),
        ("PackageManifestImporter", Self::PackageManifestImporter),
        ("FontImporter", Self::FontImporter),
        ("VideoClipImporter", Self::VideoClipImporter),
        ("ShaderImporter", Self::ShaderImporter),
        ("ComputeShaderImporter", Self::ComputeShaderImporter),
        ("SpeedTreeImporter", Self::SpeedTreeImporter),
        ("SubstanceImporter", Self::SubstanceImporter),
    ];

    pub fn from_key(key: &str) -> Option<Self> {
        Self::KNOWN
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, kind)| *kind)
    }

    /// The asset kind this importer implies, before extension refinement.
    pub fn implied_asset_kind(self) -> AssetKind {
        match self {
            Self::TextureImporter => AssetKind::Texture,
            Self::ModelImporter | Self::SpeedTreeImporter => AssetKind::Model,
            Self::AudioImporter => AssetKind::Audio,
            Self::MonoImporter => AssetKind::Script,
            Self::FontImporter => AssetKind::Font,
            Self::VideoClipImporter => AssetKind::Video,
            Self::ShaderImporter | Self::ComputeShaderImporter => AssetKind::Shader,
            Self::SubstanceImporter => AssetKind::Material,
            Self::NativeFormatImporter
            | Self::DefaultImporter
            | Self::PluginImporter
            | Self::AssemblyDefinitionImporter
            | Self::PackageManifestImporter => AssetKind::Native,
            Self::Unknown => AssetKind::Unknown,
        }
    }
}

/// Parsed meta file contents.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaFile {
    pub guid: Guid,
    pub file_format_version: i64,
    pub importer_kind: ImporterKind,
    /// Importer subtree plus bundle fields, carried opaquely.
    pub importer_metadata: HashMap<String, serde_json::Value>,
    pub warnings: Vec<String>,
}

impl MetaFile {
    /// Final asset kind: the companion path's extension wins; the importer
    /// fills in when the extension says nothing.
    pub fn asset_kind(&self, asset_rel_path: &str) -> AssetKind {
        match AssetKind::from_path(asset_rel_path) {
            AssetKind::Unknown => self.importer_kind.implied_asset_kind(),
            kind => kind,
        }
    }
}

/// The companion asset path of a meta file (`X.prefab.meta` → `X.prefab`).
pub fn companion_path(meta_rel_path: &str) -> Option<&str> {
    meta_rel_path.strip_suffix(".meta")
}

/// Parse a meta file from disk.
pub fn parse_meta(abs_path: &Path, rel_path: &str) -> Result<MetaFile, ParseError> {
    let content = std::fs::read_to_string(abs_path).map_err(|e| ParseError::MalformedYaml {
        path: rel_path.to_string(),
        detail: e.to_string(),
    })?;
    parse_meta_str(&content, rel_path)
}

/// Parse meta file content.
pub fn parse_meta_str(content: &str, rel_path: &str) -> Result<MetaFile, ParseError> {
    let value: Value =
        serde_yaml::from_str(content).map_err(|e| ParseError::MalformedYaml {
            path: rel_path.to_string(),
            detail: e.to_string(),
        })?;
    let Value::Mapping(root) = value else {
        return Err(ParseError::MalformedYaml {
            path: rel_path.to_string(),
            detail: "root is not a mapping".to_string(),
        });
    };

    let file_format_version = root
        .get("fileFormatVersion")
        .and_then(Value::as_i64)
        .ok_or(ParseError::MissingField {
            path: rel_path.to_string(),
            field: "fileFormatVersion",
        })?;

    // The GUID comes off the raw line, not the YAML value: an all-digit
    // GUID would otherwise resolve as a (lossy) number.
    let raw_guid = raw_guid_value(content).ok_or(ParseError::MissingField {
        path: rel_path.to_string(),
        field: "guid",
    })?;
    let guid = Guid::parse(raw_guid).map_err(|_| ParseError::BadGuid {
        path: rel_path.to_string(),
        value: raw_guid.to_string(),
    })?;

    let mut warnings = Vec::new();
    let mut importer_kind = ImporterKind::Unknown;
    let mut importer_metadata: HashMap<String, serde_json::Value> = HashMap::new();

    for (key, value) in &root {
        let Some(key) = key.as_str() else { continue };
        match key {
            "fileFormatVersion" | "guid" => {}
            "userData" | "assetBundleName" | "assetBundleVariant" => {
                if !matches!(value, Value::Null) {
                    importer_metadata.insert(key.to_string(), yaml_to_json(value));
                }
            }
            other => match ImporterKind::from_key(other) {
                Some(kind) if value.is_mapping() || value.is_null() => {
                    importer_kind = kind;
                    importer_metadata.insert(other.to_string(), yaml_to_json(value));
                }
                Some(_) => {
                    warnings.push(format!("importer section '{other}' is not a mapping"));
                }
                None if other.ends_with("Importer") => {
                    // Recognizably an importer we don't model; not a failure.
                    warnings.push(format!("unknown importer '{other}'"));
                    importer_metadata.insert(other.to_string(), yaml_to_json(value));
                }
                None => {
                    importer_metadata.insert(other.to_string(), yaml_to_json(value));
                }
            },
        }
    }

    if importer_kind == ImporterKind::Unknown {
        debug!(path = %rel_path, "No known importer key in meta file");
        if warnings.is_empty() {
            warnings.push("no known importer key".to_string());
        }
    }
    if file_format_version < 2 {
        warnings.push(format!("old fileFormatVersion {file_format_version}"));
    }

    Ok(MetaFile {
        guid,
        file_format_version,
        importer_kind,
        importer_metadata,
        warnings,
    })
}

/// Fast path for bulk index building: scan lines for the first `guid:` and
/// stop there. Slices into one read buffer; no per-line allocation.
pub fn extract_guid_only(abs_path: &Path, rel_path: &str) -> Result<Option<Guid>, ParseError> {
    let content = std::fs::read_to_string(abs_path).map_err(|e| ParseError::MalformedYaml {
        path: rel_path.to_string(),
        detail: e.to_string(),
    })?;
    Ok(extract_guid_from_str(&content))
}

/// Line-oriented `guid:` scan over in-memory content. Only the root-level
/// key counts; indented `guid:` keys inside importer subtrees are ignored.
pub fn extract_guid_from_str(content: &str) -> Option<Guid> {
    raw_guid_value(content).and_then(|raw| Guid::parse(raw).ok())
}

/// The raw token after the first root-level `guid:`, exactly as written.
fn raw_guid_value(content: &str) -> Option<&str> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("guid:"))
        .map(|rest| rest.trim().trim_matches(|c| c == '"' || c == '\''))
}

fn yaml_to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXTURE_META: &str = "\
fileFormatVersion: 2
guid: ABCDEF0123456789abcdef0123456789
TextureImporter:
  mipmaps:
    mipMapMode: 0
  maxTextureSize: 2048
userData:
assetBundleName:
";

    #[test]
    fn parses_texture_meta() {
        let meta = parse_meta_str(TEXTURE_META, "Assets/icon.png.meta").unwrap();
        assert_eq!(meta.guid.as_str(), "abcdef0123456789abcdef0123456789");
        assert_eq!(meta.file_format_version, 2);
        assert_eq!(meta.importer_kind, ImporterKind::TextureImporter);
        let importer = &meta.importer_metadata["TextureImporter"];
        assert_eq!(importer["maxTextureSize"], serde_json::json!(2048));
        assert!(meta.warnings.is_empty());
    }

    #[test]
    fn guid_is_case_normalized() {
        let meta = parse_meta_str(TEXTURE_META, "x.meta").unwrap();
        assert!(meta.guid.as_str().chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn missing_guid_is_error() {
        let content = "fileFormatVersion: 2\nDefaultImporter:\n  userData: \n";
        let err = parse_meta_str(content, "x.meta").unwrap_err();
        assert!(matches!(err, ParseError::MissingField { field: "guid", .. }));
    }

    #[test]
    fn missing_version_is_error() {
        let content = "guid: 0123456789abcdef0123456789abcdef\n";
        let err = parse_meta_str(content, "x.meta").unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingField {
                field: "fileFormatVersion",
                ..
            }
        ));
    }

    #[test]
    fn bad_guid_shape_is_error() {
        for bad in [
            "0123456789abcdef0123456789abcde",   // 31
            "0123456789abcdef0123456789abcdef0", // 33
            "g123456789abcdef0123456789abcdef",  // non-hex
        ] {
            let content = format!("fileFormatVersion: 2\nguid: {bad}\n");
            let err = parse_meta_str(&content, "x.meta").unwrap_err();
            assert!(matches!(err, ParseError::BadGuid { .. }), "input: {bad}");
        }
    }

    #[test]
    fn malformed_yaml_is_error() {
        let err = parse_meta_str("guid: [unclosed", "x.meta").unwrap_err();
        assert!(matches!(err, ParseError::MalformedYaml { .. }));
    }

    #[test]
    fn unknown_importer_warns_but_succeeds() {
        let content = "\
fileFormatVersion: 2
guid: 0123456789abcdef0123456789abcdef
FancyNewImporter:
  setting: 1
";
        let meta = parse_meta_str(content, "x.meta").unwrap();
        assert_eq!(meta.importer_kind, ImporterKind::Unknown);
        assert!(meta.warnings.iter().any(|w| w.contains("FancyNewImporter")));
        assert!(meta.importer_metadata.contains_key("FancyNewImporter"));
    }

    #[test]
    fn bundle_fields_are_kept() {
        let content = "\
fileFormatVersion: 2
guid: 0123456789abcdef0123456789abcdef
NativeFormatImporter:
  mainObjectFileID: 100100000
assetBundleName: characters
";
        let meta = parse_meta_str(content, "x.meta").unwrap();
        assert_eq!(
            meta.importer_metadata["assetBundleName"],
            serde_json::json!("characters")
        );
    }

    #[test]
    fn asset_kind_prefers_extension_then_importer() {
        let meta = parse_meta_str(
            "fileFormatVersion: 2\nguid: 0123456789abcdef0123456789abcdef\nNativeFormatImporter:\n  a: 1\n",
            "Assets/M.mat.meta",
        )
        .unwrap();
        assert_eq!(meta.asset_kind("Assets/M.mat"), AssetKind::Material);
        // Extension says nothing → importer decides.
        assert_eq!(meta.asset_kind("Assets/M.bin"), AssetKind::Native);
    }

    #[test]
    fn companion_path_strips_meta_suffix() {
        assert_eq!(
            companion_path("Assets/Player.prefab.meta"),
            Some("Assets/Player.prefab")
        );
        assert_eq!(companion_path("Assets/Player.prefab"), None);
    }

    #[test]
    fn extract_guid_only_matches_full_parse() {
        let guid = extract_guid_from_str(TEXTURE_META).unwrap();
        let meta = parse_meta_str(TEXTURE_META, "x.meta").unwrap();
        assert_eq!(guid, meta.guid);
    }

    #[test]
    fn extract_guid_stops_at_first_match() {
        let content = "\
guid: 0123456789abcdef0123456789abcdef
guid: ffffffffffffffffffffffffffffffff
";
        assert_eq!(
            extract_guid_from_str(content).unwrap().as_str(),
            "0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn extract_guid_handles_invalid() {
        assert!(extract_guid_from_str("guid: nope\n").is_none());
        assert!(extract_guid_from_str("fileFormatVersion: 2\n").is_none());
    }

    #[test]
    fn old_version_warns() {
        let content = "fileFormatVersion: 1\nguid: 0123456789abcdef0123456789abcdef\n";
        let meta = parse_meta_str(content, "x.meta").unwrap();
        assert!(meta.warnings.iter().any(|w| w.contains("fileFormatVersion")));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // The fast path and the full parse agree on every valid file.
            #[test]
            fn fast_path_matches_full_parse(hex in "[0-9a-fA-F]{32}") {
                let content = format!(
                    "fileFormatVersion: 2\nguid: {hex}\nDefaultImporter:\n  userData: \n"
                );
                let fast = extract_guid_from_str(&content).unwrap();
                let full = parse_meta_str(&content, "x.meta").unwrap();
                prop_assert_eq!(fast, full.guid);
            }

            #[test]
            fn fast_path_rejects_what_full_parse_rejects(bad in "[0-9a-f]{1,31}") {
                let content = format!("fileFormatVersion: 2\nguid: {bad}\n");
                prop_assert!(extract_guid_from_str(&content).is_none());
                prop_assert!(parse_meta_str(&content, "x.meta").is_err());
            }
        }
    }
}
