use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── GUID ───────────────────────────────────────────────────────────

/// A Unity asset GUID: exactly 32 hexadecimal characters, stored lowercase.
///
/// Mixed-case input is accepted and canonicalized at parse time; anything
/// else is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Guid(String);

impl Guid {
    /// Validate and normalize a GUID string.
    pub fn parse(raw: &str) -> Result<Self, GuidError> {
        if raw.len() != 32 {
            return Err(GuidError::BadLength(raw.len()));
        }
        if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GuidError::NonHex(raw.to_string()));
        }
        Ok(Guid(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The all-zero GUID Unity uses for internal placeholder references.
    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Guid {
    type Err = GuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guid::parse(s)
    }
}

impl TryFrom<String> for Guid {
    type Error = GuidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Guid::parse(&s)
    }
}

impl From<Guid> for String {
    fn from(g: Guid) -> Self {
        g.0
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GuidError {
    #[error("GUID must be 32 characters, got {0}")]
    BadLength(usize),

    #[error("GUID contains non-hex characters: {0}")]
    NonHex(String),
}

// ── Asset kind ─────────────────────────────────────────────────────

/// What kind of Unity asset a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Texture,
    Model,
    Script,
    Scene,
    Prefab,
    Material,
    Shader,
    Audio,
    Animation,
    AnimatorController,
    Font,
    Video,
    ShaderGraph,
    ScriptableObject,
    Native,
    Unknown,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Texture => "texture",
            Self::Model => "model",
            Self::Script => "script",
            Self::Scene => "scene",
            Self::Prefab => "prefab",
            Self::Material => "material",
            Self::Shader => "shader",
            Self::Audio => "audio",
            Self::Animation => "animation",
            Self::AnimatorController => "animator_controller",
            Self::Font => "font",
            Self::Video => "video",
            Self::ShaderGraph => "shader_graph",
            Self::ScriptableObject => "scriptable_object",
            Self::Native => "native",
            Self::Unknown => "unknown",
        }
    }

    /// Detect the asset kind from a project-relative path's extension.
    pub fn from_path(path: &str) -> Self {
        let ext = match path.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return Self::Unknown,
        };
        match ext.as_str() {
            "prefab" => Self::Prefab,
            "unity" | "scene" => Self::Scene,
            "cs" => Self::Script,
            "png" | "jpg" | "jpeg" | "tga" | "bmp" | "tiff" | "gif" | "psd" | "exr" => {
                Self::Texture
            }
            "mat" => Self::Material,
            "fbx" | "obj" | "dae" | "3ds" | "blend" => Self::Model,
            "wav" | "mp3" | "ogg" | "aiff" => Self::Audio,
            "anim" => Self::Animation,
            "controller" => Self::AnimatorController,
            "shader" | "compute" => Self::Shader,
            "shadergraph" => Self::ShaderGraph,
            "ttf" | "otf" | "fontsettings" => Self::Font,
            "mp4" | "mov" | "avi" | "webm" => Self::Video,
            "asset" => Self::ScriptableObject,
            _ => Self::Unknown,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "texture" => Some(Self::Texture),
            "model" => Some(Self::Model),
            "script" => Some(Self::Script),
            "scene" => Some(Self::Scene),
            "prefab" => Some(Self::Prefab),
            "material" => Some(Self::Material),
            "shader" => Some(Self::Shader),
            "audio" => Some(Self::Audio),
            "animation" => Some(Self::Animation),
            "animator_controller" => Some(Self::AnimatorController),
            "font" => Some(Self::Font),
            "video" => Some(Self::Video),
            "shader_graph" => Some(Self::ShaderGraph),
            "scriptable_object" => Some(Self::ScriptableObject),
            "native" => Some(Self::Native),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Dependency kind ────────────────────────────────────────────────

/// What kind of reference an edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Script,
    Material,
    Texture,
    Mesh,
    Audio,
    Animation,
    PrefabInstance,
    SceneInstance,
    Shader,
    ScriptableObject,
    PathReference,
    Indirect,
}

impl DependencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Material => "material",
            Self::Texture => "texture",
            Self::Mesh => "mesh",
            Self::Audio => "audio",
            Self::Animation => "animation",
            Self::PrefabInstance => "prefab_instance",
            Self::SceneInstance => "scene_instance",
            Self::Shader => "shader",
            Self::ScriptableObject => "scriptable_object",
            Self::PathReference => "path_reference",
            Self::Indirect => "indirect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "script" => Some(Self::Script),
            "material" => Some(Self::Material),
            "texture" => Some(Self::Texture),
            "mesh" => Some(Self::Mesh),
            "audio" => Some(Self::Audio),
            "animation" => Some(Self::Animation),
            "prefab_instance" => Some(Self::PrefabInstance),
            "scene_instance" => Some(Self::SceneInstance),
            "shader" => Some(Self::Shader),
            "scriptable_object" => Some(Self::ScriptableObject),
            "path_reference" => Some(Self::PathReference),
            "indirect" => Some(Self::Indirect),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Strength ───────────────────────────────────────────────────────

/// How strongly a dependency binds, ordered weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Weak,
    #[default]
    Medium,
    Strong,
    Important,
    Critical,
}

impl Strength {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Medium => "medium",
            Self::Strong => "strong",
            Self::Important => "important",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weak" => Some(Self::Weak),
            "medium" => Some(Self::Medium),
            "strong" => Some(Self::Strong),
            "important" => Some(Self::Important),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Nodes and edges ────────────────────────────────────────────────

/// A Unity asset tracked by the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetNode {
    pub guid: Guid,
    /// Project-relative path with `/` separators.
    pub path: String,
    pub kind: AssetKind,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub content_hash: Option<u64>,
    pub is_analyzed: bool,
    /// Opaque importer settings carried from the `.meta` file.
    #[serde(default)]
    pub importer_metadata: HashMap<String, serde_json::Value>,
    /// False once the backing file has vanished; kept for history.
    pub active: bool,
}

impl AssetNode {
    pub fn new(guid: Guid, path: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            guid,
            path: path.into(),
            kind,
            size_bytes: 0,
            last_modified: Utc::now(),
            content_hash: None,
            is_analyzed: false,
            importer_metadata: HashMap::new(),
            active: true,
        }
    }
}

/// A directed reference from one asset to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source: Guid,
    pub target: Guid,
    pub dep_kind: DependencyKind,
    pub strength: Strength,
    /// Dotted property chain, e.g. `MeshRenderer.m_Materials[0]`.
    pub context_path: Option<String>,
    pub component_type: Option<String>,
    pub property_name: Option<String>,
    /// Unity local FileID of the document the reference appears in.
    pub source_file_id: Option<i64>,
    pub active: bool,
}

impl DependencyEdge {
    pub fn new(source: Guid, target: Guid, dep_kind: DependencyKind) -> Self {
        Self {
            source,
            target,
            dep_kind,
            strength: Strength::default(),
            context_path: None,
            component_type: None,
            property_name: None,
            source_file_id: None,
            active: true,
        }
    }

    /// The identity tuple: `(source, target, dep_kind, context_path)` is
    /// unique across the graph.
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            target: self.target.clone(),
            dep_kind: self.dep_kind,
            context_path: self.context_path.clone(),
        }
    }
}

/// Uniqueness key for a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub source: Guid,
    pub target: Guid,
    pub dep_kind: DependencyKind,
    pub context_path: Option<String>,
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_accepts_and_normalizes() {
        let g = Guid::parse("ABCDEF0123456789abcdef0123456789").unwrap();
        assert_eq!(g.as_str(), "abcdef0123456789abcdef0123456789");
    }

    #[test]
    fn guid_rejects_wrong_length() {
        assert_eq!(
            Guid::parse("abcdef0123456789abcdef012345678"),
            Err(GuidError::BadLength(31))
        );
        assert_eq!(
            Guid::parse("abcdef0123456789abcdef01234567890"),
            Err(GuidError::BadLength(33))
        );
    }

    #[test]
    fn guid_rejects_non_hex() {
        assert!(matches!(
            Guid::parse("ghijkl0123456789abcdef0123456789"),
            Err(GuidError::NonHex(_))
        ));
    }

    #[test]
    fn guid_zero_detection() {
        assert!(Guid::parse("00000000000000000000000000000000")
            .unwrap()
            .is_zero());
        assert!(!Guid::parse("00000000000000000000000000000001")
            .unwrap()
            .is_zero());
    }

    #[test]
    fn guid_serde_round_trip() {
        let g = Guid::parse("0123456789abcdef0123456789abcdef").unwrap();
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(json, "\"0123456789abcdef0123456789abcdef\"");
        let back: Guid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn guid_serde_rejects_invalid() {
        let result: Result<Guid, _> = serde_json::from_str("\"not-a-guid\"");
        assert!(result.is_err());
    }

    #[test]
    fn strength_ordering() {
        assert!(Strength::Weak < Strength::Medium);
        assert!(Strength::Medium < Strength::Strong);
        assert!(Strength::Strong < Strength::Important);
        assert!(Strength::Important < Strength::Critical);
    }

    #[test]
    fn asset_kind_from_path() {
        assert_eq!(AssetKind::from_path("Assets/Player.prefab"), AssetKind::Prefab);
        assert_eq!(AssetKind::from_path("Assets/Main.unity"), AssetKind::Scene);
        assert_eq!(AssetKind::from_path("Assets/icon.PNG"), AssetKind::Texture);
        assert_eq!(AssetKind::from_path("Assets/Enemy.cs"), AssetKind::Script);
        assert_eq!(
            AssetKind::from_path("Assets/Config.asset"),
            AssetKind::ScriptableObject
        );
        assert_eq!(AssetKind::from_path("Assets/noext"), AssetKind::Unknown);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            AssetKind::Texture,
            AssetKind::Model,
            AssetKind::Script,
            AssetKind::Scene,
            AssetKind::Prefab,
            AssetKind::Material,
            AssetKind::Shader,
            AssetKind::Audio,
            AssetKind::Animation,
            AssetKind::AnimatorController,
            AssetKind::Font,
            AssetKind::Video,
            AssetKind::ShaderGraph,
            AssetKind::ScriptableObject,
            AssetKind::Native,
            AssetKind::Unknown,
        ] {
            assert_eq!(AssetKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn dep_kind_round_trips_through_str() {
        for kind in [
            DependencyKind::Script,
            DependencyKind::Material,
            DependencyKind::Texture,
            DependencyKind::Mesh,
            DependencyKind::Audio,
            DependencyKind::Animation,
            DependencyKind::PrefabInstance,
            DependencyKind::SceneInstance,
            DependencyKind::Shader,
            DependencyKind::ScriptableObject,
            DependencyKind::PathReference,
            DependencyKind::Indirect,
        ] {
            assert_eq!(DependencyKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn edge_key_distinguishes_context() {
        let src = Guid::parse("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let tgt = Guid::parse("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let mut a = DependencyEdge::new(src.clone(), tgt.clone(), DependencyKind::Material);
        a.context_path = Some("MeshRenderer.m_Materials[0]".into());
        let mut b = DependencyEdge::new(src, tgt, DependencyKind::Material);
        b.context_path = Some("MeshRenderer.m_Materials[1]".into());
        assert_ne!(a.key(), b.key());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn valid_guids_parse_and_lowercase(s in "[0-9a-fA-F]{32}") {
                let g = Guid::parse(&s).unwrap();
                prop_assert_eq!(g.as_str(), s.to_ascii_lowercase());
            }

            #[test]
            fn wrong_length_rejected(s in "[0-9a-f]{1,31}") {
                prop_assert!(Guid::parse(&s).is_err());
            }

            #[test]
            fn overlong_rejected(s in "[0-9a-f]{33,64}") {
                prop_assert!(Guid::parse(&s).is_err());
            }

            #[test]
            fn guid_parse_idempotent(s in "[0-9a-fA-F]{32}") {
                let once = Guid::parse(&s).unwrap();
                let twice = Guid::parse(once.as_str()).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
