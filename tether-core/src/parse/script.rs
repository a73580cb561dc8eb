//! `.cs` script handling.
//!
//! Scripts get their GUID from the side-car `.meta`; no C# parsing happens
//! here beyond spotting a `[CreateAssetMenu]` attribute, which marks the
//! script as a ScriptableObject factory and is carried into the node's
//! importer metadata.

use std::io::BufRead;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ParseError;

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[CreateAssetMenu(?:\s*\(([^)]*)\))?\]"#).expect("attribute regex")
    })
}

fn menu_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"menuName\s*=\s*"([^"]*)""#).expect("menu name regex"))
}

/// What script scanning found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptInfo {
    /// `Some` when the script carries `[CreateAssetMenu]`; holds the
    /// declared `menuName` when one is given.
    pub create_asset_menu: Option<String>,
}

/// Scan a C# source file line by line for the attribute.
pub fn parse_script(abs_path: &Path, rel_path: &str) -> Result<ScriptInfo, ParseError> {
    let file = std::fs::File::open(abs_path).map_err(|e| ParseError::MalformedYaml {
        path: rel_path.to_string(),
        detail: e.to_string(),
    })?;
    let mut reader = std::io::BufReader::new(file);
    let mut line = String::with_capacity(256);
    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(|e| ParseError::MalformedYaml {
            path: rel_path.to_string(),
            detail: e.to_string(),
        })?;
        if read == 0 {
            break;
        }
        if let Some(info) = scan_line(&line) {
            return Ok(info);
        }
    }
    Ok(ScriptInfo::default())
}

fn scan_line(line: &str) -> Option<ScriptInfo> {
    let caps = attribute_re().captures(line)?;
    let menu_name = caps
        .get(1)
        .and_then(|args| menu_name_re().captures(args.as_str()))
        .map(|m| m[1].to_string())
        .unwrap_or_default();
    Some(ScriptInfo {
        create_asset_menu: Some(menu_name),
    })
}
