//! Package descriptor (`info.ini`) parsing and validation.
//!
//! The descriptor is a typed INI file: optional `[section]` headers,
//! `key = value` lines, `;` or `#` comments. Unquoted values are scanned
//! into booleans, integers or null; quoted values always stay strings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::types::{AddonStatus, PackageKind};

/// Pattern every package identifier must match.
pub const IDENTIFIER_PATTERN: &str = "^[A-Za-z][A-Za-z0-9_]*$";

static IDENTIFIER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(IDENTIFIER_PATTERN).ok());

/// Descriptor failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// No descriptor file at the expected path.
    #[error("info.ini not found at {}", .0.display())]
    Missing(PathBuf),

    /// File could not be read or scanned as INI.
    #[error("malformed info.ini at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// One or more required fields are absent or blank.
    #[error("info.ini is missing required fields: {}", .missing.join(", "))]
    Invalid { missing: Vec<String> },

    /// Name does not match the identifier pattern.
    #[error("invalid package identifier '{0}'")]
    InvalidIdentifier(String),

    /// Declared `type` disagrees with the requested kind.
    #[error("package declares type '{found}' but '{expected}' was requested")]
    KindMismatch { expected: PackageKind, found: String },
}

/// A scanned INI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IniValue {
    /// Text, quoted or not.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// `true`/`on`/`yes` or `false`/`off`/`no`/`none`.
    Bool(bool),
    /// `null` or an empty value.
    Null,
}

impl IniValue {
    fn scan(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.len() >= 2
            && ((raw.starts_with('"') && raw.ends_with('"'))
                || (raw.starts_with('\'') && raw.ends_with('\'')))
        {
            return Self::Str(raw[1..raw.len() - 1].to_string());
        }

        match raw.to_lowercase().as_str() {
            "" | "null" => return Self::Null,
            "true" | "on" | "yes" => return Self::Bool(true),
            "false" | "off" | "no" | "none" => return Self::Bool(false),
            _ => {}
        }

        raw.parse::<i64>()
            .map_or_else(|_| Self::Str(raw.to_string()), Self::Int)
    }

    /// Renders the value as text; `None` for null.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Int(n) => Some(n.to_string()),
            Self::Bool(b) => Some(if *b { "1" } else { "" }.to_string()),
            Self::Null => None,
        }
    }

    /// Returns the integer value, parsing strings if needed.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Str(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Parsed INI document: top-level keys plus named sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    /// Keys before the first section header.
    pub root: BTreeMap<String, IniValue>,
    /// Keys grouped by section.
    pub sections: BTreeMap<String, BTreeMap<String, IniValue>>,
}

impl IniDocument {
    /// Scans INI text.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut doc = Self::default();
        let mut section: Option<String> = None;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| ManifestError::Malformed {
                    line: line_no,
                    reason: "unterminated section header".to_string(),
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(ManifestError::Malformed {
                        line: line_no,
                        reason: "empty section name".to_string(),
                    });
                }
                doc.sections.entry(name.to_string()).or_default();
                section = Some(name.to_string());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ManifestError::Malformed {
                    line: line_no,
                    reason: format!("expected key = value, found '{}'", line),
                });
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(ManifestError::Malformed {
                    line: line_no,
                    reason: "empty key".to_string(),
                });
            }

            let value = IniValue::scan(strip_inline_comment(value));
            let target = match &section {
                Some(name) => doc.sections.entry(name.clone()).or_default(),
                None => &mut doc.root,
            };
            target.insert(key.to_string(), value);
        }

        Ok(doc)
    }

    /// Looks up a top-level key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&IniValue> {
        self.root.get(key)
    }

    fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(IniValue::as_text)
    }

    fn is_missing(&self, key: &str) -> bool {
        self.get(key).is_none_or(IniValue::is_blank)
    }
}

/// Drops a trailing `;` comment outside of quotes.
fn strip_inline_comment(value: &str) -> &str {
    let trimmed = value.trim_start();
    if trimmed.starts_with('"') || trimmed.starts_with('\'') {
        return value;
    }
    value.split(';').next().unwrap_or("")
}

/// Validated package metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// Package kind, from the `type` field.
    pub kind: PackageKind,
    /// Identifier.
    pub name: String,
    /// Display title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Version string.
    pub version: String,
    /// Shipped status (addons only).
    pub status: Option<AddonStatus>,
    /// Host module (templates only).
    pub module: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Every other top-level key, rendered as text.
    pub extra: BTreeMap<String, String>,
}

const KNOWN_KEYS: [&str; 8] = [
    "type",
    "name",
    "title",
    "author",
    "version",
    "status",
    "module",
    "description",
];

impl PackageDescriptor {
    fn from_document(doc: &IniDocument, kind: PackageKind) -> Result<Self, ManifestError> {
        let missing: Vec<String> = kind
            .required_fields()
            .iter()
            .filter(|field| doc.is_missing(field))
            .map(|field| (*field).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ManifestError::Invalid { missing });
        }

        let declared = doc.text("type").unwrap_or_default();
        match PackageKind::parse(&declared) {
            Some(found) if found.is_template() == kind.is_template() => {}
            _ => {
                return Err(ManifestError::KindMismatch {
                    expected: kind,
                    found: declared,
                });
            }
        }

        let status = if kind.is_template() {
            None
        } else {
            doc.get("status")
                .and_then(IniValue::as_int)
                .and_then(AddonStatus::from_code)
        };

        let extra = doc
            .root
            .iter()
            .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
            .filter_map(|(key, value)| value.as_text().map(|v| (key.clone(), v)))
            .collect();

        Ok(Self {
            kind,
            name: doc.text("name").unwrap_or_default(),
            title: doc.text("title").unwrap_or_default(),
            author: doc.text("author").unwrap_or_default(),
            version: doc.text("version").unwrap_or_default(),
            status,
            module: if kind.is_template() { doc.text("module") } else { None },
            description: doc.text("description").filter(|d| !d.trim().is_empty()),
            extra,
        })
    }
}

/// Parses and validates the descriptor at `path` for the given kind.
pub fn parse(path: &Path, kind: PackageKind) -> Result<PackageDescriptor, ManifestError> {
    let doc = read_document(path)?;
    PackageDescriptor::from_document(&doc, kind)
}

/// Parses a descriptor, taking the kind from its own `type` field.
pub fn load(path: &Path) -> Result<PackageDescriptor, ManifestError> {
    let doc = read_document(path)?;
    let declared = doc.text("type").unwrap_or_default();
    let kind = PackageKind::parse(&declared).ok_or_else(|| {
        if declared.trim().is_empty() {
            ManifestError::Invalid {
                missing: vec!["type".to_string()],
            }
        } else {
            ManifestError::KindMismatch {
                expected: PackageKind::Addon,
                found: declared.clone(),
            }
        }
    })?;
    PackageDescriptor::from_document(&doc, kind)
}

fn read_document(path: &Path) -> Result<IniDocument, ManifestError> {
    if !path.is_file() {
        return Err(ManifestError::Missing(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|e| ManifestError::Malformed {
        line: 0,
        reason: e.to_string(),
    })?;
    IniDocument::parse(&content)
}

/// Returns true when `name` is a valid package identifier.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(name))
}

/// Fails with [`ManifestError::InvalidIdentifier`] for a bad identifier.
pub fn validate_identifier(name: &str) -> Result<(), ManifestError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(ManifestError::InvalidIdentifier(name.to_string()))
    }
}
