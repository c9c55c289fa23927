//! Row types shared by the store, the memory index, and the HTTP layer.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Language class of an indexed file. The (project, language) pair a file
/// was accepted under is immutable for its lifetime; a file moving across
/// projects is a delete + insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Angelscript,
    Cpp,
    Content,
    Config,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Angelscript => "angelscript",
            Language::Cpp => "cpp",
            Language::Content => "content",
            Language::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "angelscript" => Ok(Language::Angelscript),
            "cpp" => Ok(Language::Cpp),
            "content" => Ok(Language::Content),
            "config" => Ok(Language::Config),
            other => Err(anyhow!("unknown language: {}", other)),
        }
    }

    /// Content-class files carry no source text, so they contribute no
    /// stored content and no trigram postings.
    pub fn stores_content(&self) -> bool {
        !matches!(self, Language::Content)
    }

    pub const ALL: [Language; 4] = [
        Language::Angelscript,
        Language::Cpp,
        Language::Content,
        Language::Config,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Unknown,
    Indexing,
    Ready,
    Error,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Unknown => "unknown",
            IndexState::Indexing => "indexing",
            IndexState::Ready => "ready",
            IndexState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "indexing" => IndexState::Indexing,
            "ready" => IndexState::Ready,
            "error" => IndexState::Error,
            _ => IndexState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Struct,
    Enum,
    Interface,
    Delegate,
    Event,
    Namespace,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Struct => "struct",
            TypeKind::Enum => "enum",
            TypeKind::Interface => "interface",
            TypeKind::Delegate => "delegate",
            TypeKind::Event => "event",
            TypeKind::Namespace => "namespace",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "class" => Ok(TypeKind::Class),
            "struct" => Ok(TypeKind::Struct),
            "enum" => Ok(TypeKind::Enum),
            "interface" => Ok(TypeKind::Interface),
            "delegate" => Ok(TypeKind::Delegate),
            "event" => Ok(TypeKind::Event),
            "namespace" => Ok(TypeKind::Namespace),
            other => Err(anyhow!("unknown type kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Function,
    Property,
    EnumValue,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Function => "function",
            MemberKind::Property => "property",
            MemberKind::EnumValue => "enum_value",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "function" => Ok(MemberKind::Function),
            "property" => Ok(MemberKind::Property),
            "enum_value" => Ok(MemberKind::EnumValue),
            other => Err(anyhow!("unknown member kind: {}", other)),
        }
    }
}

/// An indexed file row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Absolute path, canonicalised to forward slashes. Unique.
    pub path: String,
    /// Path relative to the project root, forward slashes.
    pub relative_path: String,
    pub project: String,
    pub language: Language,
    /// Dotted module path, project-qualified (`MyGame.Combat.Weapons`).
    pub module: String,
    /// Modification time, unix seconds.
    pub mtime: i64,
    /// 64-bit truncation of the blake3 content digest.
    pub content_hash: i64,
}

/// A type declaration pushed by the watcher. The parent is a name, not an
/// id: it may be declared in a file not yet ingested or in a non-indexed
/// library, so no foreign key is forced on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDeclRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub file_id: i64,
    pub name: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub parent_name: Option<String>,
    /// 1-based start line.
    pub line: u32,
    #[serde(default)]
    pub specifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub file_id: i64,
    /// Owning type name; empty for namespace-scope members. May refer to
    /// a type that is not indexed.
    #[serde(default)]
    pub owner_name: String,
    pub name: String,
    pub kind: MemberKind,
    pub line: u32,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub specifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    #[serde(default)]
    pub id: i64,
    pub project: String,
    /// Content-browser path (`/Game/...`). Globally unique.
    pub path: String,
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub parent_class: Option<String>,
    /// Folder prefix of `path`.
    #[serde(default)]
    pub folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatusRecord {
    pub language: Language,
    pub state: IndexState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: i64,
}

/// Cached row-count projection served by `/stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_files: i64,
    pub total_types: i64,
    pub total_members: i64,
    pub total_assets: i64,
    pub files_by_language: Vec<(String, i64)>,
    pub files_by_project: Vec<(String, i64)>,
}

/// Specifier sets are stored as a JSON array in a nullable TEXT column.
pub fn specifiers_to_column(specifiers: &[String]) -> Option<String> {
    if specifiers.is_empty() {
        None
    } else {
        serde_json::to_string(specifiers).ok()
    }
}

pub fn specifiers_from_column(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}
