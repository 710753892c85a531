//! `IndexDocument` (§3) and the tantivy schema that backs it (§4.3 "backing implementation").

use std::path::Path;
use std::time::UNIX_EPOCH;

use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING, TEXT};

use crate::config::EventHandlerConfig;

pub const FIELD_FULL_PATH: &str = "full_path";
pub const FIELD_FILE_NAME_RAW: &str = "file_name_raw";
pub const FIELD_FILE_NAME_TOKENS: &str = "file_name_tokens";
pub const FIELD_PINYIN_TOKENS: &str = "pinyin_tokens";
pub const FIELD_PARENT_DIR: &str = "parent_dir";
pub const FIELD_FILE_EXT: &str = "file_ext";
pub const FIELD_FILE_TYPE: &str = "file_type";
pub const FIELD_MODIFY_TIME: &str = "modify_time_str";
pub const FIELD_FILE_SIZE: &str = "file_size_str";
pub const FIELD_IS_HIDDEN: &str = "is_hidden";

/// Builds the schema shared by the volatile and persistent indices.
///
/// `full_path` is untokenized and stored: it is both the document's identity (§3: "two documents
/// with the same `full_path` must not coexist") and what callers actually want back. `file_name_raw`
/// is also untokenized, lowercased, and used only for wildcard/regex queries (§4.3), since tantivy's
/// query parser has no native glob support. `file_name_tokens` and `pinyin_tokens` carry the
/// pre-segmented, space-joined output of [`super::tokenizer::Tokenizer`] so that tantivy's own
/// default whitespace analysis is sufficient at query time.
pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(FIELD_FULL_PATH, STRING | STORED);
    builder.add_text_field(FIELD_FILE_NAME_RAW, STRING | STORED);
    builder.add_text_field(FIELD_FILE_NAME_TOKENS, TEXT);
    builder.add_text_field(FIELD_PINYIN_TOKENS, TEXT);
    builder.add_text_field(FIELD_PARENT_DIR, STRING | STORED | FAST);
    builder.add_text_field(FIELD_FILE_EXT, STRING | STORED);
    builder.add_text_field(FIELD_FILE_TYPE, STRING | STORED);
    builder.add_text_field(FIELD_MODIFY_TIME, STRING | STORED);
    builder.add_text_field(FIELD_FILE_SIZE, STRING | STORED);
    builder.add_bool_field(FIELD_IS_HIDDEN, INDEXED | STORED | FAST);
    builder.build()
}

/// Resolved field handles for [`build_schema`]'s schema, fetched once per [`tantivy::Index`] and
/// reused for every document build and query.
#[derive(Debug, Clone, Copy)]
pub struct Fields {
    pub full_path: Field,
    pub file_name_raw: Field,
    pub file_name_tokens: Field,
    pub pinyin_tokens: Field,
    pub parent_dir: Field,
    pub file_ext: Field,
    pub file_type: Field,
    pub modify_time: Field,
    pub file_size: Field,
    pub is_hidden: Field,
}

impl Fields {
    pub fn resolve(schema: &Schema) -> Self {
        Self {
            full_path: schema.get_field(FIELD_FULL_PATH).expect("schema built by build_schema"),
            file_name_raw: schema.get_field(FIELD_FILE_NAME_RAW).expect("schema built by build_schema"),
            file_name_tokens: schema.get_field(FIELD_FILE_NAME_TOKENS).expect("schema built by build_schema"),
            pinyin_tokens: schema.get_field(FIELD_PINYIN_TOKENS).expect("schema built by build_schema"),
            parent_dir: schema.get_field(FIELD_PARENT_DIR).expect("schema built by build_schema"),
            file_ext: schema.get_field(FIELD_FILE_EXT).expect("schema built by build_schema"),
            file_type: schema.get_field(FIELD_FILE_TYPE).expect("schema built by build_schema"),
            modify_time: schema.get_field(FIELD_MODIFY_TIME).expect("schema built by build_schema"),
            file_size: schema.get_field(FIELD_FILE_SIZE).expect("schema built by build_schema"),
            is_hidden: schema.get_field(FIELD_IS_HIDDEN).expect("schema built by build_schema"),
        }
    }
}

/// One path's worth of indexable metadata (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    pub full_path: String,
    pub file_name: String,
    pub parent_dir: String,
    pub file_ext: String,
    pub file_type: String,
    pub modify_time_str: String,
    pub file_size_str: String,
    pub pinyin: String,
    pub is_hidden: bool,
}

impl IndexDocument {
    /// Builds a document from an on-disk path and its metadata, using `config.file_type_mapping`
    /// to resolve `file_type` from the extension (§3).
    pub fn from_metadata(path: &Path, metadata: &std::fs::Metadata, config: &EventHandlerConfig) -> Self {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string();
        let parent_dir = path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
        let file_ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        let file_type = config
            .file_type_mapping
            .get(&file_ext)
            .cloned()
            .unwrap_or_else(|| if metadata.is_dir() { "folder".to_string() } else { "file".to_string() });

        let modify_time_str = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs().to_string())
            .unwrap_or_default();
        let file_size_str = metadata.len().to_string();
        let is_hidden = is_hidden_name(&file_name);
        let pinyin = super::tokenizer::pinyin_terms(&file_name).join(" ");

        Self {
            full_path: path.to_string_lossy().into_owned(),
            file_name,
            parent_dir,
            file_ext,
            file_type,
            modify_time_str,
            file_size_str,
            pinyin,
            is_hidden,
        }
    }
}

/// A basename is hidden iff it starts with `.` and is neither `.` nor `..` (SPEC_FULL §3).
pub fn is_hidden_name(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name != "." && file_name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_name_excludes_dot_and_dotdot() {
        assert!(is_hidden_name(".bashrc"));
        assert!(!is_hidden_name("."));
        assert!(!is_hidden_name(".."));
        assert!(!is_hidden_name("notes.txt"));
    }
}
