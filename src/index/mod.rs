//! Persistent inverted index over indexed paths, with Chinese-aware tokenization (§4.3).

pub mod document;
pub mod engine;
pub mod tokenizer;

pub use document::IndexDocument;
pub use engine::{Hit, IndexEngine, SearchOutcome};
pub use tokenizer::{ChineseTokenizer, Tokenizer};
