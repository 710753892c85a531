//! Persistent + volatile inverted index over indexed paths (§4.3).
//!
//! Two `tantivy` indices back the engine: an in-memory `RamDirectory` one that absorbs live
//! writes cheaply, and an `MmapDirectory`-backed one on `persistent_index_dir` that survives
//! restarts. Queries union both tiers; the volatile tier wins on a `full_path` collision, since
//! it reflects the most recent write (§4.3 "Durability implementation").

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, RegexQuery, TermQuery};
use tantivy::schema::{IndexRecordOption, Schema, Value};
use tantivy::{doc, DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, warn};

use crate::batcher::IndexJob;
use crate::config::EventHandlerConfig;
use crate::error::Result;

use super::document::{self, Fields, IndexDocument};
use super::tokenizer::{ChineseTokenizer, Tokenizer};

/// A tantivy writer buffer large enough for this daemon's write volume without excess RAM use.
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// One search hit: a stored path and the score tantivy assigned it (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub full_path: String,
    pub score: f32,
}

/// Result of [`IndexEngine::search`]: the paginated, self-healed hit list plus any paths found to
/// no longer exist on disk, which the caller must enqueue for removal (§4.3 "Self-healing").
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<Hit>,
    pub stale: Vec<String>,
}

struct Tier {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl Tier {
    fn ram(schema: Schema) -> Result<Self> {
        let index = Index::create_in_ram(schema);
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
        Ok(Self { index, writer: Mutex::new(writer), reader })
    }

    fn persistent(schema: Schema, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let directory = MmapDirectory::open(dir)
            .map_err(|err| crate::error::Error::Config(format!("opening persistent index directory {}: {err}", dir.display())))?;
        let index = Index::open_or_create(directory, schema)?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
        Ok(Self { index, writer: Mutex::new(writer), reader })
    }

    fn commit_and_reload(&self) -> Result<()> {
        self.writer.lock().unwrap().commit()?;
        self.reader.reload()?;
        Ok(())
    }
}

/// The index engine (§4.3). Single-writer per tier by construction (`Mutex<IndexWriter>`);
/// readers never block behind it beyond tantivy's own short commit critical section (§5).
pub struct IndexEngine {
    schema: Schema,
    fields: Fields,
    tokenizer: Arc<dyn Tokenizer>,
    volatile: Tier,
    persistent: Tier,
    config: Arc<EventHandlerConfig>,
}

impl IndexEngine {
    pub fn open(config: Arc<EventHandlerConfig>) -> Result<Self> {
        let schema = document::build_schema();
        let fields = Fields::resolve(&schema);
        let volatile = Tier::ram(schema.clone())?;
        let persistent = Tier::persistent(schema.clone(), &config.persistent_index_dir)?;
        Ok(Self {
            schema,
            fields,
            tokenizer: Arc::new(ChineseTokenizer::new()),
            volatile,
            persistent,
            config,
        })
    }

    /// Convenience constructor for tests: persistent tier also lives in RAM.
    #[cfg(test)]
    pub(crate) fn open_in_ram(config: Arc<EventHandlerConfig>) -> Result<Self> {
        let schema = document::build_schema();
        let fields = Fields::resolve(&schema);
        Ok(Self {
            fields,
            tokenizer: Arc::new(ChineseTokenizer::new()),
            volatile: Tier::ram(schema.clone())?,
            persistent: Tier::ram(schema.clone())?,
            schema,
            config,
        })
    }

    fn build_document(&self, doc: &IndexDocument) -> TantivyDocument {
        let f = &self.fields;
        let file_name_lower = doc.file_name.to_lowercase();
        let name_tokens = self.tokenizer.tokens(&doc.file_name).join(" ");
        doc!(
            f.full_path => doc.full_path.clone(),
            f.file_name_raw => file_name_lower,
            f.file_name_tokens => name_tokens,
            f.pinyin_tokens => doc.pinyin.clone(),
            f.parent_dir => doc.parent_dir.clone(),
            f.file_ext => doc.file_ext.clone(),
            f.file_type => doc.file_type.clone(),
            f.modify_time => doc.modify_time_str.clone(),
            f.file_size => doc.file_size_str.clone(),
            f.is_hidden => doc.is_hidden,
        )
    }

    /// Applies one job to the volatile tier's writer without committing (§4.4 "applies jobs
    /// sequentially"); the caller decides the commit cadence (per-batch for the worker pool, or
    /// immediately for synchronous control-surface callers).
    fn apply_uncommitted(&self, job: &IndexJob) -> Result<()> {
        match job {
            IndexJob::Add(path) => self.stage_add(path),
            IndexJob::Remove(path) => {
                self.stage_remove(path);
                Ok(())
            }
            IndexJob::Update { src, dst } => {
                self.stage_remove(src);
                self.stage_add(dst)
            }
        }
    }

    fn stage_add(&self, path: &Path) -> Result<()> {
        let full_path = path.to_string_lossy().into_owned();
        let metadata = std::fs::symlink_metadata(path)?;
        let document = IndexDocument::from_metadata(path, &metadata, &self.config);
        let tantivy_doc = self.build_document(&document);

        let writer = self.volatile.writer.lock().unwrap();
        writer.delete_term(Term::from_field_text(self.fields.full_path, &full_path));
        writer.add_document(tantivy_doc)?;
        Ok(())
    }

    /// Deletes `path` from both tiers: a document may already have been merged into `persistent`
    /// by a prior `flush_volatile_to_persistent`, in which case a volatile-only delete is a no-op
    /// and the document would survive (§4.3 `remove` contract, §8 invariant 3).
    fn stage_remove(&self, path: &Path) {
        let full_path = path.to_string_lossy();
        let term = Term::from_field_text(self.fields.full_path, &full_path);
        self.volatile.writer.lock().unwrap().delete_term(term.clone());
        self.persistent.writer.lock().unwrap().delete_term(term);
    }

    /// Applies every job in `jobs` in order (§4.4: "within a batch, jobs run in enqueue order").
    /// Skips and logs any single job that fails rather than aborting the batch (§7 "Index write
    /// failure"). Does not commit — the volatile writer's commit cadence is driven separately by
    /// `commit_volatile_index_timeout_ms` (§4.3 "Durability implementation"), so a flood of
    /// batches doesn't force a tantivy commit (and searcher reload) per batch.
    pub fn apply_batch(&self, jobs: &[IndexJob]) -> Result<()> {
        for job in jobs {
            if let Err(err) = self.apply_uncommitted(job) {
                warn!(?job, error = %err, "skipping index job that failed to apply");
            }
        }
        Ok(())
    }

    /// Idempotent add (§4.3, §8 invariant 2): inserting an existing `full_path` updates mutable
    /// fields without creating a duplicate, since `stage_add` always deletes-then-adds by term.
    pub fn add(&self, path: &Path) -> Result<()> {
        self.stage_add(path)?;
        self.volatile.commit_and_reload()
    }

    /// Removes the exact path; succeeds even if it was never indexed (§4.3, §7). Commits both
    /// tiers, since the document may live in either.
    pub fn remove(&self, path: &Path) -> Result<()> {
        self.stage_remove(path);
        self.volatile.commit_and_reload()?;
        self.persistent.commit_and_reload()
    }

    /// Equivalent to `remove(src); add(dst)` committed together, so no query observes both or
    /// neither (§4.3, §8 invariant 1).
    pub fn update(&self, src: &Path, dst: &Path) -> Result<()> {
        self.stage_remove(src);
        self.stage_add(dst)?;
        self.volatile.commit_and_reload()?;
        self.persistent.commit_and_reload()
    }

    /// True if `full_path` is currently indexed. `exact = true` matches the literal path;
    /// `exact = false` also matches if any indexed document's `full_path` falls under `path` as a
    /// directory prefix (used to answer "is anything indexed under here").
    pub fn document_exists(&self, path: &str, exact: bool) -> bool {
        if exact {
            self.term_exists(&self.volatile, path) || self.term_exists(&self.persistent, path)
        } else {
            self.prefix_exists(&self.volatile, path) || self.prefix_exists(&self.persistent, path)
        }
    }

    fn term_exists(&self, tier: &Tier, path: &str) -> bool {
        let searcher = tier.reader.searcher();
        let term = Term::from_field_text(self.fields.full_path, path);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        matches!(searcher.search(&query, &TopDocs::with_limit(1)), Ok(hits) if !hits.is_empty())
    }

    fn prefix_exists(&self, tier: &Tier, path: &str) -> bool {
        let searcher = tier.reader.searcher();
        // `RegexQuery` is built on `fst`'s regex engine, which whole-matches a term and has no
        // `^`/`$` anchor support — anchoring here would make `from_pattern` return `Err` instead
        // of the intended prefix match.
        let Ok(regex) = RegexQuery::from_pattern(&format!("{}.*", regex_escape(path)), self.fields.full_path) else {
            return false;
        };
        matches!(searcher.search(&regex, &TopDocs::with_limit(1)), Ok(hits) if !hits.is_empty())
    }

    /// §4.3 query semantics: AND-of-terms against `file_name` (or glob against it when
    /// `wildcard`), `prefix` filtered against the exact stored `full_path`, self-healed against
    /// `lstat`, with one bounded backfill pass when the page would otherwise come back short
    /// (§4.3 "Self-healing").
    pub fn search(&self, prefix: &str, query: &str, offset: usize, limit: usize, wildcard: bool) -> Result<SearchOutcome> {
        let prefix = normalize_prefix(prefix);
        let requested = if limit == 0 { usize::MAX } else { offset.saturating_add(limit) };
        let mut fetch_n = requested.min(MAX_FETCH).max(limit.max(offset).max(64));

        let mut attempt = 0;
        loop {
            let raw = self.collect(query, wildcard, fetch_n)?;
            let filtered: Vec<&Hit> = raw.iter().filter(|hit| path_has_prefix(&hit.full_path, &prefix)).collect();

            let mut live = Vec::with_capacity(filtered.len());
            let mut stale = Vec::new();
            for hit in filtered {
                if std::fs::symlink_metadata(&hit.full_path).is_ok() {
                    live.push(hit.clone());
                } else {
                    stale.push(hit.full_path.clone());
                }
            }

            let page_full = live.len() >= requested || raw.len() < fetch_n;
            if !page_full && attempt == 0 && fetch_n < MAX_FETCH {
                attempt += 1;
                fetch_n = (fetch_n * 4).min(MAX_FETCH);
                continue;
            }

            let page = paginate(live, offset, limit);
            return Ok(SearchOutcome { hits: page, stale });
        }
    }

    fn collect(&self, query: &str, wildcard: bool, fetch_n: usize) -> Result<Vec<Hit>> {
        let mut by_path: HashMap<String, Hit> = HashMap::new();

        for tier in [&self.persistent, &self.volatile] {
            let searcher = tier.reader.searcher();
            let tantivy_query = self.build_query(query, wildcard)?;
            let top = searcher.search(tantivy_query.as_ref(), &TopDocs::with_limit(fetch_n))?;
            for (score, addr) in top {
                let retrieved: TantivyDocument = searcher.doc(addr)?;
                if let Some(full_path) = retrieved.get_first(self.fields.full_path).and_then(|v| v.as_str()) {
                    by_path.insert(full_path.to_string(), Hit { full_path: full_path.to_string(), score });
                }
            }
        }

        let mut hits: Vec<Hit> = by_path.into_values().collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.full_path.cmp(&b.full_path)));
        hits.truncate(fetch_n);
        Ok(hits)
    }

    fn build_query(&self, query: &str, wildcard: bool) -> Result<Box<dyn Query>> {
        if query.trim().is_empty() {
            return Ok(Box::new(AllQuery));
        }

        if wildcard {
            // `fst`'s regex engine whole-matches a term and rejects `^`/`$` anchors, so the glob
            // body alone is already the right pattern (see `prefix_exists` above).
            let pattern = glob_to_regex(&query.to_lowercase());
            return Ok(Box::new(RegexQuery::from_pattern(&pattern, self.fields.file_name_raw)?));
        }

        let mut parser = QueryParser::for_index(&self.volatile.index, vec![self.fields.file_name_tokens, self.fields.pinyin_tokens]);
        parser.set_conjunction_by_default();
        match parser.parse_query(&query.to_lowercase()) {
            Ok(parsed) => Ok(parsed),
            Err(_) => Ok(term_and_query(&self.fields, &self.tokenizer.tokens(query))),
        }
    }

    /// Merges every live document in the volatile tier into `persistent` (§4.3 "Durability").
    ///
    /// Enumerates documents via the segment readers rather than a `TopDocs` collector: tantivy's
    /// `TopNComputer` preallocates a buffer sized off the requested limit, so collecting with
    /// `usize::MAX` panics on the first committed segment instead of returning every document.
    pub fn flush_volatile_to_persistent(&self) -> Result<()> {
        let searcher = self.volatile.reader.searcher();
        let addrs: Vec<DocAddress> = searcher
            .segment_readers()
            .iter()
            .enumerate()
            .flat_map(|(segment_ord, segment_reader)| {
                segment_reader.doc_ids_alive().map(move |doc_id| DocAddress::new(segment_ord as u32, doc_id))
            })
            .collect();
        if addrs.is_empty() {
            return Ok(());
        }

        debug!(count = addrs.len(), "merging volatile index into persistent index");
        {
            let writer = self.persistent.writer.lock().unwrap();
            for addr in &addrs {
                let retrieved: TantivyDocument = searcher.doc(*addr)?;
                if let Some(full_path) = retrieved.get_first(self.fields.full_path).and_then(|v| v.as_str()) {
                    writer.delete_term(Term::from_field_text(self.fields.full_path, full_path));
                }
                writer.add_document(retrieved)?;
            }
        }
        self.persistent.commit_and_reload()?;

        self.volatile.writer.lock().unwrap().delete_all_documents()?;
        self.volatile.commit_and_reload()
    }

    pub fn commit_volatile(&self) -> Result<()> {
        self.volatile.commit_and_reload()
    }

    /// Flushes everything and merges volatile into persistent (§4.3 "A clean shutdown must flush
    /// volatile → persistent").
    pub fn shutdown(&self) -> Result<()> {
        self.commit_volatile()?;
        self.flush_volatile_to_persistent()
    }
}

const MAX_FETCH: usize = 50_000;

fn paginate(mut live: Vec<Hit>, offset: usize, limit: usize) -> Vec<Hit> {
    if offset >= live.len() {
        return Vec::new();
    }
    let end = if limit == 0 { live.len() } else { (offset + limit).min(live.len()) };
    live.drain(end..).for_each(drop);
    live.drain(..offset).for_each(drop);
    live
}

/// `prefix` must be a prefix of the stored `full_path` after normalizing a trailing `/` (§4.3).
fn normalize_prefix(prefix: &str) -> String {
    if prefix.len() > 1 {
        prefix.trim_end_matches('/').to_string()
    } else {
        prefix.to_string()
    }
}

fn path_has_prefix(full_path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    full_path == prefix || full_path.starts_with(&format!("{prefix}/"))
}

/// Builds an AND-of-terms fallback query directly from pre-tokenized terms, used when
/// `QueryParser` rejects the raw query string (e.g. it contains characters `QueryParser` treats
/// as syntax rather than literal content).
fn term_and_query(fields: &Fields, tokens: &[String]) -> Box<dyn Query> {
    if tokens.is_empty() {
        return Box::new(AllQuery);
    }
    let clauses = tokens
        .iter()
        .map(|t| {
            let term = Term::from_field_text(fields.file_name_tokens, t);
            (Occur::Must, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
        })
        .collect();
    Box::new(BooleanQuery::new(clauses))
}

/// Converts a `*`/`?` glob into an anchored regex body, escaping every other regex metacharacter.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c if "\\.+^$()[]{}|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

fn regex_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() * 2);
    for ch in literal.chars() {
        if "\\.+*?^$()[]{}|".contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn engine() -> IndexEngine {
        IndexEngine::open_in_ram(Arc::new(EventHandlerConfig::default())).unwrap()
    }

    fn touch(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn add_then_search_finds_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "notes.txt");
        let engine = engine();
        engine.add(&path).unwrap();

        let outcome = engine.search(dir.path().to_str().unwrap(), "notes", 0, 10, false).unwrap();
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].full_path, path.to_string_lossy());
    }

    #[test]
    fn idempotent_add_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.txt");
        let engine = engine();
        engine.add(&path).unwrap();
        engine.add(&path).unwrap();

        let outcome = engine.search(dir.path().to_str().unwrap(), "a", 0, 10, false).unwrap();
        assert_eq!(outcome.hits.len(), 1);
    }

    #[test]
    fn remove_after_add_clears_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "gone.txt");
        let engine = engine();
        engine.add(&path).unwrap();
        assert!(engine.document_exists(&path.to_string_lossy(), true));

        engine.remove(&path).unwrap();
        assert!(!engine.document_exists(&path.to_string_lossy(), true));
    }

    #[test]
    fn update_moves_document_identity() {
        let dir = tempfile::tempdir().unwrap();
        let src = touch(&dir, "a.md");
        let engine = engine();
        engine.add(&src).unwrap();

        let dst = dir.path().join("b.md");
        std::fs::rename(&src, &dst).unwrap();
        engine.update(&src, &dst).unwrap();

        assert!(!engine.document_exists(&src.to_string_lossy(), true));
        assert!(engine.document_exists(&dst.to_string_lossy(), true));
    }

    #[test]
    fn remove_after_flush_to_persistent_clears_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "gone.txt");
        let engine = engine();
        engine.add(&path).unwrap();
        engine.flush_volatile_to_persistent().unwrap();
        assert!(engine.document_exists(&path.to_string_lossy(), true));

        engine.remove(&path).unwrap();
        assert!(!engine.document_exists(&path.to_string_lossy(), true));

        let outcome = engine.search(dir.path().to_str().unwrap(), "gone", 0, 10, false).unwrap();
        assert!(outcome.hits.is_empty());
    }

    #[test]
    fn update_after_flush_to_persistent_does_not_duplicate_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = touch(&dir, "a.md");
        let engine = engine();
        engine.add(&src).unwrap();
        engine.flush_volatile_to_persistent().unwrap();

        let dst = dir.path().join("b.md");
        std::fs::rename(&src, &dst).unwrap();
        engine.update(&src, &dst).unwrap();

        assert!(!engine.document_exists(&src.to_string_lossy(), true));
        assert!(engine.document_exists(&dst.to_string_lossy(), true));
    }

    #[test]
    fn flush_volatile_to_persistent_handles_large_volatile_tier() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        for i in 0..50 {
            let path = touch(&dir, &format!("f{i}.txt"));
            engine.add(&path).unwrap();
        }

        engine.flush_volatile_to_persistent().unwrap();

        let outcome = engine.search(dir.path().to_str().unwrap(), "f", 0, 100, false).unwrap();
        assert_eq!(outcome.hits.len(), 50);
    }

    #[test]
    fn wildcard_search_matches_glob() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir, "a.txt");
        let ab = touch(&dir, "ab.md");
        let engine = engine();
        engine.add(&dir.path().join("a.txt")).unwrap();
        engine.add(&ab).unwrap();

        let outcome = engine.search(dir.path().to_str().unwrap(), "a*.md", 0, 10, true).unwrap();
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].full_path, ab.to_string_lossy());
    }

    #[test]
    fn self_healing_removes_deleted_path_from_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "temp.txt");
        let engine = engine();
        engine.add(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let outcome = engine.search(dir.path().to_str().unwrap(), "temp", 0, 10, false).unwrap();
        assert!(outcome.hits.is_empty());
        assert_eq!(outcome.stale, vec![path.to_string_lossy().to_string()]);
    }

    #[test]
    fn prefix_filter_excludes_documents_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let inside = touch(&dir, "inside.txt");
        let outside = touch(&other, "inside.txt");
        let engine = engine();
        engine.add(&inside).unwrap();
        engine.add(&outside).unwrap();

        let outcome = engine.search(dir.path().to_str().unwrap(), "inside", 0, 10, false).unwrap();
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].full_path, inside.to_string_lossy());
    }
}
