use crate::domain::article::ArticleRecord;
use crate::storage::lock::try_acquire_cache_lock;
use anyhow::Context;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// CSV-backed article cache shared by every ticker. Rows are keyed by
/// `(title, published_at)`; the `symbol` column partitions them by ticker.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every cached row. A missing, empty, or unreadable file is an
    /// empty cache.
    pub fn load(&self) -> Vec<ArticleRecord> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "cache unreadable; treating as empty");
                return Vec::new();
            }
        };

        let mut reader = csv::Reader::from_reader(file);
        let mut out = Vec::new();
        for row in reader.deserialize::<ArticleRecord>() {
            match row {
                Ok(record) => out.push(record),
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "cache corrupt; treating as empty");
                    return Vec::new();
                }
            }
        }
        out
    }

    /// Rewrites the whole file through a temp file in the same directory
    /// followed by an atomic rename.
    pub fn save(&self, records: &[ArticleRecord]) -> anyhow::Result<()> {
        for record in records {
            anyhow::ensure!(
                !record.symbol.is_empty() && record.symbol == record.symbol.to_uppercase(),
                "cached symbol must be non-empty uppercase (got {:?})",
                record.symbol
            );
        }

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for record in records {
                writer.serialize(record).context("failed to write cache row")?;
            }
            writer.flush().context("failed to flush cache rows")?;
        }
        tmp.as_file_mut().flush()?;
        tmp.as_file()
            .sync_all()
            .context("failed to sync cache temp file")?;

        tmp.persist(&self.path)
            .with_context(|| format!("failed to replace cache file {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), rows = records.len(), "cache saved");
        Ok(())
    }

    /// Load, merge `incoming` over the cached rows, and save, holding the
    /// writer lock throughout. Returns the merged rows.
    pub fn store(&self, incoming: Vec<ArticleRecord>) -> anyhow::Result<Vec<ArticleRecord>> {
        let _lock = try_acquire_cache_lock(&self.path)?.with_context(|| {
            format!(
                "cache lock not acquired for {}; another writer in progress",
                self.path.display()
            )
        })?;

        let existing = self.load();
        let before = existing.len();
        let incoming_len = incoming.len();
        let merged = merge(existing, incoming);
        self.save(&merged)?;

        tracing::info!(
            path = %self.path.display(),
            before,
            incoming = incoming_len,
            after = merged.len(),
            "cache updated"
        );
        Ok(merged)
    }

    pub fn records_for(&self, symbol: &str) -> Vec<ArticleRecord> {
        self.load()
            .into_iter()
            .filter(|r| r.symbol.eq_ignore_ascii_case(symbol.trim()))
            .collect()
    }

    /// Distinct cached symbols in first-seen order.
    pub fn symbols(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.load()
            .into_iter()
            .filter_map(|r| seen.insert(r.symbol.clone()).then_some(r.symbol))
            .collect()
    }
}

/// Appends `incoming` to `existing` and drops duplicate `(title, published_at)`
/// rows, keeping the last occurrence at its position. Newer fetches win.
pub fn merge(existing: Vec<ArticleRecord>, incoming: Vec<ArticleRecord>) -> Vec<ArticleRecord> {
    let all: Vec<ArticleRecord> = existing.into_iter().chain(incoming).collect();

    let mut seen = HashSet::with_capacity(all.len());
    let mut keep: Vec<bool> = all.iter().rev().map(|r| seen.insert(r.dedup_key())).collect();
    keep.reverse();

    all.into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect()
}
