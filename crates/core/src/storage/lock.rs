use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

// Lock files older than this are assumed to belong to a crashed writer.
const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Exclusive writer lock next to the cache file. Removed on drop.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release cache lock");
        }
    }
}

pub fn lock_path_for(cache_path: &Path) -> PathBuf {
    let mut name = cache_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Returns `Ok(None)` when another writer holds the lock.
pub fn try_acquire_cache_lock(cache_path: &Path) -> anyhow::Result<Option<CacheLock>> {
    let path = lock_path_for(cache_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory {}", parent.display()))?;
    }

    if is_stale(&path) {
        tracing::warn!(path = %path.display(), "removing stale cache lock");
        let _ = std::fs::remove_file(&path);
    }

    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
            let _ = writeln!(file, "{}", std::process::id());
            Ok(Some(CacheLock { path }))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to acquire cache lock {}", path.display()))
        }
    }
}

fn is_stale(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .is_some_and(|age| age > STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_writer_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("news.csv");

        let first = try_acquire_cache_lock(&cache).unwrap();
        assert!(first.is_some());
        assert!(lock_path_for(&cache).exists());
        assert!(try_acquire_cache_lock(&cache).unwrap().is_none());

        drop(first);
        assert!(!lock_path_for(&cache).exists());
        assert!(try_acquire_cache_lock(&cache).unwrap().is_some());
    }

    #[test]
    fn lock_path_sits_next_to_cache() {
        assert_eq!(
            lock_path_for(Path::new("data/news_cache.csv")),
            PathBuf::from("data/news_cache.csv.lock")
        );
    }
}
