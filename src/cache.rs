//! On-disk cache of extracted profiles.
//!
//! Each SQL file maps to exactly one JSON document under the cache
//! directory, so concurrent batches never write the same file. Cache
//! failures are never errors: they are logged and treated as a miss or a
//! no-op.

use crate::profile::Profile;
use std::fs;
use std::path::{Path, PathBuf};

/// Default cache directory, relative to the working directory.
pub const CACHE_DIR: &str = ".sqldeps_cache";

const HASH_LEN: usize = 10;

/// Deterministic, filesystem-safe name for a cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// Derived from the path relative to the working directory.
    Relative(String),
    /// `<stem>_<hash>` for files outside the working directory.
    External(String),
}

impl CacheKey {
    pub fn name(&self) -> &str {
        match self {
            CacheKey::Relative(name) | CacheKey::External(name) => name,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }
}

/// Derive the cache key of `path`, given the working directory.
///
/// Both paths are expected to be absolute.
pub fn cache_key(path: &Path, cwd: &Path) -> CacheKey {
    match path.strip_prefix(cwd) {
        Ok(relative) if !relative.as_os_str().is_empty() => {
            let joined = relative
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "_");
            CacheKey::Relative(sanitize(&joined))
        }
        _ => external_key(path),
    }
}

fn external_key(path: &Path) -> CacheKey {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let digest = format!("{:x}", md5::compute(path.to_string_lossy().as_bytes()));
    CacheKey::External(sanitize(&format!("{}_{}", stem, &digest[..HASH_LEN])))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Profile cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CACHE_DIR)
    }
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file used for `path`.
    pub fn path_for(&self, path: &Path) -> PathBuf {
        let file = resolve(path);
        let key = match std::env::current_dir() {
            Ok(cwd) => cache_key(&file, &resolve(&cwd)),
            Err(_) => external_key(&file),
        };
        self.dir.join(key.file_name())
    }

    /// Store the profile extracted from `path`. Returns false on failure.
    pub fn save(&self, profile: &Profile, path: &Path) -> bool {
        let cache_file = self.path_for(path);
        let result = fs::create_dir_all(&self.dir).and_then(|_| {
            let json = serde_json::to_string(profile)?;
            fs::write(&cache_file, json)
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to save cache for {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Cached profile for `path`, if present and readable.
    pub fn load(&self, path: &Path) -> Option<Profile> {
        let cache_file = self.path_for(path);
        if !cache_file.exists() {
            return None;
        }

        let loaded = fs::read_to_string(&cache_file)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<Profile>(&content).map_err(|e| e.to_string())
            });
        match loaded {
            Ok(profile) => {
                tracing::info!("Loading from cache: {}", path.display());
                Some(profile)
            }
            Err(e) => {
                tracing::warn!("Failed to load cache for {}: {}", path.display(), e);
                None
            }
        }
    }

    /// [`load`](Self::load) on the blocking pool.
    pub async fn fetch(&self, path: &Path) -> Option<Profile> {
        let (cache, path) = (self.clone(), path.to_path_buf());
        tokio::task::spawn_blocking(move || cache.load(&path))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Cache lookup task failed: {}", e);
                None
            })
    }

    /// [`save`](Self::save) on the blocking pool.
    pub async fn store(&self, profile: &Profile, path: &Path) -> bool {
        let (cache, profile, path) = (self.clone(), profile.clone(), path.to_path_buf());
        tokio::task::spawn_blocking(move || cache.save(&profile, &path))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Cache write task failed: {}", e);
                false
            })
    }

    /// Delete every cache file; drop the directory once it is empty.
    ///
    /// A missing directory counts as clean.
    pub fn cleanup(&self) -> bool {
        if !self.dir.exists() {
            return true;
        }
        match self.remove_entries() {
            Ok(removed) => {
                tracing::info!("Removed {} cache file(s) from {}", removed, self.dir.display());
                true
            }
            Err(e) => {
                tracing::warn!("Failed to clean up cache: {}", e);
                false
            }
        }
    }

    fn remove_entries(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }

        if fs::read_dir(&self.dir)?.next().is_none() {
            fs::remove_dir(&self.dir)?;
            tracing::info!("Removed cache directory: {}", self.dir.display());
        } else {
            tracing::info!("Cache directory cleaned but not removed (contains other files)");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_relative_key() {
        let key = cache_key(
            Path::new("/work/project/relative/path/to/file.sql"),
            Path::new("/work/project"),
        );
        assert_eq!(key, CacheKey::Relative("relative_path_to_file.sql".to_string()));
        assert_eq!(key.file_name(), "relative_path_to_file.sql.json");
    }

    #[test]
    fn test_external_key() {
        let path = Path::new("/external/path/script.sql");
        let key = cache_key(path, Path::new("/work/project"));

        let digest = format!("{:x}", md5::compute("/external/path/script.sql"));
        assert_eq!(key, CacheKey::External(format!("script_{}", &digest[..10])));
        assert!(key.file_name().starts_with("script_"));
        assert_eq!(key.file_name().len(), "script_".len() + 10 + ".json".len());
    }

    #[test]
    fn test_key_is_filesystem_safe() {
        let key = cache_key(
            Path::new("/work/my queries/daily report (v2).sql"),
            Path::new("/work"),
        );
        assert_eq!(key.name(), "my_queries_daily_report__v2_.sql");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"));
        let source = dir.path().join("query.sql");
        let profile = Profile::new(
            [("table1", vec!["col1"]), ("table3", vec!["*"])],
            [("table2", vec!["col2"])],
        );

        assert!(cache.save(&profile, &source));
        assert!(cache.path_for(&source).exists());
        assert_eq!(cache.load(&source), Some(profile));
    }

    #[tokio::test]
    async fn test_fetch_store_off_runtime_threads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"));
        let source = dir.path().join("query.sql");
        let profile = Profile::new([("users", vec!["id"])], [("report", vec!["*"])]);

        assert_eq!(cache.fetch(&source).await, None);
        assert!(cache.store(&profile, &source).await);
        assert_eq!(cache.fetch(&source).await, Some(profile.clone()));
        assert_eq!(cache.load(&source), Some(profile));
    }

    #[test]
    fn test_load_missing_or_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let source = dir.path().join("query.sql");

        assert_eq!(cache.load(&source), None);

        fs::write(cache.path_for(&source), "not json").unwrap();
        assert_eq!(cache.load(&source), None);
    }

    #[test]
    fn test_cleanup_removes_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"));
        let profile = Profile::new([("t", vec!["c"])], []);
        assert!(cache.save(&profile, &dir.path().join("a.sql")));
        assert!(cache.save(&profile, &dir.path().join("b.sql")));

        assert!(cache.cleanup());
        assert!(!cache.dir().exists());
    }

    #[test]
    fn test_cleanup_keeps_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"));
        assert!(cache.save(&Profile::default(), &dir.path().join("a.sql")));
        fs::write(cache.dir().join("notes.txt"), "keep me").unwrap();

        assert!(cache.cleanup());
        assert!(cache.dir().join("notes.txt").exists());
        assert_eq!(fs::read_dir(cache.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Cache::new(dir.path().join("never-created")).cleanup());
    }

    #[test]
    fn test_save_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let cache = Cache::new(&blocker);
        assert!(!cache.save(&Profile::default(), &dir.path().join("a.sql")));
    }
}
