use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::core::archive::{extract_zip, EscapePolicy, ZIP_DOWNLOAD_SHARE};
use crate::core::catalog::{safe_relative_path, BinaryType, FileType, ModVersion};
use crate::core::downloader::FileSource;
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::progress::{CancelFlag, ProgressSpan};

/// One cached file and its SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedFile {
    pub path: String,
    pub sha256: String,
}

/// Sidecar written once a version is fully cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheRecord {
    pub mod_id: String,
    pub version_id: String,
    pub binary_type: BinaryType,
    pub files: Vec<CachedFile>,
}

/// Folder name for a version id: lowercase hex SHA-1 of the id.
pub fn hashed_version_id(version_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(version_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Local store of downloaded artifacts at `<root>/<mod_id>/<sha1(version_id)>/`.
pub struct ArtifactCache {
    root: PathBuf,
    source: Arc<dyn FileSource>,
}

impl ArtifactCache {
    pub fn new(root: PathBuf, source: Arc<dyn FileSource>) -> Self {
        Self { root, source }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<mod_id>`. The id must be a single plain path component.
    fn mod_dir(&self, mod_id: &str) -> ManagerResult<PathBuf> {
        let name = safe_relative_path(mod_id)?;
        if name != mod_id || name.contains('/') {
            return Err(ManagerError::PathEscape(mod_id.to_string()));
        }
        Ok(self.root.join(name))
    }

    pub fn version_dir(&self, version: &ModVersion) -> ManagerResult<PathBuf> {
        Ok(self
            .mod_dir(&version.mod_id)?
            .join(hashed_version_id(&version.id)))
    }

    fn record_path(&self, version: &ModVersion) -> ManagerResult<PathBuf> {
        Ok(self
            .mod_dir(&version.mod_id)?
            .join(format!("{}.json", hashed_version_id(&version.id))))
    }

    pub async fn read_record(&self, version: &ModVersion) -> Option<CacheRecord> {
        let path = self.record_path(version).ok()?;
        let raw = tokio::fs::read_to_string(path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring corrupt cache record for {}: {}", version.key(), e);
                None
            }
        }
    }

    /// The record of `version` when it was cached for `binary_type` and every
    /// listed file is still present.
    pub async fn cached_record(
        &self,
        version: &ModVersion,
        binary_type: BinaryType,
    ) -> Option<CacheRecord> {
        let record = self.read_record(version).await?;
        if record.binary_type != binary_type {
            debug!(
                "Cache for {} holds {} files, {} requested",
                version.key(),
                record.binary_type,
                binary_type
            );
            return None;
        }

        let dir = self.version_dir(version).ok()?;
        for file in &record.files {
            if !tokio::fs::try_exists(dir.join(&file.path))
                .await
                .unwrap_or(false)
            {
                return None;
            }
        }
        Some(record)
    }

    pub async fn is_cached(&self, version: &ModVersion, binary_type: BinaryType) -> bool {
        self.cached_record(version, binary_type).await.is_some()
    }

    /// Make sure every file of `version` for `binary_type` is in the cache.
    ///
    /// Idempotent: an already cached version returns its record without I/O
    /// against the file source. Anything else in the version directory is
    /// discarded before downloading.
    pub async fn download(
        &self,
        version: &ModVersion,
        binary_type: BinaryType,
        span: ProgressSpan<'_>,
        cancel: &CancelFlag,
    ) -> ManagerResult<CacheRecord> {
        let dir = self.version_dir(version)?;
        let record_path = self.record_path(version)?;

        if let Some(record) = self.cached_record(version, binary_type).await {
            debug!("Cache hit for {}", version.key());
            span.set(1.0);
            return Ok(record);
        }

        remove_if_exists(&record_path).await?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("Cleared stale cache for {}", version.key()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ManagerError::io(&dir, e)),
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ManagerError::io(&dir, e))?;

        let total = version.compatible_files_count(binary_type).max(1) as f64;
        let mut paths = Vec::new();

        for (i, file) in version.downloads(binary_type).enumerate() {
            cancel.check()?;
            let file_span = span.sub(i as f64 / total, 1.0 / total);
            let download = self.source.open(&file.url).await?;

            match file.file_type {
                FileType::Normal => {
                    let relative = safe_relative_path(file.path.as_deref().unwrap_or_default())?;
                    download
                        .write_to(&dir.join(&relative), file_span, cancel)
                        .await?;
                    paths.push(relative);
                }
                FileType::Zip => {
                    let bytes = download
                        .into_bytes(file_span.sub(0.0, ZIP_DOWNLOAD_SHARE), cancel)
                        .await?;
                    extract_zip(
                        &bytes,
                        &dir,
                        EscapePolicy::Skip,
                        file_span.sub(ZIP_DOWNLOAD_SHARE, 1.0 - ZIP_DOWNLOAD_SHARE),
                        cancel,
                        &mut paths,
                    )?;
                }
            }
        }

        // A later file may overwrite an earlier one at the same path.
        let mut seen = HashSet::new();
        paths.retain(|p| seen.insert(p.clone()));

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let sha256 = sha256_file(&dir.join(&path)).await?;
            files.push(CachedFile { path, sha256 });
        }

        let record = CacheRecord {
            mod_id: version.mod_id.clone(),
            version_id: version.id.clone(),
            binary_type,
            files,
        };
        tokio::fs::write(&record_path, serde_json::to_string_pretty(&record)?)
            .await
            .map_err(|e| ManagerError::io(&record_path, e))?;

        span.set(1.0);
        info!(
            "Cached {} for {} ({} files) at {:?}",
            version.key(),
            binary_type,
            record.files.len(),
            dir
        );
        Ok(record)
    }

    /// Paths whose current hash no longer matches the record.
    ///
    /// A version without a record has nothing to verify.
    pub async fn verify(&self, version: &ModVersion) -> ManagerResult<Vec<String>> {
        let Some(record) = self.read_record(version).await else {
            return Ok(Vec::new());
        };

        let dir = self.version_dir(version)?;
        let mut mismatched = Vec::new();
        for file in record.files {
            let path = dir.join(&file.path);
            let matches = match sha256_file(&path).await {
                Ok(actual) => actual == file.sha256,
                Err(_) => false,
            };
            if !matches {
                mismatched.push(file.path);
            }
        }
        Ok(mismatched)
    }

    /// Remove every cached version of a mod.
    pub async fn prune(&self, mod_id: &str) -> ManagerResult<()> {
        let dir = self.mod_dir(mod_id)?;
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(());
        }

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| ManagerError::io(&dir, e))?;
        info!("Pruned cache for {}", mod_id);
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> ManagerResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ManagerError::io(path, e)),
    }
}

async fn sha256_file(path: &Path) -> ManagerResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ManagerError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::core::archive::testing::zip_bytes;
    use crate::core::catalog::ModFile;
    use crate::core::downloader::testing::MemoryFileSource;

    fn version(files: Vec<ModFile>) -> ModVersion {
        ModVersion {
            id: "1.0.0".into(),
            mod_id: "m1".into(),
            created_at: Utc::now(),
            dependencies: vec![],
            mods: vec![],
            files,
            target_version: BTreeMap::new(),
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<MemoryFileSource>, ArtifactCache) {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MemoryFileSource::sentinel());
        let cache = ArtifactCache::new(dir.path().join("mods"), source.clone());
        (dir, source, cache)
    }

    #[test]
    fn hashed_id_is_sha1_hex() {
        assert_eq!(
            hashed_version_id("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[tokio::test]
    async fn second_download_is_served_from_cache() {
        let (_dir, source, cache) = setup();
        source.serve("mem://mod.dll", b"dll".to_vec());
        let v = version(vec![ModFile {
            compatible: vec![BinaryType::X64],
            file_type: FileType::Normal,
            path: Some("plugins/Mod.dll".into()),
            url: "mem://mod.dll".into(),
        }]);

        let first = cache
            .download(&v, BinaryType::X64, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();
        let second = cache
            .download(&v, BinaryType::X64, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(source.hits("mem://mod.dll"), 1);
        assert!(cache.version_dir(&v).unwrap().join("plugins/Mod.dll").exists());
        assert!(cache
            .version_dir(&v)
            .unwrap()
            .ends_with(format!("m1/{}", hashed_version_id("1.0.0"))));
    }

    #[tokio::test]
    async fn zip_entries_are_recorded_and_verified() {
        let (_dir, source, cache) = setup();
        source.serve("mem://pack.zip", zip_bytes(&[("core/a.dll", "A"), ("b.cfg", "B")]));
        let v = version(vec![ModFile {
            compatible: vec![BinaryType::X64],
            file_type: FileType::Zip,
            path: None,
            url: "mem://pack.zip".into(),
        }]);

        let record = cache
            .download(&v, BinaryType::X64, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();
        let paths: Vec<_> = record.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["core/a.dll", "b.cfg"]);
        assert!(cache.verify(&v).await.unwrap().is_empty());

        std::fs::write(cache.version_dir(&v).unwrap().join("b.cfg"), "tampered").unwrap();
        assert_eq!(cache.verify(&v).await.unwrap(), vec!["b.cfg".to_string()]);
    }

    #[tokio::test]
    async fn each_binary_type_gets_its_own_files() {
        let (_dir, source, cache) = setup();
        source.serve("mem://mod64", "x64 build");
        source.serve("mem://mod32", "x86 build");
        let v = version(vec![
            ModFile {
                compatible: vec![BinaryType::X64],
                file_type: FileType::Normal,
                path: Some("Mod64.dll".into()),
                url: "mem://mod64".into(),
            },
            ModFile {
                compatible: vec![BinaryType::X86],
                file_type: FileType::Normal,
                path: Some("Mod32.dll".into()),
                url: "mem://mod32".into(),
            },
        ]);

        cache
            .download(&v, BinaryType::X64, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();
        assert!(!cache.is_cached(&v, BinaryType::X86).await);

        let record = cache
            .download(&v, BinaryType::X86, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(record.binary_type, BinaryType::X86);
        let paths: Vec<_> = record.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Mod32.dll"]);
        assert_eq!(source.hits("mem://mod32"), 1);

        let dir = cache.version_dir(&v).unwrap();
        assert!(dir.join("Mod32.dll").exists());
        assert!(!dir.join("Mod64.dll").exists());
        assert!(cache.is_cached(&v, BinaryType::X86).await);
        assert!(!cache.is_cached(&v, BinaryType::X64).await);
    }

    #[tokio::test]
    async fn escaping_zip_entries_are_skipped() {
        let (dir, source, cache) = setup();
        source.serve(
            "mem://pack.zip",
            zip_bytes(&[("good/a.txt", "ok"), ("../evil.txt", "bad")]),
        );
        let v = version(vec![ModFile {
            compatible: vec![BinaryType::X64],
            file_type: FileType::Zip,
            path: None,
            url: "mem://pack.zip".into(),
        }]);

        let record = cache
            .download(&v, BinaryType::X64, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();

        let paths: Vec<_> = record.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["good/a.txt"]);
        assert!(cache.version_dir(&v).unwrap().join("good/a.txt").exists());
        assert!(!cache.root().join("m1/evil.txt").exists());
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn mod_id_must_stay_inside_the_cache() {
        let (dir, source, cache) = setup();
        source.serve("mem://mod.dll", b"dll".to_vec());
        let mut v = version(vec![ModFile {
            compatible: vec![BinaryType::X64],
            file_type: FileType::Normal,
            path: Some("Mod.dll".into()),
            url: "mem://mod.dll".into(),
        }]);

        for bad in ["../../x", "a/b", ".", ""] {
            v.mod_id = bad.into();
            let err = cache
                .download(&v, BinaryType::X64, ProgressSpan::new(None), &CancelFlag::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ManagerError::PathEscape(_)), "{}", bad);
        }
        assert_eq!(source.hits("mem://mod.dll"), 0);
        assert!(!dir.path().join("x").exists());
        assert!(cache.prune("../x").await.is_err());
    }

    #[tokio::test]
    async fn missing_file_invalidates_and_prune_removes_all() {
        let (_dir, source, cache) = setup();
        source.serve("mem://mod.dll", b"dll".to_vec());
        let v = version(vec![ModFile {
            compatible: vec![BinaryType::X64],
            file_type: FileType::Normal,
            path: Some("Mod.dll".into()),
            url: "mem://mod.dll".into(),
        }]);
        cache
            .download(&v, BinaryType::X64, ProgressSpan::new(None), &CancelFlag::new())
            .await
            .unwrap();
        assert!(cache.is_cached(&v, BinaryType::X64).await);

        std::fs::remove_file(cache.version_dir(&v).unwrap().join("Mod.dll")).unwrap();
        assert!(!cache.is_cached(&v, BinaryType::X64).await);

        cache.prune("m1").await.unwrap();
        assert!(!cache.root().join("m1").exists());
        assert!(cache.verify(&v).await.unwrap().is_empty());
    }
}
