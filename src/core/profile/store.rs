use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::model::Profile;
use crate::core::error::{ManagerError, ManagerResult};

/// Profiles persisted as one JSON array.
///
/// Reads share the lock; every mutation holds it exclusively while the file
/// is rewritten. The file is only created by the first mutation.
pub struct ProfileStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl ProfileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> ManagerResult<Vec<Profile>> {
        let _read = self.lock.read().await;
        self.read_all().await
    }

    pub async fn get(&self, id: &str) -> ManagerResult<Profile> {
        let _read = self.lock.read().await;
        self.read_all()
            .await?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ManagerError::ProfileNotFound(id.to_string()))
    }

    /// Insert `profile`, or replace the stored profile with the same id.
    pub async fn add_or_replace(&self, mut profile: Profile) -> ManagerResult<Profile> {
        let _write = self.lock.write().await;
        let mut profiles = self.read_all().await?;

        profile.last_updated = Utc::now();
        match profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile.clone(),
            None => profiles.push(profile.clone()),
        }

        self.write_all(&profiles).await?;
        info!("Saved profile '{}' ({})", profile.name, profile.id);
        Ok(profile)
    }

    pub async fn remove(&self, id: &str) -> ManagerResult<()> {
        let _write = self.lock.write().await;
        let mut profiles = self.read_all().await?;

        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Err(ManagerError::ProfileNotFound(id.to_string()));
        }

        self.write_all(&profiles).await?;
        info!("Deleted profile {}", id);
        Ok(())
    }

    async fn read_all(&self) -> ManagerResult<Vec<Profile>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ManagerError::io(&self.path, e)),
        };
        Ok(serde_json::from_str(&json)?)
    }

    async fn write_all(&self, profiles: &[Profile]) -> ManagerResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ManagerError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(profiles)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| ManagerError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ManagerError::io(&self.path, e))?;

        debug!("Wrote {} profiles to {:?}", profiles.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[tokio::test]
    async fn file_is_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("cfg/profiles.json"));

        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.path().exists());

        store.add_or_replace(Profile::new("Main")).await.unwrap();
        assert!(store.path().exists());
        assert!(!dir.path().join("cfg/profiles.json.tmp").exists());
    }

    #[tokio::test]
    async fn replace_matches_by_id_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));

        let first = store.add_or_replace(Profile::new("First")).await.unwrap();
        let second = store.add_or_replace(Profile::new("Second")).await.unwrap();

        let mut renamed = first.clone();
        renamed.name = "Renamed".into();
        let saved = store.add_or_replace(renamed).await.unwrap();
        assert!(saved.last_updated >= first.last_updated);

        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Renamed", "Second"]);
        assert_eq!(store.get(&first.id).await.unwrap().name, "Renamed");
        assert_eq!(store.get(&second.id).await.unwrap().name, "Second");
    }

    #[tokio::test]
    async fn remove_unknown_profile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles.json"));
        let profile = store.add_or_replace(Profile::new("Main")).await.unwrap();

        store.remove(&profile.id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        let err = store.remove(&profile.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            store.get("missing").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
