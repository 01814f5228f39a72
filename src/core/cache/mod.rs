mod artifact_cache;

pub use artifact_cache::{hashed_version_id, ArtifactCache, CacheRecord, CachedFile};
