use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::Path;

use tracing::{debug, warn};

use crate::core::catalog::safe_relative_path;
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::progress::{CancelFlag, ProgressSpan};

/// Share of a zip's progress window spent downloading; the rest is extraction.
pub const ZIP_DOWNLOAD_SHARE: f64 = 0.8;

/// What to do with an entry whose path leaves the extraction root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapePolicy {
    /// Fail the whole archive before writing anything.
    Reject,
    /// Log the entry and extract the rest.
    Skip,
}

/// Extract every file entry of an in-memory zip under `root`.
///
/// All entry names are validated before anything is written. Under
/// [`EscapePolicy::Reject`] an archive carrying a single escaping entry
/// extracts nothing. Each root-relative path (`/`-separated) is appended to
/// `extracted` before its file is created, so an interrupted extraction still
/// accounts for everything it touched.
pub fn extract_zip(
    bytes: &[u8],
    root: &Path,
    policy: EscapePolicy,
    span: ProgressSpan<'_>,
    cancel: &CancelFlag,
    extracted: &mut Vec<String>,
) -> ManagerResult<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        match safe_relative_path(entry.name()) {
            Ok(relative) => entries.push((i, relative)),
            Err(e) if policy == EscapePolicy::Skip => {
                warn!("Skipping zip entry {}: {}", entry.name(), e);
            }
            Err(e) => return Err(e),
        }
    }

    let total = entries.len().max(1) as f64;

    for (done, (index, relative)) in entries.into_iter().enumerate() {
        cancel.check()?;

        let mut entry = archive.by_index(index)?;
        let output_path = root.join(&relative);
        extracted.push(relative.clone());

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ManagerError::io(parent, e))?;
        }

        let mut outfile =
            File::create(&output_path).map_err(|e| ManagerError::io(&output_path, e))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| ManagerError::io(&output_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&output_path, fs::Permissions::from_mode(mode));
            }
        }

        debug!("Extracted {}", relative);
        span.set((done + 1) as f64 / total);
    }

    span.set(1.0);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::zip_bytes;
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = zip_bytes(&[("BepInEx/plugins/a.dll", "A"), ("readme.txt", "R")]);

        let mut paths = Vec::new();
        extract_zip(
            &bytes,
            dir.path(),
            EscapePolicy::Reject,
            ProgressSpan::new(None),
            &CancelFlag::new(),
            &mut paths,
        )
        .unwrap();

        assert_eq!(paths, vec!["BepInEx/plugins/a.dll", "readme.txt"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("BepInEx/plugins/a.dll")).unwrap(),
            "A"
        );
    }

    #[test]
    fn escaping_entry_extracts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let bytes = zip_bytes(&[("good/a.txt", "ok"), ("../evil.txt", "bad")]);

        let mut paths = Vec::new();
        let err = extract_zip(
            &bytes,
            &root,
            EscapePolicy::Reject,
            ProgressSpan::new(None),
            &CancelFlag::new(),
            &mut paths,
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(paths.is_empty());
        assert!(!root.join("good/a.txt").exists());
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn skip_policy_extracts_the_safe_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let bytes = zip_bytes(&[("good/a.txt", "ok"), ("../evil.txt", "bad")]);

        let mut paths = Vec::new();
        extract_zip(
            &bytes,
            &root,
            EscapePolicy::Skip,
            ProgressSpan::new(None),
            &CancelFlag::new(),
            &mut paths,
        )
        .unwrap();

        assert_eq!(paths, vec!["good/a.txt"]);
        assert_eq!(fs::read_to_string(root.join("good/a.txt")).unwrap(), "ok");
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn absolute_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = zip_bytes(&[("/abs/x", "bad")]);
        let err = extract_zip(
            &bytes,
            dir.path(),
            EscapePolicy::Reject,
            ProgressSpan::new(None),
            &CancelFlag::new(),
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ManagerError::PathEscape(_)));
    }
}
