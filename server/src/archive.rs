//! Uploaded archive extraction

use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tokio::fs;

use crate::errors::DeployError;

/// What kind of project the extracted tree looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// package.json with a build script, needs the build step
    NodeBuild,
    /// Plain HTML tree, uploadable as-is
    Static,
}

/// Result of extracting an uploaded archive
#[derive(Debug)]
pub struct ExtractedProject {
    /// Root of the project tree inside the scratch directory
    pub source_root: PathBuf,

    /// Detected project kind
    pub kind: ProjectKind,
}

/// Extract a gzipped tar archive into `dest`, rejecting entries that would
/// escape it, then locate the project root and detect the project kind.
///
/// Archives produced by zipping a folder usually contain a single top-level
/// directory; that wrapper is unwrapped so the project root holds the real
/// files.
pub async fn extract_archive(
    archive_path: &Path,
    dest: &Path,
    max_bytes: u64,
) -> Result<ExtractedProject, DeployError> {
    let archive_path = archive_path.to_path_buf();
    let dest_owned = dest.to_path_buf();

    // tar + flate2 are synchronous readers; keep them off the runtime threads.
    tokio::task::spawn_blocking(move || unpack_tar_gz(&archive_path, &dest_owned, max_bytes))
        .await
        .map_err(|e| DeployError::ArchiveError(format!("extraction task failed: {}", e)))??;

    let source_root = unwrap_single_folder(dest).await?;
    let kind = detect_project_kind(&source_root).await?;
    Ok(ExtractedProject { source_root, kind })
}

fn unpack_tar_gz(archive_path: &Path, dest: &Path, max_bytes: u64) -> Result<(), DeployError> {
    std::fs::create_dir_all(dest)?;

    let file = std::fs::File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut total_size: u64 = 0;
    let mut entry_count: usize = 0;

    for entry in archive
        .entries()
        .map_err(|e| DeployError::ArchiveError(format!("unreadable archive: {}", e)))?
    {
        let mut entry =
            entry.map_err(|e| DeployError::ArchiveError(format!("corrupt entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| DeployError::ArchiveError(format!("bad entry path: {}", e)))?
            .into_owned();

        let path_str = path.to_string_lossy();
        if path_str.contains("..") || path_str.starts_with('/') {
            return Err(DeployError::ArchiveError(format!(
                "archive entry escapes extraction root: {}",
                path_str
            )));
        }

        total_size += entry.size();
        if total_size > max_bytes {
            return Err(DeployError::ArchiveError(format!(
                "archive expands past the {} byte limit",
                max_bytes
            )));
        }

        entry_count += 1;
        entry
            .unpack_in(dest)
            .map_err(|e| DeployError::ArchiveError(format!("failed to unpack {}: {}", path_str, e)))?;
    }

    if entry_count == 0 {
        return Err(DeployError::ArchiveError("archive is empty".to_string()));
    }

    Ok(())
}

/// If the extraction root contains exactly one directory and no files,
/// descend into it (repeatedly, for nested wrappers).
async fn unwrap_single_folder(dest: &Path) -> Result<PathBuf, DeployError> {
    let mut root = dest.to_path_buf();
    loop {
        let mut dirs = Vec::new();
        let mut has_files = false;

        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "__MACOSX" || name == ".DS_Store" {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            } else {
                has_files = true;
            }
        }

        if !has_files && dirs.len() == 1 {
            root = dirs.remove(0);
        } else {
            return Ok(root);
        }
    }
}

/// A package.json with a build script means the project needs building;
/// anything else is served as a static tree.
async fn detect_project_kind(source_root: &Path) -> Result<ProjectKind, DeployError> {
    let package_json = source_root.join("package.json");
    if fs::metadata(&package_json).await.is_ok() {
        let contents = fs::read_to_string(&package_json).await?;
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&contents) {
            if parsed
                .get("scripts")
                .and_then(|s| s.get("build"))
                .is_some()
            {
                return Ok(ProjectKind::NodeBuild);
            }
        }
    }

    if fs::metadata(source_root.join("index.html")).await.is_ok() {
        return Ok(ProjectKind::Static);
    }

    if fs::metadata(&package_json).await.is_ok() {
        // A package.json without a build script still marks a project root.
        return Ok(ProjectKind::Static);
    }

    Err(DeployError::InputError(
        "cannot deploy: the archive contains neither a package.json nor an index.html at the \
         project root"
            .to_string(),
    ))
}

/// Build a gzipped tar archive of a directory, used by tests and tooling
pub fn pack_tar_gz(source: &Path, writer: impl std::io::Write) -> Result<(), DeployError> {
    let encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", source)
        .map_err(|e| DeployError::ArchiveError(format!("failed to pack {}: {}", source.display(), e)))?;
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| DeployError::ArchiveError(format!("failed to finish archive: {}", e)))?;
    Ok(())
}

/// Gzip magic check on uploaded bytes, cheap rejection of mislabeled files
pub fn looks_like_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_archive(files: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        for (name, contents) in files {
            let path = src.join(name);
            fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            fs::write(&path, contents).await.unwrap();
        }
        let archive_path = dir.path().join("site.tar.gz");
        let file = std::fs::File::create(&archive_path).unwrap();
        pack_tar_gz(&src, file).unwrap();
        (dir, archive_path)
    }

    #[tokio::test]
    async fn extracts_static_site() {
        let (_dir, archive) = make_archive(&[("index.html", "<h1>hi</h1>")]).await;
        let dest = tempfile::tempdir().unwrap();
        let project = extract_archive(&archive, dest.path(), 10 * 1024 * 1024)
            .await
            .unwrap();
        assert_eq!(project.kind, ProjectKind::Static);
        assert!(project.source_root.join("index.html").exists());
    }

    #[tokio::test]
    async fn unwraps_single_top_level_folder() {
        let (_dir, archive) =
            make_archive(&[("my-site/index.html", "<h1>hi</h1>"), ("my-site/app.js", ";")])
                .await;
        let dest = tempfile::tempdir().unwrap();
        let project = extract_archive(&archive, dest.path(), 10 * 1024 * 1024)
            .await
            .unwrap();
        assert!(project.source_root.ends_with("my-site"));
        assert!(project.source_root.join("index.html").exists());
    }

    #[tokio::test]
    async fn detects_node_build_project() {
        let (_dir, archive) = make_archive(&[(
            "package.json",
            r#"{"scripts": {"build": "vite build"}}"#,
        )])
        .await;
        let dest = tempfile::tempdir().unwrap();
        let project = extract_archive(&archive, dest.path(), 10 * 1024 * 1024)
            .await
            .unwrap();
        assert_eq!(project.kind, ProjectKind::NodeBuild);
    }

    #[tokio::test]
    async fn rejects_trees_without_a_recognizable_manifest() {
        let (_dir, archive) = make_archive(&[("notes.txt", "just some notes")]).await;
        let dest = tempfile::tempdir().unwrap();
        let err = extract_archive(&archive, dest.path(), 10 * 1024 * 1024)
            .await
            .unwrap_err();
        match err {
            DeployError::InputError(message) => {
                assert!(message.contains("package.json"), "names the manifest: {}", message);
                assert!(message.contains("index.html"), "names the manifest: {}", message);
            }
            other => panic!("expected InputError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejects_archives_past_the_size_limit() {
        let big = "x".repeat(4096);
        let (_dir, archive) = make_archive(&[("index.html", big.as_str())]).await;
        let dest = tempfile::tempdir().unwrap();
        let err = extract_archive(&archive, dest.path(), 100).await.unwrap_err();
        assert!(matches!(err, DeployError::ArchiveError(_)));
    }

    #[test]
    fn gzip_magic_detection() {
        assert!(looks_like_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!looks_like_gzip(b"PK\x03\x04"));
        assert!(!looks_like_gzip(b""));
    }
}
