//! Artifact upload

use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::errors::DeployError;
use crate::infra::api::{CloudApi, ObjectUpload};
use crate::models::PipelineStep;
use crate::pipeline::logger::DeployLogger;

/// Files uploaded concurrently within one deployment
const UPLOAD_PARALLELISM: usize = 10;

/// Progress is logged every this many files
const PROGRESS_EVERY: usize = 10;

/// HTML must revalidate so a redeploy shows up immediately
const HTML_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// Hashed or rarely-changing assets can sit in caches for an hour
const ASSET_CACHE_CONTROL: &str = "public, max-age=3600";

/// Walks an artifact tree and pushes every file into the deployment's
/// bucket with sensible content types and cache headers.
pub struct ArtifactUploader {
    api: Arc<dyn CloudApi>,
}

/// What one upload pass did
#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: usize,
    pub total_bytes: u64,
}

impl ArtifactUploader {
    pub fn new(api: Arc<dyn CloudApi>) -> Self {
        Self { api }
    }

    /// Upload every file under `artifact_root` into `bucket`. In
    /// path-shared mode keys carry the `{prefix}/` so the shared bucket
    /// namespace stays partitioned per site. All files failing is fatal;
    /// partial failures are warned about and tolerated.
    pub async fn upload_tree(
        &self,
        artifact_root: &Path,
        bucket: &str,
        key_prefix: Option<&str>,
        logger: &DeployLogger,
    ) -> Result<UploadSummary, DeployError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(artifact_root) {
            let entry = entry.map_err(|e| DeployError::UploadError(e.to_string()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        if files.is_empty() {
            return Err(DeployError::UploadError(
                "artifact tree contains no files".to_string(),
            ));
        }
        files.sort();

        let total = files.len();
        logger
            .info(
                Some(PipelineStep::Upload),
                format!("Uploading {} files to bucket {}", total, bucket),
            )
            .await;

        let results = stream::iter(files.into_iter().map(|path| {
            let api = self.api.clone();
            let bucket = bucket.to_string();
            let prefix = key_prefix.map(|p| p.trim_matches('/').to_string());
            let root = artifact_root.to_path_buf();
            async move {
                let rel = path
                    .strip_prefix(&root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                let key = match &prefix {
                    Some(prefix) => format!("{}/{}", prefix, rel),
                    None => rel.clone(),
                };
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) => return (key, 0u64, Err(DeployError::from(e))),
                };
                let size = bytes.len() as u64;
                let digest = Sha256::digest(&bytes);
                tracing::trace!("Uploading {} ({} bytes, sha256 {:x})", key, size, digest);
                let object = ObjectUpload {
                    key: key.clone(),
                    content_type: content_type_for(&rel).to_string(),
                    cache_control: cache_control_for(&rel).to_string(),
                    bytes,
                };
                let result = api.upload_object(&bucket, &object).await;
                (key, size, result)
            }
        }))
        .buffer_unordered(UPLOAD_PARALLELISM)
        .collect::<Vec<_>>()
        .await;

        let mut summary = UploadSummary {
            uploaded: 0,
            failed: 0,
            total_bytes: 0,
        };
        let mut done = 0usize;
        for (key, size, result) in results {
            done += 1;
            match result {
                Ok(()) => {
                    summary.uploaded += 1;
                    summary.total_bytes += size;
                }
                Err(e) => {
                    summary.failed += 1;
                    logger
                        .warn(
                            Some(PipelineStep::Upload),
                            format!("Failed to upload {}: {}", key, e),
                        )
                        .await;
                }
            }
            if done % PROGRESS_EVERY == 0 && done < total {
                logger
                    .info(
                        Some(PipelineStep::Upload),
                        format!("Uploaded {}/{} files", done, total),
                    )
                    .await;
            }
        }

        if summary.uploaded == 0 {
            return Err(DeployError::UploadError(format!(
                "all {} uploads failed",
                summary.failed
            )));
        }

        logger
            .info(
                Some(PipelineStep::Upload),
                format!(
                    "Uploaded {} files ({} bytes), {} failed",
                    summary.uploaded, summary.total_bytes, summary.failed
                ),
            )
            .await;
        Ok(summary)
    }

    /// Flush cached copies behind the routing table; never fatal
    pub async fn invalidate_cache(
        &self,
        routing_table: &str,
        key_prefix: Option<&str>,
        logger: &DeployLogger,
    ) {
        let pattern = match key_prefix {
            Some(prefix) => format!("/{}/*", prefix.trim_matches('/')),
            None => "/*".to_string(),
        };
        match self.api.invalidate_cache(routing_table, &pattern).await {
            Ok(()) => {
                logger
                    .info(
                        Some(PipelineStep::Upload),
                        format!("Invalidated CDN cache for {}", pattern),
                    )
                    .await;
            }
            Err(e) => {
                logger
                    .warn(
                        Some(PipelineStep::Upload),
                        format!("CDN cache invalidation failed: {}", e),
                    )
                    .await;
            }
        }
    }
}

fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wasm" => "application/wasm",
        "map" => "application/json",
        _ => "application/octet-stream",
    }
}

fn cache_control_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    if ext == "html" || ext == "htm" {
        HTML_CACHE_CONTROL
    } else {
        ASSET_CACHE_CONTROL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_revalidates_and_assets_cache() {
        assert_eq!(cache_control_for("index.html"), HTML_CACHE_CONTROL);
        assert_eq!(cache_control_for("sub/page.htm"), HTML_CACHE_CONTROL);
        assert_eq!(cache_control_for("assets/app.12ab.js"), ASSET_CACHE_CONTROL);
        assert_eq!(cache_control_for("logo.svg"), ASSET_CACHE_CONTROL);
    }

    #[test]
    fn content_types_cover_the_common_web_set() {
        assert_eq!(content_type_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("style.css"), "text/css; charset=utf-8");
        assert_eq!(
            content_type_for("app.js"),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(content_type_for("photo.webp"), "image/webp");
        assert_eq!(content_type_for("mystery.bin"), "application/octet-stream");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }
}
