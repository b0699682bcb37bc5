//! Project build and verification

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::DeployError;
use crate::models::VerifyOutcome;
use crate::storage::settings::BuildSettings;

/// Output directories checked after a build, in preference order
const ARTIFACT_DIRS: &[&str] = &["dist", "build", "out", "public"];

/// Builds a project into a static artifact tree and verifies the artifact
/// serves. Tests substitute a stub.
#[async_trait]
pub trait BuildAdapter: Send + Sync {
    /// Build the project; returns the artifact directory to upload
    async fn build(
        &self,
        source_root: &Path,
        base_path: Option<&str>,
    ) -> Result<PathBuf, DeployError>;

    /// Probe the artifact through a local preview server
    async fn verify(
        &self,
        artifact_root: &Path,
        base_path: Option<&str>,
    ) -> Result<VerifyOutcome, DeployError>;
}

/// npm-based build adapter: `npm ci` (or `npm install` without a lockfile)
/// followed by `npm run build`, both under the configured timeout.
pub struct NpmBuildAdapter {
    settings: BuildSettings,
    http: reqwest::Client,
}

impl NpmBuildAdapter {
    pub fn new(settings: BuildSettings) -> Result<Self, DeployError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { settings, http })
    }

    async fn run_command(
        &self,
        source_root: &Path,
        program: &str,
        args: &[&str],
        base_path: Option<&str>,
    ) -> Result<(), DeployError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(source_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("CI", "true");
        if let Some(base) = base_path {
            // Vite and most bundlers read a base prefix from the environment
            // when the config wires it through; harmless otherwise.
            command.env("BASE_PATH", base).env("VITE_BASE_PATH", base);
        }

        let deadline = Duration::from_secs(self.settings.build_timeout_secs);
        let output = tokio::time::timeout(deadline, command.output())
            .await
            .map_err(|_| {
                DeployError::TimeoutError(format!(
                    "{} {} exceeded the {}s build timeout",
                    program,
                    args.join(" "),
                    self.settings.build_timeout_secs
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(20)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(DeployError::BuildError(format!(
                "{} {} failed ({}): {}",
                program,
                args.join(" "),
                output.status,
                tail
            )));
        }
        Ok(())
    }

    fn find_artifact_dir(&self, source_root: &Path) -> Result<PathBuf, DeployError> {
        for candidate in ARTIFACT_DIRS {
            let dir = source_root.join(candidate);
            if dir.join("index.html").is_file() {
                return Ok(dir);
            }
        }
        for candidate in ARTIFACT_DIRS {
            let dir = source_root.join(candidate);
            if dir.is_dir() {
                return Ok(dir);
            }
        }
        Err(DeployError::BuildError(
            "build produced no recognizable output directory".to_string(),
        ))
    }
}

#[async_trait]
impl BuildAdapter for NpmBuildAdapter {
    async fn build(
        &self,
        source_root: &Path,
        base_path: Option<&str>,
    ) -> Result<PathBuf, DeployError> {
        let install_args: &[&str] = if source_root.join("package-lock.json").is_file() {
            &["ci"]
        } else {
            &["install"]
        };
        self.run_command(source_root, "npm", install_args, base_path)
            .await?;
        self.run_command(source_root, "npm", &["run", "build"], base_path)
            .await?;
        self.find_artifact_dir(source_root)
    }

    async fn verify(
        &self,
        artifact_root: &Path,
        base_path: Option<&str>,
    ) -> Result<VerifyOutcome, DeployError> {
        if !artifact_root.join("index.html").is_file() {
            return Ok(VerifyOutcome {
                reachable: false,
                status_code: None,
            });
        }

        // Ephemeral port for the preview server.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let mut child = Command::new("npx")
            .args(["--yes", "serve", "--no-clipboard", "-l", &port.to_string(), "."])
            .current_dir(artifact_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let url = match base_path {
            Some(base) => format!(
                "http://127.0.0.1:{}/{}/",
                port,
                base.trim_matches('/')
            ),
            None => format!("http://127.0.0.1:{}/", port),
        };

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.settings.preview_timeout_secs);
        let mut outcome = VerifyOutcome {
            reachable: false,
            status_code: None,
        };

        while tokio::time::Instant::now() < deadline {
            match self.http.get(&url).send().await {
                Ok(response) => {
                    outcome.status_code = Some(response.status().as_u16());
                    outcome.reachable = response.status().is_success();
                    break;
                }
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }

        let _ = child.kill().await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_dir_prefers_one_with_index_html() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::create_dir_all(dir.path().join("build")).unwrap();
        std::fs::write(dir.path().join("build/index.html"), "<h1>hi</h1>").unwrap();

        let adapter = NpmBuildAdapter::new(BuildSettings::default()).unwrap();
        let found = adapter.find_artifact_dir(dir.path()).unwrap();
        assert!(found.ends_with("build"));
    }

    #[test]
    fn missing_artifact_dir_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = NpmBuildAdapter::new(BuildSettings::default()).unwrap();
        assert!(matches!(
            adapter.find_artifact_dir(dir.path()),
            Err(DeployError::BuildError(_))
        ));
    }
}
