use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use tokio::process::Command;
use url::Url;

use crate::error::InstallError;

/// Materializes an addon repository into a staging directory.
pub trait PayloadFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        repo: &'a Url,
        git_ref: &'a str,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), InstallError>> + Send + 'a>>;
}

/// Copies `file://` trees and clones everything else with `git`.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    timeout: Duration,
}

impl GitFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Short or full commit hashes cannot be used with `clone --branch`.
pub fn is_commitish(git_ref: &str) -> bool {
    matches!(git_ref.len(), 7 | 8 | 40) && git_ref.chars().all(|c| c.is_ascii_hexdigit())
}

impl PayloadFetcher for GitFetcher {
    fn fetch<'a>(
        &'a self,
        repo: &'a Url,
        git_ref: &'a str,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<(), InstallError>> + Send + 'a>> {
        Box::pin(async move {
            if repo.scheme() == "file" {
                let src = repo
                    .to_file_path()
                    .map_err(|_| InstallError::Fetch(format!("invalid file url {repo}")))?;
                if !src.is_dir() {
                    return Err(InstallError::Fetch(format!(
                        "{} is not a directory",
                        src.display()
                    )));
                }
                let dest = dest.to_path_buf();
                return tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dest))
                    .await
                    .map_err(|e| InstallError::Fetch(e.to_string()))?
                    .map_err(InstallError::from);
            }

            let url = repo.as_str();
            if !is_commitish(git_ref) {
                let shallow = self
                    .git(&[
                        "clone",
                        "--depth",
                        "1",
                        "--branch",
                        git_ref,
                        "--single-branch",
                        url,
                    ], dest)
                    .await;
                match shallow {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::debug!(repo = %url, git_ref, "Shallow clone failed, retrying full clone: {e}");
                        if dest.exists() {
                            tokio::fs::remove_dir_all(dest).await?;
                        }
                    }
                }
            }

            self.git(&["clone", url], dest).await?;
            let status = tokio::time::timeout(
                self.timeout,
                Command::new("git")
                    .arg("-C")
                    .arg(dest)
                    .args(["checkout", git_ref])
                    .kill_on_drop(true)
                    .output(),
            )
            .await
            .map_err(|_| InstallError::Fetch(format!("git checkout {git_ref} timed out")))??;
            if !status.status.success() {
                return Err(InstallError::Fetch(format!(
                    "git checkout {git_ref} failed: {}",
                    String::from_utf8_lossy(&status.stderr).trim()
                )));
            }
            Ok(())
        })
    }
}

impl GitFetcher {
    async fn git(&self, args: &[&str], dest: &Path) -> Result<(), InstallError> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("git")
                .args(args)
                .arg(dest)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| InstallError::Fetch(format!("git {} timed out", args[0])))??;

        if !output.status.success() {
            return Err(InstallError::Fetch(format!(
                "git {} failed: {}",
                args[0],
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Recursive copy. Symlinks are skipped so a payload cannot pull in files
/// from outside its own tree; `.git` is skipped as well.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_symlink() {
            tracing::debug!(path = %src_path.display(), "Skipping symlink in payload");
            continue;
        }
        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}
