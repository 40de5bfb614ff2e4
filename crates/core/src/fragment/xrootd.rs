//! XRootD fragment source backed by the `xrdfs` client.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::config::XrootdSourceConfig;
use super::source::{FragmentSource, SourceError};
use super::types::{Fragment, OrderingKeyExtractor};

/// Lists fragments on remote storage with `xrdfs <endpoint> ls <path>` and
/// checks each one with `xrdfs <endpoint> stat <path>`.
pub struct XrootdSource {
    config: XrootdSourceConfig,
    keys: OrderingKeyExtractor,
}

impl XrootdSource {
    pub fn new(config: XrootdSourceConfig, keys: OrderingKeyExtractor) -> Self {
        Self { config, keys }
    }

    /// Host part of the endpoint in the form `xrdfs` expects (`root://host/`).
    fn host(&self) -> String {
        format!("{}/", self.config.endpoint.trim_end_matches('/'))
    }

    /// Parses `xrdfs ls` output, one absolute path per line.
    fn parse_listing(&self, stdout: &str) -> BTreeSet<Fragment> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| self.keys.fragment(line))
            .collect()
    }
}

/// `xrdfs` reports a missing path as error 3011.
fn is_missing_path(stderr: &str) -> bool {
    stderr.contains("[3011]") || stderr.contains("No such file or directory")
}

/// Absolute remote path for a location or fragment id.
fn remote_path(location: &str) -> String {
    if location.starts_with('/') {
        location.to_string()
    } else {
        format!("/{}", location)
    }
}

impl XrootdSource {
    /// Run `xrdfs <host> <op> <path>` under the configured timeout.
    async fn xrdfs(&self, op: &str, path: &str) -> Result<Output, SourceError> {
        let child = Command::new(&self.config.xrdfs_path)
            .arg(self.host())
            .arg(op)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SourceError::ToolNotFound {
                        path: self.config.xrdfs_path.clone(),
                    }
                } else {
                    SourceError::Io(e)
                }
            })?;

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| SourceError::Timeout {
            location: path.to_string(),
            timeout_secs: self.config.timeout_secs,
        })??;

        Ok(output)
    }
}

#[async_trait]
impl FragmentSource for XrootdSource {
    fn name(&self) -> &str {
        "xrootd"
    }

    async fn list(&self, location: &str) -> Result<BTreeSet<Fragment>, SourceError> {
        let path = remote_path(location);
        let output = self.xrdfs("ls", &path).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_path(&stderr) {
                debug!(location = %path, "Remote directory does not exist yet");
                return Ok(BTreeSet::new());
            }
            return Err(SourceError::listing_failed(
                path,
                format!("xrdfs exited with code {:?}: {}", output.status.code(), stderr.trim()),
            ));
        }

        Ok(self.parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn exists(&self, fragment: &Fragment) -> Result<bool, SourceError> {
        let path = remote_path(&fragment.id);
        let output = self.xrdfs("stat", &path).await?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_path(&stderr) {
            return Ok(false);
        }
        Err(SourceError::listing_failed(
            path,
            format!("xrdfs stat exited with code {:?}: {}", output.status.code(), stderr.trim()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source() -> XrootdSource {
        XrootdSource::new(
            XrootdSourceConfig {
                endpoint: "root://eoscms.cern.ch/".to_string(),
                xrdfs_path: PathBuf::from("xrdfs"),
                timeout_secs: 5,
            },
            OrderingKeyExtractor::default(),
        )
    }

    #[test]
    fn test_host_normalization() {
        assert_eq!(source().host(), "root://eoscms.cern.ch/");
    }

    #[test]
    fn test_parse_listing() {
        let stdout = "/eos/cms/store/run_ls0003.root\n\n/eos/cms/store/run_ls0001.root\n";
        let listed = source().parse_listing(stdout);
        let ids: Vec<_> = listed.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["/eos/cms/store/run_ls0001.root", "/eos/cms/store/run_ls0003.root"]
        );
        assert_eq!(listed.iter().next().unwrap().ordering_key, Some(1));
    }

    #[test]
    fn test_missing_path_detection() {
        assert!(is_missing_path(
            "[ERROR] Server responded with an error: [3011] No such file or directory"
        ));
        assert!(!is_missing_path("[FATAL] Auth failed"));
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("/store/t0streamer"), "/store/t0streamer");
        assert_eq!(remote_path("store/t0streamer"), "/store/t0streamer");
    }

    /// Stand-in for `xrdfs` that knows a single file.
    #[cfg(unix)]
    fn fake_xrdfs(dir: &std::path::Path) -> XrootdSource {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("xrdfs");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             case \"$3\" in\n\
             /store/present.dat) echo \"Path: $3\" ;;\n\
             /store/broken.dat) echo \"[FATAL] Auth failed\" >&2; exit 52 ;;\n\
             *) echo \"[ERROR] Server responded with an error: [3011] No such file or directory\" >&2; exit 54 ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        XrootdSource::new(
            XrootdSourceConfig {
                endpoint: "root://localhost".to_string(),
                xrdfs_path: script,
                timeout_secs: 5,
            },
            OrderingKeyExtractor::default(),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exists_uses_stat() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = fake_xrdfs(dir.path());

        assert!(source.exists(&Fragment::new("/store/present.dat")).await.unwrap());
        assert!(!source.exists(&Fragment::new("/store/gone.dat")).await.unwrap());
        let err = source.exists(&Fragment::new("/store/broken.dat")).await.unwrap_err();
        assert!(matches!(err, SourceError::ListingFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let source = XrootdSource::new(
            XrootdSourceConfig {
                endpoint: "root://localhost".to_string(),
                xrdfs_path: PathBuf::from("/nonexistent/xrdfs"),
                timeout_secs: 5,
            },
            OrderingKeyExtractor::default(),
        );
        let err = source.list("/store").await.unwrap_err();
        assert!(matches!(err, SourceError::ToolNotFound { .. }));
    }
}
