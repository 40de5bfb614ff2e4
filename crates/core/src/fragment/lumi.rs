//! Lumisection keys read from the data files themselves.
//!
//! Express streamer files are named by GUID, so the lumisections they cover
//! are only known by asking `edmFileUtil --eventsInLumi`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::{BTreeSet, HashMap};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::config::LumiKeyConfig;
use super::source::{FragmentSource, SourceError};
use super::types::Fragment;

/// One `run lumi events` row of the `--eventsInLumi` table.
static LUMI_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(\d+)\s+(\d+)\s+(\d+)\s*$").unwrap());

/// Lumisection numbers listed in `edmFileUtil --eventsInLumi` output.
pub fn parse_events_in_lumi(stdout: &str) -> BTreeSet<u32> {
    LUMI_ROW
        .captures_iter(stdout)
        .filter_map(|caps| caps.get(2))
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .collect()
}

/// Wraps a source and attaches the lumisection range of every listed file.
///
/// Files are immutable, so a range is looked up once per file and cached.
/// A file whose lookup fails keeps whatever key the inner source gave it and
/// is retried on the next listing.
pub struct LumiKeyedSource {
    inner: Box<dyn FragmentSource>,
    config: LumiKeyConfig,
    ranges: Mutex<HashMap<String, (u32, u32)>>,
}

impl LumiKeyedSource {
    pub fn new(inner: Box<dyn FragmentSource>, config: LumiKeyConfig) -> Self {
        Self {
            inner,
            config,
            ranges: Mutex::new(HashMap::new()),
        }
    }

    async fn lumi_range(&self, fragment: &Fragment) -> Result<Option<(u32, u32)>, SourceError> {
        let url = format!("{}{}", self.config.url_prefix, fragment.id);
        let child = Command::new(&self.config.edm_file_util_path)
            .arg(&url)
            .arg("--eventsInLumi")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SourceError::ToolNotFound {
                        path: self.config.edm_file_util_path.clone(),
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
            location: url.clone(),
            timeout_secs: self.config.timeout_secs,
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::listing_failed(
                url,
                format!("edmFileUtil exited with code {:?}: {}", output.status.code(), stderr.trim()),
            ));
        }

        let lumis = parse_events_in_lumi(&String::from_utf8_lossy(&output.stdout));
        Ok(lumis.first().copied().zip(lumis.last().copied()))
    }
}

#[async_trait]
impl FragmentSource for LumiKeyedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list(&self, location: &str) -> Result<BTreeSet<Fragment>, SourceError> {
        let listed = self.inner.list(location).await?;
        let mut ranges = self.ranges.lock().await;

        let mut keyed = BTreeSet::new();
        for fragment in listed {
            let range = match ranges.get(&fragment.id) {
                Some(range) => Some(*range),
                None => match self.lumi_range(&fragment).await {
                    Ok(Some(range)) => {
                        debug!(fragment = %fragment, first = range.0, last = range.1, "Read lumisection range");
                        ranges.insert(fragment.id.clone(), range);
                        Some(range)
                    }
                    Ok(None) => {
                        warn!(fragment = %fragment, "edmFileUtil reported no lumisections");
                        None
                    }
                    Err(e) => {
                        warn!(fragment = %fragment, error = %e, "Could not read lumisections");
                        None
                    }
                },
            };

            keyed.insert(match range {
                Some((first, last)) => fragment.with_ordering_range(first, last),
                None => fragment,
            });
        }
        Ok(keyed)
    }

    async fn exists(&self, fragment: &Fragment) -> Result<bool, SourceError> {
        self.inner.exists(fragment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tokio::sync::RwLock;

    /// Inner source returning a fixed listing.
    struct FixedSource {
        ids: RwLock<Vec<String>>,
    }

    #[async_trait]
    impl FragmentSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn list(&self, _location: &str) -> Result<BTreeSet<Fragment>, SourceError> {
            Ok(self.ids.read().await.iter().map(Fragment::new).collect())
        }
    }

    fn fixed(ids: &[&str]) -> Box<dyn FragmentSource> {
        Box::new(FixedSource {
            ids: RwLock::new(ids.iter().map(|s| s.to_string()).collect()),
        })
    }

    fn config(tool: PathBuf) -> LumiKeyConfig {
        LumiKeyConfig {
            edm_file_util_path: tool,
            url_prefix: String::new(),
            timeout_secs: 5,
        }
    }

    /// Stand-in for `edmFileUtil` that counts its calls in `calls.txt`.
    #[cfg(unix)]
    fn fake_edm_file_util(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("edmFileUtil");
        let calls = dir.join("calls.txt");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 echo \"$1\" >> {calls}\n\
                 case \"$1\" in\n\
                 */good.dat)\n\
                 echo \"$1 (1 runs, 3 lumis, 6804 events, 1048576 bytes)\"\n\
                 echo \"         Run           Lumi         # Events\"\n\
                 echo \"      398348            187           2268\"\n\
                 echo \"      398348            188           2270\"\n\
                 echo \"      398348            190           2266\"\n\
                 ;;\n\
                 *) echo \"file open failed\" >&2; exit 8 ;;\n\
                 esac\n",
                calls = calls.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn test_parse_events_in_lumi() {
        assert_eq!(
            parse_events_in_lumi("   398348   187   2268"),
            BTreeSet::from([187])
        );

        let stdout = "root://eoscms.cern.ch//store/x.dat (1 runs, 2 lumis, 4538 events, 2 bytes)\n\
                      \x20        Run           Lumi         # Events\n\
                      \x20     398348            188           2270\n\
                      \x20     398348            187           2268\n";
        assert_eq!(parse_events_in_lumi(stdout), BTreeSet::from([187, 188]));
        assert!(parse_events_in_lumi("Run Lumi # Events\n").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_attaches_range_and_caches_it() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = fake_edm_file_util(dir.path());
        let source = LumiKeyedSource::new(fixed(&["/store/good.dat"]), config(tool));

        for _ in 0..2 {
            let listed = source.list("/store").await.unwrap();
            let fragment = listed.iter().next().unwrap();
            assert_eq!(fragment.key_bounds(), Some((187, 190)));
        }

        let calls = std::fs::read_to_string(dir.path().join("calls.txt")).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_lookup_keeps_fragment_unkeyed() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = fake_edm_file_util(dir.path());
        let source = LumiKeyedSource::new(fixed(&["/store/bad.dat", "/store/good.dat"]), config(tool));

        let listed = source.list("/store").await.unwrap();
        assert_eq!(listed.len(), 2);
        let bad = listed.iter().find(|f| f.id == "/store/bad.dat").unwrap();
        assert_eq!(bad.key_bounds(), None);

        source.list("/store").await.unwrap();
        let calls = std::fs::read_to_string(dir.path().join("calls.txt")).unwrap();
        assert_eq!(calls.lines().filter(|l| l.ends_with("bad.dat")).count(), 2);
    }

    #[tokio::test]
    async fn test_missing_tool_does_not_fail_listing() {
        let source = LumiKeyedSource::new(
            fixed(&["/store/a.dat"]),
            config(PathBuf::from("/nonexistent/edmFileUtil")),
        );
        let listed = source.list("/store").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(source.name(), "fixed");
    }
}
