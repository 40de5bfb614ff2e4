//! Run probe backed by the OMS run registry REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::config::OmsProbeConfig;
use super::probe::{ProbeError, RunStatusProbe};
use super::types::{DetectedRun, Run, RunStatus};

#[derive(Debug, Deserialize)]
struct OmsResponse {
    #[serde(default)]
    data: Vec<OmsRecord>,
}

#[derive(Debug, Deserialize)]
struct OmsRecord {
    attributes: OmsRunAttributes,
}

#[derive(Debug, Clone, Deserialize)]
struct OmsRunAttributes {
    run_number: Option<u64>,
    last_lumisection_number: Option<u64>,
    start_time: Option<DateTime<Utc>>,
    /// Null while the run is still taking data.
    end_time: Option<String>,
}

/// Queries the run registry for the most recent run.
pub struct OmsRunProbe {
    client: Client,
    config: OmsProbeConfig,
}

impl OmsRunProbe {
    pub fn new(config: OmsProbeConfig) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ProbeError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn runs_url(&self) -> String {
        format!(
            "{}/{}/runs",
            self.config.url.trim_end_matches('/'),
            self.config.api_version
        )
    }

    fn latest_run_url(&self) -> String {
        format!("{}?sort=-run_number&page[offset]=0&page[limit]=1", self.runs_url())
    }

    fn run_url(&self, run_id: &str) -> String {
        format!(
            "{}?filter[run_number][EQ]={}&page[offset]=0&page[limit]=1",
            self.runs_url(),
            run_id
        )
    }

    fn to_detected(&self, run_number: u64, attrs: &OmsRunAttributes) -> DetectedRun {
        let id = run_number.to_string();
        let location = self
            .config
            .location_template
            .replace("{run_path}", &run_path(&id))
            .replace("{run}", &id);

        DetectedRun {
            working_dir: self.config.work_root.join(format!("run{}", id)),
            id,
            location,
            started_at: attrs.start_time,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Option<OmsRunAttributes>, ProbeError> {
        debug!(url, "Querying run registry");
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::Request(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(ProbeError::Request(format!(
                "registry returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        parse_first_run(&body)
    }
}

/// Run directory segment used in storage paths: `398348` -> `398/348`.
pub fn run_path(run_id: &str) -> String {
    if run_id.len() == 6 && run_id.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}/{}", &run_id[..3], &run_id[3..])
    } else {
        run_id.to_string()
    }
}

fn parse_first_run(body: &str) -> Result<Option<OmsRunAttributes>, ProbeError> {
    let response: OmsResponse =
        serde_json::from_str(body).map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;
    Ok(response.data.into_iter().next().map(|r| r.attributes))
}

#[async_trait]
impl RunStatusProbe for OmsRunProbe {
    fn name(&self) -> &str {
        "oms"
    }

    async fn detect(&self) -> Result<Vec<DetectedRun>, ProbeError> {
        let Some(attrs) = self.fetch(&self.latest_run_url()).await? else {
            debug!("No run information found in registry");
            return Ok(vec![]);
        };
        let run_number = attrs
            .run_number
            .ok_or_else(|| ProbeError::InvalidResponse("run_number missing".to_string()))?;

        if attrs.end_time.is_some() {
            debug!(run = run_number, "Most recent run has already ended");
            return Ok(vec![]);
        }

        Ok(vec![self.to_detected(run_number, &attrs)])
    }

    async fn status(&self, run: &Run) -> Result<RunStatus, ProbeError> {
        let attrs = self
            .fetch(&self.run_url(&run.id))
            .await?
            .ok_or_else(|| ProbeError::RunNotFound(run.id.clone()))?;

        Ok(RunStatus {
            run_id: run.id.clone(),
            last_unit_seen: attrs.last_lumisection_number,
            still_active: attrs.end_time.is_none(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn probe() -> OmsRunProbe {
        OmsRunProbe::new(OmsProbeConfig {
            url: "https://cmsoms.cms/agg/api/".to_string(),
            api_version: "v1".to_string(),
            location_template: "/eos/cms/store/data/Express-v1/000/{run_path}/00000".to_string(),
            work_root: PathBuf::from("/tmp/ngt_mm"),
            timeout_secs: 5,
            accept_invalid_certs: true,
        })
        .unwrap()
    }

    #[test]
    fn test_run_path() {
        assert_eq!(run_path("398348"), "398/348");
        assert_eq!(run_path("12345"), "12345");
        assert_eq!(run_path("abcdef"), "abcdef");
    }

    #[test]
    fn test_urls() {
        let probe = probe();
        assert_eq!(
            probe.latest_run_url(),
            "https://cmsoms.cms/agg/api/v1/runs?sort=-run_number&page[offset]=0&page[limit]=1"
        );
        assert!(probe.run_url("398348").contains("filter[run_number][EQ]=398348"));
    }

    #[test]
    fn test_parse_running_run() {
        let body = r#"{"data": [{"id": "398348", "attributes": {
            "run_number": 398348,
            "last_lumisection_number": 187,
            "start_time": "2025-09-20T10:00:00Z",
            "end_time": null
        }}]}"#;
        let attrs = parse_first_run(body).unwrap().unwrap();
        assert_eq!(attrs.run_number, Some(398348));
        assert_eq!(attrs.last_lumisection_number, Some(187));
        assert!(attrs.end_time.is_none());

        let detected = probe().to_detected(398348, &attrs);
        assert_eq!(detected.location, "/eos/cms/store/data/Express-v1/000/398/348/00000");
        assert_eq!(detected.working_dir, PathBuf::from("/tmp/ngt_mm/run398348"));
        assert!(detected.started_at.is_some());
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        assert!(parse_first_run(r#"{"data": []}"#).unwrap().is_none());
        assert!(parse_first_run(r#"{}"#).unwrap().is_none());
        assert!(matches!(
            parse_first_run("<html>"),
            Err(ProbeError::InvalidResponse(_))
        ));
    }
}
