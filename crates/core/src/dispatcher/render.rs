//! Job rendering.
//!
//! Rendering is pure: the same batch and context always produce the same
//! [`JobSpec`]. Writing the result to disk is a separate step.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tokio::fs;

use super::config::DispatchConfig;
use super::types::{BatchLabel, JobFlavor, JobSpec, RenderedFile, RunContext};
use crate::fragment::Fragment;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to serialize job metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Failed to write job files: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns a batch of fragments into a job.
pub trait JobRenderer: Send + Sync {
    fn flavor(&self) -> JobFlavor;

    /// Prefix of per-job directory names.
    fn job_dir_prefix(&self) -> &str;

    /// Render the job over `batch`.
    fn render(&self, batch: &BTreeSet<Fragment>, ctx: &RunContext) -> Result<JobSpec, RenderError>;

    /// Files written to the run directory when the run is finalized. They
    /// are never launched by the controller.
    fn render_finalization(
        &self,
        _ctx: &RunContext,
        _expected_outputs: &BTreeSet<String>,
    ) -> Result<Vec<RenderedFile>, RenderError> {
        Ok(Vec::new())
    }
}

/// Create the renderer for a job flavor.
pub fn create_renderer(flavor: JobFlavor, config: &DispatchConfig) -> Box<dyn JobRenderer> {
    match flavor {
        JobFlavor::Express => Box::new(ExpressRenderer::new(config.clone())),
        JobFlavor::Harvesting => Box::new(HarvestingRenderer::new(config.clone())),
    }
}

fn join_inputs<'a, I>(prefix: &str, ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    ids.into_iter()
        .map(|id| format!("{}{}", prefix, id))
        .collect::<Vec<_>>()
        .join(",")
}

/// Shell preamble setting up the software environment.
fn environment(ctx: &RunContext, create_release: bool) -> String {
    let version = &ctx.toolchain.software_version;
    let mut out = String::from("#!/bin/bash -ex\n\n");
    let _ = writeln!(out, "export SCRAM_ARCH={}", ctx.toolchain.scram_arch);
    let _ = writeln!(out, "cd {}", ctx.working_dir.display());
    if create_release {
        let _ = writeln!(out, "if [ ! -d {} ]; then cmsrel {}; fi", version, version);
    }
    let _ = writeln!(out, "cd {}/src", version);
    out.push_str("cmsenv\n");
    out
}

fn empty_job(flavor: JobFlavor, ctx: &RunContext, label: Option<BatchLabel>) -> JobSpec {
    JobSpec {
        run_id: ctx.run_id.clone(),
        flavor,
        job_number: ctx.job_number,
        job_dir: ctx.job_dir.clone(),
        label,
        inputs: Vec::new(),
        terminal: ctx.terminal,
        script: flavor.script_name().to_string(),
        files: Vec::new(),
        expected_outputs: Vec::new(),
    }
}

/// Per-segment reconstruction jobs over a lumisection range.
pub struct ExpressRenderer {
    config: DispatchConfig,
}

impl ExpressRenderer {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    fn script(&self, ctx: &RunContext, inputs: &str, stem: &str, output: &str) -> String {
        let threads = self.config.threads;
        let mut out = environment(ctx, true);
        let _ = writeln!(out, "cd {}\n", ctx.job_dir.display());
        let _ = write!(
            out,
            "cmsDriver.py expressStep2 --conditions {} -s {} \
             --datatier ALCARECO --eventcontent ALCARECO --data --process RERECO \
             --scenario pp --era Run3 --nThreads {} --nStreams {} -n -1 \
             --filein {} --fileout file:{} --no_exec --python_filename {}_ecalPedsStep2.py\n\n",
            ctx.toolchain.global_tag,
            self.config.express_sequence,
            threads,
            threads,
            inputs,
            output,
            stem,
        );
        let _ = writeln!(out, "cmsRun {}_ecalPedsStep2.py > {}_step2.log 2>&1", stem, stem);
        let _ = writeln!(out, "touch {}_ecalPedsStep2_job.txt", stem);
        out
    }
}

impl JobRenderer for ExpressRenderer {
    fn flavor(&self) -> JobFlavor {
        JobFlavor::Express
    }

    fn job_dir_prefix(&self) -> &str {
        self.config.job_dir_prefix_for(JobFlavor::Express)
    }

    fn render(&self, batch: &BTreeSet<Fragment>, ctx: &RunContext) -> Result<JobSpec, RenderError> {
        let flavor = self.flavor();
        let label = BatchLabel::from_fragments(batch);
        let mut spec = empty_job(flavor, ctx, label);
        if batch.is_empty() {
            return Ok(spec);
        }

        let stem = spec.artifact_name();
        let output_name = format!("{}_step2.root", stem);
        let inputs = join_inputs(
            self.config.input_prefix_for(flavor),
            batch.iter().map(|f| f.id.as_str()),
        );

        spec.files
            .push(RenderedFile::script(flavor.script_name(), self.script(ctx, &inputs, &stem, &output_name)));
        spec.expected_outputs
            .push(ctx.job_dir.join(&output_name).display().to_string());
        spec.inputs = batch.iter().cloned().collect();
        Ok(spec)
    }

    fn render_finalization(
        &self,
        ctx: &RunContext,
        expected_outputs: &BTreeSet<String>,
    ) -> Result<Vec<RenderedFile>, RenderError> {
        if expected_outputs.is_empty() {
            return Ok(Vec::new());
        }

        let threads = self.config.threads;
        let stem = format!("run{}", ctx.run_id);
        let inputs = join_inputs("file:", expected_outputs.iter().map(String::as_str));

        let mut out = environment(ctx, false);
        let _ = writeln!(out, "cd {}\n", ctx.working_dir.display());
        let _ = write!(
            out,
            "cmsDriver.py expressStep3 --conditions {} -s {} \
             --datatier ALCARECO --eventcontent ALCARECO --triggerResultsProcess RERECO \
             --nThreads {} --nStreams {} -n -1 --filein {} --no_exec \
             --python_filename {}_ecalPedsALCAOUTPUT.py\n\n",
            ctx.toolchain.global_tag, self.config.alca_output_sequence, threads, threads, inputs, stem,
        );
        let _ = writeln!(out, "cat <<@EOF>> {}_ecalPedsALCAOUTPUT.py", stem);
        out.push_str(
            "process.ALCARECOEcalTestPulsesRaw.TriggerResultsTag = cms.InputTag(\"TriggerResults\", \"\", \"RERECO\")\n",
        );
        out.push_str("@EOF\n\n");
        let _ = writeln!(out, "cmsRun {}_ecalPedsALCAOUTPUT.py", stem);

        Ok(vec![RenderedFile::script("ALCAOUTPUT.sh", out)])
    }
}

/// Conditions upload metadata, serialized with four-space indentation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadMetadata<'a> {
    destination_database: &'a str,
    destination_tags: BTreeMap<&'a str, BTreeMap<String, String>>,
    input_tag: &'a str,
    since: serde_json::Value,
    user_text: &'a str,
}

const METADATA_FILE: &str = "promptCalibConditions.txt";
const CONDITIONS_DB: &str = "promptCalibConditions.db";

/// Harvesting jobs over completed per-segment outputs.
pub struct HarvestingRenderer {
    config: DispatchConfig,
}

impl HarvestingRenderer {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    fn metadata(&self, run_id: &str) -> Result<String, RenderError> {
        let upload = &self.config.upload;
        let since = run_id
            .parse::<u64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::from(run_id));
        let metadata = UploadMetadata {
            destination_database: &upload.destination_database,
            destination_tags: BTreeMap::from([(upload.tag.as_str(), BTreeMap::new())]),
            input_tag: &upload.tag,
            since,
            user_text: &upload.user_text,
        };

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        metadata.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn script(&self, ctx: &RunContext, inputs: &str) -> String {
        let stem = format!("run{}_ecalPedsHARVESTING", ctx.run_id);
        let mut out = environment(ctx, false);
        let _ = writeln!(out, "cd {}\n", ctx.job_dir.display());
        let _ = write!(
            out,
            "cmsDriver.py expressStep4 --conditions {} -s {} --scenario pp --data \
             --filein {} -n -1 --no_exec --python_filename {}.py\n\n",
            ctx.toolchain.global_tag, self.config.harvest_sequence, inputs, stem,
        );
        let _ = writeln!(out, "cat <<@EOF>> {}.py", stem);
        let _ = writeln!(
            out,
            "process.PoolDBOutputService.toPut[0].tag = cms.string(\"{}\")",
            self.config.upload.tag
        );
        out.push_str("@EOF\n\n");
        let _ = writeln!(out, "cmsRun {}.py\n", stem);
        let _ = writeln!(
            out,
            "if [ -f \"{db}\" ]; then echo \"DB file exists!\"; else echo \"DB file missing\"; fi",
            db = CONDITIONS_DB
        );
        let _ = writeln!(
            out,
            "if [ -f \"{md}\" ]; then echo \"Metadata file exists!\"; else echo \"Metadata file missing\"; fi",
            md = METADATA_FILE
        );
        if self.config.upload.enabled {
            let _ = writeln!(out, "uploadConditions.py {}", CONDITIONS_DB);
        }
        out
    }
}

impl JobRenderer for HarvestingRenderer {
    fn flavor(&self) -> JobFlavor {
        JobFlavor::Harvesting
    }

    fn job_dir_prefix(&self) -> &str {
        self.config.job_dir_prefix_for(JobFlavor::Harvesting)
    }

    fn render(&self, batch: &BTreeSet<Fragment>, ctx: &RunContext) -> Result<JobSpec, RenderError> {
        let flavor = self.flavor();
        let mut spec = empty_job(flavor, ctx, BatchLabel::from_fragments(batch));
        if batch.is_empty() {
            return Ok(spec);
        }

        let inputs = join_inputs(
            self.config.input_prefix_for(flavor),
            batch.iter().map(|f| f.id.as_str()),
        );

        spec.files.push(RenderedFile::data(METADATA_FILE, self.metadata(&ctx.run_id)?));
        spec.files
            .push(RenderedFile::script(flavor.script_name(), self.script(ctx, &inputs)));
        spec.expected_outputs
            .push(ctx.job_dir.join(CONDITIONS_DB).display().to_string());
        spec.inputs = batch.iter().cloned().collect();
        Ok(spec)
    }
}

/// Write rendered files into `dir`, creating it if needed.
pub async fn write_files(dir: &Path, files: &[RenderedFile]) -> Result<(), RenderError> {
    fs::create_dir_all(dir).await?;
    for file in files {
        let path = dir.join(&file.name);
        fs::write(&path, &file.contents).await?;
        #[cfg(unix)]
        if file.executable {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }
    }
    Ok(())
}
