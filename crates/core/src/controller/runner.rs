//! Batch controller driver.
//!
//! Owns all per-run state, feeds triggers into the pure automaton and
//! executes the effects of each transition. A transition is committed only
//! once all of its effects succeeded, so a failed step leaves phase and
//! bookkeeping untouched and is retried on the next cycle.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::bookkeeping::{
    AccumulationPolicy, FinalizedRun, FinalizedRunStore, FragmentSets, LayoutConfig, RunLayout,
};
use crate::config::ToolchainParams;
use crate::dispatcher::{write_files, JobRenderer, JobSpec, ProcessLauncher, RunContext};
use crate::fragment::FragmentSource;
use crate::metrics;
use crate::run::{DetectedRun, Run, RunStatusProbe};

use super::config::ControllerConfig;
use super::machine::{step, Effect, Guards, Phase, Transition, Trigger};
use super::types::{ControllerError, ControllerStatus};

/// External collaborators of the controller.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn RunStatusProbe>,
    pub source: Arc<dyn FragmentSource>,
    pub renderer: Arc<dyn JobRenderer>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub finalized: Arc<dyn FinalizedRunStore>,
}

/// Drives one run at a time from detection to finalization.
pub struct BatchController {
    config: ControllerConfig,
    toolchain_path: PathBuf,
    layout_config: LayoutConfig,
    probe: Arc<dyn RunStatusProbe>,
    source: Arc<dyn FragmentSource>,
    renderer: Arc<dyn JobRenderer>,
    launcher: Arc<dyn ProcessLauncher>,
    finalized: Arc<dyn FinalizedRunStore>,

    // Controller state
    phase: Phase,
    candidate: Option<DetectedRun>,
    run: Option<Run>,
    layout: Option<RunLayout>,
    sets: FragmentSets,
    toolchain: Option<ToolchainParams>,
    job: Option<JobSpec>,
    runs_finalized: u64,
    last_error: Option<String>,
    status_tx: watch::Sender<ControllerStatus>,
}

impl BatchController {
    pub fn new(
        config: ControllerConfig,
        toolchain_path: PathBuf,
        layout_config: LayoutConfig,
        collaborators: Collaborators,
    ) -> Self {
        let (status_tx, _) = watch::channel(ControllerStatus::default());

        Self {
            config,
            toolchain_path,
            layout_config,
            probe: collaborators.probe,
            source: collaborators.source,
            renderer: collaborators.renderer,
            launcher: collaborators.launcher,
            finalized: collaborators.finalized,
            phase: Phase::Idle,
            candidate: None,
            run: None,
            layout: None,
            sets: FragmentSets::new(),
            toolchain: None,
            job: None,
            runs_finalized: 0,
            last_error: None,
            status_tx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_run(&self) -> Option<&Run> {
        self.run.as_ref()
    }

    pub fn sets(&self) -> &FragmentSets {
        &self.sets
    }

    pub fn toolchain(&self) -> Option<&ToolchainParams> {
        self.toolchain.as_ref()
    }

    /// Receive a status snapshot after every committed step.
    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            phase: self.phase,
            run_id: self.run.as_ref().map(|r| r.id.clone()),
            observed: self.sets.observed().len(),
            to_process: self.sets.to_process().len(),
            dispatched: self.sets.dispatched().len(),
            expected_outputs: self.sets.expected_outputs().len(),
            jobs_rendered: self.sets.jobs_rendered(),
            runs_finalized: self.runs_finalized,
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    /// Enter `Idle` for the first time. Fails if the toolchain parameters
    /// cannot be loaded.
    pub fn initialize(&mut self) -> Result<(), ControllerError> {
        self.reset()?;
        self.phase = Phase::Idle;
        metrics::CURRENT_PHASE.set(self.phase.code());
        self.publish();
        Ok(())
    }

    /// Delay before the next tick.
    pub fn next_delay(&self) -> Duration {
        let ms = if self.phase == Phase::Idle {
            self.config.idle_poll_interval_ms
        } else {
            self.config.poll_interval_ms
        };
        Duration::from_millis(ms)
    }

    /// Look for a run while idle, otherwise run one active cycle.
    pub async fn tick(&mut self) -> Result<(), ControllerError> {
        if self.phase == Phase::Idle {
            self.look_for_run().await?;
        } else {
            self.run_cycle().await?;
        }
        Ok(())
    }

    /// Detect runs and fire `LookForRun`.
    ///
    /// Finalized runs are skipped; the smallest remaining run id is adopted.
    pub async fn look_for_run(&mut self) -> Result<Transition, ControllerError> {
        if self.phase == Phase::Idle {
            match self.select_run().await {
                Ok(candidate) => self.candidate = candidate,
                Err(e) => {
                    self.record_failure("detect", &e);
                    return Err(e);
                }
            }
        }
        self.fire(Trigger::LookForRun).await
    }

    /// Fire the fixed active trigger sequence once.
    ///
    /// Returns the transitions that were not no-ops. The first failing step
    /// aborts the rest of the cycle.
    pub async fn run_cycle(&mut self) -> Result<Vec<Transition>, ControllerError> {
        let mut transitions = Vec::new();
        for trigger in Trigger::ACTIVE_CYCLE {
            let transition = self.fire(trigger).await?;
            if !transition.is_noop() {
                transitions.push(transition);
            }
        }
        Ok(transitions)
    }

    /// Drive the controller until shutdown or a fatal error.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ControllerError> {
        self.initialize()?;
        info!(
            flavor = %self.renderer.flavor(),
            minimum_batch = self.config.minimum_batch,
            accumulation = ?self.config.accumulation,
            "Batch controller started"
        );

        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Batch controller received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = self.tick().await {
                        if e.is_fatal() {
                            error!(phase = %self.phase, error = %e, "Batch controller stopped");
                            return Err(e);
                        }
                        warn!(phase = %self.phase, error = %e, "Step aborted, retrying next cycle");
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply one trigger: evaluate guards, run effects, commit the phase.
    pub async fn fire(&mut self, trigger: Trigger) -> Result<Transition, ControllerError> {
        let guards = self.guards();
        let transition = step(self.phase, trigger, &guards);
        if transition.is_noop() {
            return Ok(transition);
        }

        for effect in &transition.effects {
            if let Err(e) = self.execute(*effect).await {
                self.record_failure(effect.stage(), &e);
                return Err(e);
            }
        }

        debug!(
            from = %transition.from,
            to = %transition.to,
            trigger = ?trigger,
            "Phase transition"
        );
        self.phase = transition.to;
        self.last_error = None;
        metrics::CURRENT_PHASE.set(self.phase.code());
        self.publish();
        Ok(transition)
    }

    fn guards(&self) -> Guards {
        let now = Utc::now();
        Guards {
            new_run: self.candidate.is_some(),
            fragments_pending: self.sets.has_pending(),
            enough_fragments: self
                .sets
                .is_ready(self.config.accumulation, self.config.minimum_batch),
            run_active: self.run.as_ref().is_some_and(|r| r.still_active),
            timed_out: self.run.as_ref().is_some_and(|r| r.timed_out(now)),
            final_batch: self.sets.terminal(),
        }
    }

    fn record_failure(&mut self, stage: &str, error: &ControllerError) {
        if !error.is_fatal() {
            metrics::TRANSIENT_FAILURES.with_label_values(&[stage]).inc();
        }
        self.last_error = Some(error.to_string());
        self.publish();
    }

    async fn execute(&mut self, effect: Effect) -> Result<(), ControllerError> {
        match effect {
            Effect::Reset => self.reset(),
            Effect::StartRun => self.start_run().await,
            Effect::AnnounceWaiting => {
                debug!(run = ?self.run.as_ref().map(|r| r.id.as_str()), "Waiting for fragments");
                Ok(())
            }
            Effect::PollAndClassify => self.poll_and_classify().await,
            Effect::PrepareBatch { terminal } => self.prepare_batch(terminal).await,
            Effect::RenderJob => self.render_job().await,
            Effect::LaunchJob => self.launch_job().await,
            Effect::Finalize => self.finalize().await,
        }
    }

    fn reset(&mut self) -> Result<(), ControllerError> {
        let toolchain = ToolchainParams::load(&self.toolchain_path)?;
        debug!(
            scram_arch = %toolchain.scram_arch,
            software_version = %toolchain.software_version,
            global_tag = %toolchain.global_tag,
            "Loaded toolchain parameters"
        );

        self.candidate = None;
        self.run = None;
        self.layout = None;
        self.sets = FragmentSets::new();
        self.job = None;
        self.toolchain = Some(toolchain);
        info!("Controller reset, waiting for a new run");
        Ok(())
    }

    async fn select_run(&self) -> Result<Option<DetectedRun>, ControllerError> {
        let mut fresh = Vec::new();
        for run in self.probe.detect().await? {
            if self.finalized.is_finalized(&run.id)? {
                debug!(run = %run.id, "Skipping finalized run");
                continue;
            }
            fresh.push(run);
        }
        Ok(fresh.into_iter().min_by(|a, b| compare_run_ids(&a.id, &b.id)))
    }

    async fn start_run(&mut self) -> Result<(), ControllerError> {
        let detected = self
            .candidate
            .clone()
            .ok_or_else(|| ControllerError::Invariant("no run candidate to start".to_string()))?;

        let layout = RunLayout::new(
            &detected.working_dir,
            &self.layout_config,
            self.renderer.flavor().dispatched_log_name(),
        );

        let started_at = match layout.read_start_marker().await? {
            Some(ts) => ts,
            None => {
                let ts = match detected.started_at {
                    Some(ts) => ts,
                    None => {
                        warn!(run = %detected.id, "No run start marker found, treating the run as started now");
                        Utc::now()
                    }
                };
                layout.write_start_marker(ts).await?;
                ts
            }
        };

        let run = Run::new(detected, started_at, self.config.run_timeout());
        info!(
            run = %run.id,
            started_at = %started_at,
            location = %run.location,
            deadline = ?run.deadline,
            "Run started"
        );
        metrics::RUNS_STARTED.inc();

        self.candidate = None;
        self.sets = FragmentSets::new();
        self.job = None;
        self.run = Some(run);
        self.layout = Some(layout);
        Ok(())
    }

    async fn poll_and_classify(&mut self) -> Result<(), ControllerError> {
        let run = self.active_run()?;
        let available = self.source.list(&run.location).await?;
        let status = match self.probe.status(run).await {
            Ok(status) => Some(status),
            // Past the deadline the status no longer decides anything.
            Err(e) if run.timed_out(Utc::now()) => {
                metrics::TRANSIENT_FAILURES.with_label_values(&["status"]).inc();
                warn!(
                    run = %run.id,
                    error = %e,
                    "Run status unavailable after the deadline, keeping the last known status"
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        let run_id = run.id.clone();
        if let (Some(run), Some(status)) = (self.run.as_mut(), status.as_ref()) {
            run.observe(status);
        }
        let classification = self.sets.classify(available);

        debug!(
            run = %run_id,
            observed = self.sets.observed().len(),
            pending = classification.pending,
            relisted = classification.relisted,
            still_active = ?status.as_ref().map(|s| s.still_active),
            last_unit = ?status.as_ref().and_then(|s| s.last_unit_seen),
            "Classified fragments"
        );
        if classification.newly_observed > 0 {
            info!(
                run = %run_id,
                new = classification.newly_observed,
                pending = classification.pending,
                "New fragments observed"
            );
        }
        Ok(())
    }

    async fn prepare_batch(&mut self, terminal: bool) -> Result<(), ControllerError> {
        let run_id = self.active_run()?.id.clone();
        let policy = self.config.accumulation;

        let mut batch = BTreeSet::new();
        let mut missing = Vec::new();
        for fragment in self.sets.candidate_batch(policy) {
            if self.source.exists(&fragment).await? {
                batch.insert(fragment);
            } else {
                warn!(run = %run_id, fragment = %fragment, "Excluding fragment whose data is missing");
                missing.push(fragment);
            }
        }

        if policy == AccumulationPolicy::FullRelist {
            let resubmitted = batch.intersection(self.sets.dispatched()).count();
            if resubmitted > 0 {
                warn!(
                    run = %run_id,
                    resubmitted,
                    "Re-submitting already dispatched fragments with the full listing"
                );
                metrics::FRAGMENTS_RESUBMITTED.inc_by(resubmitted as u64);
            }
        }

        info!(run = %run_id, size = batch.len(), terminal, "Prepared batch");
        let retired = self.sets.exclude(missing);
        metrics::FRAGMENTS_MISSING.inc_by(retired as u64);
        self.sets.stage(batch, terminal);
        Ok(())
    }

    async fn render_job(&mut self) -> Result<(), ControllerError> {
        let run = self.active_run()?;
        let layout = self.active_layout()?;
        let toolchain = self
            .toolchain
            .clone()
            .ok_or_else(|| ControllerError::Invariant("toolchain parameters not loaded".to_string()))?;

        let job_number = self.sets.jobs_rendered();
        let ctx = RunContext {
            run_id: run.id.clone(),
            working_dir: run.working_dir.clone(),
            toolchain,
            job_number,
            job_dir: layout.job_dir(self.renderer.job_dir_prefix(), job_number),
            terminal: self.sets.terminal(),
        };

        let spec = self.renderer.render(self.sets.staged(), &ctx)?;
        if spec.is_launchable() {
            write_files(&spec.job_dir, &spec.files).await?;
        }

        let kind = match (spec.is_launchable(), spec.terminal) {
            (false, _) => "empty",
            (true, true) => "final",
            (true, false) => "regular",
        };
        metrics::BATCHES_DISPATCHED.with_label_values(&[kind]).inc();
        info!(
            run = %spec.run_id,
            job = %spec.artifact_name(),
            inputs = spec.inputs.len(),
            terminal = spec.terminal,
            "Rendered job"
        );

        self.sets.commit_render(spec.expected_outputs.iter().cloned());
        self.job = Some(spec);
        Ok(())
    }

    async fn launch_job(&mut self) -> Result<(), ControllerError> {
        let spec = self
            .job
            .take()
            .ok_or_else(|| ControllerError::Invariant("no rendered job to launch".to_string()))?;

        if spec.is_launchable() {
            if let Err(e) = self.launcher.launch(&spec).await {
                metrics::LAUNCH_FAILURES.inc();
                warn!(
                    run = %spec.run_id,
                    job = %spec.artifact_name(),
                    error = %e,
                    "Failed to start job, its fragments stay dispatched"
                );
            }
        } else {
            warn!(run = %spec.run_id, job = %spec.artifact_name(), "Batch is empty, not launching a job");
        }

        let newly_dispatched = self.sets.commit_dispatch();
        metrics::FRAGMENTS_DISPATCHED.inc_by(newly_dispatched as u64);
        debug!(
            run = %spec.run_id,
            newly_dispatched,
            dispatched = self.sets.dispatched().len(),
            "Batch dispatched"
        );
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), ControllerError> {
        let run = self.active_run()?;
        let layout = self.active_layout()?;
        layout.write_summary(&self.sets).await?;

        if let Some(toolchain) = self.toolchain.clone() {
            let ctx = RunContext {
                run_id: run.id.clone(),
                working_dir: run.working_dir.clone(),
                toolchain,
                job_number: self.sets.jobs_rendered(),
                job_dir: layout.dir().to_path_buf(),
                terminal: true,
            };
            let files = self
                .renderer
                .render_finalization(&ctx, self.sets.expected_outputs())?;
            if !files.is_empty() {
                write_files(layout.dir(), &files).await?;
            }
        }

        let record = FinalizedRun {
            run_id: run.id.clone(),
            finalized_at: Utc::now(),
            dispatched_count: self.sets.dispatched().len() as u64,
        };
        let newly_finalized = self.finalized.mark_finalized(&record)?;

        info!(
            run = %record.run_id,
            dispatched = record.dispatched_count,
            expected_outputs = self.sets.expected_outputs().len(),
            jobs = self.sets.jobs_rendered(),
            "Run finalized"
        );
        if newly_finalized {
            metrics::RUNS_FINALIZED.inc();
            self.runs_finalized += 1;
        }
        Ok(())
    }

    fn active_run(&self) -> Result<&Run, ControllerError> {
        self.run
            .as_ref()
            .ok_or_else(|| ControllerError::Invariant("no active run".to_string()))
    }

    fn active_layout(&self) -> Result<&RunLayout, ControllerError> {
        self.layout
            .as_ref()
            .ok_or_else(|| ControllerError::Invariant("no layout for the active run".to_string()))
    }
}

/// Numeric order for numeric run ids, lexicographic otherwise.
fn compare_run_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookkeeping::MemoryFinalizedRunStore;
    use crate::dispatcher::{create_renderer, DispatchConfig, JobFlavor};
    use crate::testing::{fixtures, MockFragmentSource, MockLauncher, MockRunProbe};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        base: PathBuf,
        probe: Arc<MockRunProbe>,
        source: Arc<MockFragmentSource>,
        launcher: Arc<MockLauncher>,
        controller: BatchController,
    }

    fn harness(config: ControllerConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_path_buf();
        let toolchain_path = fixtures::write_toolchain_params(&base);

        let probe = Arc::new(MockRunProbe::new());
        let source = Arc::new(MockFragmentSource::new());
        let launcher = Arc::new(MockLauncher::new());
        let collaborators = Collaborators {
            probe: probe.clone(),
            source: source.clone(),
            renderer: Arc::from(create_renderer(config.flavor, &DispatchConfig::default())),
            launcher: launcher.clone(),
            finalized: Arc::new(MemoryFinalizedRunStore::new()),
        };
        let controller =
            BatchController::new(config, toolchain_path, LayoutConfig::default(), collaborators);

        Harness {
            _dir: dir,
            base,
            probe,
            source,
            launcher,
            controller,
        }
    }

    #[test]
    fn test_compare_run_ids() {
        assert_eq!(compare_run_ids("99999", "100000"), Ordering::Less);
        assert_eq!(compare_run_ids("398348", "398348"), Ordering::Equal);
        assert_eq!(compare_run_ids("runB", "runA"), Ordering::Greater);
    }

    #[tokio::test]
    async fn test_initialize_requires_toolchain() {
        let mut h = harness(ControllerConfig::default());
        std::fs::remove_file(h.base.join("ngtParameters.jsn")).unwrap();
        let err = h.controller.initialize().unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_idle_without_runs_stays_idle() {
        let mut h = harness(ControllerConfig::default());
        h.controller.initialize().unwrap();

        let t = h.controller.look_for_run().await.unwrap();
        assert!(t.is_noop());
        assert_eq!(h.controller.phase(), Phase::Idle);
        assert_eq!(h.controller.next_delay(), Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn test_adopts_smallest_run_and_writes_start_marker() {
        let mut h = harness(ControllerConfig::default());
        h.controller.initialize().unwrap();
        h.probe.add_run(fixtures::detected_run("398600", &h.base)).await;
        h.probe.add_run(fixtures::detected_run("398348", &h.base)).await;

        h.controller.look_for_run().await.unwrap();
        assert_eq!(h.controller.phase(), Phase::WaitingForFragments);
        assert_eq!(h.controller.current_run().unwrap().id, "398348");
        assert!(h.base.join("run398348").join("runStart.log").exists());
    }

    #[tokio::test]
    async fn test_probe_failure_is_transient() {
        let mut h = harness(ControllerConfig::default());
        h.controller.initialize().unwrap();
        h.probe
            .set_next_error(crate::run::ProbeError::Request("unreachable".to_string()))
            .await;

        let err = h.controller.look_for_run().await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(h.controller.phase(), Phase::Idle);
        assert!(h.controller.status().last_error.is_some());
    }

    #[tokio::test]
    async fn test_status_is_published() {
        let mut h = harness(ControllerConfig {
            minimum_batch: 1,
            flavor: JobFlavor::Express,
            ..Default::default()
        });
        let rx = h.controller.subscribe();
        h.controller.initialize().unwrap();
        h.probe.add_run(fixtures::detected_run("398348", &h.base)).await;
        h.source
            .set_fragments(&fixtures::location("398348"), [fixtures::fragment("398348", 1)])
            .await;

        h.controller.look_for_run().await.unwrap();
        h.controller.run_cycle().await.unwrap();

        let status = rx.borrow().clone();
        assert_eq!(status.phase, Phase::WaitingForFragments);
        assert_eq!(status.run_id.as_deref(), Some("398348"));
        assert_eq!(status.dispatched, 1);
        assert_eq!(status.jobs_rendered, 1);
        assert_eq!(h.launcher.launch_count().await, 1);
    }
}
