//! The batch automaton as a pure transition function.
//!
//! [`step`] never performs I/O. It returns the destination phase and the
//! effects the driver must execute to enter it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    WaitingForFragments,
    CheckingFragments,
    PreparingBatch,
    PreparingFinalBatch,
    PreparingJob,
    LaunchingJob,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Idle,
        Phase::WaitingForFragments,
        Phase::CheckingFragments,
        Phase::PreparingBatch,
        Phase::PreparingFinalBatch,
        Phase::PreparingJob,
        Phase::LaunchingJob,
        Phase::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::WaitingForFragments => "waiting_for_fragments",
            Phase::CheckingFragments => "checking_fragments",
            Phase::PreparingBatch => "preparing_batch",
            Phase::PreparingFinalBatch => "preparing_final_batch",
            Phase::PreparingJob => "preparing_job",
            Phase::LaunchingJob => "launching_job",
            Phase::Cleanup => "cleanup",
        }
    }

    /// Stable numeric code, exported as a gauge.
    pub fn code(&self) -> i64 {
        match self {
            Phase::Idle => 0,
            Phase::WaitingForFragments => 1,
            Phase::CheckingFragments => 2,
            Phase::PreparingBatch => 3,
            Phase::PreparingFinalBatch => 4,
            Phase::PreparingJob => 5,
            Phase::LaunchingJob => 6,
            Phase::Cleanup => 7,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event fed into the automaton by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    LookForRun,
    Poll,
    Evaluate,
    PrepareJob,
    Launch,
    Advance,
    Finish,
}

impl Trigger {
    /// Triggers fired once per cycle while a run is active, in order.
    pub const ACTIVE_CYCLE: [Trigger; 6] = [
        Trigger::Poll,
        Trigger::Evaluate,
        Trigger::PrepareJob,
        Trigger::Launch,
        Trigger::Advance,
        Trigger::Finish,
    ];
}

/// Guard values, computed by the driver before each trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guards {
    /// Run detection found a run that is not finalized yet.
    pub new_run: bool,
    /// At least one fragment is waiting for dispatch.
    pub fragments_pending: bool,
    /// The pending fragments satisfy the batch threshold.
    pub enough_fragments: bool,
    /// The probe last reported the run as active.
    pub run_active: bool,
    /// The run deadline has passed.
    pub timed_out: bool,
    /// The final batch has been staged.
    pub final_batch: bool,
}

/// Side effect of entering (or leaving) a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Clear all per-run state and reload toolchain parameters.
    Reset,
    /// Adopt the detected run and make sure its start marker exists.
    StartRun,
    AnnounceWaiting,
    /// List the watched location, refresh run status and classify.
    PollAndClassify,
    /// Validate pending fragments and stage them as the next batch.
    PrepareBatch { terminal: bool },
    /// Render the staged batch into a job and clear pending fragments.
    RenderJob,
    /// Start the rendered job and move the batch into `dispatched`.
    LaunchJob,
    /// Write run summaries and remember the run as finalized.
    Finalize,
}

impl Effect {
    /// Label used when reporting a failed effect.
    pub fn stage(&self) -> &'static str {
        match self {
            Effect::Reset => "reset",
            Effect::StartRun => "start_run",
            Effect::AnnounceWaiting => "announce",
            Effect::PollAndClassify => "poll",
            Effect::PrepareBatch { .. } => "prepare",
            Effect::RenderJob => "render",
            Effect::LaunchJob => "launch",
            Effect::Finalize => "finalize",
        }
    }
}

/// Result of one automaton step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(phase: Phase) -> Self {
        Self {
            from: phase,
            to: phase,
            effects: Vec::new(),
        }
    }

    fn to(from: Phase, to: Phase, effects: Vec<Effect>) -> Self {
        Self { from, to, effects }
    }

    /// Whether the trigger was ignored.
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.effects.is_empty()
    }
}

/// Apply `trigger` in `phase`.
///
/// Triggers that do not apply to the current phase leave it unchanged with
/// no effects, so a driver can fire a fixed trigger sequence every cycle.
pub fn step(phase: Phase, trigger: Trigger, guards: &Guards) -> Transition {
    use Phase::*;

    match (phase, trigger) {
        (Idle, Trigger::LookForRun) if guards.new_run => Transition::to(
            Idle,
            WaitingForFragments,
            vec![Effect::StartRun, Effect::AnnounceWaiting],
        ),
        (WaitingForFragments, Trigger::Poll) => {
            Transition::to(phase, CheckingFragments, vec![Effect::PollAndClassify])
        }
        (CheckingFragments, Trigger::Evaluate) => {
            if guards.fragments_pending && guards.enough_fragments {
                Transition::to(phase, PreparingBatch, vec![Effect::PrepareBatch { terminal: false }])
            } else if guards.run_active && !guards.timed_out {
                Transition::to(phase, WaitingForFragments, vec![Effect::AnnounceWaiting])
            } else {
                Transition::to(phase, PreparingFinalBatch, vec![Effect::PrepareBatch { terminal: true }])
            }
        }
        (PreparingBatch | PreparingFinalBatch, Trigger::PrepareJob) => {
            Transition::to(phase, PreparingJob, vec![Effect::RenderJob])
        }
        (PreparingJob, Trigger::Launch) => Transition::to(phase, LaunchingJob, vec![Effect::LaunchJob]),
        (LaunchingJob, Trigger::Advance) => {
            let effects = if guards.final_batch {
                vec![Effect::Finalize]
            } else {
                Vec::new()
            };
            Transition::to(phase, Cleanup, effects)
        }
        (Cleanup, Trigger::Finish) if guards.final_batch => {
            Transition::to(phase, Idle, vec![Effect::Reset])
        }
        (Cleanup, Trigger::Finish) => {
            Transition::to(phase, WaitingForFragments, vec![Effect::AnnounceWaiting])
        }
        _ => Transition::stay(phase),
    }
}
