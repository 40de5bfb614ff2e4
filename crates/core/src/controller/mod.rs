//! Batch controller driving one run at a time.
//!
//! The controller walks each run through a fixed automaton:
//! - **Idle**: look for a run that has not been finalized yet
//! - **Waiting / Checking**: poll the fragment source and classify listings
//! - **Preparing / Launching**: turn pending fragments into a job and start it
//! - **Cleanup**: finalize the run once its last batch is out
//!
//! Transitions are computed by the pure [`step`] function; [`BatchController`]
//! owns the per-run state and executes the effects of each transition.

mod config;
mod machine;
mod runner;
mod types;

pub use config::ControllerConfig;
pub use machine::{step, Effect, Guards, Phase, Transition, Trigger};
pub use runner::{BatchController, Collaborators};
pub use types::{ControllerError, ControllerStatus};
