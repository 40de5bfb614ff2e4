//! Bookkeeping of fragments and runs.
//!
//! - [`FragmentSets`]: in-memory classification of the active run's fragments
//! - [`FinalizedRunStore`]: durable memory of completed runs
//! - [`RunLayout`]: persisted artifacts in each run's working directory
//! - [`InstanceLock`]: single-writer guarantee over the durable state

mod finalized;
mod layout;
mod lock;
mod sets;

pub use finalized::{
    FinalizedRun, FinalizedRunStore, MemoryFinalizedRunStore, SqliteFinalizedRunStore, StoreError,
};
pub use layout::{
    format_dispatched_log, format_expected_outputs, format_timestamp, LayoutConfig, RunLayout,
};
pub use lock::InstanceLock;
pub use sets::{AccumulationPolicy, Classification, FragmentSets};
