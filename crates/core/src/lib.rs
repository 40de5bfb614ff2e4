pub mod bookkeeping;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod fragment;
pub mod metrics;
pub mod run;
pub mod testing;

pub use bookkeeping::{
    AccumulationPolicy, FinalizedRunStore, FragmentSets, InstanceLock, SqliteFinalizedRunStore,
    StoreError,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ToolchainParams,
};
pub use controller::{
    BatchController, Collaborators, ControllerConfig, ControllerError, ControllerStatus, Phase,
};
pub use dispatcher::{create_renderer, DetachedLauncher, JobFlavor, JobRenderer, JobSpec};
pub use fragment::{create_source, Fragment, FragmentSource};
pub use run::{create_probe, Run, RunStatusProbe};
