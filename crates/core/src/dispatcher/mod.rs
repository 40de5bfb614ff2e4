//! Job rendering and detached launch.
//!
//! A batch is first rendered into a [`JobSpec`] by a [`JobRenderer`], its
//! files are written to a per-job directory, and the job is handed to a
//! [`ProcessLauncher`] that starts it without waiting.

mod config;
mod launcher;
mod render;
mod types;

pub use config::{DispatchConfig, UploadConfig};
pub use launcher::{DetachedLauncher, LaunchError, ProcessLauncher};
pub use render::{
    create_renderer, write_files, ExpressRenderer, HarvestingRenderer, JobRenderer, RenderError,
};
pub use types::{BatchLabel, JobFlavor, JobSpec, RenderedFile, RunContext};
