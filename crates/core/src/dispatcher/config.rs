//! Dispatcher configuration.

use serde::{Deserialize, Serialize};

use super::types::JobFlavor;

/// Options for rendering and launching jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Interpreter the job script is started with.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Prefix prepended to fragment ids to form job inputs. Defaults depend
    /// on the job flavor.
    #[serde(default)]
    pub input_prefix: Option<String>,

    /// Prefix of per-job directory names. Defaults depend on the job flavor.
    #[serde(default)]
    pub job_dir_prefix: Option<String>,

    /// Threads and streams requested from the processing framework.
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Step sequence of express jobs.
    #[serde(default = "default_express_sequence")]
    pub express_sequence: String,

    /// Step sequence of the follow-up job written at finalization of an
    /// express run.
    #[serde(default = "default_alca_output_sequence")]
    pub alca_output_sequence: String,

    /// Step sequence of harvesting jobs.
    #[serde(default = "default_harvest_sequence")]
    pub harvest_sequence: String,

    /// Conditions upload metadata written next to harvesting jobs.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            input_prefix: None,
            job_dir_prefix: None,
            threads: default_threads(),
            express_sequence: default_express_sequence(),
            alca_output_sequence: default_alca_output_sequence(),
            harvest_sequence: default_harvest_sequence(),
            upload: UploadConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn input_prefix_for(&self, flavor: JobFlavor) -> &str {
        self.input_prefix
            .as_deref()
            .unwrap_or_else(|| flavor.default_input_prefix())
    }

    pub fn job_dir_prefix_for(&self, flavor: JobFlavor) -> &str {
        self.job_dir_prefix
            .as_deref()
            .unwrap_or_else(|| flavor.job_dir_prefix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Append the upload command to harvesting jobs. The metadata file is
    /// written either way.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_destination_database")]
    pub destination_database: String,

    /// Conditions tag written by harvesting jobs.
    #[serde(default = "default_tag")]
    pub tag: String,

    #[serde(default = "default_user_text")]
    pub user_text: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination_database: default_destination_database(),
            tag: default_tag(),
            user_text: default_user_text(),
        }
    }
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_threads() -> u32 {
    8
}

fn default_express_sequence() -> String {
    "RAW2DIGI,RECO,ALCAPRODUCER:EcalTestPulsesRaw".to_string()
}

fn default_alca_output_sequence() -> String {
    "ALCAOUTPUT:EcalTestPulsesRaw,ALCA:PromptCalibProdEcalPedestals".to_string()
}

fn default_harvest_sequence() -> String {
    "ALCAHARVEST:EcalPedestals".to_string()
}

fn default_destination_database() -> String {
    "oracle://cms_orcon_prod/CMS_CONDITIONS".to_string()
}

fn default_tag() -> String {
    "EcalPedestals_NGTDemonstrator".to_string()
}

fn default_user_text() -> String {
    "Periodical fill-up upload for NGT test demonstrator".to_string()
}
