use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "e2edev";
const FILE_STEM: &str = "config";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Config {
    /// Kubeconfig used for every `oc` invocation when `KUBECONFIG` is unset.
    pub kubeconfig: String,
    /// Directory holding the manifest fixture templates.
    pub fixtures: String,
}

pub fn path() -> Result<PathBuf> {
    confy::get_configuration_file_path(APP_NAME, FILE_STEM)
        .with_context(|| "unable to find the config file")
}

pub fn load() -> Result<Config> {
    confy::load(APP_NAME, FILE_STEM).with_context(|| "unable to load config")
}

pub fn save(config: Config) -> Result<()> {
    confy::store(APP_NAME, FILE_STEM, config).with_context(|| "unable to save config")
}
