use anyhow::Result;
use clap::{Args, Subcommand};

use crate::{app, config};

/// Modify the config file
#[derive(Args, Debug)]
#[command()]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set the kubeconfig used for every `oc` invocation
    Kubeconfig { path: String },
    /// Set the directory holding the manifest fixture templates
    Fixtures { path: String },
}

impl Cli {
    pub fn exec(self) -> Result<()> {
        let mut config = app::config().clone();
        match self.command {
            Commands::Kubeconfig { path } => config.kubeconfig = path,
            Commands::Fixtures { path } => config.fixtures = path,
        }
        config::save(config)
    }
}
