use std::process::Command;

use anyhow::Result;
use clap::Args;

use crate::app::{self, CommandExt};

/// Execute a command with the resolved KUBECONFIG in its environment
#[derive(Args, Debug)]
#[command(disable_help_flag = true)]
pub struct Cli {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    args: Vec<String>,
}

impl Cli {
    pub fn exec(self) -> Result<()> {
        let mut command = Command::new(&self.args[0]);
        command.args(&self.args[1..]);
        if let Some(kubeconfig) = app::kubeconfig() {
            command.env("KUBECONFIG", kubeconfig);
        }
        command.check_run()
    }
}
