use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

mod config;
mod exec;
mod info;
mod list;
mod run;

/// E2E workflow utilities for OpenShift clusters
#[derive(Parser, Debug)]
#[command(version, bin_name = "e2edev", infer_subcommands = true)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Config(config::Cli),
    Exec(exec::Cli),
    Info(info::Cli),
    List(list::Cli),
    Run(run::Cli),
}

impl Cli {
    pub fn exec(self) -> Result<()> {
        match self.command {
            Commands::Config(cli) => cli.exec(),
            Commands::Exec(cli) => cli.exec(),
            Commands::Info(cli) => cli.exec(),
            Commands::List(cli) => cli.exec(),
            Commands::Run(cli) => cli.exec(),
        }
    }
}
