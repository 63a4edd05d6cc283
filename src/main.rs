#[macro_use]
mod macros;

mod app;
mod cluster;
mod commands;
mod config;
mod suites;
mod util;

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use commands::Cli;

fn main() {
    if let Err(error) = run() {
        fatal!("{error:#}");
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    app::set_global_verbosity(cli.verbose.log_level_filter());

    let config = config::load()?;

    // KUBECONFIG in the environment wins over the config file.
    let kubeconfig = env::var("KUBECONFIG")
        .ok()
        .filter(|value| !value.is_empty())
        .or_else(|| (!config.kubeconfig.is_empty()).then(|| config.kubeconfig.clone()));
    app::set_global_kubeconfig(kubeconfig);

    let fixtures = if config.fixtures.is_empty() {
        PathBuf::from("fixtures")
    } else {
        PathBuf::from(&config.fixtures)
    };
    if !util::exists(&fixtures)? {
        warning!("fixtures directory {} does not exist", fixtures.display());
    }
    app::set_global_fixtures(fixtures);
    app::set_global_config(config);

    cli.exec()
}
