use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use once_cell::sync::OnceCell;

use crate::config::Config;

static VERBOSITY: OnceCell<LevelFilter> = OnceCell::new();
static CONFIG: OnceCell<Config> = OnceCell::new();
static KUBECONFIG: OnceCell<Option<String>> = OnceCell::new();
static FIXTURES: OnceCell<PathBuf> = OnceCell::new();

// Quiet until main has parsed the CLI; library unit tests never set it.
pub fn verbosity() -> &'static LevelFilter {
    VERBOSITY.get().unwrap_or(&LevelFilter::Off)
}

pub fn config() -> &'static Config {
    CONFIG.get().expect("config is not initialized")
}

/// The kubeconfig passed to every `oc` invocation, if one was resolved.
///
/// `None` means `oc` falls back to its own ambient configuration.
pub fn kubeconfig() -> Option<&'static str> {
    KUBECONFIG
        .get()
        .expect("kubeconfig is not initialized")
        .as_deref()
}

pub fn fixtures() -> &'static Path {
    FIXTURES.get().expect("fixtures path is not initialized")
}

pub fn set_global_verbosity(verbosity: LevelFilter) {
    VERBOSITY.set(verbosity).unwrap()
}

pub fn set_global_config(config: Config) {
    CONFIG.set(config).unwrap()
}

pub fn set_global_kubeconfig(kubeconfig: Option<String>) {
    KUBECONFIG.set(kubeconfig).unwrap()
}

pub fn set_global_fixtures(path: PathBuf) {
    FIXTURES.set(path).unwrap()
}

/// Captured result of a subprocess that is allowed to fail.
///
/// Helpers that classify failure output (not-found detection, curl exit
/// codes) need the streams and the status rather than an early bail.
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl Captured {
    /// Stdout and stderr concatenated, for substring classification.
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

pub trait CommandExt {
    fn script(&self) -> String;
    fn capture(&mut self) -> Result<Captured>;
    fn check_output(&mut self) -> Result<String>;
    fn check_run(&mut self) -> Result<()>;
}

impl CommandExt for Command {
    /// Render the command for log and error messages.
    fn script(&self) -> String {
        let mut script = self.get_program().to_string_lossy().into_owned();
        for arg in self.get_args() {
            script.push(' ');
            script.push_str(&arg.to_string_lossy());
        }
        script
    }

    fn capture(&mut self) -> Result<Captured> {
        trace!("running: {}", self.script());
        let output = self.output()?;
        Ok(Captured {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }

    fn check_output(&mut self) -> Result<String> {
        let output = self.capture()?;
        if output.success {
            Ok(output.stdout)
        } else {
            bail!(
                "command: {}\nfailed with exit code {:?}\n{}",
                self.script(),
                output.code,
                output.stderr
            )
        }
    }

    fn check_run(&mut self) -> Result<()> {
        let status = self.status()?;
        if status.success() {
            Ok(())
        } else {
            bail!(
                "command: {}\nfailed with exit code {:?}",
                self.script(),
                status.code()
            )
        }
    }

}

pub fn get_progress_bar() -> Result<ProgressBar> {
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.enable_steady_tick(Duration::from_millis(125));
    progress_bar.set_style(
        ProgressStyle::with_template("{spinner} {msg:.magenta.bold}")?
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["∙∙∙", "●∙∙", "∙●∙", "∙∙●", "∙∙∙"]),
    );

    Ok(progress_bar)
}
