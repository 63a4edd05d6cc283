use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Args;

use crate::app;
use crate::cluster::poll::CancelToken;
use crate::suites::{self, Context, Spec, Tag, skip_reason};

/// Run specs against the target cluster
#[derive(Args, Debug)]
#[command()]
pub struct Cli {
    /// Only run specs whose `suite/name` id contains one of these substrings
    filters: Vec<String>,

    /// Only run specs from this suite
    #[arg(long)]
    suite: Option<String>,

    /// Include specs tagged disruptive (reboots, config rollouts)
    #[arg(long)]
    allow_disruptive: bool,

    /// Print the selected specs without running them
    #[arg(long)]
    dry_run: bool,

    /// Abort the whole run after this many minutes
    #[arg(long)]
    timeout: Option<u64>,
}

enum Outcome {
    Passed,
    Skipped(String),
    Failed(anyhow::Error),
}

impl Cli {
    pub fn exec(self) -> Result<()> {
        let specs = suites::all()?;
        let selected: Vec<&Spec> = specs
            .iter()
            .filter(|spec| self.suite.as_deref().is_none_or(|suite| spec.suite == suite))
            .filter(|spec| {
                self.filters.is_empty()
                    || self.filters.iter().any(|filter| spec.id().contains(filter))
            })
            .collect();
        if selected.is_empty() {
            bail!("no specs match the given filters");
        }

        if self.dry_run {
            for spec in &selected {
                display!("{}", spec.id());
            }
            return Ok(());
        }

        let cancel = CancelToken::default();
        if let Some(minutes) = self.timeout {
            let token = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(minutes * 60));
                warning!("run timed out after {minutes} minutes, cancelling");
                token.cancel();
            });
        }

        let started = Instant::now();
        let mut passed = 0usize;
        let mut skipped = 0usize;
        let mut failed = Vec::new();
        for spec in &selected {
            info!("[{}] {} starting", Utc::now().format("%H:%M:%SZ"), spec.id());
            let spec_started = Instant::now();
            let outcome = run_spec(spec, &cancel, self.allow_disruptive);
            let elapsed = spec_started.elapsed().as_secs();
            match outcome {
                Outcome::Passed => {
                    passed += 1;
                    success!("{} passed ({elapsed}s)", spec.id());
                }
                Outcome::Skipped(reason) => {
                    skipped += 1;
                    waiting!("{} skipped: {reason}", spec.id());
                }
                Outcome::Failed(error) => {
                    error!("{} failed ({elapsed}s): {error:#}", spec.id());
                    failed.push(spec.id());
                }
            }
            if cancel.is_cancelled() {
                warning!("run cancelled, not starting further specs");
                break;
            }
        }

        let total = started.elapsed().as_secs();
        display!(
            "ran {} of {} specs in {total}s: {passed} passed, {skipped} skipped, {} failed",
            passed + skipped + failed.len(),
            selected.len(),
            failed.len()
        );
        if !failed.is_empty() {
            bail!("failed specs: {}", failed.join(", "));
        }
        Ok(())
    }
}

fn run_spec(spec: &Spec, cancel: &CancelToken, allow_disruptive: bool) -> Outcome {
    if spec.has_tag(Tag::Disruptive) && !allow_disruptive {
        return Outcome::Skipped("disruptive (pass --allow-disruptive to run)".into());
    }

    let mut ctx = match Context::new(spec.suite, cancel.clone()) {
        Ok(ctx) => ctx,
        Err(error) => return Outcome::Failed(error),
    };
    let progress_bar = app::get_progress_bar().ok();
    if let Some(progress_bar) = &progress_bar {
        progress_bar.set_message(spec.id());
    }
    let result = (spec.run)(&mut ctx);
    if let Some(progress_bar) = &progress_bar {
        progress_bar.finish_and_clear();
    }
    match result {
        Ok(()) => Outcome::Passed,
        Err(error) => match skip_reason(&error) {
            Some(reason) => Outcome::Skipped(reason.to_string()),
            None => Outcome::Failed(error),
        },
    }
}
