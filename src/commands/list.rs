use anyhow::Result;
use clap::Args;
use itertools::Itertools;

use crate::suites::{self, Spec};

/// List the registered specs, grouped by suite
#[derive(Args, Debug)]
#[command()]
pub struct Cli {
    /// Only list specs from this suite
    #[arg(long)]
    suite: Option<String>,
}

impl Cli {
    pub fn exec(self) -> Result<()> {
        let specs = suites::all()?;
        let specs: Vec<&Spec> = specs
            .iter()
            .filter(|spec| self.suite.as_deref().is_none_or(|suite| spec.suite == suite))
            .collect();

        for (suite, members) in &specs.iter().chunk_by(|spec| spec.suite) {
            display!("{suite}");
            for spec in members {
                let tags = spec.tags.iter().map(ToString::to_string).join(", ");
                if tags.is_empty() {
                    display!("  {}", spec.name);
                } else {
                    display!("  {} [{tags}]", spec.name);
                }
            }
        }
        Ok(())
    }
}
