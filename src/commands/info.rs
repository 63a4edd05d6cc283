use anyhow::Result;
use clap::Args;

use crate::cluster::net;
use crate::cluster::oc::Oc;
use crate::{app, config};

/// Show the tool configuration and what the target cluster looks like
#[derive(Args, Debug)]
#[command()]
pub struct Cli {}

impl Cli {
    pub fn exec(self) -> Result<()> {
        display!("config file: {}", config::path()?.display());
        display!(
            "kubeconfig: {}",
            app::kubeconfig().unwrap_or("<ambient oc configuration>")
        );
        display!("fixtures: {}", app::fixtures().display());

        let oc = Oc::cluster();
        match cluster_summary(&oc) {
            Ok(summary) => display!("{summary}"),
            Err(error) => warning!("cluster is not reachable: {error:#}"),
        }
        Ok(())
    }
}

fn cluster_summary(oc: &Oc) -> Result<String> {
    use crate::cluster::extract::{get_json, lookup};

    let version = oc.run("version").arg("--client=false").output()?;
    let infrastructure = get_json(oc, &["infrastructure", "cluster"])?;
    let platform = lookup(&infrastructure, "status.platformStatus.type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("None")
        .to_string();
    let network = get_json(oc, &["network.config", "cluster"])?;
    let network_type = lookup(&network, "status.networkType")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    let ip_stack = net::ip_stack(oc)?;

    Ok(format!(
        "platform: {platform}\nnetwork type: {network_type}\nip stack: {ip_stack}\n{version}"
    ))
}
