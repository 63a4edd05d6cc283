//! Node tuning scenarios: a KubeletConfig rollout through the worker
//! MachineConfigPool, and a host-level kubelet verbosity check.

use anyhow::{Context as _, Result, ensure};

use crate::cluster::node;
use crate::cluster::poll::Poller;
use crate::cluster::resource::{self, remove_resource};
use crate::cluster::template::{Template, params};
use crate::suites::{Context, Spec, Tag, skip};

pub fn specs() -> Vec<Spec> {
    vec![
        Spec {
            suite: "nodes",
            name: "kubeletconfig-timeout-rolls-out",
            tags: &[Tag::Serial, Tag::Disruptive, Tag::LongDuration],
            mutates_cluster_scope: true,
            run: kubeletconfig_timeout_rolls_out,
        },
        Spec {
            suite: "nodes",
            name: "kubelet-runs-at-default-log-level",
            tags: &[],
            mutates_cluster_scope: false,
            run: kubelet_runs_at_default_log_level,
        },
        Spec {
            suite: "nodes",
            name: "worker-recovers-after-reboot",
            tags: &[Tag::Serial, Tag::Disruptive, Tag::LongDuration],
            mutates_cluster_scope: true,
            run: worker_recovers_after_reboot,
        },
    ]
}

const KUBELETCONFIG_TEMPLATE: &str = "nodes/kubeletconfig.yaml";
const POOL_LABEL: &str = "custom-kubelet=runtime-timeout";
const TIMEOUT_VALUE: &str = "4m0s";

/// Setting `runtimeRequestTimeout` through a KubeletConfig must roll the
/// worker pool and land in the rendered kubelet configuration on a node.
fn kubeletconfig_timeout_rolls_out(ctx: &mut Context) -> Result<()> {
    let workers = node::worker_nodes(&ctx.oc())?;
    let probe_node = workers.first().ok_or_else(|| skip("no worker nodes"))?.clone();

    step!("labeling the worker pool for the custom kubelet config");
    resource::label(&ctx.oc(), "machineconfigpool", "worker", POOL_LABEL)?;
    ctx.defer(|oc| {
        resource::label(oc, "machineconfigpool", "worker", "custom-kubelet-")?;
        node::wait_mcp_updated(oc, "worker", &Poller::secs(30, 1800))
    });

    let template = Template::fixture(KUBELETCONFIG_TEMPLATE)?;
    resource::create_from_template(
        &ctx.oc(),
        &template,
        &params([("NAME", "runtime-timeout"), ("TIMEOUT", TIMEOUT_VALUE)]),
    )?;
    ctx.defer(|oc| remove_resource(oc, &["kubeletconfig", "runtime-timeout"]));

    step!("waiting for the worker pool rollout (this reboots workers)");
    node::wait_mcp_updated(&ctx.oc(), "worker", &ctx.poller(30, 1800))?;

    let captured = ctx.oc().debug_node_chroot(
        &ctx.namespace,
        &probe_node,
        &["cat", "/etc/kubernetes/kubelet.conf"],
    )?;
    ensure!(
        captured.success,
        "failed to read kubelet.conf on {probe_node}: {}",
        captured.combined()
    );
    ensure!(
        captured.stdout.contains("runtimeRequestTimeout")
            && captured.stdout.contains(TIMEOUT_VALUE),
        "kubelet.conf on {probe_node} does not carry runtimeRequestTimeout={TIMEOUT_VALUE}"
    );
    Ok(())
}

/// The kubelet must run at its default verbosity (`--v=2`); higher levels
/// left over from debugging flood journals on production clusters.
fn kubelet_runs_at_default_log_level(ctx: &mut Context) -> Result<()> {
    let workers = node::worker_nodes(&ctx.oc())?;
    let probe_node = workers.first().ok_or_else(|| skip("no worker nodes"))?;

    let captured = ctx
        .oc()
        .debug_node_chroot(&ctx.namespace, probe_node, &["ps", "aux"])?;
    ensure!(
        captured.success,
        "failed to list processes on {probe_node}: {}",
        captured.combined()
    );

    let kubelet_line = captured
        .stdout
        .lines()
        .find(|line| line.contains("/usr/bin/kubelet"))
        .with_context(|| format!("no kubelet process visible on {probe_node}"))?;
    ensure!(
        kubelet_line.contains("--v=2"),
        "kubelet on {probe_node} does not run at --v=2: {kubelet_line}"
    );
    Ok(())
}

/// A rebooted worker must drop out of Ready and come back schedulable.
fn worker_recovers_after_reboot(ctx: &mut Context) -> Result<()> {
    let workers = node::worker_nodes(&ctx.oc())?;
    if workers.len() < 2 {
        return Err(skip("needs at least two workers to tolerate a reboot"));
    }
    let target = workers[0].clone();

    step!("rebooting {target}");
    node::reboot_node(&ctx.oc(), &ctx.namespace, &target)?;
    // shutdown is scheduled one minute out
    node::wait_node_status(&ctx.oc(), &target, false, &ctx.poller(10, 300))?;
    node::wait_node_status(&ctx.oc(), &target, true, &ctx.poller(10, 600))?;

    let recovered = node::ready_schedulable_nodes(&ctx.oc(), None)?;
    ensure!(
        recovered.contains(&target),
        "{target} is Ready but not schedulable after reboot"
    );
    Ok(())
}
