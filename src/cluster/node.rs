use anyhow::{Context, Result, bail};
use serde_json::Value;

use super::extract::{get_json, lookup};
use super::oc::{Oc, not_found};
use super::poll::{Poller, Progress};
use super::resource;

/// Label OVN-Kubernetes watches for egress-IP placement.
pub const EGRESS_ASSIGNABLE_LABEL: &str = "k8s.ovn.org/egress-assignable";

pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";
pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";

/// Names of nodes that are Ready and schedulable, optionally filtered by a
/// label selector.
pub fn ready_schedulable_nodes(oc: &Oc, selector: Option<&str>) -> Result<Vec<String>> {
    let oc = oc.without_namespace();
    let mut args = vec!["nodes"];
    if let Some(selector) = selector {
        args.extend(["-l", selector]);
    }
    let value = get_json(&oc, &args)?;
    let items = lookup(&value, "items")
        .and_then(Value::as_array)
        .context("node listing has no items")?;

    Ok(items
        .iter()
        .filter(|node| {
            lookup(node, "spec.unschedulable").and_then(Value::as_bool) != Some(true)
                && ready_condition(node).as_deref() == Some("True")
        })
        .filter_map(|node| lookup(node, "metadata.name").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

pub fn worker_nodes(oc: &Oc) -> Result<Vec<String>> {
    ready_schedulable_nodes(oc, Some(WORKER_LABEL))
}

/// Master node names, ready or not (disaster-recovery walks them all).
pub fn nodes_by_label(oc: &Oc, selector: &str) -> Result<Vec<String>> {
    let value = get_json(&oc.without_namespace(), &["nodes", "-l", selector])?;
    Ok(lookup(&value, "items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|node| lookup(node, "metadata.name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

fn ready_condition(node: &Value) -> Option<String> {
    lookup(node, "status.conditions")
        .and_then(Value::as_array)?
        .iter()
        .find(|condition| lookup(condition, "type").and_then(Value::as_str) == Some("Ready"))
        .and_then(|condition| lookup(condition, "status").and_then(Value::as_str))
        .map(str::to_string)
}

pub fn label_node(oc: &Oc, node: &str, label: &str) -> Result<()> {
    resource::label(&oc.without_namespace(), "node", node, label)
}

/// Remove a label (`key-` form). A label that is already gone is fine;
/// specs unlabel eagerly and the deferred cleanup runs again at teardown.
pub fn unlabel_node(oc: &Oc, node: &str, key: &str) -> Result<()> {
    let captured = oc
        .without_namespace()
        .run("label")
        .args(["node", node, &format!("{key}-"), "--overwrite"])
        .capture()?;
    if captured.success || not_found(&captured.combined()) {
        Ok(())
    } else {
        bail!("failed to unlabel node {node}: {}", captured.combined())
    }
}

/// Reboot a node from its own host namespace; takes effect after a minute
/// so the debug pod itself exits cleanly.
pub fn reboot_node(oc: &Oc, namespace: &str, node: &str) -> Result<()> {
    let captured = oc.debug_node_chroot(namespace, node, &["shutdown", "-r", "+1"])?;
    if captured.success {
        Ok(())
    } else {
        bail!("failed to schedule reboot of {node}: {}", captured.combined())
    }
}

/// Wait for a node's Ready condition to reach the expected state.
///
/// `NotReady` matches both `False` and `Unknown` (a rebooting kubelet
/// stops reporting before it reports failure).
pub fn wait_node_status(oc: &Oc, node: &str, expected_ready: bool, poller: &Poller) -> Result<()> {
    let expected = if expected_ready { "Ready" } else { "NotReady" };
    poller.poll(&format!("node {node} to become {expected}"), || {
        let value = get_json(&oc.without_namespace(), &["node", node])?;
        let status = ready_condition(&value).unwrap_or_else(|| "Unknown".into());
        let matches = if expected_ready {
            status == "True"
        } else {
            status == "False" || status == "Unknown"
        };
        if matches {
            Ok(Progress::Ready(()))
        } else {
            Ok(Progress::Pending(format!("Ready condition is {status}")))
        }
    })
}

/// Wait for a MachineConfigPool to finish a rollout: Updated=True and
/// Updating=False.
pub fn wait_mcp_updated(oc: &Oc, pool: &str, poller: &Poller) -> Result<()> {
    poller.poll(&format!("machineconfigpool {pool} rollout"), || {
        let value = get_json(&oc.without_namespace(), &["machineconfigpool", pool])?;
        let condition = |kind: &str| -> Option<&str> {
            lookup(&value, "status.conditions")
                .and_then(Value::as_array)?
                .iter()
                .find(|c| lookup(c, "type").and_then(Value::as_str) == Some(kind))
                .and_then(|c| lookup(c, "status").and_then(Value::as_str))
        };
        let updated = condition("Updated");
        let updating = condition("Updating");
        if updated == Some("True") && updating == Some("False") {
            Ok(Progress::Ready(()))
        } else {
            Ok(Progress::Pending(format!(
                "Updated={} Updating={}",
                updated.unwrap_or("<absent>"),
                updating.unwrap_or("<absent>")
            )))
        }
    })
}

/// The ovnkube-node pod running on the given node.
pub fn ovnkube_node_pod(oc: &Oc, node: &str) -> Result<String> {
    let field = format!("spec.nodeName={node}");
    let value = get_json(
        &oc.without_namespace(),
        &[
            "pods",
            "-n",
            "openshift-ovn-kubernetes",
            "-l",
            "app=ovnkube-node",
            "--field-selector",
            &field,
        ],
    )?;
    lookup(&value, "items.0.metadata.name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("no ovnkube-node pod found on node {node}"))
}
