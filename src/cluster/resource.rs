use anyhow::{Result, bail};
use itertools::Itertools;

use super::extract;
use super::oc::{Oc, not_found};
use super::poll::{Poller, Progress};
use super::template::{Template, TemplateParams};

/// Render a template and submit it with `oc apply`.
///
/// Rendering problems (missing placeholders, malformed YAML) are fatal.
/// The submission itself is retried on a short budget to absorb transient
/// CLI/API flakiness; this retry is separate from any convergence waiting
/// the caller does afterwards.
pub fn apply_from_template(oc: &Oc, template: &Template, params: &TemplateParams) -> Result<()> {
    submit_from_template(oc, "apply", template, params)
}

/// Like [`apply_from_template`] but with `oc create`.
pub fn create_from_template(oc: &Oc, template: &Template, params: &TemplateParams) -> Result<()> {
    submit_from_template(oc, "create", template, params)
}

fn submit_from_template(
    oc: &Oc,
    verb: &str,
    template: &Template,
    params: &TemplateParams,
) -> Result<()> {
    let file = template.render_to_file(params)?;
    let path = file.path().to_string_lossy().into_owned();

    Poller::secs(3, 15).poll("manifest submission", || {
        Progress::retry_on_error(
            oc.run(verb)
                .args(["-f", &path])
                .execute()
                .map(Progress::Ready),
        )
    })
}

/// Delete a resource and wait until a subsequent `get` reports not-found.
///
/// Idempotent: deleting an already-absent resource succeeds, so cleanup
/// paths can call this unconditionally and twice in a row.
pub fn remove_resource(oc: &Oc, args: &[&str]) -> Result<()> {
    let deleted = oc.run("delete").args(args).capture()?;
    if !deleted.success {
        let output = deleted.combined();
        if not_found(&output) {
            debug!("resource {} is already deleted", args.join(" "));
            return Ok(());
        }
        bail!("failed to delete {}: {output}", args.join(" "));
    }

    Poller::secs(3, 120).poll(&format!("deletion of {}", args.join(" ")), || {
        let got = oc.run("get").args(args).capture()?;
        if !got.success && not_found(&got.combined()) {
            Ok(Progress::Ready(()))
        } else if got.success {
            Ok(Progress::pending("resource still present"))
        } else {
            bail!("failed to get {}: {}", args.join(" "), got.combined())
        }
    })
}

/// Merge-patch a resource, e.g. `patch_resource(&oc, "egressip/x", r#"{...}"#)`.
pub fn patch_resource(oc: &Oc, target: &str, patch: &str) -> Result<()> {
    oc.run("patch")
        .args([target, "-p", patch, "--type=merge"])
        .execute()
}

/// Apply a `key=value` label (or remove with `key-`).
pub fn label(oc: &Oc, kind: &str, name: &str, label: &str) -> Result<()> {
    oc.run("label")
        .args([kind, name, label, "--overwrite"])
        .execute()
}

/// Wait for a cluster operator's conditions to reach the expected
/// `(type, status)` pairs, e.g. Available=True/Progressing=False/Degraded=False.
pub fn wait_co_becomes(
    oc: &Oc,
    name: &str,
    poller: &Poller,
    expected: &[(&str, &str)],
) -> Result<()> {
    poller.poll(&format!("clusteroperator/{name} conditions"), || {
        let conditions = extract::cluster_operator_conditions(oc, name)?;
        let mismatched = expected
            .iter()
            .filter(|(kind, status)| conditions.get(*kind).map(String::as_str) != Some(*status))
            .map(|(kind, status)| {
                format!(
                    "{kind}={} (want {status})",
                    conditions.get(*kind).map_or("<absent>", String::as_str)
                )
            })
            .collect::<Vec<_>>();

        if mismatched.is_empty() {
            Ok(Progress::Ready(()))
        } else {
            Ok(Progress::Pending(mismatched.into_iter().join(", ")))
        }
    })
}

/// Wait until the named pod reports a ready phase.
pub fn wait_pod_ready(oc: &Oc, namespace: &str, pod: &str, poller: &Poller) -> Result<()> {
    poller.poll(&format!("pod {namespace}/{pod} readiness"), || {
        let value = extract::get_json(oc, &["pod", "-n", namespace, pod])?;
        let phase = extract::lookup(&value, "status.phase")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if matches!(phase, "Running" | "Succeeded") {
            Ok(Progress::Ready(()))
        } else {
            Ok(Progress::Pending(format!("phase is {phase:?}")))
        }
    })
}

/// Wait until every pod matching the label selector is running.
pub fn wait_pods_with_label_ready(
    oc: &Oc,
    namespace: &str,
    selector: &str,
    poller: &Poller,
) -> Result<()> {
    poller.poll(&format!("pods with label {selector} in {namespace}"), || {
        let value = extract::get_json(oc, &["pods", "-n", namespace, "-l", selector])?;
        let items = extract::lookup(&value, "items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if items.is_empty() {
            return Ok(Progress::pending("no pods found yet"));
        }

        let pending = items
            .iter()
            .filter(|item| {
                extract::lookup(item, "status.phase").and_then(|v| v.as_str()) != Some("Running")
            })
            .count();
        if pending == 0 {
            Ok(Progress::Ready(()))
        } else {
            Ok(Progress::Pending(format!(
                "{pending} of {} pods not running",
                items.len()
            )))
        }
    })
}
