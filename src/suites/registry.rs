//! Image-registry scenarios: operator health and the pruner cron schedule.

use anyhow::{Result, ensure};
use serde_json::Value;

use crate::cluster::extract::{get_json, lookup};
use crate::cluster::oc::not_found;
use crate::cluster::resource::{self, wait_co_becomes};
use crate::suites::{Context, Spec, Tag, skip};

pub fn specs() -> Vec<Spec> {
    vec![
        Spec {
            suite: "registry",
            name: "operator-reports-healthy",
            tags: &[],
            mutates_cluster_scope: false,
            run: operator_reports_healthy,
        },
        Spec {
            suite: "registry",
            name: "pruner-schedule-is-configurable",
            tags: &[Tag::Serial],
            mutates_cluster_scope: true,
            run: pruner_schedule_is_configurable,
        },
    ]
}

const HEALTHY: &[(&str, &str)] = &[
    ("Available", "True"),
    ("Progressing", "False"),
    ("Degraded", "False"),
];

/// Bail out as a skip when the image-registry operator is not installed
/// (bare-metal and external-registry clusters run without it).
fn require_registry_operator(ctx: &Context) -> Result<()> {
    let captured = ctx
        .oc()
        .run("get")
        .args(["clusteroperator", "image-registry"])
        .capture()?;
    if !captured.success && not_found(&captured.combined()) {
        return Err(skip("image-registry operator is not installed"));
    }
    Ok(())
}

fn operator_reports_healthy(ctx: &mut Context) -> Result<()> {
    require_registry_operator(ctx)?;
    wait_co_becomes(&ctx.oc(), "image-registry", &ctx.poller(10, 180), HEALTHY)
}

/// Patching the pruner's cron schedule must stick in its spec and keep the
/// operator healthy; the schedule is reverted afterwards.
fn pruner_schedule_is_configurable(ctx: &mut Context) -> Result<()> {
    require_registry_operator(ctx)?;

    let pruner = get_json(&ctx.oc(), &["imagepruner", "cluster"])?;
    let original = lookup(&pruner, "spec.schedule")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    step!("setting the pruner schedule to hourly");
    resource::patch_resource(
        &ctx.oc(),
        "imagepruner/cluster",
        r#"{"spec":{"schedule":"10 * * * *"}}"#,
    )?;
    ctx.defer(move |oc| {
        resource::patch_resource(
            oc,
            "imagepruner/cluster",
            &format!(r#"{{"spec":{{"schedule":"{original}"}}}}"#),
        )
    });

    let patched = get_json(&ctx.oc(), &["imagepruner", "cluster"])?;
    let schedule = lookup(&patched, "spec.schedule").and_then(Value::as_str);
    ensure!(
        schedule == Some("10 * * * *"),
        "pruner schedule did not stick, got {schedule:?}"
    );

    wait_co_becomes(&ctx.oc(), "image-registry", &ctx.poller(10, 300), HEALTHY)
}
