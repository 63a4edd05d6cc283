//! Disaster-recovery scenarios: taking an etcd snapshot with the
//! cluster-shipped backup script.

use anyhow::{Context as _, Result, ensure};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::cluster::node::{self, MASTER_LABEL};
use crate::suites::{Context, Spec, Tag, skip};

pub fn specs() -> Vec<Spec> {
    vec![Spec {
        suite: "recovery",
        name: "etcd-backup-produces-snapshot",
        tags: &[Tag::Serial, Tag::Disruptive],
        mutates_cluster_scope: true,
        run: etcd_backup_produces_snapshot,
    }]
}

const BACKUP_DIR: &str = "/home/core/assets/backup";

static SNAPSHOT_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/home/core/assets/backup/snapshot\S*\.db").expect("snapshot regex"));

/// Running `cluster-backup.sh` on a control-plane node must produce an
/// etcd snapshot and a static-pod resource archive in the backup directory.
fn etcd_backup_produces_snapshot(ctx: &mut Context) -> Result<()> {
    let masters = node::nodes_by_label(&ctx.oc(), MASTER_LABEL)?;
    if masters.is_empty() {
        return Err(skip("no control-plane nodes labeled master"));
    }

    // etcd may not be serving on every member; try each master until one
    // takes the snapshot
    let mut master = None;
    let mut output = String::new();
    for candidate in &masters {
        let namespace = ctx.namespace.clone();
        let cleanup_node = candidate.clone();
        ctx.defer(move |oc| {
            oc.debug_node_chroot(&namespace, &cleanup_node, &["rm", "-rf", BACKUP_DIR])?;
            Ok(())
        });

        step!("running cluster-backup.sh on {candidate}");
        let captured = ctx.oc().debug_node_chroot(
            &ctx.namespace,
            candidate,
            &["/usr/local/bin/cluster-backup.sh", BACKUP_DIR],
        )?;
        output = captured.combined();
        if captured.success && output.contains("Snapshot saved at") {
            master = Some(candidate.clone());
            break;
        }
        warning!("cluster-backup.sh on {candidate} did not save a snapshot");
    }
    let master =
        master.with_context(|| format!("no master produced a snapshot; last output: {output}"))?;

    let snapshot = SNAPSHOT_PATH
        .find(&output)
        .map(|found| found.as_str().to_string())
        .with_context(|| format!("backup output names no snapshot file: {output}"))?;

    let listing = ctx
        .oc()
        .debug_node_chroot(&ctx.namespace, &master, &["ls", BACKUP_DIR])?;
    ensure!(
        listing.success && listing.stdout.contains("snapshot"),
        "backup directory on {master} has no snapshot: {}",
        listing.combined()
    );
    ensure!(
        listing.stdout.contains("static_kuberesources"),
        "backup directory on {master} has no static-pod resource archive: {}",
        listing.combined()
    );

    step!("etcd snapshot written to {snapshot}");
    Ok(())
}
