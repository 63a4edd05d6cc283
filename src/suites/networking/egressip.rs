//! Egress-IP scenarios: assignment convergence, duplicate-IP contention,
//! failover, recreate, and OVN northbound-database consistency.

use anyhow::{Context as _, Result, ensure};

use crate::cluster::extract::{self, parse_lr_policies, parse_nat_records};
use crate::cluster::net::{self, Addrs};
use crate::cluster::node::{self, EGRESS_ASSIGNABLE_LABEL};
use crate::cluster::poll::Progress;
use crate::cluster::probe;
use crate::cluster::resource::{self, remove_resource};
use crate::cluster::template::{Template, params};
use crate::suites::{Context, Spec, Tag, skip};
use crate::util;

pub fn specs() -> Vec<Spec> {
    vec![
        Spec {
            suite: "networking",
            name: "egressip-single-assignment-converges",
            tags: &[Tag::Serial],
            mutates_cluster_scope: true,
            run: single_assignment_converges,
        },
        Spec {
            suite: "networking",
            name: "egressip-warns-without-assignable-nodes",
            tags: &[Tag::Serial],
            mutates_cluster_scope: true,
            run: warns_without_assignable_nodes,
        },
        Spec {
            suite: "networking",
            name: "egressip-duplicate-ip-stays-unassigned",
            tags: &[Tag::Serial],
            mutates_cluster_scope: true,
            run: duplicate_ip_stays_unassigned,
        },
        Spec {
            suite: "networking",
            name: "egressip-recreate-same-name-reconverges",
            tags: &[Tag::Serial],
            mutates_cluster_scope: true,
            run: recreate_same_name_reconverges,
        },
        Spec {
            suite: "networking",
            name: "egressip-fails-over-on-label-removal",
            tags: &[Tag::Serial, Tag::LongDuration],
            mutates_cluster_scope: true,
            run: fails_over_on_label_removal,
        },
        Spec {
            suite: "networking",
            name: "egressip-northbound-db-tracks-pod-scale-down",
            tags: &[Tag::Serial, Tag::Disruptive],
            mutates_cluster_scope: true,
            run: northbound_db_tracks_pod_scale_down,
        },
    ]
}

const EGRESS_TEMPLATE: &str = "networking/egressip.yaml";
const PING_POD_TEMPLATE: &str = "networking/ping-pod.yaml";
const TEST_RC_TEMPLATE: &str = "networking/test-rc.yaml";
const NS_LABEL: (&str, &str) = ("org", "qe");
const OVN_NAMESPACE: &str = "openshift-ovn-kubernetes";
const OVN_CONTAINER: &str = "ovnkube-controller";
const POD_PORT: u16 = 8080;

/// Cloud platforms whose machine-network subnets support moving egress
/// IPs between nodes.
const CLOUD_PLATFORMS: &[&str] = &["aws", "gcp", "azure"];

fn preflight(ctx: &Context) -> Result<()> {
    ctx.require_ovn()?;
    ctx.require_platform(CLOUD_PLATFORMS)
}

/// Generated cluster-scoped object name; egress IPs are cluster-scoped so
/// reruns must not collide.
fn egress_name(hint: &str) -> String {
    format!("egressip-{hint}-{}", util::random_suffix())
}

/// One ready worker to host the egress IP.
fn egress_node(ctx: &Context) -> Result<String> {
    node::worker_nodes(&ctx.oc())?
        .into_iter()
        .next()
        .ok_or_else(|| skip("no schedulable workers"))
}

/// Two ready workers on the same primary subnet. A free IP discovered on
/// one node's subnet cannot be hosted by a worker in a different subnet
/// (multi-AZ clusters), so specs that move an IP between nodes skip when
/// no such pair exists.
fn egress_node_pair(ctx: &Context) -> Result<Vec<String>> {
    let oc = ctx.oc();
    let mut subnets = Vec::new();
    for worker in node::worker_nodes(&oc)? {
        let cidr = net::node_primary_cidr(&oc, &worker)?;
        subnets.push((worker, net::subnet_of(&cidr)?));
    }
    net::same_subnet_pair(&subnets)
        .map(Vec::from)
        .ok_or_else(|| skip("no two schedulable workers share a primary subnet"))
}

/// Label a node egress-assignable and arrange for the label to come off
/// again during teardown.
fn label_egress_node(ctx: &mut Context, name: &str) -> Result<()> {
    node::label_node(&ctx.oc(), name, &format!("{EGRESS_ASSIGNABLE_LABEL}=true"))?;
    let name = name.to_string();
    ctx.defer(move |oc| node::unlabel_node(oc, &name, EGRESS_ASSIGNABLE_LABEL));
    Ok(())
}

/// Label the spec namespace so it matches the egress object's selector.
fn label_namespace(ctx: &Context) -> Result<()> {
    resource::label(
        &ctx.oc(),
        "namespace",
        &ctx.namespace,
        &format!("{}={}", NS_LABEL.0, NS_LABEL.1),
    )
}

/// Create an egress-IP object selecting the spec namespace, deferring its
/// deletion.
fn create_egress_object(ctx: &mut Context, name: &str, egress_ip: &str) -> Result<()> {
    let template = Template::fixture(EGRESS_TEMPLATE)?;
    resource::apply_from_template(
        &ctx.oc(),
        &template,
        &params([
            ("NAME", name),
            ("EGRESSIP", egress_ip),
            ("NSLABELKEY", NS_LABEL.0),
            ("NSLABELVALUE", NS_LABEL.1),
        ]),
    )?;
    let name = name.to_string();
    ctx.defer(move |oc| remove_resource(oc, &["egressip", &name]));
    Ok(())
}

fn ipv4_of(addrs: &Addrs) -> &str {
    addrs
        .iter()
        .find(|ip| !ip.contains(':'))
        .unwrap_or(&addrs.primary)
}

/// One configured IP plus one assignable node converge to exactly one
/// `{egressIP, node}` assignment.
fn single_assignment_converges(ctx: &mut Context) -> Result<()> {
    preflight(ctx)?;
    let egress_node = egress_node(ctx)?;
    let free = net::find_free_ips(&ctx.oc(), &egress_node, 1)?;

    step!("labeling {egress_node} egress-assignable");
    label_egress_node(ctx, &egress_node)?;
    label_namespace(ctx)?;

    let name = egress_name("single");
    create_egress_object(ctx, &name, &free[0])?;

    let assigned = extract::assigned_egress_ips(&ctx.oc(), &name, &ctx.poller(10, 180))?;
    ensure!(
        assigned.len() == 1,
        "expected exactly one assignment, got {assigned:?}"
    );
    ensure!(
        assigned[0].egress_ip == free[0],
        "assigned IP {} is not the configured {}",
        assigned[0].egress_ip,
        free[0]
    );
    ensure!(
        assigned[0].node == egress_node,
        "assigned to {}, expected the only labeled node {egress_node}",
        assigned[0].node
    );

    // the datapath toward the egress node must still be intact
    let template = Template::fixture(PING_POD_TEMPLATE)?;
    resource::create_from_template(
        &ctx.oc(),
        &template,
        &params([("NAME", "hello-pod"), ("NAMESPACE", ctx.namespace.as_str())]),
    )?;
    resource::wait_pod_ready(&ctx.oc(), &ctx.namespace, "hello-pod", &ctx.poller(5, 120))?;
    for host in net::node_addrs(&ctx.oc(), &egress_node)?.iter() {
        ensure!(
            probe::ping_from_pod(&ctx.oc(), &ctx.namespace, "hello-pod", host)?,
            "pod cannot ping the egress node at {host}"
        );
    }
    // and back: the egress node's host network must reach the pod
    for host in net::pod_addrs(&ctx.oc(), &ctx.namespace, "hello-pod")?.iter() {
        let outcome =
            probe::curl_from_node(&ctx.oc(), &ctx.namespace, &egress_node, host, POD_PORT)?;
        ensure!(
            outcome.reached(),
            "egress node {egress_node} cannot curl the pod at {host}: {outcome:?}"
        );
    }
    Ok(())
}

/// With zero assignable nodes the status stays empty and a
/// `NoMatchingNodeFound` warning event fires; labeling a node afterwards
/// converges the assignment.
fn warns_without_assignable_nodes(ctx: &mut Context) -> Result<()> {
    preflight(ctx)?;
    let labeled = node::nodes_by_label(&ctx.oc(), EGRESS_ASSIGNABLE_LABEL)?;
    if !labeled.is_empty() {
        return Err(skip(format!(
            "egress-assignable labels already present on {labeled:?}"
        )));
    }
    let egress_node = egress_node(ctx)?;
    let free = net::find_free_ips(&ctx.oc(), &egress_node, 1)?;

    label_namespace(ctx)?;
    let name = egress_name("nonode");
    create_egress_object(ctx, &name, &free[0])?;

    ctx.poller(10, 100)
        .poll("NoMatchingNodeFound warning event", || {
            if extract::has_event_reason(&ctx.oc(), "default", "NoMatchingNodeFound")? {
                Ok(Progress::Ready(()))
            } else {
                Ok(Progress::pending("no warning event yet"))
            }
        })?;

    let status = extract::egress_ip_status(&ctx.oc(), &name)?;
    ensure!(
        status.is_empty(),
        "status must stay empty without assignable nodes, got {status:?}"
    );

    step!("labeling {egress_node}; the pending assignment must converge");
    label_egress_node(ctx, &egress_node)?;
    let assigned = extract::assigned_egress_ips(&ctx.oc(), &name, &ctx.poller(10, 180))?;
    ensure!(assigned.len() == 1, "expected one assignment, got {assigned:?}");
    Ok(())
}

/// Two objects requesting the same IP: only one gets status, the other
/// stays empty until patched to a distinct free IP.
fn duplicate_ip_stays_unassigned(ctx: &mut Context) -> Result<()> {
    preflight(ctx)?;
    let nodes = egress_node_pair(ctx)?;
    let free = net::find_free_ips(&ctx.oc(), &nodes[0], 2)?;
    for name in &nodes {
        label_egress_node(ctx, name)?;
    }
    label_namespace(ctx)?;

    let first = egress_name("dup-a");
    create_egress_object(ctx, &first, &free[0])?;
    let assigned = extract::assigned_egress_ips(&ctx.oc(), &first, &ctx.poller(10, 180))?;
    ensure!(assigned.len() == 1, "first object should converge, got {assigned:?}");

    let second = egress_name("dup-b");
    create_egress_object(ctx, &second, &free[0])?;
    let status = extract::egress_ip_status(&ctx.oc(), &second)?;
    ensure!(
        status.is_empty(),
        "second object must not share the already-assigned IP, got {status:?}"
    );

    step!("patching {second} to the free IP {}", free[1]);
    resource::patch_resource(
        &ctx.oc(),
        &format!("egressip/{second}"),
        &format!(r#"{{"spec":{{"egressIPs":["{}"]}}}}"#, free[1]),
    )?;
    let assigned = extract::assigned_egress_ips(&ctx.oc(), &second, &ctx.poller(10, 180))?;
    ensure!(
        assigned.len() == 1 && assigned[0].egress_ip == free[1],
        "patched object should converge on {}, got {assigned:?}",
        free[1]
    );

    let first_status = extract::egress_ip_status(&ctx.oc(), &first)?;
    ensure!(
        first_status.len() == 1 && first_status[0].egress_ip == free[0],
        "first object must keep its assignment, got {first_status:?}"
    );
    Ok(())
}

/// Deleting and recreating the same object name reconverges identically;
/// no stale state blocks reassignment.
fn recreate_same_name_reconverges(ctx: &mut Context) -> Result<()> {
    preflight(ctx)?;
    let egress_node = egress_node(ctx)?;
    let free = net::find_free_ips(&ctx.oc(), &egress_node, 1)?;
    label_egress_node(ctx, &egress_node)?;
    label_namespace(ctx)?;

    let name = egress_name("recreate");
    create_egress_object(ctx, &name, &free[0])?;
    let before = extract::assigned_egress_ips(&ctx.oc(), &name, &ctx.poller(10, 180))?;
    ensure!(before.len() == 1, "expected one assignment, got {before:?}");

    step!("deleting and recreating {name}");
    remove_resource(&ctx.oc(), &["egressip", &name])?;
    create_egress_object(ctx, &name, &free[0])?;

    let after = extract::assigned_egress_ips(&ctx.oc(), &name, &ctx.poller(10, 180))?;
    ensure!(
        after == before,
        "recreated object converged differently: {before:?} then {after:?}"
    );
    Ok(())
}

/// Removing the egress-assignable label from the hosting node moves the
/// assignment to the remaining labeled node.
fn fails_over_on_label_removal(ctx: &mut Context) -> Result<()> {
    preflight(ctx)?;
    let nodes = egress_node_pair(ctx)?;
    let free = net::find_free_ips(&ctx.oc(), &nodes[0], 1)?;
    for name in &nodes {
        label_egress_node(ctx, name)?;
    }
    label_namespace(ctx)?;

    let name = egress_name("failover");
    create_egress_object(ctx, &name, &free[0])?;
    let assigned = extract::assigned_egress_ips(&ctx.oc(), &name, &ctx.poller(10, 180))?;
    ensure!(assigned.len() == 1, "expected one assignment, got {assigned:?}");
    let hosting = assigned[0].node.clone();
    let survivor = nodes
        .iter()
        .find(|node| **node != hosting)
        .context("no second labeled node")?
        .clone();

    step!("unlabeling hosting node {hosting}; expecting failover to {survivor}");
    node::unlabel_node(&ctx.oc(), &hosting, EGRESS_ASSIGNABLE_LABEL)?;

    let oc = ctx.oc();
    let moved = ctx
        .poller(10, 300)
        .poll("egress IP failover", || {
            let status = extract::egress_ip_status(&oc, &name)?;
            match status.as_slice() {
                [one] if one.node == survivor => Ok(Progress::Ready(one.clone())),
                other => Ok(Progress::Pending(format!("status is {other:?}"))),
            }
        })?;
    ensure!(
        moved.egress_ip == free[0],
        "failover changed the IP: {moved:?}"
    );
    Ok(())
}

/// After scaling the matched pods down to one, the northbound database
/// must list exactly one reroute policy and one SNAT for the survivor.
fn northbound_db_tracks_pod_scale_down(ctx: &mut Context) -> Result<()> {
    preflight(ctx)?;
    let egress_node = egress_node(ctx)?;
    let free = net::find_free_ips(&ctx.oc(), &egress_node, 1)?;
    label_egress_node(ctx, &egress_node)?;
    label_namespace(ctx)?;

    step!("creating test pods");
    let template = Template::fixture(TEST_RC_TEMPLATE)?;
    resource::apply_from_template(
        &ctx.oc(),
        &template,
        &params([("NAMESPACE", ctx.namespace.as_str()), ("REPLICAS", "4")]),
    )?;
    resource::wait_pods_with_label_ready(
        &ctx.oc(),
        &ctx.namespace,
        "name=test-pods",
        &ctx.poller(10, 180),
    )?;

    let name = egress_name("nbdb");
    create_egress_object(ctx, &name, &free[0])?;
    let assigned = extract::assigned_egress_ips(&ctx.oc(), &name, &ctx.poller(10, 180))?;
    ensure!(assigned.len() == 1, "expected one assignment, got {assigned:?}");

    // pod addresses before the scale-down; their reroute entries must be
    // withdrawn once the pods are gone
    let mut initial = Vec::new();
    let listing = extract::get_json(&ctx.oc_ns(), &["pods", "-l", "name=test-pods"])?;
    if let Some(items) = extract::lookup(&listing, "items").and_then(serde_json::Value::as_array) {
        for item in items {
            if let Some(pod) =
                extract::lookup(item, "metadata.name").and_then(serde_json::Value::as_str)
            {
                let addrs = net::pod_addrs(&ctx.oc(), &ctx.namespace, pod)?;
                initial.push((pod.to_string(), ipv4_of(&addrs).to_string()));
            }
        }
    }

    step!("scaling test pods down to one");
    ctx.oc_ns()
        .run("scale")
        .args(["rc", "test-rc", "--replicas=1"])
        .execute()?;
    let oc_ns = ctx.oc_ns();
    let namespace = ctx.namespace.clone();
    let survivor = ctx.poller(10, 120).poll("scale-down to one pod", || {
        let value = extract::get_json(&oc_ns, &["pods", "-l", "name=test-pods"])?;
        let names: Vec<String> = extract::lookup(&value, "items")
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| {
                        extract::lookup(item, "metadata.deletionTimestamp").is_none()
                    })
                    .filter_map(|item| {
                        extract::lookup(item, "metadata.name")
                            .and_then(serde_json::Value::as_str)
                    })
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        match names.as_slice() {
            [one] => Ok(Progress::Ready(one.clone())),
            names => Ok(Progress::Pending(format!("{} pods remain", names.len()))),
        }
    })?;

    let survivor_addrs = net::pod_addrs(&ctx.oc(), &namespace, &survivor)?;
    let survivor_ip = ipv4_of(&survivor_addrs).to_string();
    let departed: Vec<String> = initial
        .iter()
        .filter(|(pod, _)| *pod != survivor)
        .map(|(_, ip)| ip.clone())
        .collect();
    let survivor_node = extract::lookup(
        &extract::get_json(&ctx.oc(), &["pod", "-n", &namespace, &survivor])?,
        "spec.nodeName",
    )
    .and_then(serde_json::Value::as_str)
    .context("surviving pod has no node")?
    .to_string();

    let ovn_pod = node::ovnkube_node_pod(&ctx.oc(), &survivor_node)?;
    let oc = ctx.oc();
    ctx.poller(10, 120).poll("reroute policy sync", || {
        let captured = oc.exec_in_pod(
            OVN_NAMESPACE,
            &ovn_pod,
            Some(OVN_CONTAINER),
            "ovn-nbctl lr-policy-list ovn_cluster_router",
        )?;
        let policies = parse_lr_policies(&captured.stdout);
        let reroutes = extract::egress_reroutes(&policies, &[survivor_ip.as_str()]).len();
        let stale = extract::egress_reroutes(&policies, &departed).len();
        if reroutes == 1 && stale == 0 {
            Ok(Progress::Ready(()))
        } else {
            Ok(Progress::Pending(format!(
                "{reroutes} reroute entries for survivor, {stale} stale"
            )))
        }
    })?;

    let egress_pod = node::ovnkube_node_pod(&ctx.oc(), &egress_node)?;
    let snat_script = format!(
        "ovn-nbctl --format=csv --no-heading \
         --columns=external_ip,logical_ip,external_ids find nat external_ids:name={name}"
    );
    ctx.poller(10, 120).poll("SNAT record sync", || {
        let captured = oc.exec_in_pod(OVN_NAMESPACE, &egress_pod, Some(OVN_CONTAINER), &snat_script)?;
        let records = parse_nat_records(&captured.stdout);
        let matched = records
            .iter()
            .filter(|record| record.name == name && record.logical_ip == survivor_ip)
            .count();
        if matched == 1 && records.len() == 1 {
            Ok(Progress::Ready(()))
        } else {
            Ok(Progress::Pending(format!(
                "{matched} matching of {} total SNAT records",
                records.len()
            )))
        }
    })?;

    // the egress path itself must still carry traffic
    probe::expect_pod_to_pod(
        &ctx.oc(),
        &namespace,
        &survivor,
        &namespace,
        &survivor,
        POD_PORT,
        true,
    )?;
    Ok(())
}
