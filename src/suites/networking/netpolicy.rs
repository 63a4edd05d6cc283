//! Network-policy scenarios: a default-deny policy must block traffic on
//! every address family, and an allow-same-namespace policy must restore it.

use anyhow::Result;

use crate::cluster::net;
use crate::cluster::oc::Oc;
use crate::cluster::probe;
use crate::cluster::resource::{self, remove_resource};
use crate::cluster::template::{Template, params};
use crate::suites::{Context, Spec};

pub fn specs() -> Vec<Spec> {
    vec![Spec {
        suite: "networking",
        name: "default-deny-then-allow-same-namespace",
        tags: &[],
        mutates_cluster_scope: false,
        run: default_deny_then_allow_same_namespace,
    }]
}

const PING_POD_TEMPLATE: &str = "networking/ping-pod.yaml";
const DENY_TEMPLATE: &str = "networking/netpolicy-deny-all.yaml";
const ALLOW_TEMPLATE: &str = "networking/netpolicy-allow-same-ns.yaml";
const POD_PORT: u16 = 8080;

fn create_ping_pod(ctx: &mut Context, name: &str) -> Result<()> {
    let template = Template::fixture(PING_POD_TEMPLATE)?;
    resource::create_from_template(
        &ctx.oc(),
        &template,
        &params([("NAME", name), ("NAMESPACE", ctx.namespace.as_str())]),
    )?;
    resource::wait_pod_ready(&ctx.oc(), &ctx.namespace, name, &ctx.poller(5, 120))
}

fn default_deny_then_allow_same_namespace(ctx: &mut Context) -> Result<()> {
    create_ping_pod(ctx, "hello-pod-1")?;
    create_ping_pod(ctx, "hello-pod-2")?;
    let namespace = ctx.namespace.clone();
    let oc = ctx.oc();

    // a ClusterIP in front of hello-pod-2, so the policy is also checked
    // through the service DNAT path
    ctx.oc_ns()
        .run("expose")
        .args(["pod", "hello-pod-2", "--port", &POD_PORT.to_string()])
        .execute()?;

    step!("verifying baseline connectivity");
    probe::expect_pod_to_pod(
        &oc, &namespace, "hello-pod-1", &namespace, "hello-pod-2", POD_PORT, true,
    )?;
    expect_pod_to_service(&oc, &namespace, "hello-pod-1", "hello-pod-2", true)?;

    step!("applying default-deny ingress policy");
    let deny = Template::fixture(DENY_TEMPLATE)?;
    resource::apply_from_template(&oc, &deny, &params([("NAMESPACE", namespace.as_str())]))?;
    ctx.defer({
        let namespace = namespace.clone();
        move |oc| remove_resource(oc, &["networkpolicy", "default-deny-ingress", "-n", &namespace])
    });
    probe::expect_pod_to_pod(
        &oc, &namespace, "hello-pod-1", &namespace, "hello-pod-2", POD_PORT, false,
    )?;
    expect_pod_to_service(&oc, &namespace, "hello-pod-1", "hello-pod-2", false)?;

    step!("applying allow-same-namespace policy");
    let allow = Template::fixture(ALLOW_TEMPLATE)?;
    resource::apply_from_template(&oc, &allow, &params([("NAMESPACE", namespace.as_str())]))?;
    ctx.defer({
        let namespace = namespace.clone();
        move |oc| {
            remove_resource(oc, &["networkpolicy", "allow-from-same-namespace", "-n", &namespace])
        }
    });
    probe::expect_pod_to_pod(
        &oc, &namespace, "hello-pod-1", &namespace, "hello-pod-2", POD_PORT, true,
    )?;
    expect_pod_to_service(&oc, &namespace, "hello-pod-1", "hello-pod-2", true)
}

fn expect_pod_to_service(
    oc: &Oc,
    namespace: &str,
    src_pod: &str,
    service: &str,
    expect_reach: bool,
) -> Result<()> {
    for host in net::svc_addrs(oc, namespace, service)?.iter() {
        let outcome = probe::curl_from_pod(oc, namespace, src_pod, host, POD_PORT)?;
        let matches = if expect_reach {
            outcome.reached()
        } else {
            outcome.blocked()
        };
        anyhow::ensure!(
            matches,
            "curl from {namespace}/{src_pod} to service {service} at {host} was {outcome:?}, \
             expected {}",
            if expect_reach { "reachable" } else { "blocked" }
        );
    }
    Ok(())
}
