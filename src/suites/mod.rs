//! The test specs and the machinery that runs them: a registry of
//! declarative scenarios, a per-spec context owning a generated namespace
//! and deferred cleanup, and mechanically enforced scheduling tags.

use std::fmt;

use anyhow::{Context as _, Result, bail};
use itertools::Itertools;
use once_cell::sync::OnceCell;

use crate::cluster::net::{self, IpStack};
use crate::cluster::oc::Oc;
use crate::cluster::poll::{CancelToken, Poller};
use crate::cluster::{extract, resource};
use crate::util;

pub mod networking;
pub mod nodes;
pub mod recovery;
pub mod registry;

/// Scheduling and environment constraints of a spec.
///
/// Unlike the advisory bracket-tags of the original suite these are
/// enforced: the registry refuses cluster-scope mutators that are not
/// `Serial`/`Disruptive`, and the runner skips `Disruptive` specs unless
/// asked for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Mutates shared cluster state; must not run alongside other specs.
    Serial,
    /// Degrades the cluster while running (reboots, config rollouts).
    Disruptive,
    /// Expected to run for many minutes.
    LongDuration,
    /// Needs egress connectivity from the cluster.
    ConnectedOnly,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Serial => "serial",
            Self::Disruptive => "disruptive",
            Self::LongDuration => "long-duration",
            Self::ConnectedOnly => "connected-only",
        })
    }
}

pub type SpecFn = fn(&mut Context) -> Result<()>;

pub struct Spec {
    pub suite: &'static str,
    pub name: &'static str,
    pub tags: &'static [Tag],
    /// Whether the spec mutates cluster-scoped objects (nodes, egress IPs,
    /// machine configs) rather than staying inside its namespace.
    pub mutates_cluster_scope: bool,
    pub run: SpecFn,
}

impl Spec {
    pub fn id(&self) -> String {
        format!("{}/{}", self.suite, self.name)
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.contains(&tag)
    }
}

/// All registered specs, validated.
pub fn all() -> Result<Vec<Spec>> {
    let mut specs = Vec::new();
    specs.extend(networking::specs());
    specs.extend(nodes::specs());
    specs.extend(registry::specs());
    specs.extend(recovery::specs());
    validate(&specs)?;
    Ok(specs)
}

fn validate(specs: &[Spec]) -> Result<()> {
    let duplicates: Vec<String> = specs
        .iter()
        .map(Spec::id)
        .duplicates()
        .collect();
    if !duplicates.is_empty() {
        bail!("duplicate spec ids: {}", duplicates.join(", "));
    }

    for spec in specs {
        if spec.mutates_cluster_scope
            && !(spec.has_tag(Tag::Serial) || spec.has_tag(Tag::Disruptive))
        {
            bail!(
                "spec {} mutates cluster scope but is not tagged serial or disruptive",
                spec.id()
            );
        }
    }
    Ok(())
}

/// A deliberate skip (unsupported platform, network type, topology),
/// reported distinctly from pass and fail.
#[derive(Debug)]
pub struct Skip(pub String);

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped: {}", self.0)
    }
}

impl std::error::Error for Skip {}

pub fn skip(reason: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(Skip(reason.into()))
}

pub fn skip_reason(error: &anyhow::Error) -> Option<&str> {
    error.downcast_ref::<Skip>().map(|skip| skip.0.as_str())
}

/// Facts about the cluster under test, fetched once per spec context.
pub struct ClusterInfo {
    pub platform: String,
    pub network_type: String,
    pub ip_stack: IpStack,
}

type Cleanup = Box<dyn FnOnce(&Oc) -> Result<()>>;

/// Per-spec execution context: a fresh namespace, pollers wired to the run's
/// cancel token, and a cleanup stack executed in reverse order on teardown
/// whether the spec passed or failed.
pub struct Context {
    oc: Oc,
    pub namespace: String,
    cancel: CancelToken,
    cleanups: Vec<Cleanup>,
    cluster: OnceCell<ClusterInfo>,
}

impl Context {
    pub fn new(suite: &str, cancel: CancelToken) -> Result<Self> {
        let namespace = format!("e2e-{suite}-{}", util::random_suffix());
        let oc = Oc::cluster();

        oc.run("create")
            .args(["namespace", &namespace])
            .execute()
            .with_context(|| format!("failed to create namespace {namespace}"))?;
        // test pods (host commands, ping) need the privileged profile
        resource::label(
            &oc,
            "namespace",
            &namespace,
            "security.openshift.io/scc.podSecurityLabelSync=false",
        )?;
        resource::label(
            &oc,
            "namespace",
            &namespace,
            "pod-security.kubernetes.io/enforce=privileged",
        )?;

        Ok(Self {
            oc,
            namespace,
            cancel,
            cleanups: Vec::new(),
            cluster: OnceCell::new(),
        })
    }

    /// Cluster-scoped `oc` context.
    pub fn oc(&self) -> Oc {
        self.oc.clone()
    }

    /// `oc` context scoped to the spec's namespace.
    pub fn oc_ns(&self) -> Oc {
        Oc::new(&self.namespace)
    }

    pub fn poller(&self, interval_secs: u64, timeout_secs: u64) -> Poller {
        Poller::secs(interval_secs, timeout_secs).with_cancel(self.cancel.clone())
    }

    /// Register a cleanup action; actions run in reverse order during
    /// teardown, after the spec body returns or fails.
    pub fn defer(&mut self, cleanup: impl FnOnce(&Oc) -> Result<()> + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    pub fn cluster(&self) -> Result<&ClusterInfo> {
        self.cluster.get_or_try_init(|| {
            let oc = self.oc.without_namespace();
            let infrastructure = extract::get_json(&oc, &["infrastructure", "cluster"])?;
            let platform = extract::lookup(&infrastructure, "status.platformStatus.type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("none")
                .to_lowercase();
            let network = extract::get_json(&oc, &["network.config", "cluster"])?;
            let network_type = extract::lookup(&network, "status.networkType")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            let ip_stack = net::ip_stack(&oc)?;
            Ok(ClusterInfo {
                platform,
                network_type,
                ip_stack,
            })
        })
    }

    /// Skip unless the cluster runs OVN-Kubernetes.
    pub fn require_ovn(&self) -> Result<()> {
        let info = self.cluster()?;
        if info.network_type.contains("ovnkubernetes") {
            Ok(())
        } else {
            Err(skip(format!(
                "requires OVN-Kubernetes, cluster runs {:?}",
                info.network_type
            )))
        }
    }

    /// Skip unless the platform is one of the accepted ones.
    pub fn require_platform(&self, accepted: &[&str]) -> Result<()> {
        let info = self.cluster()?;
        if accepted.iter().any(|p| info.platform.contains(p)) {
            Ok(())
        } else {
            Err(skip(format!(
                "platform {:?} is not in {accepted:?}",
                info.platform
            )))
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        while let Some(cleanup) = self.cleanups.pop() {
            if let Err(error) = cleanup(&self.oc) {
                warning!("cleanup failed: {error:#}");
            }
        }
        if let Err(error) = resource::remove_resource(&self.oc, &["namespace", &self.namespace]) {
            warning!("failed to delete namespace {}: {error:#}", self.namespace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Context) -> Result<()> {
        Ok(())
    }

    #[test]
    fn registry_validates() {
        let specs = all().unwrap();
        assert!(!specs.is_empty());
    }

    #[test]
    fn cluster_scope_mutation_requires_serial_or_disruptive() {
        let specs = [Spec {
            suite: "demo",
            name: "mutates-without-tags",
            tags: &[],
            mutates_cluster_scope: true,
            run: noop,
        }];
        let error = validate(&specs).unwrap_err();
        assert!(error.to_string().contains("serial or disruptive"));

        let specs = [Spec {
            suite: "demo",
            name: "mutates-serially",
            tags: &[Tag::Serial],
            mutates_cluster_scope: true,
            run: noop,
        }];
        validate(&specs).unwrap();
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let spec = || Spec {
            suite: "demo",
            name: "same",
            tags: &[],
            mutates_cluster_scope: false,
            run: noop,
        };
        let error = validate(&[spec(), spec()]).unwrap_err();
        assert!(error.to_string().contains("duplicate"));
    }

    #[test]
    fn skip_errors_are_distinguishable() {
        let error = skip("requires OVN-Kubernetes");
        assert_eq!(skip_reason(&error), Some("requires OVN-Kubernetes"));
        let other = anyhow::anyhow!("real failure");
        assert_eq!(skip_reason(&other), None);
    }
}
