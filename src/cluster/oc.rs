use std::process::Command;

use anyhow::Result;

use crate::app::{self, Captured, CommandExt as _};

/// Per-call context for the `oc` cluster CLI.
///
/// Mirrors the chain the original suite used (`oc -n <ns> <verb> ...`):
/// an optional project namespace, with every invocation pinned to the
/// resolved kubeconfig. Cluster-scoped calls drop the namespace via
/// [`Oc::without_namespace`].
#[derive(Clone, Debug, Default)]
pub struct Oc {
    namespace: Option<String>,
}

impl Oc {
    /// Context scoped to a project namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    /// Cluster-scoped context (no `-n` argument).
    pub fn cluster() -> Self {
        Self { namespace: None }
    }

    pub fn without_namespace(&self) -> Self {
        Self { namespace: None }
    }

    /// Start building an invocation of the given verb (`get`, `apply`, ...).
    pub fn run(&self, verb: &str) -> OcCommand {
        let mut command = Command::new("oc");
        if let Some(kubeconfig) = app::kubeconfig() {
            command.args(["--kubeconfig", kubeconfig]);
        }
        command.arg(verb);
        if let Some(namespace) = &self.namespace {
            command.args(["-n", namespace]);
        }
        OcCommand { command }
    }

    /// Run a command inside a pod through `oc exec`.
    pub fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        script: &str,
    ) -> Result<Captured> {
        let mut cmd = self.without_namespace().run("exec");
        cmd = cmd.args(["-n", namespace]);
        if let Some(container) = container {
            cmd = cmd.args(["-c", container]);
        }
        cmd.args([pod, "--", "bash", "-c", script]).capture()
    }

    /// Run a host command on a node through `oc debug node/<node> -- chroot /host`.
    pub fn debug_node_chroot(
        &self,
        namespace: &str,
        node: &str,
        args: &[&str],
    ) -> Result<Captured> {
        let node_ref = format!("node/{node}");
        self.without_namespace()
            .run("debug")
            .args(["-n", namespace, "-q", &node_ref, "--", "chroot", "/host"])
            .args(args.iter().copied())
            .capture()
    }
}

pub struct OcCommand {
    command: Command,
}

impl OcCommand {
    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Captured stdout, trimmed; a failed exit status is an error.
    pub fn output(mut self) -> Result<String> {
        self.command
            .check_output()
            .map(|output| output.trim_end().to_string())
    }

    /// Run for effect; a failed exit status is an error.
    pub fn execute(mut self) -> Result<()> {
        self.command.check_run()
    }

    /// Run and hand back streams and status without failing, for call
    /// sites that classify the output (not-found detection, probes).
    pub fn capture(mut self) -> Result<Captured> {
        self.command.capture()
    }
}

/// Whether `oc` output reports the target resource as absent.
///
/// Both the error form (`... "x" not found` / reason `NotFound`) and the
/// empty-list form (`No resources found`) count.
pub fn not_found(output: &str) -> bool {
    output.contains("NotFound")
        || output.contains("not found")
        || output.contains("No resources found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_matches_error_reason() {
        assert!(not_found(
            r#"Error from server (NotFound): egressips.k8s.ovn.org "egressip-x" not found"#
        ));
    }

    #[test]
    fn not_found_matches_absent_label() {
        // `oc label node X key-` on a node that never had the label
        assert!(not_found(r#"label "k8s.ovn.org/egress-assignable" not found."#));
    }

    #[test]
    fn not_found_matches_empty_list() {
        assert!(not_found("No resources found in e2e-networking-abc123 namespace."));
    }

    #[test]
    fn not_found_rejects_real_output() {
        assert!(!not_found("egressip-x   10.0.99.10   node-a"));
        assert!(!not_found(""));
    }
}
