use anyhow::{Result, bail};

use super::net::{self, Addrs};
use super::oc::Oc;

/// Classified result of a curl probe.
///
/// Exit 28 (timeout) and exit 7 (connection refused) are the *expected*
/// outcomes when a policy is supposed to block traffic; anything else
/// that fails is a real error, not a blocked connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurlOutcome {
    Reached(String),
    TimedOut,
    Refused,
    Failed { code: Option<i32>, output: String },
}

impl CurlOutcome {
    pub fn reached(&self) -> bool {
        matches!(self, Self::Reached(_))
    }

    /// Blocked in one of the ways a deny policy produces.
    pub fn blocked(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Refused)
    }
}

pub fn classify_curl(code: Option<i32>, output: &str) -> CurlOutcome {
    match code {
        Some(0) => CurlOutcome::Reached(output.to_string()),
        Some(28) => CurlOutcome::TimedOut,
        Some(7) => CurlOutcome::Refused,
        code => CurlOutcome::Failed {
            code,
            output: output.to_string(),
        },
    }
}

const CURL_CONNECT_TIMEOUT_SECS: u32 = 5;

/// Curl a destination from inside a pod.
pub fn curl_from_pod(
    oc: &Oc,
    namespace: &str,
    pod: &str,
    host: &str,
    port: u16,
) -> Result<CurlOutcome> {
    let script = format!(
        "curl --connect-timeout {CURL_CONNECT_TIMEOUT_SECS} -s {}",
        net::join_host_port(host, port)
    );
    let captured = oc.exec_in_pod(namespace, pod, None, &script)?;
    Ok(classify_curl(captured.code, &captured.combined()))
}

/// Ping a destination from inside a pod; `false` means 100% packet loss.
pub fn ping_from_pod(oc: &Oc, namespace: &str, pod: &str, host: &str) -> Result<bool> {
    let ping = if host.contains(':') { "ping -6" } else { "ping" };
    let captured = oc.exec_in_pod(namespace, pod, None, &format!("{ping} -c4 -W2 {host}"))?;
    Ok(captured.success)
}

/// Curl a destination from a node's host network.
pub fn curl_from_node(
    oc: &Oc,
    namespace: &str,
    node: &str,
    host: &str,
    port: u16,
) -> Result<CurlOutcome> {
    let target = net::join_host_port(host, port);
    let captured = oc.debug_node_chroot(
        namespace,
        node,
        &[
            "curl",
            "--connect-timeout",
            "5",
            "-s",
            &target,
        ],
    )?;
    Ok(classify_curl(captured.code, &captured.combined()))
}

/// Probe every address family of the destination pod from the source pod.
pub fn curl_pod_to_pod(
    oc: &Oc,
    src_namespace: &str,
    src_pod: &str,
    dst_namespace: &str,
    dst_pod: &str,
    port: u16,
) -> Result<Vec<(String, CurlOutcome)>> {
    let addrs = net::pod_addrs(oc, dst_namespace, dst_pod)?;
    curl_each_family(oc, src_namespace, src_pod, &addrs, port)
}

fn curl_each_family(
    oc: &Oc,
    src_namespace: &str,
    src_pod: &str,
    addrs: &Addrs,
    port: u16,
) -> Result<Vec<(String, CurlOutcome)>> {
    addrs
        .iter()
        .map(|host| {
            curl_from_pod(oc, src_namespace, src_pod, host, port)
                .map(|outcome| (host.to_string(), outcome))
        })
        .collect()
}

/// Assert that pod-to-pod traffic is reachable (or blocked) on every
/// address family of the destination.
pub fn expect_pod_to_pod(
    oc: &Oc,
    src_namespace: &str,
    src_pod: &str,
    dst_namespace: &str,
    dst_pod: &str,
    port: u16,
    expect_reach: bool,
) -> Result<()> {
    for (host, outcome) in curl_pod_to_pod(oc, src_namespace, src_pod, dst_namespace, dst_pod, port)? {
        match (expect_reach, &outcome) {
            (true, CurlOutcome::Reached(_)) => {}
            (false, outcome) if outcome.blocked() => {}
            _ => bail!(
                "curl from {src_namespace}/{src_pod} to {host}:{port} was {outcome:?}, expected {}",
                if expect_reach { "reachable" } else { "blocked" }
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_zero_is_reached() {
        assert_eq!(
            classify_curl(Some(0), "Hello OpenShift!"),
            CurlOutcome::Reached("Hello OpenShift!".into())
        );
    }

    #[test]
    fn exit_28_is_the_expected_timeout_signal() {
        let outcome = classify_curl(Some(28), "");
        assert_eq!(outcome, CurlOutcome::TimedOut);
        assert!(outcome.blocked());
        assert!(!outcome.reached());
    }

    #[test]
    fn exit_7_is_connection_refused() {
        assert!(classify_curl(Some(7), "").blocked());
    }

    #[test]
    fn other_codes_are_real_failures() {
        let outcome = classify_curl(Some(6), "curl: (6) Could not resolve host");
        assert!(!outcome.blocked());
        assert!(!outcome.reached());
        let outcome = classify_curl(None, "killed");
        assert!(matches!(outcome, CurlOutcome::Failed { code: None, .. }));
    }
}
