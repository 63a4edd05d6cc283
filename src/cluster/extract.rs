use std::collections::BTreeMap;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::oc::Oc;
use super::poll::{Poller, Progress};

/// `oc get <args> -o json` parsed into a JSON value.
///
/// Structured output is requested everywhere instead of jsonpath string
/// scraping, so a format drift in `oc` surfaces as a parse error rather
/// than a silent mismatch.
pub fn get_json(oc: &Oc, args: &[&str]) -> Result<Value> {
    let output = oc.run("get").args(args).args(["-o", "json"]).output()?;
    serde_json::from_str(&output)
        .with_context(|| format!("oc get {} returned unparsable JSON", args.join(" ")))
}

/// Walk a dotted path (`status.items.0.node`) through a JSON value.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    })
}

/// One `{egressIP, node}` entry from an egress-IP object's status.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EgressIpAssignment {
    #[serde(rename = "egressIP")]
    pub egress_ip: String,
    pub node: String,
}

/// The current `.status.items` of an egress-IP object; empty when nothing
/// has been assigned.
pub fn egress_ip_status(oc: &Oc, name: &str) -> Result<Vec<EgressIpAssignment>> {
    let value = get_json(oc, &["egressip", name])?;
    match lookup(&value, "status.items") {
        None => Ok(Vec::new()),
        Some(items) => serde_json::from_value(items.clone())
            .with_context(|| format!("egressip {name} has an unexpected status shape")),
    }
}

/// Poll until the egress-IP object reports at least one assignment.
pub fn assigned_egress_ips(
    oc: &Oc,
    name: &str,
    poller: &Poller,
) -> Result<Vec<EgressIpAssignment>> {
    poller.poll(&format!("egressip {name} assignment"), || {
        let items = egress_ip_status(oc, name)?;
        if items.is_empty() {
            Ok(Progress::pending("status has no assigned items"))
        } else {
            Ok(Progress::Ready(items))
        }
    })
}

/// Whether any event in the namespace carries the given reason,
/// e.g. `NoMatchingNodeFound`.
pub fn has_event_reason(oc: &Oc, namespace: &str, reason: &str) -> Result<bool> {
    let value = get_json(oc, &["events", "-n", namespace])?;
    let items = lookup(&value, "items").and_then(Value::as_array);
    Ok(items.is_some_and(|items| {
        items
            .iter()
            .any(|item| lookup(item, "reason").and_then(Value::as_str) == Some(reason))
    }))
}

/// Cluster operator conditions as a `type -> status` map.
pub fn cluster_operator_conditions(oc: &Oc, name: &str) -> Result<BTreeMap<String, String>> {
    #[derive(Deserialize)]
    struct Condition {
        #[serde(rename = "type")]
        kind: String,
        status: String,
    }

    let value = get_json(oc, &["clusteroperator", name])?;
    let conditions: Vec<Condition> = match lookup(&value, "status.conditions") {
        None => Vec::new(),
        Some(conditions) => serde_json::from_value(conditions.clone())
            .with_context(|| format!("clusteroperator {name} has unexpected conditions"))?,
    };
    Ok(conditions
        .into_iter()
        .map(|condition| (condition.kind, condition.status))
        .collect())
}

/// One SNAT record from the OVN northbound database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRecord {
    pub external_ip: String,
    pub logical_ip: String,
    /// The `name` key of `external_ids`, which OVN-Kubernetes sets to the
    /// owning egress-IP object.
    pub name: String,
}

static EXTERNAL_ID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"name=([^,}\s]+)").expect("external id regex"));

/// Parse `ovn-nbctl --format=csv --no-heading --columns=external_ip,logical_ip,external_ids find nat`.
///
/// This is one of the two places raw `ovn-nbctl` text is interpreted; keep
/// all format knowledge here.
pub fn parse_nat_records(output: &str) -> Vec<NatRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields = split_csv_line(line);
            if fields.len() < 3 {
                return None;
            }
            let name = EXTERNAL_ID_NAME
                .captures(&fields[2])
                .map(|caps| caps[1].trim_matches('"').to_string())
                .unwrap_or_default();
            Some(NatRecord {
                external_ip: fields[0].clone(),
                logical_ip: fields[1].clone(),
                name,
            })
        })
        .collect()
}

/// One logical-router policy from `ovn-nbctl lr-policy-list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrPolicy {
    pub priority: u32,
    pub matcher: String,
    pub action: String,
    pub next_hops: Vec<String>,
}

static LR_POLICY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s+(.+?)\s+(allow|drop|reroute)\s*(.*)$").expect("lr policy regex")
});

/// Parse `ovn-nbctl lr-policy-list <router>` output; the "Routing Policies"
/// header and blank lines are skipped.
pub fn parse_lr_policies(output: &str) -> Vec<LrPolicy> {
    output
        .lines()
        .filter_map(|line| {
            let caps = LR_POLICY.captures(line)?;
            Some(LrPolicy {
                priority: caps[1].parse().ok()?,
                matcher: caps[2].trim().to_string(),
                action: caps[3].to_string(),
                next_hops: caps[4]
                    .split(',')
                    .map(str::trim)
                    .filter(|hop| !hop.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// Priority OVN-Kubernetes uses for egress-IP reroute policies.
pub const EGRESS_REROUTE_PRIORITY: u32 = 100;

/// Reroute entries at the egress-IP priority whose match references one of
/// the given pod addresses. Other tenants' egress objects also install
/// priority-100 policies, so callers must scope to their own pod IPs.
pub fn egress_reroutes<'a, S: AsRef<str>>(policies: &'a [LrPolicy], ips: &[S]) -> Vec<&'a LrPolicy> {
    policies
        .iter()
        .filter(|policy| {
            policy.priority == EGRESS_REROUTE_PRIORITY
                && policy.action == "reroute"
                && ips.iter().any(|ip| policy.matcher.contains(ip.as_ref()))
        })
        .collect()
}

/// Split one CSV line, honoring double-quoted fields (OVSDB maps contain
/// commas).
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let value = json!({"status": {"items": [{"node": "worker-0"}]}});
        assert_eq!(
            lookup(&value, "status.items.0.node").and_then(Value::as_str),
            Some("worker-0")
        );
        assert!(lookup(&value, "status.missing").is_none());
        assert!(lookup(&value, "status.items.7").is_none());
    }

    #[test]
    fn egress_ip_assignment_deserializes_status_items() {
        let items = json!([{"egressIP": "10.0.99.10", "node": "worker-1"}]);
        let assignments: Vec<EgressIpAssignment> = serde_json::from_value(items).unwrap();
        assert_eq!(
            assignments,
            vec![EgressIpAssignment {
                egress_ip: "10.0.99.10".into(),
                node: "worker-1".into()
            }]
        );
    }

    #[test]
    fn parses_nat_csv_with_quoted_external_ids() {
        let output = concat!(
            "10.0.99.10,10.128.2.15,\"{name=egressip-47021, stale=false}\"\n",
            "10.0.99.11,10.131.0.7,{name=egressip-other}\n",
        );
        let records = parse_nat_records(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].external_ip, "10.0.99.10");
        assert_eq!(records[0].logical_ip, "10.128.2.15");
        assert_eq!(records[0].name, "egressip-47021");
        assert_eq!(records[1].name, "egressip-other");
    }

    #[test]
    fn parses_lr_policy_listing() {
        let output = concat!(
            "Routing Policies\n",
            "       100 ip4.src == 10.128.2.15 reroute 100.64.0.3\n",
            "      1004 inport == \"rtos-worker-0\" && ip4.dst == 10.0.0.2 reroute 10.128.0.2, 10.130.0.2\n",
            "       102 ip4.src == 10.128.0.0/14 && ip4.dst == 10.128.0.0/14 allow\n",
        );
        let policies = parse_lr_policies(output);
        assert_eq!(policies.len(), 3);
        assert_eq!(policies[0].priority, 100);
        assert_eq!(policies[0].action, "reroute");
        assert_eq!(policies[0].next_hops, vec!["100.64.0.3"]);
        assert_eq!(policies[1].next_hops.len(), 2);
        assert_eq!(policies[2].action, "allow");
        assert!(policies[2].next_hops.is_empty());
    }

    #[test]
    fn egress_reroutes_are_scoped_to_the_given_ips() {
        let output = concat!(
            "       100 ip4.src == 10.128.2.15 reroute 100.64.0.3\n",
            // another tenant's egress object, must not count as stale
            "       100 ip4.src == 10.131.0.9 reroute 100.64.0.4\n",
            "       102 ip4.src == 10.128.0.0/14 && ip4.dst == 10.128.0.0/14 allow\n",
        );
        let policies = parse_lr_policies(output);
        assert_eq!(egress_reroutes(&policies, &["10.128.2.15"]).len(), 1);
        assert!(egress_reroutes(&policies, &["10.128.2.99"]).is_empty());
        let departed = ["10.128.2.15".to_string(), "10.131.0.9".to_string()];
        assert_eq!(egress_reroutes(&policies, &departed).len(), 2);
    }
}
