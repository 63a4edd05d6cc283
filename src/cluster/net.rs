use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use anyhow::{Context, Result, bail};
use serde_json::Value;

use super::extract::{get_json, lookup};
use super::oc::Oc;

/// Address families configured on the cluster network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpStack {
    V4Single,
    V6Single,
    Dual,
}

impl std::fmt::Display for IpStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::V4Single => "ipv4-single",
            Self::V6Single => "ipv6-single",
            Self::Dual => "dual-stack",
        })
    }
}

/// Detect the cluster's IP stack from the cluster network configuration.
pub fn ip_stack(oc: &Oc) -> Result<IpStack> {
    let value = get_json(&oc.without_namespace(), &["network.config", "cluster"])?;
    let cidrs: Vec<&str> = lookup(&value, "status.clusterNetwork")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| lookup(entry, "cidr").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if cidrs.is_empty() {
        bail!("cluster network configuration lists no clusterNetwork CIDRs");
    }

    let has_v6 = cidrs.iter().any(|cidr| cidr.contains(':'));
    let has_v4 = cidrs.iter().any(|cidr| !cidr.contains(':'));
    Ok(match (has_v4, has_v6) {
        (true, true) => IpStack::Dual,
        (false, true) => IpStack::V6Single,
        _ => IpStack::V4Single,
    })
}

/// Resolved addresses of a pod, service, or node.
///
/// On dual-stack the IPv6 address is stored first; single-stack resources
/// leave the secondary slot empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addrs {
    pub primary: String,
    pub secondary: Option<String>,
}

impl Addrs {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.secondary.as_deref())
    }
}

/// Order raw addresses into the dual-stack convention (IPv6 first).
pub fn order_addrs(ips: Vec<String>) -> Option<Addrs> {
    let mut ips: Vec<String> = ips.into_iter().filter(|ip| !ip.is_empty()).collect();
    match ips.len() {
        0 => None,
        1 => Some(Addrs {
            primary: ips.remove(0),
            secondary: None,
        }),
        _ => {
            let v6 = ips
                .iter()
                .find(|ip| ip.parse::<IpAddr>().is_ok_and(|addr| addr.is_ipv6()));
            let v4 = ips
                .iter()
                .find(|ip| ip.parse::<IpAddr>().is_ok_and(|addr| addr.is_ipv4()));
            match (v6, v4) {
                (Some(v6), Some(v4)) => Some(Addrs {
                    primary: v6.clone(),
                    secondary: Some(v4.clone()),
                }),
                // same family twice; keep the observed order
                _ => Some(Addrs {
                    primary: ips[0].clone(),
                    secondary: Some(ips[1].clone()),
                }),
            }
        }
    }
}

/// Addresses assigned to a pod, from `status.podIPs`.
pub fn pod_addrs(oc: &Oc, namespace: &str, pod: &str) -> Result<Addrs> {
    let value = get_json(oc, &["pod", "-n", namespace, pod])?;
    let ips = lookup(&value, "status.podIPs")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| lookup(entry, "ip").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    order_addrs(ips).with_context(|| format!("pod {namespace}/{pod} has no addresses yet"))
}

/// Cluster IPs of a service, from `spec.clusterIPs`.
pub fn svc_addrs(oc: &Oc, namespace: &str, service: &str) -> Result<Addrs> {
    let value = get_json(oc, &["service", "-n", namespace, service])?;
    let ips = lookup(&value, "spec.clusterIPs")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    order_addrs(ips).with_context(|| format!("service {namespace}/{service} has no cluster IPs"))
}

/// Internal addresses of a node, from `status.addresses`.
pub fn node_addrs(oc: &Oc, node: &str) -> Result<Addrs> {
    let value = get_json(&oc.without_namespace(), &["node", node])?;
    let ips = internal_ips(&value);
    order_addrs(ips).with_context(|| format!("node {node} has no InternalIP addresses"))
}

fn internal_ips(node: &Value) -> Vec<String> {
    lookup(node, "status.addresses")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| {
                    lookup(entry, "type").and_then(Value::as_str) == Some("InternalIP")
                })
                .filter_map(|entry| lookup(entry, "address").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `host:port`, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

const PRIMARY_IFADDR_ANNOTATION: &str = "k8s.ovn.org/node-primary-ifaddr";

fn primary_ifaddr(node_value: &Value, node: &str) -> Result<String> {
    let annotation = lookup(node_value, "metadata.annotations")
        .and_then(Value::as_object)
        .and_then(|annotations| annotations.get(PRIMARY_IFADDR_ANNOTATION))
        .and_then(Value::as_str)
        .with_context(|| format!("node {node} has no {PRIMARY_IFADDR_ANNOTATION} annotation"))?;
    let ifaddr: Value = serde_json::from_str(annotation)
        .with_context(|| format!("unparsable {PRIMARY_IFADDR_ANNOTATION} on node {node}"))?;
    lookup(&ifaddr, "ipv4")
        .or_else(|| lookup(&ifaddr, "ipv6"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("node {node} primary-ifaddr lists no address"))
}

/// The primary-interface CIDR of a node, from the OVN annotation.
pub fn node_primary_cidr(oc: &Oc, node: &str) -> Result<String> {
    let value = get_json(&oc.without_namespace(), &["node", node])?;
    primary_ifaddr(&value, node)
}

/// Normalize a host CIDR to its subnet, e.g. `10.0.1.5/24` -> `10.0.1.0/24`.
pub fn subnet_of(cidr: &str) -> Result<String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let addr: IpAddr = addr.parse().with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let prefix: u32 = prefix.parse().with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let (value, width) = match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    };
    if prefix == 0 || prefix > width {
        bail!("invalid prefix length in {cidr:?}");
    }
    let network = value & !((1u128 << (width - prefix)) - 1);
    let ip = match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(network as u32)),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(network)),
    };
    Ok(format!("{ip}/{prefix}"))
}

/// First pair of nodes sharing a subnet, in observed order. An egress IP
/// discovered on one node's subnet cannot be hosted by a node in another
/// (multi-AZ clusters), so callers skip when no pair exists.
pub fn same_subnet_pair(nodes: &[(String, String)]) -> Option<[String; 2]> {
    for (index, (node, subnet)) in nodes.iter().enumerate() {
        if let Some((earlier, _)) = nodes[..index].iter().find(|(_, other)| other == subnet) {
            return Some([earlier.clone(), node.clone()]);
        }
    }
    None
}

/// Find addresses on an egress node's primary subnet that nothing in the
/// cluster is known to hold: not a node InternalIP and not already claimed
/// by a `cloudprivateipconfigs` object.
pub fn find_free_ips(oc: &Oc, node: &str, count: usize) -> Result<Vec<String>> {
    let oc = oc.without_namespace();
    let node_value = get_json(&oc, &["node", node])?;
    let cidr = primary_ifaddr(&node_value, node)?;

    let mut used = HashSet::new();
    let nodes = get_json(&oc, &["nodes"])?;
    if let Some(items) = lookup(&nodes, "items").and_then(Value::as_array) {
        for item in items {
            for ip in internal_ips(item) {
                if let Ok(addr) = ip.parse() {
                    used.insert(addr);
                }
            }
        }
    }
    let claimed = oc.run("get").args(["cloudprivateipconfigs"]).capture()?;
    if claimed.success {
        let value = get_json(&oc, &["cloudprivateipconfigs"])?;
        if let Some(items) = lookup(&value, "items").and_then(Value::as_array) {
            for item in items {
                if let Some(name) = lookup(item, "metadata.name").and_then(Value::as_str) {
                    if let Ok(addr) = name.parse() {
                        used.insert(addr);
                    }
                }
            }
        }
    }

    let free = free_ips_in_subnet(&cidr, &used, count)?;
    Ok(free.into_iter().map(|ip| ip.to_string()).collect())
}

/// Enumerate unclaimed host addresses in a subnet, walking down from the
/// top of the range (the low end is where DHCP pools and gateways live).
fn free_ips_in_subnet(cidr: &str, used: &HashSet<IpAddr>, count: usize) -> Result<Vec<IpAddr>> {
    const SCAN_LIMIT: u128 = 512;

    let (addr, prefix) = cidr
        .split_once('/')
        .with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let addr: IpAddr = addr.parse().with_context(|| format!("invalid CIDR {cidr:?}"))?;
    let prefix: u32 = prefix.parse().with_context(|| format!("invalid CIDR {cidr:?}"))?;

    let (value, width) = match addr {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    };
    if prefix == 0 || prefix > width - 2 {
        bail!("subnet {cidr} is unusable for free-IP discovery");
    }

    let host_bits = width - prefix;
    let span = 1u128 << host_bits;
    let network = value & !(span - 1);

    let mut free = Vec::new();
    let mut scanned = 0u128;
    // top - 1 skips the IPv4 broadcast address; harmless for IPv6
    let mut candidate = network + span - 2;
    while candidate > network && free.len() < count && scanned < SCAN_LIMIT {
        let ip = match addr {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(candidate as u32)),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(candidate)),
        };
        if !used.contains(&ip) {
            free.push(ip);
        }
        candidate -= 1;
        scanned += 1;
    }

    if free.len() < count {
        bail!("subnet {cidr} has only {} free addresses, wanted {count}", free.len());
    }
    Ok(free)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> IpAddr {
        ip.parse().unwrap()
    }

    #[test]
    fn dual_stack_orders_v6_first() {
        let addrs = order_addrs(vec!["10.128.2.15".into(), "fd01:0:0:5::15".into()]).unwrap();
        assert_eq!(addrs.primary, "fd01:0:0:5::15");
        assert_eq!(addrs.secondary.as_deref(), Some("10.128.2.15"));
    }

    #[test]
    fn single_stack_leaves_secondary_empty() {
        let addrs = order_addrs(vec!["10.128.2.15".into()]).unwrap();
        assert_eq!(addrs.primary, "10.128.2.15");
        assert_eq!(addrs.secondary, None);
        assert_eq!(addrs.iter().count(), 1);
    }

    #[test]
    fn no_addresses_is_none() {
        assert_eq!(order_addrs(vec![]), None);
        assert_eq!(order_addrs(vec![String::new()]), None);
    }

    #[test]
    fn join_host_port_brackets_v6() {
        assert_eq!(join_host_port("10.0.0.1", 8080), "10.0.0.1:8080");
        assert_eq!(join_host_port("fd01::15", 8080), "[fd01::15]:8080");
    }

    #[test]
    fn subnet_of_masks_host_bits() {
        assert_eq!(subnet_of("10.0.1.5/24").unwrap(), "10.0.1.0/24");
        assert_eq!(subnet_of("fd00::1f/64").unwrap(), "fd00::/64");
        assert!(subnet_of("10.0.1.5").is_err());
        assert!(subnet_of("10.0.1.5/0").is_err());
    }

    #[test]
    fn same_subnet_pair_requires_a_shared_subnet() {
        let zoned = vec![
            ("worker-a".to_string(), "10.0.1.0/24".to_string()),
            ("worker-b".to_string(), "10.0.2.0/24".to_string()),
            ("worker-c".to_string(), "10.0.2.0/24".to_string()),
        ];
        assert_eq!(
            same_subnet_pair(&zoned),
            Some(["worker-b".to_string(), "worker-c".to_string()])
        );

        // one worker per availability zone: no pair, callers must skip
        let spread = vec![
            ("worker-a".to_string(), "10.0.1.0/24".to_string()),
            ("worker-b".to_string(), "10.0.2.0/24".to_string()),
        ];
        assert_eq!(same_subnet_pair(&spread), None);
    }

    #[test]
    fn free_ips_walk_down_from_the_top() {
        let used = HashSet::from([addr("10.0.0.100")]);
        let free = free_ips_in_subnet("10.0.0.5/24", &used, 2).unwrap();
        assert_eq!(free, vec![addr("10.0.0.254"), addr("10.0.0.253")]);
    }

    #[test]
    fn free_ips_skip_used_addresses() {
        let used = HashSet::from([addr("10.0.0.6"), addr("10.0.0.5")]);
        let free = free_ips_in_subnet("10.0.0.0/29", &used, 2).unwrap();
        assert_eq!(free, vec![addr("10.0.0.4"), addr("10.0.0.3")]);
    }

    #[test]
    fn free_ips_respect_subnet_capacity() {
        let used = HashSet::new();
        let error = free_ips_in_subnet("10.0.0.0/30", &used, 5).unwrap_err();
        assert!(error.to_string().contains("free addresses"));
    }

    #[test]
    fn free_ips_support_v6_subnets() {
        let used = HashSet::from([addr("fd00::fe")]);
        let free = free_ips_in_subnet("fd00::/120", &used, 2).unwrap();
        assert_eq!(free, vec![addr("fd00::fd"), addr("fd00::fc")]);
    }
}
