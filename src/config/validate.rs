//! Listener conflict detection for `--test-config`: duplicate and
//! wildcard-vs-specific-host bind checks, applied to a single
//! `ResolvedConfig`'s listener list instead of a vector of virtual-host
//! server blocks (this design has exactly one server).

use std::collections::HashSet;

use crate::config::ResolvedConfig;
use crate::net::listener::Address;

#[derive(Debug)]
pub struct ListenerConflict {
    pub message: String,
}

/// Returns every address that is bound more than once, or mixes the
/// wildcard `0.0.0.0` with a specific host on the same port.
pub fn validate_listeners(config: &ResolvedConfig) -> Vec<ListenerConflict> {
    let mut conflicts = Vec::new();
    let mut seen = HashSet::new();

    for spec in &config.listeners {
        if !seen.insert(spec.address.clone()) {
            conflicts.push(ListenerConflict {
                message: format!("duplicate listener address '{}'", spec.address.canonical()),
            });
        }
    }

    let mut port_hosts: std::collections::HashMap<u16, HashSet<String>> = std::collections::HashMap::new();
    for spec in &config.listeners {
        if let Address::Tcp(host, port) = &spec.address {
            port_hosts.entry(*port).or_default().insert(host.clone());
        }
    }
    for (port, hosts) in port_hosts {
        if hosts.contains("0.0.0.0") && hosts.len() > 1 {
            conflicts.push(ListenerConflict {
                message: format!("port {port} mixes wildcard '0.0.0.0' with specific hosts {hosts:?}"),
            });
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::listener::ListenerOptions;

    fn spec(addr: Address) -> crate::config::ListenerSpec {
        crate::config::ListenerSpec { address: addr, options: ListenerOptions::default() }
    }

    #[test]
    fn no_conflicts_for_distinct_addresses() {
        let mut config = ResolvedConfig::default();
        config.listeners = vec![
            spec(Address::Tcp("127.0.0.1".into(), 8001)),
            spec(Address::Tcp("127.0.0.1".into(), 8002)),
        ];
        assert!(validate_listeners(&config).is_empty());
    }

    #[test]
    fn flags_exact_duplicate_addresses() {
        let mut config = ResolvedConfig::default();
        config.listeners = vec![
            spec(Address::Tcp("127.0.0.1".into(), 8080)),
            spec(Address::Tcp("127.0.0.1".into(), 8080)),
        ];
        assert_eq!(validate_listeners(&config).len(), 1);
    }

    #[test]
    fn flags_wildcard_vs_specific_host_on_the_same_port() {
        let mut config = ResolvedConfig::default();
        config.listeners = vec![
            spec(Address::Tcp("0.0.0.0".into(), 8080)),
            spec(Address::Tcp("127.0.0.1".into(), 8080)),
        ];
        assert_eq!(validate_listeners(&config).len(), 1);
    }
}
