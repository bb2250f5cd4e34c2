//! Network registry and selection.
//!
//! Networks are identified by the MAC addresses of their routers (and
//! optionally by a connection-manager connection name). The selector turns
//! the set of observed identifiers into an ordered list of matching
//! networks; the first match is the primary network used for port, location,
//! and proxy seeding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

use log::info;

/// Hostname-map key that applies when no active network matches.
pub const DEFAULT_NETWORK_NAME: &str = "default";

/// Name substituted when no declared network matches the observations.
pub const UNKNOWN_NETWORK_NAME: &str = "unknown";

/// A known network, identified by its routers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub name: String,
    /// Succinct alias for the name (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MAC addresses of this network's routers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routers: Vec<String>,
    /// Preferred ports, most preferred first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Host or proxy-table name to proxy through by default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Shell command run once when this network is selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_command: Option<String>,
    /// Connection-manager name used as an additional match criterion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
}

impl NetworkDescriptor {
    /// Lowercase canonical name: the key when declared, else the name.
    pub fn canonical_name(&self) -> String {
        self.key
            .as_deref()
            .unwrap_or(&self.name)
            .to_lowercase()
    }

    /// A synthetic descriptor for when no declared network matches.
    pub fn unknown() -> Self {
        NetworkDescriptor {
            name: UNKNOWN_NETWORK_NAME.to_string(),
            key: None,
            description: None,
            routers: Vec::new(),
            ports: None,
            location: None,
            proxy: None,
            init_command: None,
            connection_name: None,
        }
    }

    fn matches(&self, observed: &Observed) -> bool {
        let routers: Vec<String> = self.routers.iter().map(|r| r.to_lowercase()).collect();
        if observed
            .macs
            .iter()
            .any(|mac| routers.contains(&mac.to_lowercase()))
        {
            return true;
        }
        if let Some(connection) = &self.connection_name {
            return observed
                .connections
                .iter()
                .any(|c| c.eq_ignore_ascii_case(connection));
        }
        false
    }
}

/// Preferred ports, either as a comma-separated string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortList {
    Csv(String),
    List(Vec<u16>),
}

impl PortList {
    pub fn ports(&self) -> Result<Vec<u16>, NetworkError> {
        match self {
            PortList::List(ports) => Ok(ports.clone()),
            PortList::Csv(text) => text
                .split(',')
                .map(|p| {
                    p.trim()
                        .parse::<u16>()
                        .map_err(|_| NetworkError::InvalidPort(p.trim().to_string()))
                })
                .collect(),
        }
    }
}

/// The ports usable on the current network, most preferred first.
#[derive(Debug, Clone, Default)]
pub struct Ports {
    available: Option<Vec<u16>>,
}

impl Ports {
    pub fn set_available(&mut self, ports: Vec<u16>) {
        self.available = Some(ports);
    }

    pub fn available(&self) -> Option<&[u16]> {
        self.available.as_deref()
    }

    /// Pick the first available port a host supports. With no availability
    /// constraint the host's first supported port wins.
    pub fn choose(&self, supported: &[u16]) -> Option<u16> {
        match &self.available {
            None => supported.first().copied(),
            Some(available) => available.iter().find(|p| supported.contains(p)).copied(),
        }
    }
}

/// Identifiers gathered from the running system: gateway/neighbor MAC
/// addresses and active connection-manager names.
#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub macs: Vec<String>,
    pub connections: Vec<String>,
}

/// All declared networks, in registration order.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: Vec<NetworkDescriptor>,
}

impl NetworkRegistry {
    pub fn new(networks: Vec<NetworkDescriptor>) -> Result<Self, NetworkError> {
        let mut seen: Vec<String> = Vec::new();
        for network in &networks {
            for name in [Some(&network.name), network.key.as_ref()].into_iter().flatten() {
                let name = name.to_lowercase();
                if seen.contains(&name) {
                    return Err(NetworkError::DuplicateNetwork(name));
                }
                seen.push(name);
            }
        }
        Ok(NetworkRegistry { networks })
    }

    /// Look up a network by key or name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&NetworkDescriptor> {
        self.networks.iter().find(|n| {
            n.name.eq_ignore_ascii_case(name)
                || n.key.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(name))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkDescriptor> {
        self.networks.iter()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Every name a network is known by, lowercased, plus the designated
    /// default key. Used to flag unknown names in per-network hostname maps.
    pub fn known_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for network in &self.networks {
            names.insert(network.name.to_lowercase());
            if let Some(key) = &network.key {
                names.insert(key.to_lowercase());
            }
        }
        names.insert(DEFAULT_NETWORK_NAME.to_string());
        names
    }
}

/// Produce the ordered list of networks matching the observations.
///
/// Candidates are tried preferred-first (in the order given), then all
/// remaining networks in registration order. An empty result means no
/// declared network matched; the caller substitutes the unknown network.
pub fn select_networks<'a>(
    observed: &Observed,
    registry: &'a NetworkRegistry,
    preferred: &[String],
) -> Vec<&'a NetworkDescriptor> {
    let mut candidates: Vec<&NetworkDescriptor> = Vec::new();
    let mut queued: Vec<String> = Vec::new();
    for name in preferred {
        if let Some(network) = registry.find(name) {
            let canonical = network.name.to_lowercase();
            if !queued.contains(&canonical) {
                queued.push(canonical);
                candidates.push(network);
            }
        }
    }
    for network in registry.iter() {
        let canonical = network.name.to_lowercase();
        if !queued.contains(&canonical) {
            queued.push(canonical);
            candidates.push(network);
        }
    }

    candidates
        .into_iter()
        .filter(|network| network.matches(observed))
        .collect()
}

/// Read-only per-run context threaded through resolution and rendering.
///
/// Set exactly once after network selection, before any host is resolved.
#[derive(Debug, Clone)]
pub struct NetworkContext {
    /// Canonical (lowercase) name of the primary network.
    pub network_name: String,
    /// Display name of the primary network.
    pub display_name: String,
    pub description: Option<String>,
    /// Canonical names of every matched network, primary first. Per-network
    /// hostname maps are checked against each of these in order.
    pub active_networks: Vec<String>,
    /// The primary network's own default proxy, if any.
    pub network_proxy: Option<String>,
    /// The global proxy in effect for this run.
    pub proxy: Option<String>,
    pub location: Option<String>,
    pub ports: Ports,
    /// Every declared network name, for hostname-map sanity warnings.
    pub known_networks: BTreeSet<String>,
}

impl NetworkContext {
    /// Build the context from the selection result. `primary` is the first
    /// match, or the synthetic unknown network when nothing matched.
    pub fn from_selection(
        primary: &NetworkDescriptor,
        matches: &[&NetworkDescriptor],
        registry: &NetworkRegistry,
    ) -> Self {
        let mut active_networks = vec![primary.canonical_name()];
        for network in matches {
            for name in [network.canonical_name(), network.name.to_lowercase()] {
                if !active_networks.contains(&name) {
                    active_networks.push(name);
                }
            }
        }
        NetworkContext {
            network_name: primary.canonical_name(),
            display_name: primary
                .key
                .clone()
                .unwrap_or_else(|| primary.name.clone()),
            description: primary.description.clone(),
            active_networks,
            network_proxy: primary.proxy.clone(),
            proxy: primary.proxy.clone(),
            location: primary.location.clone(),
            ports: Ports::default(),
            known_networks: registry.known_names(),
        }
    }
}

/// Network registry errors.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("duplicate network name: {0}")]
    DuplicateNetwork(String),
    #[error("invalid port number: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Deserialize)]
struct NetworksFile {
    #[serde(default)]
    networks: Vec<NetworkDescriptor>,
}

/// Load the network registry from `networks.yaml`.
pub fn load_networks(path: &Path) -> color_eyre::Result<NetworkRegistry> {
    info!("Loading networks from: {:?}", path);
    let file = File::open(path)?;
    let parsed: NetworksFile = serde_yaml::from_reader(file)?;
    let registry = NetworkRegistry::new(parsed.networks)?;
    info!("Loaded {} network(s)", registry.len());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, routers: &[&str]) -> NetworkDescriptor {
        NetworkDescriptor {
            name: name.to_string(),
            key: None,
            description: None,
            routers: routers.iter().map(|r| r.to_string()).collect(),
            ports: None,
            location: None,
            proxy: None,
            init_command: None,
            connection_name: None,
        }
    }

    fn observed(macs: &[&str]) -> Observed {
        Observed {
            macs: macs.iter().map(|m| m.to_string()).collect(),
            connections: Vec::new(),
        }
    }

    #[test]
    fn test_select_by_router_mac() {
        let registry = NetworkRegistry::new(vec![
            descriptor("home", &["aa:bb:cc:dd:ee:ff"]),
            descriptor("work", &["11:22:33:44:55:66"]),
        ])
        .unwrap();

        let matches = select_networks(&observed(&["aa:bb:cc:dd:ee:ff"]), &registry, &[]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "home");

        let matches = select_networks(&observed(&["de:ad:be:ef:00:00"]), &registry, &[]);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_mac_matching_is_case_insensitive() {
        let registry =
            NetworkRegistry::new(vec![descriptor("home", &["AA:BB:CC:DD:EE:FF"])]).unwrap();
        let matches = select_networks(&observed(&["aa:bb:cc:dd:ee:ff"]), &registry, &[]);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_preferred_networks_win_ties() {
        // Both networks share a router; preference order decides the primary.
        let registry = NetworkRegistry::new(vec![
            descriptor("home", &["aa:bb:cc:dd:ee:ff"]),
            descriptor("lab", &["aa:bb:cc:dd:ee:ff"]),
        ])
        .unwrap();

        let matches = select_networks(
            &observed(&["aa:bb:cc:dd:ee:ff"]),
            &registry,
            &["lab".to_string()],
        );
        assert_eq!(matches[0].name, "lab");
        assert_eq!(matches[1].name, "home");
    }

    #[test]
    fn test_select_by_connection_name() {
        let mut network = descriptor("hotspot", &[]);
        network.connection_name = Some("Phone Hotspot".to_string());
        let registry = NetworkRegistry::new(vec![network]).unwrap();

        let observations = Observed {
            macs: Vec::new(),
            connections: vec!["phone hotspot".to_string()],
        };
        let matches = select_networks(&observations, &registry, &[]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "hotspot");
    }

    #[test]
    fn test_duplicate_network_rejected() {
        let result = NetworkRegistry::new(vec![
            descriptor("home", &[]),
            descriptor("HOME", &[]),
        ]);
        assert!(matches!(result, Err(NetworkError::DuplicateNetwork(_))));
    }

    #[test]
    fn test_find_by_key() {
        let mut network = descriptor("Library__MV", &[]);
        network.key = Some("lib".to_string());
        let registry = NetworkRegistry::new(vec![network]).unwrap();
        assert!(registry.find("LIB").is_some());
        assert!(registry.find("library__mv").is_some());
    }

    #[test]
    fn test_port_list_forms() {
        assert_eq!(
            PortList::Csv("80,443".to_string()).ports().unwrap(),
            vec![80, 443]
        );
        assert_eq!(PortList::List(vec![22]).ports().unwrap(), vec![22]);
        assert!(PortList::Csv("80,oops".to_string()).ports().is_err());
    }

    #[test]
    fn test_ports_choose() {
        let mut ports = Ports::default();
        assert_eq!(ports.choose(&[22, 443]), Some(22));
        ports.set_available(vec![80, 443]);
        assert_eq!(ports.choose(&[22, 443]), Some(443));
        assert_eq!(ports.choose(&[22]), None);
    }

    #[test]
    fn test_known_names_include_default() {
        let mut network = descriptor("home", &[]);
        network.key = Some("hm".to_string());
        let registry = NetworkRegistry::new(vec![network]).unwrap();
        let names = registry.known_names();
        assert!(names.contains("home"));
        assert!(names.contains("hm"));
        assert!(names.contains(DEFAULT_NETWORK_NAME));
    }
}
