//! Mesh status model

use std::collections::HashSet;

use tt_protocol::payload::short_name;
use tt_protocol::PeerConnInfo;

/// Backend state of a mesh peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    /// Waiting for the user to authenticate
    NeedsLogin,
    /// Waiting for an admin to approve the machine
    NeedsMachineAuth,
    /// Connecting to the control plane
    Starting,
    /// Joined and reachable
    Running,
    /// Stopped
    Stopped,
    /// Any other state string
    Other(String),
}

impl BackendState {
    /// Parse a backend state string as reported by the daemon
    pub fn parse(state: &str) -> Self {
        match state {
            "NeedsLogin" => Self::NeedsLogin,
            "NeedsMachineAuth" => Self::NeedsMachineAuth,
            "Starting" => Self::Starting,
            "Running" => Self::Running,
            "Stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One node in the mesh, self or peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Machine hostname
    pub host_name: String,
    /// Full DNS name without the trailing root dot
    pub dns_name: String,
    /// Mesh IP addresses
    pub ips: Vec<String>,
    /// Whether the node is online
    pub online: bool,
}

impl NodeStatus {
    /// First DNS label
    pub fn short_name(&self) -> &str {
        short_name(&self.dns_name)
    }

    /// First IPv4 address, falling back to the first address of any family
    pub fn ipv4(&self) -> Option<&str> {
        self.ips
            .iter()
            .find(|ip| !ip.contains(':'))
            .or(self.ips.first())
            .map(String::as_str)
    }

    /// First IPv6 address
    pub fn ipv6(&self) -> Option<&str> {
        self.ips.iter().find(|ip| ip.contains(':')).map(String::as_str)
    }
}

/// Live status snapshot of a mesh peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshStatus {
    /// Backend state
    pub backend_state: BackendState,
    /// Interactive login URL, when one is pending
    pub auth_url: Option<String>,
    /// The peer itself, once known
    pub self_node: Option<NodeStatus>,
    /// Other peers visible in the mesh
    pub peers: Vec<NodeStatus>,
}

impl MeshStatus {
    /// Whether the peer has joined the mesh
    pub fn is_running(&self) -> bool {
        self.backend_state == BackendState::Running
    }

    /// Connection info for every visible peer, sorted by domain
    pub fn peer_snapshot(&self) -> Vec<PeerConnInfo> {
        let mut infos: Vec<_> = self
            .peers
            .iter()
            .map(|peer| PeerConnInfo::new(&peer.dns_name, peer.ips.clone()))
            .collect();
        infos.sort_by(|a, b| a.domain.cmp(&b.domain));
        infos
    }

    /// Every host name an allowed browser origin may use
    ///
    /// DNS name, first DNS label and each IP of the node itself and of every
    /// visible peer.
    pub fn valid_origin_hosts(&self) -> HashSet<String> {
        let mut hosts = HashSet::new();

        for node in self.self_node.iter().chain(self.peers.iter()) {
            if !node.dns_name.is_empty() {
                hosts.insert(node.dns_name.clone());
                hosts.insert(node.short_name().to_string());
            }
            hosts.extend(node.ips.iter().cloned());
        }

        hosts
    }
}
