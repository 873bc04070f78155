//! tt-core: Core abstractions and configuration for tailterm
//!
//! This crate provides the configuration value threaded through the server,
//! the known-hosts trust store, and the mesh network abstraction together
//! with its tailscaled-backed implementation.

pub mod config;
pub mod error;
pub mod known_hosts;
pub mod mesh;

pub use config::{ServerConfig, SessionTuning};
pub use error::{ConfigError, KnownHostsError, MeshError};
pub use known_hosts::{HostKeyStatus, KnownHosts};
pub use mesh::{MeshNode, MeshProvider, MeshStatus, NodeOptions};
