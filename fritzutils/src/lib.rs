//! Utilitaires réseau partagés par les crates `fritz*`.
//!
//! - [`list_interfaces`] : snapshot des interfaces (flags + adresses)
//! - [`discovery_addresses`] : une adresse unicast par interface éligible à la découverte

mod interfaces;

pub use interfaces::{
    DiscoveryAddress, NetworkInterface, discovery_addresses, is_ipv6_link_local, list_interfaces,
};
