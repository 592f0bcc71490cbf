//! # fritzapi - Découverte et pilotage TR-64
//!
//! Ce crate découvre les routeurs FRITZ!Box (et compatibles TR-64) présents
//! sur le réseau local et fournit les clients de leurs services.
//!
//! ## Architecture
//!
//! - [`DeviceLocator`] : découverte multicast sur toutes les interfaces
//! - [`FritzDevice`] : équipement découvert (identité, URL sécurisée)
//! - [`ServiceRegistry`] : fabrique des clients de services
//! - [`DeviceInfoClient`] : client typé du service `DeviceInfo`
//!
//! ## Example
//!
//! ```no_run
//! use fritzapi::{ServiceRegistry, locate_devices};
//! use fritzsoap::Credentials;
//!
//! # async fn run() -> fritzapi::Result<()> {
//! let registry = ServiceRegistry::default();
//! for mut device in locate_devices().await {
//!     device.set_credentials(Some(Credentials::new("admin", "secret")));
//!     let wlan = device.service_client(&registry, "WLANConfiguration1")?;
//!     let response = wlan.call("GetInfo", &[]).await?;
//!     println!("{:?}", response.value("NewSSID"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod device;
mod error;
pub mod locator;
pub mod services;
pub mod tr64;

pub use broadcast::DiscoveryDatagram;
pub use device::{DeviceIdentity, DeviceLocation, FritzDevice, parse_headers};
pub use error::{FritzError, Result};
pub use locator::{
    DeviceLocator, DeviceOutcome, DeviceProbe, DiscoveryOptions, DiscoveryReport,
    DiscoveryTransport, HttpDeviceProbe, LoopStats, SkipReason, TransportFactory, UdpTransport,
};
pub use services::{
    ConnectionSettings, DeviceInfo, DeviceInfoClient, GenericServiceClient, ServiceClient,
    ServiceRegistry,
};
pub use tr64::read_device_info;

/// Discovers devices with the process-wide configuration.
pub async fn locate_devices() -> Vec<FritzDevice> {
    let config = fritzconfig::get_config();
    DeviceLocator::with_options(DiscoveryOptions::from_config(&config))
        .discover()
        .await
}
