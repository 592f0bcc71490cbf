//! Clients de services TR-64
//!
//! Every TR-64 service is addressed by its service type and control path on
//! the device's secure base URL. [`ServiceRegistry`] maps a service identifier
//! to the constructor building its client from [`ConnectionSettings`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use fritzsoap::{Credentials, SoapClient, SoapRequestParameters, SoapResponse, SoapResult};

use crate::error::{FritzError, Result};

/// Default timeout of service requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a service client needs to reach a device.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub base_url: String,
}

impl ConnectionSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            base_url: base_url.into(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Credentials to present, `None` when no username is set.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.username.is_empty() {
            None
        } else {
            Some(Credentials::new(&self.username, &self.password))
        }
    }

    /// Absolute control URL for `control_path`.
    pub fn control_url(&self, control_path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            control_path.trim_start_matches('/')
        )
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// A client bound to one TR-64 service of one device
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Service type, also the namespace of its actions
    fn service_type(&self) -> &str;

    fn control_path(&self) -> &str;

    fn settings(&self) -> &ConnectionSettings;

    fn control_url(&self) -> String {
        self.settings().control_url(self.control_path())
    }

    /// Request skeleton for `action`, carrying the configured credentials.
    fn request(&self, action: &str) -> SoapRequestParameters {
        SoapRequestParameters::new(self.service_type(), action)
            .with_credentials(self.settings().credentials())
    }

    /// Invokes `action` with `arguments` and returns the raw response.
    async fn call(&self, action: &str, arguments: &[(&str, &str)]) -> fritzsoap::Result<SoapResponse> {
        let params = arguments
            .iter()
            .fold(self.request(action), |params, (name, value)| {
                params.with_parameter(*name, value)
            });
        SoapClient::new()
            .with_timeout(self.settings().timeout)
            .invoke(&self.control_url(), &params)
            .await
    }
}

/// Service client knowing only its service type and control path.
#[derive(Debug, Clone)]
pub struct GenericServiceClient {
    service_type: String,
    control_path: String,
    settings: ConnectionSettings,
}

impl GenericServiceClient {
    pub fn new(
        service_type: impl Into<String>,
        control_path: impl Into<String>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            control_path: control_path.into(),
            settings,
        }
    }

    /// Invokes `params` and decodes the response as a list of `T`.
    pub async fn call_typed<T: SoapResult>(
        &self,
        params: &SoapRequestParameters,
    ) -> fritzsoap::Result<Option<Vec<T>>> {
        SoapClient::new()
            .with_timeout(self.settings.timeout)
            .invoke_typed(&self.control_url(), params)
            .await
    }
}

impl ServiceClient for GenericServiceClient {
    fn service_type(&self) -> &str {
        &self.service_type
    }

    fn control_path(&self) -> &str {
        &self.control_path
    }

    fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
}

pub const DEVICE_INFO_SERVICE: &str = "urn:dslforum-org:service:DeviceInfo:1";
pub const DEVICE_INFO_CONTROL: &str = "/upnp/control/deviceinfo";

#[derive(Debug, Deserialize)]
struct SecurityPort {
    #[serde(rename = "NewSecurityPort")]
    port: u16,
}

impl SoapResult for SecurityPort {
    const ELEMENT_NAME: &'static str = "GetSecurityPortResponse";
}

/// Answer of `DeviceInfo.GetInfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    #[serde(rename = "NewManufacturerName")]
    pub manufacturer_name: String,
    #[serde(rename = "NewManufacturerOUI")]
    pub manufacturer_oui: String,
    #[serde(rename = "NewModelName")]
    pub model_name: String,
    #[serde(rename = "NewDescription")]
    pub description: String,
    #[serde(rename = "NewProductClass")]
    pub product_class: String,
    #[serde(rename = "NewSerialNumber")]
    pub serial_number: String,
    #[serde(rename = "NewSoftwareVersion")]
    pub software_version: String,
    #[serde(rename = "NewHardwareVersion")]
    pub hardware_version: String,
    #[serde(rename = "NewSpecVersion")]
    pub spec_version: String,
    #[serde(rename = "NewProvisioningCode")]
    pub provisioning_code: String,
    /// Seconds since the last reboot
    #[serde(rename = "NewUpTime")]
    pub up_time: u64,
    #[serde(rename = "NewDeviceLog")]
    pub device_log: String,
}

impl SoapResult for DeviceInfo {
    const ELEMENT_NAME: &'static str = "GetInfoResponse";
}

/// Typed client of the `DeviceInfo` service
#[derive(Debug, Clone)]
pub struct DeviceInfoClient {
    inner: GenericServiceClient,
}

impl DeviceInfoClient {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            inner: GenericServiceClient::new(DEVICE_INFO_SERVICE, DEVICE_INFO_CONTROL, settings),
        }
    }

    /// Port of the HTTPS endpoint. `Ok(None)` when the responder does not
    /// implement the action, which is how non-TR-64 devices show up.
    pub async fn get_security_port(&self) -> fritzsoap::Result<Option<u16>> {
        let params = self.request("GetSecurityPort");
        let ports = self.inner.call_typed::<SecurityPort>(&params).await?;
        Ok(ports.and_then(|p| p.into_iter().next()).map(|p| p.port))
    }

    pub async fn get_info(&self) -> fritzsoap::Result<Option<DeviceInfo>> {
        let params = self.request("GetInfo");
        let infos = self.inner.call_typed::<DeviceInfo>(&params).await?;
        Ok(infos.and_then(|i| i.into_iter().next()))
    }
}

impl ServiceClient for DeviceInfoClient {
    fn service_type(&self) -> &str {
        self.inner.service_type()
    }

    fn control_path(&self) -> &str {
        self.inner.control_path()
    }

    fn settings(&self) -> &ConnectionSettings {
        self.inner.settings()
    }
}

/// Builds a service client from connection settings
pub type ServiceConstructor = Arc<dyn Fn(ConnectionSettings) -> Box<dyn ServiceClient> + Send + Sync>;

/// Services exposed by FRITZ!Box routers: (identifier, service type, control path)
pub const KNOWN_SERVICES: &[(&str, &str, &str)] = &[
    ("DeviceConfig", "urn:dslforum-org:service:DeviceConfig:1", "/upnp/control/deviceconfig"),
    ("LANConfigSecurity", "urn:dslforum-org:service:LANConfigSecurity:1", "/upnp/control/lanconfigsecurity"),
    ("LANEthernetInterfaceConfig", "urn:dslforum-org:service:LANEthernetInterfaceConfig:1", "/upnp/control/lanethernetifcfg"),
    ("LANHostConfigManagement", "urn:dslforum-org:service:LANHostConfigManagement:1", "/upnp/control/lanhostconfigmgm"),
    ("WANCommonInterfaceConfig", "urn:dslforum-org:service:WANCommonInterfaceConfig:1", "/upnp/control/wancommonifconfig1"),
    ("WANIPConnection", "urn:dslforum-org:service:WANIPConnection:1", "/upnp/control/wanipconnection1"),
    ("WANPPPConnection", "urn:dslforum-org:service:WANPPPConnection:1", "/upnp/control/wanpppconn1"),
    ("X_AVM-DE_AppSetup", "urn:dslforum-org:service:X_AVM-DE_AppSetup:1", "/upnp/control/x_appsetup"),
    ("Layer3Forwarding", "urn:dslforum-org:service:Layer3Forwarding:1", "/upnp/control/layer3forwarding"),
    ("UserInterface", "urn:dslforum-org:service:UserInterface:1", "/upnp/control/userif"),
    ("WLANConfiguration1", "urn:dslforum-org:service:WLANConfiguration:1", "/upnp/control/wlanconfig1"),
    ("WLANConfiguration2", "urn:dslforum-org:service:WLANConfiguration:2", "/upnp/control/wlanconfig2"),
    ("WLANConfiguration3", "urn:dslforum-org:service:WLANConfiguration:3", "/upnp/control/wlanconfig3"),
    ("WANDSLInterfaceConfig", "urn:dslforum-org:service:WANDSLInterfaceConfig:1", "/upnp/control/wandslifconfig1"),
    ("WANEthLinkConfig", "urn:dslforum-org:service:WANEthernetLinkConfig:1", "/upnp/control/wanethlinkconfig1"),
    ("WANDSLLinkConfig", "urn:dslforum-org:service:WANDSLLinkConfig:1", "/upnp/control/wandsllinkconfig1"),
    ("X_AVM-DE_Speedtest", "urn:dslforum-org:service:X_AVM-DE_Speedtest:1", "/upnp/control/x_speedtest"),
];

/// Explicit mapping from service identifier to client constructor
#[derive(Clone)]
pub struct ServiceRegistry {
    constructors: HashMap<String, ServiceConstructor>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry knowing `DeviceInfo` plus every entry of [`KNOWN_SERVICES`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("DeviceInfo", |settings| {
            Box::new(DeviceInfoClient::new(settings)) as Box<dyn ServiceClient>
        });
        for (id, service_type, control_path) in KNOWN_SERVICES {
            registry.register_generic(*id, *service_type, *control_path);
        }
        registry
    }

    pub fn register<F>(&mut self, id: impl Into<String>, constructor: F)
    where
        F: Fn(ConnectionSettings) -> Box<dyn ServiceClient> + Send + Sync + 'static,
    {
        self.constructors.insert(id.into(), Arc::new(constructor));
    }

    /// Registers a [`GenericServiceClient`] for `service_type` at `control_path`.
    pub fn register_generic(
        &mut self,
        id: impl Into<String>,
        service_type: impl Into<String>,
        control_path: impl Into<String>,
    ) {
        let service_type = service_type.into();
        let control_path = control_path.into();
        self.register(id, move |settings| {
            Box::new(GenericServiceClient::new(
                service_type.clone(),
                control_path.clone(),
                settings,
            )) as Box<dyn ServiceClient>
        });
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn create(&self, id: &str, settings: ConnectionSettings) -> Result<Box<dyn ServiceClient>> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| FritzError::UnknownService(id.to_string()))?;
        debug!("Creating {} client for {}", id, settings.base_url);
        Ok(constructor(settings))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry").field("services", &self.ids()).finish()
    }
}
