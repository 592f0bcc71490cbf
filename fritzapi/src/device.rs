//! Description d'un équipement FRITZ!Box découvert sur le réseau
//!
//! A [`FritzDevice`] is created from a discovery response, completed with the
//! security port and the TR-64 description document, then handed to the
//! caller who assigns credentials before invoking services.

use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::Duration;

use tracing::trace;
use url::Url;
use xmltree::Element;

use fritzsoap::Credentials;

use crate::error::{FritzError, Result};
use crate::services::{ConnectionSettings, DEFAULT_REQUEST_TIMEOUT, ServiceClient, ServiceRegistry};

/// Scheme reported by a location that is not an absolute URL
pub const UNKNOWN_SCHEME: &str = "unknown";

/// `LOCATION` header of a discovery response
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceLocation {
    Resolved(Url),
    /// Raw header value that could not be used as an absolute URL
    Unknown(String),
}

impl DeviceLocation {
    /// Parses an absolute URL. An IPv6 zone id (`[fe80::1%25eth0]`) is
    /// dropped, `url` rejects it.
    pub fn parse(raw: &str) -> Self {
        match Url::parse(&strip_zone_id(raw)) {
            Ok(url) if url.host_str().is_some() => DeviceLocation::Resolved(url),
            _ => DeviceLocation::Unknown(raw.to_string()),
        }
    }

    pub fn scheme(&self) -> &str {
        match self {
            DeviceLocation::Resolved(url) => url.scheme(),
            DeviceLocation::Unknown(_) => UNKNOWN_SCHEME,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, DeviceLocation::Resolved(_))
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            DeviceLocation::Resolved(url) => Some(url),
            DeviceLocation::Unknown(_) => None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.url().and_then(|u| u.host_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.url().and_then(|u| u.port_or_known_default())
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceLocation::Resolved(url) => url.as_str(),
            DeviceLocation::Unknown(raw) => raw,
        }
    }
}

fn strip_zone_id(raw: &str) -> Cow<'_, str> {
    let Some(open) = raw.find('[') else {
        return Cow::Borrowed(raw);
    };
    let Some(close) = raw[open..].find(']').map(|i| open + i) else {
        return Cow::Borrowed(raw);
    };
    match raw[open..close].find('%') {
        Some(zone) => Cow::Owned(format!("{}{}", &raw[..open + zone], &raw[close..])),
        None => Cow::Borrowed(raw),
    }
}

/// Identity read from the description document
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: String,
    pub model_name: String,
    pub model_description: String,
    pub model_number: String,
    pub udn: String,
}

impl DeviceIdentity {
    pub fn is_empty(&self) -> bool {
        *self == DeviceIdentity::default()
    }
}

/// Splits a discovery response into lower-cased header names and values
///
/// The status line is discarded, lines without a colon are ignored and the
/// last occurrence of a repeated header wins.
pub fn parse_headers(response: &str) -> HashMap<String, String> {
    response
        .split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
        .collect()
}

/// A TR-64 device
#[derive(Debug, Clone)]
pub struct FritzDevice {
    ip_address: IpAddr,
    location: Option<DeviceLocation>,
    port: Option<u16>,
    base_url: Option<String>,
    identity: DeviceIdentity,
    credentials: Option<Credentials>,
    request_timeout: Duration,
}

impl FritzDevice {
    pub fn new(ip_address: IpAddr, location: Option<DeviceLocation>) -> Self {
        let port = location.as_ref().and_then(DeviceLocation::port);
        Self {
            ip_address,
            location,
            port,
            base_url: None,
            identity: DeviceIdentity::default(),
            credentials: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Device described by the discovery response received from `ip_address`.
    pub fn parse_response(ip_address: IpAddr, response: &str) -> Self {
        trace!("Discovery response from {}:\n{}", ip_address, response);
        let headers = parse_headers(response);
        let location = headers.get("location").map(|raw| DeviceLocation::parse(raw));
        Self::new(ip_address, location)
    }

    /// Fills the identity from a TR-64 description document
    ///
    /// Elements are looked up in the namespace of the root element. A missing
    /// `device` element leaves the identity empty and missing fields stay
    /// empty; only malformed XML is an error.
    pub fn parse_description(&mut self, xml: &str) -> Result<()> {
        let root = Element::parse(xml.as_bytes())?;
        let namespace = root.namespace.as_deref();

        if let Some(device) = child(&root, "device", namespace) {
            let text = |name: &str| {
                child(device, name, namespace)
                    .and_then(|e| e.get_text())
                    .map(|t| t.trim().to_string())
                    .unwrap_or_default()
            };
            self.identity = DeviceIdentity {
                device_type: text("deviceType"),
                friendly_name: text("friendlyName"),
                manufacturer: text("manufacturer"),
                manufacturer_url: text("manufacturerURL"),
                model_name: text("modelName"),
                model_description: text("modelDescription"),
                model_number: text("modelNumber"),
                udn: text("UDN"),
            };
        }
        Ok(())
    }

    pub fn ip_address(&self) -> IpAddr {
        self.ip_address
    }

    pub fn location(&self) -> Option<&DeviceLocation> {
        self.location.as_ref()
    }

    /// Port announced in the discovery location
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_type(&self) -> &str {
        &self.identity.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.identity.friendly_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.identity.manufacturer
    }

    pub fn manufacturer_url(&self) -> &str {
        &self.identity.manufacturer_url
    }

    pub fn model_name(&self) -> &str {
        &self.identity.model_name
    }

    pub fn model_description(&self) -> &str {
        &self.identity.model_description
    }

    pub fn model_number(&self) -> &str {
        &self.identity.model_number
    }

    pub fn udn(&self) -> &str {
        &self.identity.udn
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    /// Plain HTTP endpoint on the responder address and location port.
    pub fn insecure_url(&self) -> Option<String> {
        self.port.map(|port| http_root("http", &self.ip_address, port))
    }

    /// Sets the base URL to HTTPS on `security_port`.
    pub fn resolve_base_url(&mut self, security_port: u16) {
        self.base_url = Some(http_root("https", &self.ip_address, security_port));
    }

    /// `http://<location host>:<location port>/tr64desc.xml`
    pub fn description_url(&self) -> Option<Url> {
        let mut url = self.location.as_ref()?.url()?.clone();
        url.set_scheme("http").ok()?;
        url.set_path("tr64desc.xml");
        url.set_query(None);
        url.set_fragment(None);
        Some(url)
    }

    /// Resolved and credentials assigned.
    pub fn is_ready(&self) -> bool {
        self.base_url.is_some() && self.credentials.is_some()
    }

    /// Settings handed to service clients.
    pub fn connection_settings(&self) -> Result<ConnectionSettings> {
        let base_url = self
            .base_url
            .clone()
            .ok_or_else(|| FritzError::NotResolved(self.ip_address.to_string()))?;
        let mut settings = ConnectionSettings::new(base_url).with_timeout(self.request_timeout);
        if let Some(creds) = &self.credentials {
            settings = settings.with_credentials(&creds.username, &creds.password);
        }
        Ok(settings)
    }

    /// Client for service `id` built through `registry`.
    pub fn service_client(&self, registry: &ServiceRegistry, id: &str) -> Result<Box<dyn ServiceClient>> {
        registry.create(id, self.connection_settings()?)
    }
}

impl PartialEq for FritzDevice {
    fn eq(&self, other: &Self) -> bool {
        if !self.identity.udn.is_empty() || !other.identity.udn.is_empty() {
            return self.identity.udn == other.identity.udn;
        }
        match (&self.base_url, &other.base_url) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.ip_address == other.ip_address && self.location == other.location,
            _ => false,
        }
    }
}

impl Eq for FritzDevice {}

impl Hash for FritzDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if !self.identity.udn.is_empty() {
            self.identity.udn.hash(state);
            return;
        }
        match &self.base_url {
            Some(base_url) => base_url.hash(state),
            None => {
                self.ip_address.hash(state);
                self.location.hash(state);
            }
        }
    }
}

fn child<'a>(parent: &'a Element, name: &str, namespace: Option<&str>) -> Option<&'a Element> {
    parent
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .find(|e| e.name == name && e.namespace.as_deref() == namespace)
}

fn http_root(scheme: &str, ip: &IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}://{}:{}/", scheme, v4, port),
        IpAddr::V6(v6) => format!("{}://[{}]:{}/", scheme, v6, port),
    }
}
