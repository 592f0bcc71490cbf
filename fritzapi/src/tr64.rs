//! Lecture du document de description TR-64 (`tr64desc.xml`)

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::device::FritzDevice;
use crate::error::{FritzError, Result};

/// Default timeout of the description download
pub const DEFAULT_DESCRIPTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Downloads the description document of `device` and fills its identity.
///
/// The document is fetched from the host and port of the discovery location.
/// Any status other than `200` is reported as [`FritzError::DeviceInfo`].
pub async fn read_device_info(device: &mut FritzDevice, timeout: Duration) -> Result<()> {
    let host = device
        .location()
        .and_then(|l| l.host())
        .unwrap_or_default()
        .to_string();
    let url = device
        .description_url()
        .ok_or_else(|| FritzError::NotResolved(device.ip_address().to_string()))?;

    debug!("Fetching TR-64 description from {}", url);

    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| FritzError::DeviceInfoTransport {
            host: host.clone(),
            source,
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| FritzError::DeviceInfoTransport {
            host: host.clone(),
            source,
        })?;

    if response.status() != StatusCode::OK {
        return Err(FritzError::DeviceInfo {
            host,
            status: response.status().as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|source| FritzError::DeviceInfoTransport {
            host: host.clone(),
            source,
        })?;

    device.parse_description(&body)
}
