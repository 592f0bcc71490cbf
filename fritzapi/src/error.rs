use thiserror::Error;

use fritzsoap::SoapError;

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, FritzError>;

#[derive(Error, Debug)]
pub enum FritzError {
    #[error("Failed to get device info for device {host}: HTTP {status}")]
    DeviceInfo { host: String, status: u16 },

    #[error("Failed to get device info for device {host}: {source}")]
    DeviceInfoTransport {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid device description: {0}")]
    Description(#[from] xmltree::ParseError),

    #[error("Soap Error: {0}")]
    Soap(#[from] SoapError),

    #[error("Unknown service {0}")]
    UnknownService(String),

    #[error("Device {0} has no resolved base URL")]
    NotResolved(String),
}
