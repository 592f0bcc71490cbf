use thiserror::Error;

use crate::fault::SoapFault;

/// Result type alias for SOAP operations
pub type Result<T> = std::result::Result<T, SoapError>;

/// Errors returned by a SOAP invocation
///
/// `Http` and `HttpStatus` are transport failures: the call did not get a
/// usable answer. `Fault` means the device understood the request and
/// rejected it.
#[derive(Debug, Error)]
pub enum SoapError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP status {status} {reason}")]
    HttpStatus {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("SOAP fault {}: {}", .0.fault_code, .0.fault_string)]
    Fault(SoapFault),

    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("Missing SOAP Body")]
    MissingBody,
}

impl SoapError {
    /// The SOAP fault carried by this error, if it is a protocol fault.
    pub fn fault(&self) -> Option<&SoapFault> {
        match self {
            SoapError::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, SoapError::Fault(_))
    }

    /// True for transport-level failures (request failed or unexpected status).
    pub fn is_transport(&self) -> bool {
        matches!(self, SoapError::Http(_) | SoapError::HttpStatus { .. })
    }
}
