//! SOAP Faults renvoyés par les équipements TR-64

use std::fmt;

use xmltree::Element;

use crate::envelope::SOAP_ENVELOPE_NS;

/// Erreur SOAP (Fault)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// Code d'erreur (ex: "s:Client")
    pub fault_code: String,

    /// Description de l'erreur (ex: "UPnPError")
    pub fault_string: String,

    /// Détails UPnP optionnels
    pub upnp_error: Option<UpnpError>,
}

/// Erreur UPnP spécifique, contenue dans `<detail>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpError {
    /// Code d'erreur UPnP (ex: "401", "606")
    pub error_code: String,

    /// Description de l'erreur
    pub error_description: String,
}

impl SoapFault {
    pub fn new(fault_code: impl Into<String>, fault_string: impl Into<String>) -> Self {
        Self {
            fault_code: fault_code.into(),
            fault_string: fault_string.into(),
            upnp_error: None,
        }
    }

    /// Numeric UPnP error code when the device supplied one.
    pub fn upnp_error_code(&self) -> Option<u32> {
        self.upnp_error
            .as_ref()
            .and_then(|e| e.error_code.trim().parse().ok())
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.fault_code, self.fault_string)?;
        if let Some(upnp) = &self.upnp_error {
            write!(f, " (UPnP {} {})", upnp.error_code, upnp.error_description)?;
        }
        Ok(())
    }
}

/// Depth-first search for the first element with local name `name`.
pub(crate) fn find_descendant<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    element
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .find_map(|child| {
            if child.name == name {
                Some(child)
            } else {
                find_descendant(child, name)
            }
        })
}

fn descendant_text(element: &Element, name: &str) -> Option<String> {
    find_descendant(element, name).map(|e| {
        e.get_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    })
}

/// Looks for a `Fault` element anywhere in `document`
///
/// Namespace prefixes are ignored. A missing `faultcode` or `faultstring`
/// child yields an empty string rather than hiding the fault.
pub fn find_fault(document: &Element) -> Option<SoapFault> {
    let fault = if document.name == "Fault" {
        document
    } else {
        find_descendant(document, "Fault")?
    };

    let upnp_error = find_descendant(fault, "UPnPError").map(|e| UpnpError {
        error_code: descendant_text(e, "errorCode").unwrap_or_default(),
        error_description: descendant_text(e, "errorDescription").unwrap_or_default(),
    });

    Some(SoapFault {
        fault_code: descendant_text(fault, "faultcode").unwrap_or_default(),
        fault_string: descendant_text(fault, "faultstring").unwrap_or_default(),
        upnp_error,
    })
}

/// Builds a SOAP Fault envelope the way TR-64 devices send them.
pub fn build_soap_fault(
    fault_code: &str,
    fault_string: &str,
    upnp_error_code: Option<&str>,
    upnp_error_desc: Option<&str>,
) -> String {
    let detail = match (upnp_error_code, upnp_error_desc) {
        (Some(code), Some(desc)) => format!(
            r#"<detail><UPnPError xmlns="urn:dslforum-org:control-1-0"><errorCode>{}</errorCode><errorDescription>{}</errorDescription></UPnPError></detail>"#,
            code, desc
        ),
        _ => String::new(),
    };

    format!(
        r#"<?xml version="1.0"?><s:Envelope xmlns:s="{}"><s:Body><s:Fault><faultcode>{}</faultcode><faultstring>{}</faultstring>{}</s:Fault></s:Body></s:Envelope>"#,
        SOAP_ENVELOPE_NS, fault_code, fault_string, detail
    )
}
