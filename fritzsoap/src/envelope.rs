//! Construction et lecture des enveloppes SOAP 1.1

use xmltree::Element;

use crate::error::{Result, SoapError};
use crate::request::SoapRequestParameters;

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_ENCODING_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// Builds the request envelope for `parameters`
///
/// The output is a single line and depends only on the parameters, so two
/// calls with the same input give byte-identical bodies. Argument values are
/// written as-is.
pub fn create_envelope(parameters: &SoapRequestParameters) -> String {
    let mut xml = String::with_capacity(320 + parameters.parameters.len() * 48);
    xml.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push_str(&format!(
        r#"<s:Envelope xmlns:s="{}" s:encodingStyle="{}"><s:Body>"#,
        SOAP_ENVELOPE_NS, SOAP_ENCODING_NS
    ));
    xml.push_str(&format!(
        r#"<u:{} xmlns:u="{}">"#,
        parameters.action, parameters.request_namespace
    ));
    for parameter in &parameters.parameters {
        xml.push_str(&format!(
            "<{name}>{value}</{name}>",
            name = parameter.name,
            value = parameter.value
        ));
    }
    xml.push_str(&format!("</u:{}>", parameters.action));
    xml.push_str("</s:Body></s:Envelope>");
    xml
}

/// Returns the `Body` element of a parsed envelope.
pub fn body(envelope: &Element) -> Option<&Element> {
    envelope
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .find(|e| e.name == "Body")
}

/// First element inside `Body`: the action (request) or `<Action>Response`.
pub fn body_action(envelope: &Element) -> Option<&Element> {
    body(envelope)?.children.iter().find_map(|n| n.as_element())
}

/// Arguments of the action carried by `envelope`, in document order.
pub fn action_arguments(envelope: &Element) -> Result<Vec<(String, String)>> {
    let action = body_action(envelope).ok_or(SoapError::MissingBody)?;
    Ok(action
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .map(|e| {
            (
                e.name.clone(),
                e.get_text().map(|t| t.into_owned()).unwrap_or_default(),
            )
        })
        .collect())
}

/// Parses `xml` and returns the action arguments in document order.
pub fn extract_action_arguments(xml: &str) -> Result<Vec<(String, String)>> {
    let envelope = Element::parse(xml.as_bytes())?;
    action_arguments(&envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SoapRequestParameters {
        SoapRequestParameters::new("urn:dslforum-org:service:Hosts:1", "GetGenericHostEntry")
            .with_parameter("NewIndex", 3)
            .with_parameter("NewFilter", "lan")
            .with_parameter("NewEmpty", "")
    }

    #[test]
    fn test_envelope_layout() {
        let xml = create_envelope(&sample());

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope"#));
        assert!(xml.contains(r#"<u:GetGenericHostEntry xmlns:u="urn:dslforum-org:service:Hosts:1">"#));
        assert!(xml.contains("<NewIndex>3</NewIndex><NewFilter>lan</NewFilter><NewEmpty></NewEmpty>"));
        assert!(xml.ends_with("</u:GetGenericHostEntry></s:Body></s:Envelope>"));
        assert!(!xml.contains('\n'));
    }

    #[test]
    fn test_envelope_is_deterministic() {
        assert_eq!(create_envelope(&sample()), create_envelope(&sample()));
    }

    #[test]
    fn test_arguments_round_trip_in_order() {
        let params = sample();
        let xml = create_envelope(&params);

        let extracted = extract_action_arguments(&xml).unwrap();
        let expected: Vec<(String, String)> = params
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        assert_eq!(extracted, expected);
    }

    #[test]
    fn test_action_without_arguments() {
        let params = SoapRequestParameters::new("urn:dslforum-org:service:DeviceInfo:1", "GetInfo");
        let xml = create_envelope(&params);

        assert!(xml.contains(r#"<u:GetInfo xmlns:u="urn:dslforum-org:service:DeviceInfo:1"></u:GetInfo>"#));
        assert!(extract_action_arguments(&xml).unwrap().is_empty());
    }

    #[test]
    fn test_missing_body() {
        let xml = format!(r#"<s:Envelope xmlns:s="{}"></s:Envelope>"#, SOAP_ENVELOPE_NS);
        assert!(matches!(
            extract_action_arguments(&xml),
            Err(SoapError::MissingBody)
        ));
    }
}
