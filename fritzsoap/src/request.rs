//! Paramètres d'une requête SOAP TR-64

use std::fmt;

/// Username/password presented at the HTTP layer.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One `<name>value</name>` argument of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequestParameter {
    pub name: String,
    pub value: String,
}

/// Everything needed to issue a single SOAP action
///
/// Built once per call and consumed by [`crate::SoapClient`].
///
/// ```
/// use fritzsoap::SoapRequestParameters;
///
/// let params = SoapRequestParameters::new("urn:dslforum-org:service:Hosts:1", "GetSpecificHostEntry")
///     .with_parameter("NewMACAddress", "00:11:22:33:44:55");
/// assert_eq!(params.soap_action, "urn:dslforum-org:service:Hosts:1#GetSpecificHostEntry");
/// ```
#[derive(Debug, Clone)]
pub struct SoapRequestParameters {
    /// Action name, e.g. `GetInfo`
    pub action: String,
    /// Service namespace, e.g. `urn:dslforum-org:service:DeviceInfo:1`
    pub request_namespace: String,
    /// Value of the `SOAPAction` header
    pub soap_action: String,
    pub credentials: Option<Credentials>,
    /// Arguments, in the order they are serialized
    pub parameters: Vec<SoapRequestParameter>,
}

impl SoapRequestParameters {
    /// New request for `action` in `namespace`; `SOAPAction` is `namespace#action`.
    pub fn new(namespace: impl Into<String>, action: impl Into<String>) -> Self {
        let request_namespace = namespace.into();
        let action = action.into();
        let soap_action = format!("{}#{}", request_namespace, action);
        Self {
            action,
            request_namespace,
            soap_action,
            credentials: None,
            parameters: Vec::new(),
        }
    }

    /// Appends an argument. The value is inserted verbatim in the envelope and
    /// must already be XML-safe.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.push(SoapRequestParameter {
            name: name.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Overrides the `SOAPAction` header value.
    pub fn with_soap_action(mut self, soap_action: impl Into<String>) -> Self {
        self.soap_action = soap_action.into();
        self
    }
}
