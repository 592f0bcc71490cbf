//! Client HTTP pour les appels SOAP TR-64
//!
//! One `reqwest::Client` is built per call, carrying the configured timeout.
//! Credentials are only sent once the device answered `401` with a challenge.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Request, StatusCode, Url};
use tracing::{debug, trace, warn};
use xmltree::Element;

use crate::auth::{self, Challenge};
use crate::envelope::create_envelope;
use crate::error::{Result, SoapError};
use crate::fault::find_fault;
use crate::request::{Credentials, SoapRequestParameters};
use crate::response::SoapResponse;
use crate::streamer::{SoapResult, stream_instances};

/// Default per-call timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const TEXT_XML: &str = "text/xml";

/// Generic SOAP invoker
///
/// The client holds no connection state; it can be cloned freely and shared
/// between tasks.
///
/// ```no_run
/// use fritzsoap::{Credentials, SoapClient, SoapRequestParameters};
///
/// # async fn run() -> fritzsoap::Result<()> {
/// let params = SoapRequestParameters::new("urn:dslforum-org:service:DeviceInfo:1", "GetInfo")
///     .with_credentials(Some(Credentials::new("admin", "secret")));
/// let response = SoapClient::new()
///     .invoke("https://192.168.178.1:49443/upnp/control/deviceinfo", &params)
///     .await?;
/// println!("{:?}", response.value("NewModelName"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SoapClient {
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl Default for SoapClient {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            accept_invalid_certs: true,
        }
    }
}

/// Status and body of an HTTP exchange.
struct RawReply {
    status: StatusCode,
    body: String,
}

impl SoapClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client configured from the `soap` section of `config`.
    pub fn from_config(config: &fritzconfig::Config) -> Self {
        Self {
            timeout: Duration::from_millis(
                config
                    .get_soap_request_timeout_ms()
                    .unwrap_or(fritzconfig::DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            accept_invalid_certs: config.get_accept_invalid_certs().unwrap_or(true),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Routers present a self-signed certificate; validation is skipped by default.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn http_client(&self) -> Result<Client> {
        Ok(Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?)
    }

    fn build_request(
        client: &Client,
        url: &str,
        params: &SoapRequestParameters,
        body: &str,
        authorization: Option<Authorization<'_>>,
    ) -> Result<Request> {
        let mut builder = client
            .post(url)
            .header(ACCEPT, TEXT_XML)
            .header(CONTENT_TYPE, TEXT_XML)
            .header("SOAPAction", params.soap_action.as_str())
            .body(body.to_string());

        builder = match authorization {
            Some(Authorization::Basic(creds)) => {
                builder.basic_auth(&creds.username, Some(&creds.password))
            }
            Some(Authorization::Header(value)) => builder.header(AUTHORIZATION, value),
            None => builder,
        };

        Ok(builder.build()?)
    }

    /// Posts the envelope, answering an authentication challenge once.
    async fn exchange(&self, url: &str, params: &SoapRequestParameters) -> Result<RawReply> {
        let client = self.http_client()?;
        let body = create_envelope(params);
        trace!("SOAP request to {}: {}", url, body);

        let request = Self::build_request(&client, url, params, &body, None)?;
        let mut response = client.execute(request).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(creds) = &params.credentials {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(auth::parse_challenge);

                let authorization = match challenge {
                    Some(Challenge::Digest(digest)) => {
                        let uri = request_uri(response.url());
                        Some(Authorization::Header(auth::digest_authorization(
                            &digest,
                            creds,
                            "POST",
                            &uri,
                            &auth::new_cnonce(),
                            1,
                        )))
                    }
                    Some(Challenge::Basic) => Some(Authorization::Basic(creds)),
                    None => {
                        debug!("No usable authentication challenge from {}", url);
                        None
                    }
                };

                if let Some(authorization) = authorization {
                    debug!("Retrying {} with credentials for {}", params.action, creds.username);
                    let request = Self::build_request(&client, url, params, &body, Some(authorization))?;
                    response = client.execute(request).await?;
                }
            }
        }

        let status = response.status();
        let body = response.text().await?;
        trace!("SOAP response from {} ({}): {}", url, status, body);

        Ok(RawReply { status, body })
    }

    /// Invokes an action and returns the parsed response document
    ///
    /// Any non-success status except `500` is a transport error. A `Fault`
    /// element anywhere in the body becomes [`SoapError::Fault`], whatever the
    /// status code.
    pub async fn invoke(&self, url: &str, params: &SoapRequestParameters) -> Result<SoapResponse> {
        debug!("Invoking {} on {}", params.soap_action, url);
        let reply = self.exchange(url, params).await?;

        if !reply.status.is_success() && reply.status != StatusCode::INTERNAL_SERVER_ERROR {
            return Err(SoapError::HttpStatus {
                url: url.to_string(),
                status: reply.status.as_u16(),
                reason: reply.status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let document = Element::parse(reply.body.as_bytes())?;
        if let Some(fault) = find_fault(&document) {
            debug!("SOAP fault from {}: {}", url, fault);
            return Err(SoapError::Fault(fault));
        }

        Ok(SoapResponse::new(document))
    }

    /// Invokes an action and decodes every `T` found in the response
    ///
    /// Returns `Ok(None)` when the device answered with a non-success status
    /// (faults included) or the body could not be decoded. `Err` is reserved
    /// for requests that never completed.
    pub async fn invoke_typed<T: SoapResult>(
        &self,
        url: &str,
        params: &SoapRequestParameters,
    ) -> Result<Option<Vec<T>>> {
        debug!("Invoking {} on {} (typed)", params.soap_action, url);
        let reply = self.exchange(url, params).await?;

        let document = match Element::parse(reply.body.as_bytes()) {
            Ok(document) => Some(document),
            Err(e) => {
                debug!("Unreadable response body from {}: {}", url, e);
                None
            }
        };
        let fault = document.as_ref().and_then(find_fault);

        if !reply.status.is_success() {
            match fault {
                Some(fault) => warn!("{} failed on {}: {}", params.action, url, fault),
                None => warn!("{} failed on {}: HTTP {}", params.action, url, reply.status),
            }
            return Ok(None);
        }
        if let Some(fault) = fault {
            warn!("{} failed on {}: {}", params.action, url, fault);
            return Ok(None);
        }
        if document.is_none() {
            return Ok(None);
        }

        match stream_instances::<T>(&reply.body).collect::<std::result::Result<Vec<T>, _>>() {
            Ok(items) => Ok(Some(items)),
            Err(e) => {
                debug!("Cannot decode {} response: {}", params.action, e);
                Ok(None)
            }
        }
    }
}

enum Authorization<'a> {
    Basic(&'a Credentials),
    Header(String),
}

/// Request-target used in the Digest computation.
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
