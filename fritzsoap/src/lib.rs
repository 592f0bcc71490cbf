//! # fritzsoap - Moteur SOAP TR-64
//!
//! Ce crate implémente l'invocation d'actions SOAP sur les équipements TR-64
//! (FRITZ!Box et compatibles).
//!
//! ## Fonctionnalités
//!
//! - ✅ Construction d'enveloppes SOAP 1.1 déterministes
//! - ✅ Appels HTTP(S) avec authentification Basic ou Digest
//! - ✅ Détection des SOAP Faults (avec détail `UPnPError`)
//! - ✅ Décodage typé et paresseux des réponses
//!
//! ## Architecture
//!
//! - [`SoapRequestParameters`] : description d'un appel
//! - [`SoapClient`] : envoi et lecture de la réponse
//! - [`SoapResponse`] : réponse non typée
//! - [`SoapResult`] : types décodés par [`SoapClient::invoke_typed`]
//! - [`SoapFault`] : erreur renvoyée par l'équipement
//!
//! ## Example
//!
//! ```no_run
//! use fritzsoap::{SoapClient, SoapRequestParameters};
//!
//! # async fn run() -> fritzsoap::Result<()> {
//! let params = SoapRequestParameters::new("urn:dslforum-org:service:DeviceInfo:1", "GetSecurityPort");
//! let response = SoapClient::new()
//!     .invoke("http://192.168.178.1:49000/upnp/control/deviceinfo", &params)
//!     .await?;
//! let port = response.value("NewSecurityPort");
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod client;
mod envelope;
mod error;
mod fault;
mod request;
mod response;
mod streamer;

pub use client::{DEFAULT_REQUEST_TIMEOUT, SoapClient};
pub use envelope::{
    SOAP_ENCODING_NS, SOAP_ENVELOPE_NS, action_arguments, body_action, create_envelope,
    extract_action_arguments,
};
pub use error::{Result, SoapError};
pub use fault::{SoapFault, UpnpError, build_soap_fault, find_fault};
pub use request::{Credentials, SoapRequestParameter, SoapRequestParameters};
pub use response::SoapResponse;
pub use streamer::{SoapResult, SoapStream, StreamError, stream_instances};
