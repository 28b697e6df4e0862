//! # Module SOAP - côté client
//!
//! - ✅ Construction des requêtes d'action UPnP ([`build_soap_request`])
//! - ✅ Parsing des enveloppes de réponse ([`parse_soap_envelope`])
//! - ✅ Extraction des faults UPnP ([`parse_upnp_fault`])
//!
//! ## Example
//!
//! ```
//! use pmoupnp::soap::build_soap_request;
//!
//! let xml = build_soap_request(
//!     "urn:schemas-upnp-org:service:AVTransport:1",
//!     "Play",
//!     &[("InstanceID", "0"), ("Speed", "1")],
//! ).unwrap();
//! assert!(xml.contains("<u:Play"));
//! ```

mod builder;
mod envelope;
mod fault;
mod parser;

pub use builder::build_soap_request;
pub use envelope::{SoapBody, SoapEnvelope, SoapHeader, find_child_with_suffix};
pub use fault::{UpnpError, parse_upnp_fault};
pub use parser::{SoapParseError, parse_soap_envelope};
