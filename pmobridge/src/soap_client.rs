use std::time::Duration;

use pmoupnp::soap::{SoapEnvelope, UpnpError, build_soap_request, parse_soap_envelope, parse_upnp_fault};
use tracing::trace;
use ureq::Agent;

use crate::errors::DeviceControlError;

/// Result of a SOAP call:
/// - HTTP status code
/// - raw XML body (always)
/// - parsed SOAP envelope if parsing succeeded
pub struct SoapCallResult {
    pub status: u16,
    pub raw_body: String,
    pub envelope: Option<SoapEnvelope>,
}

impl SoapCallResult {
    /// Envelope of a successful call.
    ///
    /// A non-2xx status or a SOAP fault becomes a `DeviceControlError::Status`
    /// carrying the UPnP error code when the renderer sent one.
    pub fn into_success(self, action: &str) -> Result<SoapEnvelope, DeviceControlError> {
        let fault: Option<UpnpError> = self.envelope.as_ref().and_then(parse_upnp_fault);

        if !(200..300).contains(&self.status) || fault.is_some() {
            let status = if (200..300).contains(&self.status) { 500 } else { self.status };
            let detail = match fault {
                Some(err) => format!("UPnP error {}: {}", err.error_code, err.error_description),
                None => truncate(&self.raw_body, 200),
            };
            return Err(DeviceControlError::status(action, status, detail));
        }

        self.envelope
            .ok_or_else(|| DeviceControlError::status(action, 502, "missing SOAP envelope in response"))
    }
}

/// HTTP agent that does NOT treat 4xx/5xx as errors, so that SOAP faults
/// sent with a 500 status can still be read.
pub fn http_agent(timeout: Duration) -> Agent {
    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    config.into()
}

/// Invoke a UPnP SOAP action on a control URL.
///
/// - `control_url`: full HTTP URL of the service control endpoint
/// - `service_type`: service URN, e.g. "urn:schemas-upnp-org:service:AVTransport:1"
/// - `action`: action name, e.g. "SetAVTransportURI"
/// - `args`: list of (name, value) pairs, e.g. &[("InstanceID", "0")]
pub fn invoke_upnp_action(
    agent: &Agent,
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<SoapCallResult, DeviceControlError> {
    let body_xml = build_soap_request(service_type, action, args)
        .map_err(|e| DeviceControlError::transport(action, format!("cannot build request: {}", e)))?;

    let soap_action_header = format!(r#""{}#{}""#, service_type, action);
    trace!("SOAP {} -> {}\n{}", action, control_url, body_xml);

    let mut response = agent
        .post(control_url)
        .header("Content-Type", r#"text/xml; charset="utf-8""#)
        .header("SOAPAction", &soap_action_header)
        .send(body_xml)
        .map_err(|e| DeviceControlError::transport(action, e))?;

    let status = response.status().as_u16();
    let raw_body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| DeviceControlError::transport(action, e))?;

    let envelope = parse_soap_envelope(raw_body.as_bytes()).ok();

    Ok(SoapCallResult {
        status,
        raw_body,
        envelope,
    })
}

fn truncate(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
