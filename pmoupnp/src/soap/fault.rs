//! Faults SOAP renvoyés par les devices UPnP

use super::SoapEnvelope;
use super::envelope::find_child_with_suffix;

/// Erreur UPnP extraite de `Fault/detail/UPnPError`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpError {
    /// Code d'erreur UPnP (ex: "401", "501", "714")
    pub error_code: String,

    pub error_description: String,
}

/// Extrait l'erreur UPnP d'une enveloppe de réponse, s'il y en a une.
///
/// Un `Fault` sans bloc `UPnPError` donne le `faultstring` avec le code "0".
pub fn parse_upnp_fault(envelope: &SoapEnvelope) -> Option<UpnpError> {
    let fault = envelope.body.child_with_suffix("Fault")?;

    let text_of = |parent: &xmltree::Element, suffix: &str| {
        find_child_with_suffix(parent, suffix)
            .and_then(|e| e.get_text())
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    };

    let upnp_error = find_child_with_suffix(fault, "detail")
        .and_then(|detail| find_child_with_suffix(detail, "UPnPError"));

    match upnp_error {
        Some(err) => Some(UpnpError {
            error_code: text_of(err, "errorCode"),
            error_description: text_of(err, "errorDescription"),
        }),
        None => Some(UpnpError {
            error_code: "0".to_string(),
            error_description: text_of(fault, "faultstring"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::parse_soap_envelope;

    #[test]
    fn test_parse_upnp_fault() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>714</errorCode>
          <errorDescription>Illegal MIME-type</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let err = parse_upnp_fault(&envelope).unwrap();
        assert_eq!(err.error_code, "714");
        assert_eq!(err.error_description, "Illegal MIME-type");
    }

    #[test]
    fn test_no_fault_in_success_response() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:PlayResponse xmlns:u="urn:schemas-upnp-org:service:AVTransport:1"/></s:Body></s:Envelope>"#;
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        assert!(parse_upnp_fault(&envelope).is_none());
    }
}
