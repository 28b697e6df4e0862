//! Parsing des messages SSDP reçus par un control point

use super::MAX_AGE;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::trace;

/// Événements SSDP intéressants pour un control point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpEvent {
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
    ByeBye {
        usn: String,
        nt: String,
        from: SocketAddr,
    },
    SearchResponse {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
        from: SocketAddr,
    },
}

impl SsdpEvent {
    pub fn usn(&self) -> &str {
        match self {
            SsdpEvent::Alive { usn, .. }
            | SsdpEvent::ByeBye { usn, .. }
            | SsdpEvent::SearchResponse { usn, .. } => usn,
        }
    }
}

/// Message SSDP mal formé
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SsdpParseError {
    #[error("empty SSDP datagram")]
    Empty,

    #[error("unknown SSDP start line: {0}")]
    UnknownStartLine(String),

    #[error("missing {header} header in {kind}")]
    MissingHeader {
        kind: &'static str,
        header: &'static str,
    },

    #[error("unknown NTS value: {0}")]
    UnknownNts(String),
}

/// Convertit un datagramme SSDP en événement.
///
/// - `Ok(Some(_))` : annonce ou réponse de recherche exploitable
/// - `Ok(None)` : message valide mais sans intérêt (M-SEARCH d'un autre control point)
/// - `Err(_)` : message mal formé
pub fn parse_message(data: &str, from: SocketAddr) -> Result<Option<SsdpEvent>, SsdpParseError> {
    let mut lines = data.lines();
    let first_line = lines.next().map(str::trim).unwrap_or_default();
    if first_line.is_empty() {
        return Err(SsdpParseError::Empty);
    }

    let upper = first_line.to_ascii_uppercase();
    let headers = parse_headers(lines);

    if upper.starts_with("NOTIFY ") {
        handle_notify(&headers, from).map(Some)
    } else if upper.starts_with("HTTP/") && upper.contains(" 200") {
        handle_search_response(&headers, from).map(Some)
    } else if upper.starts_with("M-SEARCH ") {
        Ok(None)
    } else {
        Err(SsdpParseError::UnknownStartLine(first_line.to_string()))
    }
}

fn require(
    headers: &HashMap<String, String>,
    kind: &'static str,
    header: &'static str,
) -> Result<String, SsdpParseError> {
    headers
        .get(header)
        .cloned()
        .ok_or(SsdpParseError::MissingHeader { kind, header })
}

fn handle_notify(
    headers: &HashMap<String, String>,
    from: SocketAddr,
) -> Result<SsdpEvent, SsdpParseError> {
    const KIND: &str = "NOTIFY";
    let nts = require(headers, KIND, "NTS")?.to_ascii_lowercase();
    let nt = require(headers, KIND, "NT")?;
    let usn = require(headers, KIND, "USN")?;

    match nts.as_str() {
        "ssdp:alive" => {
            let location = require(headers, KIND, "LOCATION")?;
            Ok(SsdpEvent::Alive {
                usn,
                nt,
                location,
                server: server_header(headers, from),
                max_age: parse_max_age(headers.get("CACHE-CONTROL")),
                from,
            })
        }
        "ssdp:byebye" => Ok(SsdpEvent::ByeBye { usn, nt, from }),
        _ => Err(SsdpParseError::UnknownNts(nts)),
    }
}

fn handle_search_response(
    headers: &HashMap<String, String>,
    from: SocketAddr,
) -> Result<SsdpEvent, SsdpParseError> {
    const KIND: &str = "M-SEARCH response";
    let st = require(headers, KIND, "ST")?;
    let usn = require(headers, KIND, "USN")?;
    let location = require(headers, KIND, "LOCATION")?;

    Ok(SsdpEvent::SearchResponse {
        usn,
        st,
        location,
        server: server_header(headers, from),
        max_age: parse_max_age(headers.get("CACHE-CONTROL")),
        from,
    })
}

fn server_header(headers: &HashMap<String, String>, from: SocketAddr) -> String {
    headers.get("SERVER").cloned().unwrap_or_else(|| {
        trace!("SSDP message from {} has no SERVER header, using 'Unknown'", from);
        "Unknown".to_string()
    })
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();

        // Empty line marks end of headers
        if line.is_empty() {
            break;
        }

        // Split on first ':' only (values may contain ':')
        match line.split_once(':') {
            Some((name, value)) => {
                let name = name.trim().to_ascii_uppercase();
                let value = value.trim();
                if !name.is_empty() && !value.is_empty() {
                    headers.insert(name, value.to_string());
                } else {
                    trace!("Skipping malformed header: '{}'", line);
                }
            }
            None => trace!("Skipping line without colon: '{}'", line),
        }
    }
    headers
}

fn parse_max_age(value: Option<&String>) -> u32 {
    if let Some(v) = value {
        let lower = v.to_ascii_lowercase();
        if let Some(idx) = lower.find("max-age") {
            let after_key = &lower[idx + "max-age".len()..];
            let after_eq = after_key.trim_start().trim_start_matches('=').trim_start();
            let digits: String = after_eq
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(age) = digits.parse::<u32>() {
                return age;
            }
        }
        trace!(
            "Could not parse max-age from CACHE-CONTROL: '{}', using default {}",
            v,
            MAX_AGE
        );
    }
    MAX_AGE
}

/// Extrait l'UDN (`uuid:...`) d'un USN.
///
/// `uuid:1234::urn:schemas-upnp-org:device:MediaRenderer:1` donne `uuid:1234`.
/// La casse d'origine est conservée.
pub fn extract_udn_from_usn(usn: &str) -> Option<String> {
    let lower = usn.to_ascii_lowercase();
    let start = lower.find("uuid:")?;
    let rest = &usn[start..];
    let udn = match rest.find("::") {
        Some(end) => &rest[..end],
        None => rest,
    };
    let udn = udn.trim();
    if udn.len() <= "uuid:".len() {
        return None;
    }
    Some(udn.to_string())
}
