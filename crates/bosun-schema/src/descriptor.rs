//! Endpoint extraction from written server descriptors.
//!
//! The descriptor is opaque text as far as the orchestrator is concerned;
//! the only thing read back out of it is the set of listening endpoints a
//! downstream proxy needs. Declarations are extracted by plain string
//! scanning; the descriptor format does not warrant a markup parser for
//! three attributes.

/// One listening endpoint declared in a server descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure_port: Option<u16>,
}

/// Extract every endpoint declaration, in document order.
///
/// A declaration is any element whose tag name contains `Endpoint` (or is
/// exactly `endpoint`), carrying `host=`, `port=`/`httpPort=`, and
/// `securePort=`/`httpsPort=` attributes. Consumers that need "the"
/// endpoint take the last entry: later declarations override earlier ones.
pub fn parse_endpoints(descriptor: &str) -> Vec<Endpoint> {
    let stripped = strip_comments(descriptor);
    let mut endpoints = Vec::new();
    for element in elements(&stripped) {
        let tag = element.split_whitespace().next().unwrap_or("");
        if !(tag == "endpoint" || tag.contains("Endpoint")) {
            continue;
        }
        let host = attribute(element, "host");
        let port = attribute(element, "httpPort")
            .or_else(|| attribute(element, "port"))
            .and_then(|v| v.parse().ok());
        let secure_port = attribute(element, "httpsPort")
            .or_else(|| attribute(element, "securePort"))
            .and_then(|v| v.parse().ok());
        if host.is_some() || port.is_some() || secure_port.is_some() {
            endpoints.push(Endpoint {
                host,
                port,
                secure_port,
            });
        }
    }
    endpoints
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Iterate over `<...>` element bodies, skipping closing tags and prolog.
fn elements(text: &str) -> impl Iterator<Item = &str> {
    text.split('<').skip(1).filter_map(|chunk| {
        let body = chunk.split('>').next()?;
        let body = body.trim().trim_end_matches('/');
        if body.starts_with('/') || body.starts_with('!') || body.starts_with('?') {
            None
        } else {
            Some(body)
        }
    })
}

fn attribute(element: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = element.find(&needle)? + needle.len();
    let rest = &element[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_owned())
}
