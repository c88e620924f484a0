//! Bootstrap payload served to peers over plain request/response.
//!
//! A peer that cannot yet speak the duplex protocol fetches this payload
//! with an ordinary request: the embedder-supplied client script, prefixed
//! with one line telling the script where to connect back as a duplex
//! client.

/// Prefix `script` with a connection-URL assignment derived from the
/// inbound request's scheme, host, and path.
pub fn bootstrap_payload(secure: bool, host: &str, path: &str, script: &str) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("ConnectionUrl = \"{scheme}://{host}{path}\"\n{script}")
}
