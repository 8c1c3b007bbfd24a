use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

pub const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";

/// Everything the gateway is allowed to know about an incoming connection.
///
/// Populated once at the handshake boundary. Header names are stored lower-cased;
/// repeated headers are joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetadata {
    headers: BTreeMap<String, String>,
    subprotocols: Vec<String>,
    client_addr: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("empty header name")]
    EmptyHeaderName,

    #[error("invalid header name: {0:?}")]
    InvalidHeaderName(String),

    #[error("control character in value of header {0:?}")]
    ControlCharacter(String),

    #[error("empty subprotocol entry")]
    EmptySubprotocol,

    #[error("unparsable client address: {0:?}")]
    InvalidClientAddr(String),
}

impl ConnectionMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_lowercase();
        match self.headers.get_mut(&name) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                self.headers.insert(name, value.to_string());
            }
        }
        self
    }

    pub fn with_subprotocol(mut self, protocol: &str) -> Self {
        self.subprotocols.push(protocol.to_string());
        self
    }

    pub fn with_client_addr(mut self, addr: &str) -> Self {
        self.client_addr = Some(addr.to_string());
        self
    }

    /// Build from a handshake request's headers and the peer address.
    ///
    /// Subprotocols are taken from `Sec-WebSocket-Protocol`.
    pub fn from_http(headers: &http::HeaderMap, peer: Option<SocketAddr>) -> Self {
        let mut metadata = Self::new();

        for (name, value) in headers.iter() {
            let value = String::from_utf8_lossy(value.as_bytes());
            metadata = metadata.with_header(name.as_str(), &value);
        }

        let subprotocols: Vec<String> = metadata
            .header(SEC_WEBSOCKET_PROTOCOL)
            .map(|raw| raw.split(',').map(|p| p.trim().to_string()).collect())
            .unwrap_or_default();
        metadata.subprotocols = subprotocols;
        metadata.client_addr = peer.map(|addr| addr.to_string());
        metadata
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn subprotocols(&self) -> &[String] {
        &self.subprotocols
    }

    pub fn client_addr(&self) -> Option<&str> {
        self.client_addr.as_deref()
    }

    /// IP part of the peer address, if it parses.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        let raw = self.client_addr.as_deref()?;
        raw.parse::<SocketAddr>()
            .map(|addr| addr.ip())
            .or_else(|_| raw.parse::<IpAddr>())
            .ok()
    }

    /// Reject metadata that could not have come from a well-formed handshake.
    pub fn validate(&self) -> Result<(), MetadataError> {
        for (name, value) in &self.headers {
            if name.is_empty() {
                return Err(MetadataError::EmptyHeaderName);
            }
            if !name.chars().all(is_token_char) {
                return Err(MetadataError::InvalidHeaderName(name.clone()));
            }
            if value.chars().any(|c| c.is_control() && c != '\t') {
                return Err(MetadataError::ControlCharacter(name.clone()));
            }
        }

        if self.subprotocols.iter().any(|p| p.trim().is_empty()) {
            return Err(MetadataError::EmptySubprotocol);
        }

        if let Some(addr) = &self.client_addr
            && self.peer_ip().is_none()
        {
            return Err(MetadataError::InvalidClientAddr(addr.clone()));
        }

        Ok(())
    }

    /// Stable hex digest of the full metadata, used to coalesce identical attempts.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.headers {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([1u8]);
        }
        for protocol in &self.subprotocols {
            hasher.update(protocol.as_bytes());
            hasher.update([2u8]);
        }
        if let Some(addr) = &self.client_addr {
            hasher.update(addr.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

// RFC 9110 token characters.
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}
