use std::fmt;

use url::Url;

/// Identifies a pooling domain: destination host and port.
///
/// Two keys name the same domain iff both fields are equal. There is no
/// scheme folding and no port normalization here beyond what the caller
/// already resolved; connections to `example.com:80` made for different
/// schemes share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
}

impl ConnectionKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Builds a key from an already-parsed URL, using its host and its
    /// explicit or scheme-default port.
    pub fn from_url(url: &Url) -> Option<Self> {
        Some(Self {
            host: url.host_str()?.to_string(),
            port: url.port_or_known_default()?,
        })
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_uses_scheme_default_port() {
        let url = Url::parse("https://example.com/index.html").unwrap();
        let key = ConnectionKey::from_url(&url).unwrap();
        assert_eq!(key, ConnectionKey::new("example.com", 443));
    }

    #[test]
    fn test_from_url_prefers_explicit_port() {
        let url = Url::parse("http://example.com:8080/").unwrap();
        let key = ConnectionKey::from_url(&url).unwrap();
        assert_eq!(key.port, 8080);
    }

    #[test]
    fn test_no_scheme_folding() {
        // Same host and port reached via different schemes is one domain.
        let http = Url::parse("http://example.com:80/").unwrap();
        let https = Url::parse("https://example.com:80/").unwrap();
        assert_eq!(
            ConnectionKey::from_url(&http),
            ConnectionKey::from_url(&https)
        );
    }

    #[test]
    fn test_from_url_without_host() {
        let url = Url::parse("data:text/plain,hello").unwrap();
        assert_eq!(ConnectionKey::from_url(&url), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionKey::new("example.com", 443).to_string(), "example.com:443");
    }
}
