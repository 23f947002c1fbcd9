//! Broker URL parsing (`scheme://host:port`)

use std::fmt;
use std::str::FromStr;

use super::BrokerError;

/// Transport selected by the URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `tcp://` or `mqtt://`
    Tcp,
    /// `ssl://`, `tls://` or `mqtts://`
    Tls,
    /// `ws://`
    Ws,
    /// `wss://`
    Wss,
}

impl Scheme {
    fn parse(scheme: &str) -> Option<Self> {
        match scheme {
            "tcp" | "mqtt" => Some(Scheme::Tcp),
            "ssl" | "tls" | "mqtts" => Some(Scheme::Tls),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Scheme::Ws | Scheme::Wss)
    }
}

/// Validated broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    raw: String,
}

impl BrokerUrl {
    pub fn parse(raw: &str) -> Result<Self, BrokerError> {
        let invalid = |reason: &str| BrokerError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let parsed = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let scheme = Scheme::parse(parsed.scheme())
            .ok_or_else(|| BrokerError::UnsupportedScheme(parsed.scheme().to_string()))?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        Ok(Self {
            scheme,
            host,
            port,
            raw: raw.to_string(),
        })
    }

    /// The URL as given, used as the broker address for websocket transports
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for BrokerUrl {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_url() {
        let url = BrokerUrl::parse("tcp://localhost:1883").unwrap();
        assert_eq!(url.scheme, Scheme::Tcp);
        assert_eq!(url.host, "localhost");
        assert_eq!(url.port, 1883);
        assert_eq!(url.to_string(), "tcp://localhost:1883");
    }

    #[test]
    fn test_parse_scheme_aliases() {
        assert_eq!(BrokerUrl::parse("mqtt://10.0.0.1:1883").unwrap().scheme, Scheme::Tcp);
        assert_eq!(BrokerUrl::parse("ssl://broker:8883").unwrap().scheme, Scheme::Tls);
        assert_eq!(BrokerUrl::parse("mqtts://broker:8883").unwrap().scheme, Scheme::Tls);
        assert_eq!(BrokerUrl::parse("ws://broker:8080/mqtt").unwrap().scheme, Scheme::Ws);
        assert_eq!(BrokerUrl::parse("wss://broker:443/mqtt").unwrap().scheme, Scheme::Wss);
    }

    #[test]
    fn test_websocket_default_port() {
        let url = BrokerUrl::parse("wss://broker/mqtt").unwrap();
        assert_eq!(url.port, 443);
        assert!(url.scheme.is_websocket());
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            BrokerUrl::parse("localhost:1883"),
            Err(BrokerError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            BrokerUrl::parse("http://broker:80"),
            Err(BrokerError::UnsupportedScheme(s)) if s == "http"
        ));
        assert!(matches!(
            BrokerUrl::parse("tcp://broker"),
            Err(BrokerError::InvalidUrl { .. })
        ));
        assert!(BrokerUrl::parse("not a url").is_err());
    }
}
