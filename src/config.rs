//! Server settings.
//!
//! keel does not read configuration files. `Config` is a plain serde type so
//! whatever loader the application already uses can deserialize it; every
//! field is optional and falls back to [`Config::default`].

use std::net::SocketAddr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on.
    pub addr: SocketAddr,
    /// Most idle contexts kept for reuse.
    pub pool_size: usize,
    /// Request header carrying the request id. A fresh UUID is generated
    /// when it is absent; the id is echoed back under the same name.
    pub request_id_header: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            pool_size: 256,
            request_id_header: "x-request-id".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"addr":"127.0.0.1:8080"}"#).unwrap();

        assert_eq!(config.addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(config.pool_size, 256);
        assert_eq!(config.request_id_header, "x-request-id");
    }
}
