use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefixes an ICE server URL with its scheme when the config omits it
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    const SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];
    if SCHEMES.iter().any(|s| config.url.starts_with(s)) {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_is_added_once() {
        assert_eq!(
            add_ice_url_scheme(&server("stun", "stun.l.google.com:19302")),
            "stun:stun.l.google.com:19302"
        );
        assert_eq!(
            add_ice_url_scheme(&server("turn", "turns:relay.example.com:443")),
            "turns:relay.example.com:443"
        );
        assert_eq!(
            add_ice_url_scheme(&server("turn", "relay.example.com")),
            "turn:relay.example.com"
        );
    }

    #[test]
    fn ids_are_random_hex() {
        let a = random_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, random_id());
    }
}
