use crate::peer::types::ServerConfig;
use rand::Rng;

/// Случайная метка peer connection для логов и id локального потока
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Добавляет к URL ICE сервера схему по его типу, если схемы нет
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    const SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];
    if SCHEMES.iter().any(|s| config.url.starts_with(s)) {
        return config.url.clone();
    }
    let scheme = if config.r#type == "turn" { "turn:" } else { "stun:" };
    format!("{scheme}{}", config.url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_follows_server_type() {
        assert_eq!(add_ice_url_scheme(&server("stun", "stun.l.google.com:19302")), "stun:stun.l.google.com:19302");
        assert_eq!(add_ice_url_scheme(&server("turn", "relay.example.org:3478")), "turn:relay.example.org:3478");
        assert_eq!(add_ice_url_scheme(&server("turn", "turns:relay.example.org:5349")), "turns:relay.example.org:5349");
    }

    #[test]
    fn random_ids_are_hex() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }
}
