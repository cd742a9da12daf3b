/// Version string baked in at build time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// User agent advertised to peers during the wire handshake.
pub fn user_agent() -> String {
    format!("/dnsseeder:{}/", version())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_version() {
        assert!(user_agent().contains(version()));
        assert!(user_agent().starts_with('/'));
        assert!(user_agent().ends_with('/'));
    }
}
