// Copyright 2026-Present Lunet Contributors
// SPDX-License-Identifier: Apache-2.0
/// spec.md §4.F: "unless the runtime flag `allow_non_loopback_bind` is set,
/// host MUST be `127.0.0.1`, `::1`, or `localhost`." §4.G states the UDP
/// bind rule is identical, so both module crates share this check.
pub fn enforce_loopback(host: &str, allow_non_loopback_bind: bool) -> Result<(), String> {
    if allow_non_loopback_bind || matches!(host, "127.0.0.1" | "::1" | "localhost") {
        Ok(())
    } else {
        Err("binding to non-loopback addresses requires --dangerously-skip-loopback-restriction flag"
            .to_string())
    }
}

/// spec.md §8 boundary behavior: `port must be between 1 and 65535`. Used
/// for `connect`/`send`'s destination port, where 0 is never meaningful.
pub fn validate_port(port: i64) -> Result<u16, String> {
    if (1..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err("port must be between 1 and 65535".to_string())
    }
}

/// Port validation for `listen`/`bind`, where port `0` asks the OS to choose
/// an ephemeral port (spec.md §8 S1: `listen("tcp", "127.0.0.1", 0)`).
pub fn validate_bind_port(port: i64) -> Result<u16, String> {
    if (0..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err("port must be between 0 and 65535".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_hosts_are_always_allowed() {
        assert!(enforce_loopback("127.0.0.1", false).is_ok());
        assert!(enforce_loopback("::1", false).is_ok());
        assert!(enforce_loopback("localhost", false).is_ok());
    }

    #[test]
    fn non_loopback_requires_the_flag() {
        assert!(enforce_loopback("0.0.0.0", false).is_err());
        assert!(enforce_loopback("0.0.0.0", true).is_ok());
    }

    #[test]
    fn port_range_is_enforced() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(65536).is_err());
        assert!(validate_port(1).is_ok());
        assert!(validate_port(65535).is_ok());
    }

    #[test]
    fn bind_port_allows_zero_for_ephemeral_assignment() {
        assert_eq!(validate_bind_port(0).unwrap(), 0);
        assert!(validate_bind_port(-1).is_err());
        assert!(validate_bind_port(65536).is_err());
        assert!(validate_bind_port(65535).is_ok());
    }
}
