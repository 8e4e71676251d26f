use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};

/// Split `host:port`, accepting bracketed IPv6 (`[::1]:53`).
pub fn parse_host_port(s: &str) -> Option<(String, u16)> {
    if let Some(rest) = s.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let port_str = rest[end + 1..].strip_prefix(':')?;
        let port = port_str.parse().ok()?;
        return Some((host.to_string(), port));
    }
    let (host, port_str) = s.rsplit_once(':')?;
    if host.is_empty() || host.contains(':') {
        return None;
    }
    let port = port_str.parse().ok()?;
    Some((host.to_string(), port))
}

/// Join host and port, bracketing IPv6 literals.
pub fn format_host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", host, port),
        _ => format!("{}:{}", host, port),
    }
}

/// Ask the OS for a currently unused loopback TCP port.
///
/// The port is released again before returning, so the engine can bind it.
pub fn free_local_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_ipv4() {
        let (host, port) = parse_host_port("1.2.3.4:443").unwrap();
        assert_eq!(host, "1.2.3.4");
        assert_eq!(port, 443);
    }

    #[test]
    fn parse_host_port_domain() {
        let (host, port) = parse_host_port("example.com:8080").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_host_port_ipv6() {
        let (host, port) = parse_host_port("[::1]:53").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 53);
        assert!(parse_host_port("::1:53").is_none());
    }

    #[test]
    fn parse_host_port_rejects_garbage() {
        assert!(parse_host_port("example.com").is_none());
        assert!(parse_host_port("example.com:http").is_none());
        assert!(parse_host_port(":443").is_none());
        assert!(parse_host_port("example.com:70000").is_none());
    }

    #[test]
    fn format_brackets_v6_only() {
        assert_eq!(format_host_port("2001:db8::1", 443), "[2001:db8::1]:443");
        assert_eq!(format_host_port("example.com", 443), "example.com:443");
    }

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(free_local_port().unwrap(), 0);
    }
}
