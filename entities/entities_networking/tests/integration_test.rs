//! Integration tests for entities_networking crate
//!
//! These tests exercise the configuration descriptor through its public API,
//! the way the adapters layer consumes it.

use entities_networking::*;

#[test]
fn test_role_variants() {
    let roles = vec![SocketRole::Server, SocketRole::Client, SocketRole::Raw];

    for role in roles {
        let config = SocketConfig::default().with_role(role);
        assert_eq!(config.role, role);
        let _ = format!("{:?}", role);
    }
}

#[test]
fn test_builder_chain() {
    let config = SocketConfig::client("::1", 5000)
        .with_family(AddressFamily::Ipv6)
        .with_protocol(TransportProtocol::Tcp)
        .with_non_blocking(true)
        .with_reuse_address(false)
        .with_timeouts(250, 0);

    assert_eq!(config.role, SocketRole::Client);
    assert_eq!(config.family, AddressFamily::Ipv6);
    assert_eq!(config.ip, "::1");
    assert_eq!(config.port, 5000);
    assert!(config.non_blocking);
    assert!(!config.reuse_address);
    assert_eq!(config.recv_timeout_ms, 250);
    assert!(config.send_timeout().is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_toml_round_trip_through_serde() {
    let original = SocketConfig::server(7000)
        .with_ip("")
        .with_multicast("239.255.0.1", "127.0.0.1");
    let text = toml::to_string(&original).unwrap();
    let parsed = SocketConfig::from_toml_str(&text).unwrap();
    assert_eq!(parsed, original);
}

#[test]
fn test_config_error_messages() {
    let errors = vec![
        ConfigError::NegativeBacklog(-5),
        ConfigError::InvalidMulticastGroup("x".to_string()),
        ConfigError::InvalidMulticastInterface("y".to_string()),
        ConfigError::UnsupportedRole(SocketRole::Raw),
        ConfigError::Parse("z".to_string()),
    ];

    for error in errors {
        assert!(!error.to_string().is_empty());
    }
}

#[test]
fn test_os_error_from_io() {
    use std::io;
    let err = io::Error::new(io::ErrorKind::AddrInUse, "in use");
    let os: OsError = err.into();
    assert_eq!(os.kind(), io::ErrorKind::AddrInUse);
    assert_eq!(os.code(), None);
    assert!(!os.is_transient());
}
