//! The sample configuration shipped at the repository root must stay valid.

use std::path::Path;

use sotcp_core::{DataBits, Parity};
use sotcp_server::domain::{load_config, SchedulingMode};

#[test]
fn test_sample_config_loads() {
    // Arrange
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../server.cfg");

    // Act
    let config = load_config(&path).expect("sample config is valid");

    // Assert
    assert_eq!(config.server.scheduling, SchedulingMode::Concurrent);
    let names: Vec<&str> = config.sessions.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Sensor1", "Scale"]);

    let scale = &config.sessions[1];
    assert_eq!(scale.tcp_address, "0.0.0.0");
    assert_eq!(scale.serial_parity, Parity::Even);
    assert_eq!(scale.serial_bytesize, DataBits::Seven);
    assert_eq!(scale.serial_send_on.byte(), b'\n');
    assert_eq!(scale.serial_flush_idle, Some(0.5));
}
