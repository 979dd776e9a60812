use mbgw_config::AppConfig;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("MBGW_PLATFORM_URL", "http://127.0.0.1:9999");
        std::env::set_var("MBGW_SERVER_ADDR", "127.0.0.1:1502");
        std::env::set_var("MBGW_RETRY_BACKOFF_MULTIPLIER", "1.5");
        std::env::set_var("MBGW_STRICT_CRC", "ON");
        std::env::set_var("MBGW_AUTH_LIMITER_ENABLED", "off");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.platform_url, "http://127.0.0.1:9999");
    assert_eq!(config.server_addr, "127.0.0.1:1502");
    assert_eq!(config.http_addr, "0.0.0.0:503");
    assert_eq!(config.mqtt_control_topic, "plugin/modbus/devices/telemetry/control/#");
    assert_eq!(config.retry_max_retries, 2);
    assert_eq!(config.retry_backoff_multiplier, 1.5);
    assert_eq!(config.control_write_timeout_ms, 15000);
    assert!(config.strict_crc);
    assert!(!config.auth_limiter_enabled);
    assert!(config.flush_enabled);
}
