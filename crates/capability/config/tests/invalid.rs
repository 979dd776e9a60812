use mbgw_config::{AppConfig, ConfigError};

#[test]
fn missing_platform_url_then_invalid_number() {
    unsafe {
        std::env::remove_var("MBGW_PLATFORM_URL");
    }
    assert!(matches!(AppConfig::from_env(), Err(ConfigError::Missing(key)) if key == "MBGW_PLATFORM_URL"));

    unsafe {
        std::env::set_var("MBGW_PLATFORM_URL", "http://platform");
        std::env::set_var("MBGW_READ_TIMEOUT_MS", "soon");
    }
    assert!(matches!(AppConfig::from_env(), Err(ConfigError::Invalid(key, _)) if key == "MBGW_READ_TIMEOUT_MS"));
}
