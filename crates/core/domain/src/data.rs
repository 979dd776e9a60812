use std::collections::BTreeMap;

/// 一次采集解析出的命名值（标识符 → 数值）。
pub type ValueMap = BTreeMap<String, f64>;

/// 网关在线状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    /// 平台约定的状态值。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "1",
            Self::Offline => "0",
        }
    }
}
