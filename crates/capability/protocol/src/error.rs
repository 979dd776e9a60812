//! 协议错误类型定义

use crate::frame::exception_description;

fn describe(code: &u8) -> &'static str {
    exception_description(*code)
}

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 连接已关闭
    #[error("connection closed")]
    ConnectionClosed,

    /// Modbus 异常响应（功能码最高位为 1）
    #[error(
        "Modbus exception response: function_code=0x{function_code:02X}, exception_code=0x{exception_code:02X}, {}",
        describe(.exception_code)
    )]
    Exception {
        function_code: u8,
        exception_code: u8,
    },

    /// 响应中的功能码无法识别
    #[error("unsupported function code: 0x{0:02X}")]
    UnsupportedFunctionCode(u8),

    /// 读取失败（设备返回了无法使用的数据）
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// 本地配置错误（请求无法构造）
    #[error("config error: {0}")]
    Config(String),

    /// 写功能码缺少写入数据
    #[error("missing payload for write function code 0x{0:02X}")]
    MissingPayload(u8),

    /// 响应过短
    #[error("response too short: {0} bytes")]
    ResponseTooShort(usize),

    /// 长度不匹配
    #[error("length mismatch: expected {expected} bytes but received {actual} bytes")]
    LengthMismatch { expected: usize, actual: usize },

    /// MBAP 协议标识不为 0
    #[error("unexpected protocol id: {0}")]
    UnexpectedProtocolId(u16),

    /// RTU CRC 校验失败（仅严格模式下返回）
    #[error("crc mismatch: expected {expected:04X} but got {received:04X}")]
    CrcMismatch { expected: u16, received: u16 },

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 公式计算错误
    #[error("equation error: {0}")]
    Equation(String),
}
