//! Modbus 帧编解码
//!
//! 纯函数，不做 IO：
//! - 主站请求序列化（RTU 追加 CRC16，TCP 前置 MBAP 头）
//! - 响应剥壳与校验（RTU 去 CRC，TCP 校验并去掉 MBAP 头）
//! - 异常响应识别与响应长度推断
//!
//! 剥壳后的统一格式为 `[unit, function_code, ...]`，上层不再区分 RTU/TCP。

use crate::error::ProtocolError;
use domain::ProtocolVariant;
use tracing::info;

/// MBAP 头长度（事务标识 2 + 协议标识 2 + 长度 2）
pub const MBAP_HEADER_LEN: usize = 6;

/// 异常响应固定长度（地址 + 功能码 + 异常码 + CRC）
pub const RTU_EXCEPTION_LEN: usize = 5;

/// 写响应固定长度（地址 + 功能码 + 地址 2 + 数值/数量 2 + CRC）
pub const RTU_WRITE_RESPONSE_LEN: usize = 8;

const EXCEPTION_FLAG: u8 = 0x80;

/// 计算 Modbus CRC16（多项式 0xA001，初值 0xFFFF）。
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Modbus 异常码描述。
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal function",
        0x02 => "Illegal data address",
        0x03 => "Illegal data value",
        0x04 => "Slave device failure",
        0x05 => "Acknowledge",
        0x06 => "Slave device busy",
        0x08 => "Memory parity error",
        0x0A => "Gateway path unavailable",
        0x0B => "Gateway target device failed to respond",
        _ => "Unknown error",
    }
}

/// 响应中可接受的功能码（含异常响应）。
pub fn is_valid_function_code(code: u8) -> bool {
    code & EXCEPTION_FLAG != 0 || matches!(code, 0x01..=0x06 | 0x0F | 0x10)
}

/// 根据 RTU 帧头 `[addr, fc, byte_count?]` 推断完整响应长度（含 CRC）。
pub fn rtu_response_length(head: &[u8]) -> Result<usize, ProtocolError> {
    let function_code = *head.get(1).ok_or(ProtocolError::ResponseTooShort(head.len()))?;
    if function_code & EXCEPTION_FLAG != 0 {
        return Ok(RTU_EXCEPTION_LEN);
    }
    match function_code {
        0x01..=0x04 => {
            let byte_count = *head.get(2).ok_or(ProtocolError::ResponseTooShort(head.len()))?;
            Ok(usize::from(byte_count) + 5)
        }
        0x05 | 0x06 | 0x0F | 0x10 => Ok(RTU_WRITE_RESPONSE_LEN),
        other => Err(ProtocolError::UnsupportedFunctionCode(other)),
    }
}

/// Modbus 主站请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub slave_id: u8,
    pub function_code: u8,
    pub address: u16,
    /// 读：寄存器/线圈数量；写多个：写入数量
    pub quantity: u16,
    /// 写功能码的数据区
    pub payload: Option<Vec<u8>>,
}

impl ModbusRequest {
    pub fn read(slave_id: u8, function_code: u8, address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function_code,
            address,
            quantity,
            payload: None,
        }
    }

    pub fn write(
        slave_id: u8,
        function_code: u8,
        address: u16,
        quantity: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            slave_id,
            function_code,
            address,
            quantity,
            payload: Some(payload),
        }
    }

    /// 编码为 `[unit, fc, ...]`，不含外层封装。
    pub fn encode_body(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(16);
        buf.push(self.slave_id);
        buf.push(self.function_code);
        buf.extend_from_slice(&self.address.to_be_bytes());

        match self.function_code {
            0x01..=0x04 => {
                buf.extend_from_slice(&self.quantity.to_be_bytes());
            }
            0x05 => {
                let payload = self.require_payload()?;
                if payload != [0xFF, 0x00] && payload != [0x00, 0x00] {
                    return Err(ProtocolError::Config(format!(
                        "invalid coil value: {}",
                        hex::encode(payload)
                    )));
                }
                buf.extend_from_slice(payload);
            }
            0x06 => {
                let payload = self.require_payload()?;
                if payload.len() != 2 {
                    return Err(ProtocolError::Config(format!(
                        "write single register expects 2 bytes, got {}",
                        payload.len()
                    )));
                }
                buf.extend_from_slice(payload);
            }
            0x0F | 0x10 => {
                let payload = self.require_payload()?;
                let byte_count = u8::try_from(payload.len()).map_err(|_| {
                    ProtocolError::Config(format!("payload too large: {} bytes", payload.len()))
                })?;
                buf.extend_from_slice(&self.quantity.to_be_bytes());
                buf.push(byte_count);
                buf.extend_from_slice(payload);
            }
            other => {
                return Err(ProtocolError::Config(format!(
                    "unsupported function code: 0x{:02X}",
                    other
                )));
            }
        }

        Ok(buf)
    }

    fn require_payload(&self) -> Result<&[u8], ProtocolError> {
        self.payload
            .as_deref()
            .ok_or(ProtocolError::MissingPayload(self.function_code))
    }
}

/// 序列化为 RTU 帧：主体 + CRC16（小端）。
pub fn encode_rtu(request: &ModbusRequest) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = request.encode_body()?;
    append_crc(&mut frame);
    Ok(frame)
}

/// 序列化为 TCP 帧：MBAP 头 + 主体。
pub fn encode_tcp(request: &ModbusRequest, transaction_id: u16) -> Result<Vec<u8>, ProtocolError> {
    let body = request.encode_body()?;
    Ok(wrap_mbap(transaction_id, &body))
}

/// 按网关协议变体序列化。
pub fn encode_request(
    variant: ProtocolVariant,
    request: &ModbusRequest,
    transaction_id: u16,
) -> Result<Vec<u8>, ProtocolError> {
    match variant {
        ProtocolVariant::Rtu => encode_rtu(request),
        ProtocolVariant::Tcp => encode_tcp(request, transaction_id),
    }
}

/// 构造从站响应（用于模拟设备与测试）。
///
/// `body` 为功能码之后的内容：读响应是 `[byte_count, data..]`，
/// 写响应是 `[addr, value]`，异常响应是 `[exception_code]`。
pub fn encode_response(
    variant: ProtocolVariant,
    transaction_id: u16,
    slave_id: u8,
    function_code: u8,
    body: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.push(slave_id);
    frame.push(function_code);
    frame.extend_from_slice(body);
    match variant {
        ProtocolVariant::Rtu => {
            append_crc(&mut frame);
            frame
        }
        ProtocolVariant::Tcp => wrap_mbap(transaction_id, &frame),
    }
}

fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

fn wrap_mbap(transaction_id: u16, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + body.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// 校验并去掉 RTU 帧的 CRC。
///
/// CRC 不匹配默认只记录日志，`strict_crc` 为真时返回错误。
pub fn parse_rtu(frame: &[u8], strict_crc: bool) -> Result<&[u8], ProtocolError> {
    if frame.len() < 4 {
        return Err(ProtocolError::ResponseTooShort(frame.len()));
    }
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let expected = crc16(body);
    if received != expected {
        if strict_crc {
            return Err(ProtocolError::CrcMismatch { expected, received });
        }
        info!(
            expected = %format_args!("{:04X}", expected),
            received = %format_args!("{:04X}", received),
            "crc_mismatch_ignored"
        );
    }
    Ok(body)
}

/// 校验并去掉 MBAP 头。
pub fn parse_tcp(frame: &[u8]) -> Result<&[u8], ProtocolError> {
    if frame.len() < MBAP_HEADER_LEN {
        return Err(ProtocolError::ResponseTooShort(frame.len()));
    }
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    if protocol_id != 0 {
        return Err(ProtocolError::UnexpectedProtocolId(protocol_id));
    }
    let length = usize::from(u16::from_be_bytes([frame[4], frame[5]]));
    if length + MBAP_HEADER_LEN != frame.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: length,
            actual: frame.len() - MBAP_HEADER_LEN,
        });
    }
    Ok(&frame[MBAP_HEADER_LEN..])
}

/// 按协议变体剥壳，返回 `[unit, fc, ...]`。
pub fn parse_response(
    variant: ProtocolVariant,
    frame: &[u8],
    strict_crc: bool,
) -> Result<&[u8], ProtocolError> {
    match variant {
        ProtocolVariant::Rtu => parse_rtu(frame, strict_crc),
        ProtocolVariant::Tcp => parse_tcp(frame),
    }
}

/// 异常响应信息。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusException {
    /// 原始功能码（已去掉最高位）
    pub function_code: u8,
    pub exception_code: u8,
}

impl ModbusException {
    pub fn description(&self) -> &'static str {
        exception_description(self.exception_code)
    }

    pub fn into_error(self) -> ProtocolError {
        ProtocolError::Exception {
            function_code: self.function_code,
            exception_code: self.exception_code,
        }
    }
}

/// 识别完整帧（未剥壳）中的异常响应，从不失败。
pub fn detect_exception(variant: ProtocolVariant, frame: &[u8]) -> Option<ModbusException> {
    let offset = match variant {
        ProtocolVariant::Rtu => 0,
        ProtocolVariant::Tcp => MBAP_HEADER_LEN,
    };
    let function_code = *frame.get(offset + 1)?;
    let exception_code = *frame.get(offset + 2)?;
    (function_code & EXCEPTION_FLAG != 0).then_some(ModbusException {
        function_code: function_code & !EXCEPTION_FLAG,
        exception_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_holding_registers_rtu_frame() {
        let request = ModbusRequest::read(1, 0x03, 0, 2);
        let frame = encode_rtu(&request).unwrap();
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[test]
    fn write_multiple_registers_body() {
        let request = ModbusRequest::write(1, 0x10, 0x0001, 2, vec![0x00, 0x0A, 0x01, 0x02]);
        let body = request.encode_body().unwrap();
        assert_eq!(
            body,
            vec![0x01, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn write_without_payload_is_config_error() {
        let request = ModbusRequest::read(1, 0x06, 0, 1);
        assert!(matches!(
            request.encode_body(),
            Err(ProtocolError::MissingPayload(0x06))
        ));
    }

    #[test]
    fn unsupported_request_function_code() {
        let request = ModbusRequest::read(1, 0x2B, 0, 1);
        assert!(matches!(request.encode_body(), Err(ProtocolError::Config(_))));
    }

    #[test]
    fn crc_mismatch_is_tolerated_unless_strict() {
        let mut frame = encode_response(ProtocolVariant::Rtu, 0, 1, 0x03, &[0x02, 0x00, 0x01]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(parse_rtu(&frame, false).unwrap(), &[0x01, 0x03, 0x02, 0x00, 0x01]);
        assert!(matches!(
            parse_rtu(&frame, true),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn detect_exception_in_tcp_frame() {
        let frame = encode_response(ProtocolVariant::Tcp, 9, 1, 0x83, &[0x02]);
        let exception = detect_exception(ProtocolVariant::Tcp, &frame).unwrap();
        assert_eq!(exception.function_code, 0x03);
        assert_eq!(exception.exception_code, 0x02);
        assert_eq!(exception.description(), "Illegal data address");
        assert!(detect_exception(ProtocolVariant::Tcp, &frame[..7]).is_none());
    }
}
