//! 寄存器数据映射
//!
//! 把读响应的数据区按 `RegisterCommand` 转换为命名值：
//! 字节序还原 → 按数据类型解码 → 公式（evalexpr）→ 小数位取整。
//! 控制下发走反方向：数值按数据类型与字节序编码为写请求。

use crate::error::ProtocolError;
use crate::frame::ModbusRequest;
use domain::{ByteOrder, DataType, RegisterCommand, ValueMap};
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value};
use tracing::info;

/// 在线上字节与大端字节之间转换（各排列均为自反，编码与解码共用）。
///
/// 16 位值不受 BADC/CDAB 影响。
pub fn reorder(bytes: &mut [u8], order: ByteOrder) {
    match order {
        ByteOrder::Big => {}
        ByteOrder::Little => bytes.reverse(),
        _ if bytes.len() <= 2 => {}
        ByteOrder::ByteSwap => {
            for pair in bytes.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
        ByteOrder::WordByteSwap => {
            bytes.reverse();
            for pair in bytes.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
    }
}

/// 按数据类型解码单个值，`raw` 为线上字节（长度等于类型宽度）。
pub fn decode_value(raw: &[u8], data_type: DataType, order: ByteOrder) -> Result<f64, ProtocolError> {
    if raw.len() != data_type.byte_width() {
        return Err(ProtocolError::DataParse(format!(
            "{} needs {} bytes, got {}",
            data_type.as_str(),
            data_type.byte_width(),
            raw.len()
        )));
    }
    let mut bytes = raw.to_vec();
    reorder(&mut bytes, order);

    let value = match data_type {
        DataType::Coil => f64::from(bytes[0]),
        DataType::Int16 => f64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::Uint16 => f64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
        DataType::Int32 => f64::from(i32::from_be_bytes(array4(&bytes))),
        DataType::Uint32 => f64::from(u32::from_be_bytes(array4(&bytes))),
        DataType::Float32 => f64::from(f32::from_be_bytes(array4(&bytes))),
        DataType::Int64 => i64::from_be_bytes(array8(&bytes)) as f64,
        DataType::Uint64 => u64::from_be_bytes(array8(&bytes)) as f64,
        DataType::Float64 => f64::from_be_bytes(array8(&bytes)),
    };
    Ok(value)
}

/// 按数据类型编码单个值，返回线上字节。
pub fn encode_value(value: f64, data_type: DataType, order: ByteOrder) -> Result<Vec<u8>, ProtocolError> {
    if !value.is_finite() {
        return Err(ProtocolError::DataParse(format!("value {} is not finite", value)));
    }
    let mut bytes = match data_type {
        DataType::Coil => coil_payload(value)?.to_vec(),
        DataType::Int16 => integer::<i16>(value, data_type)?.to_be_bytes().to_vec(),
        DataType::Uint16 => integer::<u16>(value, data_type)?.to_be_bytes().to_vec(),
        DataType::Int32 => integer::<i32>(value, data_type)?.to_be_bytes().to_vec(),
        DataType::Uint32 => integer::<u32>(value, data_type)?.to_be_bytes().to_vec(),
        DataType::Int64 => integer::<i64>(value, data_type)?.to_be_bytes().to_vec(),
        DataType::Uint64 => integer::<u64>(value, data_type)?.to_be_bytes().to_vec(),
        DataType::Float32 => (value as f32).to_be_bytes().to_vec(),
        DataType::Float64 => value.to_be_bytes().to_vec(),
    };
    if data_type != DataType::Coil {
        reorder(&mut bytes, order);
    }
    Ok(bytes)
}

fn integer<T: TryFrom<i128>>(value: f64, data_type: DataType) -> Result<T, ProtocolError> {
    if value.fract() != 0.0 {
        return Err(ProtocolError::DataParse(format!(
            "value {} is not an integer for {}",
            value,
            data_type.as_str()
        )));
    }
    T::try_from(value as i128).map_err(|_| {
        ProtocolError::DataParse(format!(
            "value {} is out of range for {}",
            value,
            data_type.as_str()
        ))
    })
}

/// 线圈写入值：1 → `FF00`，0 → `0000`。
pub fn coil_payload(value: f64) -> Result<[u8; 2], ProtocolError> {
    if value == 1.0 {
        Ok([0xFF, 0x00])
    } else if value == 0.0 {
        Ok([0x00, 0x00])
    } else {
        Err(ProtocolError::DataParse(format!("invalid coil value: {}", value)))
    }
}

fn array4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn array8(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

/// 把读响应转换为命名值。
///
/// `pdu` 为剥壳后的 `[unit, fc, byte_count, data..]`。
pub fn decode_values(command: &RegisterCommand, pdu: &[u8]) -> Result<ValueMap, ProtocolError> {
    if pdu.len() < 3 {
        return Err(ProtocolError::ResponseTooShort(pdu.len()));
    }
    if pdu[1] & 0x80 != 0 {
        return Err(ProtocolError::Exception {
            function_code: pdu[1] & 0x7F,
            exception_code: pdu[2],
        });
    }
    let byte_count = usize::from(pdu[2]);
    let data = &pdu[3..pdu.len().min(3 + byte_count)];

    let mut values = ValueMap::new();
    for (index, id) in command.identifiers.iter().enumerate() {
        let value = match command.data_type {
            DataType::Coil => {
                let byte = data.get(index / 8).ok_or_else(|| short_data(id, data.len()))?;
                f64::from((byte >> (index % 8)) & 0x01)
            }
            data_type => {
                let width = data_type.byte_width();
                let raw = data
                    .get(index * width..(index + 1) * width)
                    .ok_or_else(|| short_data(id, data.len()))?;
                decode_value(raw, data_type, command.byte_order)?
            }
        };
        values.insert(id.clone(), value);
    }

    apply_equations(command, &mut values)?;
    apply_decimal_places(command, &mut values);
    Ok(values)
}

fn short_data(id: &str, available: usize) -> ProtocolError {
    ProtocolError::DataParse(format!(
        "response data too short for {} ({} bytes)",
        id, available
    ))
}

/// 依次计算公式，后面的公式可以引用前面已计算的结果。
fn apply_equations(command: &RegisterCommand, values: &mut ValueMap) -> Result<(), ProtocolError> {
    if command.equations.is_empty() {
        return Ok(());
    }
    let mut context = HashMapContext::new();
    for (name, value) in values.iter() {
        context
            .set_value(name.clone(), Value::from(*value))
            .map_err(|err| ProtocolError::Equation(format!("variable {}: {}", name, err)))?;
    }

    for (index, id) in command.identifiers.iter().enumerate() {
        let Some(equation) = command.equation_for(index) else {
            continue;
        };
        let result = evalexpr::eval_with_context(equation, &context)
            .map_err(|err| ProtocolError::Equation(format!("{}: {}", equation, err)))?;
        let result = match result {
            Value::Float(value) => value,
            Value::Int(value) => value as f64,
            other => {
                return Err(ProtocolError::Equation(format!(
                    "{} evaluated to non-numeric {:?}",
                    equation, other
                )));
            }
        };
        context
            .set_value(id.clone(), Value::from(result))
            .map_err(|err| ProtocolError::Equation(format!("variable {}: {}", id, err)))?;
        values.insert(id.clone(), result);
    }
    Ok(())
}

fn apply_decimal_places(command: &RegisterCommand, values: &mut ValueMap) {
    for (index, id) in command.identifiers.iter().enumerate() {
        let Some(places) = command.decimal_places_for(index) else {
            continue;
        };
        let places = match places.parse::<i32>() {
            Ok(places) => places,
            Err(err) => {
                info!(identifier = %id, error = %err, "invalid_decimal_places");
                continue;
            }
        };
        if let Some(value) = values.get_mut(id) {
            let multiplier = 10f64.powi(places);
            *value = (*value * multiplier).round() / multiplier;
        }
    }
}

/// 控制下发：按采集命令把 `index` 位置的值编码成写请求。
///
/// - 读线圈/离散量（1/2）→ 写单个线圈（5）
/// - 读寄存器（3/4）→ 写单个寄存器（6），多寄存器类型用写多个寄存器（16）
pub fn plan_write(
    command: &RegisterCommand,
    slave_id: u8,
    index: usize,
    value: f64,
) -> Result<ModbusRequest, ProtocolError> {
    let offset = u16::try_from(index)
        .ok()
        .and_then(|index| index.checked_mul(command.data_type.register_span()))
        .ok_or_else(|| ProtocolError::Config(format!("identifier index {} out of range", index)))?;
    let address = command.starting_address.checked_add(offset).ok_or_else(|| {
        ProtocolError::Config(format!(
            "write address overflow: {} + {}",
            command.starting_address, offset
        ))
    })?;

    match command.function_code {
        0x01 | 0x02 => {
            let payload = coil_payload(value)?;
            Ok(ModbusRequest::write(slave_id, 0x05, address, 1, payload.to_vec()))
        }
        0x03 | 0x04 => {
            if command.data_type == DataType::Coil {
                return Err(ProtocolError::Config(
                    "coil data type on a register command".to_string(),
                ));
            }
            let payload = encode_value(value, command.data_type, command.byte_order)?;
            if payload.len() == 2 {
                Ok(ModbusRequest::write(slave_id, 0x06, address, 1, payload))
            } else {
                let quantity = command.data_type.register_span();
                Ok(ModbusRequest::write(slave_id, 0x10, address, quantity, payload))
            }
        }
        other => Err(ProtocolError::Config(format!(
            "unsupported function code: 0x{:02X}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(data_type: DataType, identifiers: &[&str]) -> RegisterCommand {
        RegisterCommand {
            function_code: 0x03,
            starting_address: 10,
            quantity: 2,
            byte_order: ByteOrder::Big,
            interval: Duration::from_secs(1),
            data_type,
            identifiers: identifiers.iter().map(|id| id.to_string()).collect(),
            equations: Vec::new(),
            decimal_places: Vec::new(),
        }
    }

    #[test]
    fn decode_uint32_big_endian() {
        let command = sample(DataType::Uint32, &["temp"]);
        let values = decode_values(&command, &[0x01, 0x03, 0x04, 0x00, 0x00, 0x00, 0x0A]).unwrap();
        assert_eq!(values.get("temp"), Some(&10.0));
    }

    #[test]
    fn sixteen_bit_values_ignore_swap_variants() {
        let raw = [0x01, 0x02];
        for order in [ByteOrder::Big, ByteOrder::ByteSwap, ByteOrder::WordByteSwap] {
            assert_eq!(decode_value(&raw, DataType::Uint16, order).unwrap(), 258.0);
        }
        assert_eq!(
            decode_value(&raw, DataType::Uint16, ByteOrder::Little).unwrap(),
            513.0
        );
    }

    #[test]
    fn equations_and_rounding() {
        let mut command = sample(DataType::Int16, &["a", "b"]);
        command.equations = vec!["a / 3".to_string(), "b * 0.5 + a".to_string()];
        command.decimal_places = vec!["2".to_string()];
        let values =
            decode_values(&command, &[0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x04]).unwrap();
        assert_eq!(values.get("a"), Some(&3.33));
        // b 的公式看到的是已计算的 a
        assert_eq!(values.get("b"), Some(&5.33));
    }

    #[test]
    fn invalid_decimal_places_skip_rounding() {
        let mut command = sample(DataType::Float32, &["v"]);
        command.decimal_places = vec!["x".to_string()];
        let raw = 1.23456f32.to_be_bytes();
        let pdu = [0x01, 0x03, 0x04, raw[0], raw[1], raw[2], raw[3]];
        let values = decode_values(&command, &pdu).unwrap();
        assert_eq!(values.get("v"), Some(&f64::from(1.23456f32)));
    }

    #[test]
    fn coils_are_bit_packed() {
        let mut command = sample(DataType::Coil, &["c0", "c1", "c2"]);
        command.function_code = 0x01;
        let values = decode_values(&command, &[0x01, 0x01, 0x01, 0b0000_0101]).unwrap();
        assert_eq!(values.get("c0"), Some(&1.0));
        assert_eq!(values.get("c1"), Some(&0.0));
        assert_eq!(values.get("c2"), Some(&1.0));
    }

    #[test]
    fn short_response_is_data_parse_error() {
        let command = sample(DataType::Uint32, &["a", "b"]);
        let err = decode_values(&command, &[0x01, 0x03, 0x04, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::DataParse(_)));
    }

    #[test]
    fn exception_pdu_is_reported_as_exception() {
        let command = sample(DataType::Uint16, &["a"]);
        let err = decode_values(&command, &[0x01, 0x83, 0x02]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Exception {
                function_code: 0x03,
                exception_code: 0x02
            }
        ));
    }

    #[test]
    fn plan_write_for_registers_and_coils() {
        let command = sample(DataType::Int16, &["a", "b"]);
        let request = plan_write(&command, 1, 1, -2.0).unwrap();
        assert_eq!(request.function_code, 0x06);
        assert_eq!(request.address, 11);
        assert_eq!(request.payload, Some(vec![0xFF, 0xFE]));

        let command32 = sample(DataType::Float32, &["x", "y"]);
        let request = plan_write(&command32, 1, 1, 1.5).unwrap();
        assert_eq!(request.function_code, 0x10);
        assert_eq!(request.address, 12);
        assert_eq!(request.quantity, 2);
        assert_eq!(request.payload, Some(1.5f32.to_be_bytes().to_vec()));

        let mut coils = sample(DataType::Coil, &["r0", "r1"]);
        coils.function_code = 0x01;
        let request = plan_write(&coils, 1, 1, 1.0).unwrap();
        assert_eq!(request.function_code, 0x05);
        assert_eq!(request.address, 11);
        assert_eq!(request.payload, Some(vec![0xFF, 0x00]));
        assert!(plan_write(&coils, 1, 0, 2.0).is_err());
    }

    #[test]
    fn encode_rejects_fractional_integers() {
        assert!(encode_value(1.5, DataType::Int16, ByteOrder::Big).is_err());
        assert!(encode_value(70000.0, DataType::Uint16, ByteOrder::Big).is_err());
        assert_eq!(
            encode_value(258.0, DataType::Uint16, ByteOrder::Little).unwrap(),
            vec![0x02, 0x01]
        );
    }
}
