use crate::BusError;
use domain::{DeviceStatus, ValueMap};
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// 采集/控制异常报告。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionReport {
    pub error_type: String,
    pub error_message: String,
    /// 十六进制原始请求
    #[serde(skip_serializing_if = "String::is_empty")]
    pub raw_request: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub raw_response: String,
}

#[derive(Serialize)]
struct Envelope<'a, V: Serialize> {
    device_id: &'a str,
    values: V,
}

/// `{"device_id": id, "values": "<json map>"}`，values 为 JSON 编码后的字符串。
pub fn telemetry_payload(device_id: &str, values: &ValueMap) -> Result<Vec<u8>, BusError> {
    let map: Map<String, Value> = values
        .iter()
        .map(|(key, value)| (key.clone(), number(*value)))
        .collect();
    encode_nested(device_id, &Value::Object(map))
}

/// `{"device_id": gw, "values": {"status": "1"|"0"}}`
pub fn status_payload(gateway_id: &str, status: DeviceStatus) -> Result<Vec<u8>, BusError> {
    let envelope = Envelope {
        device_id: gateway_id,
        values: serde_json::json!({ "status": status.as_str() }),
    };
    serde_json::to_vec(&envelope).map_err(|err| BusError::Payload(err.to_string()))
}

/// 异常报告作为子设备遥测：`values` 内为 `{"modbus_exception": {...}}`。
pub fn exception_payload(device_id: &str, report: &ExceptionReport) -> Result<Vec<u8>, BusError> {
    let report = serde_json::to_value(report).map_err(|err| BusError::Payload(err.to_string()))?;
    encode_nested(device_id, &serde_json::json!({ "modbus_exception": report }))
}

fn encode_nested(device_id: &str, values: &Value) -> Result<Vec<u8>, BusError> {
    let values = serde_json::to_string(values).map_err(|err| BusError::Payload(err.to_string()))?;
    let envelope = Envelope { device_id, values };
    serde_json::to_vec(&envelope).map_err(|err| BusError::Payload(err.to_string()))
}

/// 整数值按整数输出（`10` 而不是 `10.0`），非有限值输出 null。
fn number(value: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_numbers_are_integers() {
        assert_eq!(number(10.0).to_string(), "10");
        assert_eq!(number(-3.0).to_string(), "-3");
        assert_eq!(number(1.5).to_string(), "1.5");
        assert_eq!(number(f64::NAN), Value::Null);
    }
}
