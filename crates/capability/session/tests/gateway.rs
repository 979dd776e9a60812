use domain::{PlatformDeviceConfig, ProtocolVariant};
use mbgw_auth::{AuthLimiter, AuthLimiterConfig};
use mbgw_bus::{BusTopics, DeviceBus, RecordingPublisher};
use mbgw_control::{ControlExecutor, ControlWrite};
use mbgw_platform::StaticPlatformClient;
use mbgw_protocol::{ModbusRequest, encode_request, encode_response};
use mbgw_session::{
    CycleTimeouts, GatewayRuntime, RetryPolicy, SessionControl, SessionError, SessionSettings,
    handle_connection,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const CREDENTIAL: &str = "REG-1";
const PEER: &str = "10.0.0.1";

fn platform_config() -> PlatformDeviceConfig {
    serde_json::from_value(json!({
        "id": "gw-1",
        "voucher": "{\"reg_pkg\":\"REG-1\"}",
        "protocol_type": "MODBUS_RTU",
        "sub_devices": [{
            "device_id": "sub-1",
            "sub_device_addr": "1",
            "protocol_config_template": {
                "SlaveID": 1,
                "CommandRawList": [{
                    "FunctionCode": 3,
                    "StartingAddress": 10,
                    "Quantity": 2,
                    "Endianess": "BIG",
                    "Interval": 60,
                    "DataType": "uint32",
                    "DataIdentifierListStr": "temp",
                    "EquationListStr": "",
                    "DecimalPlacesListStr": ""
                }]
            }
        }]
    }))
    .expect("platform config")
}

fn settings() -> SessionSettings {
    SessionSettings {
        poll_timeouts: CycleTimeouts {
            write: Duration::from_millis(500),
            read: Duration::from_millis(300),
        },
        control_timeouts: CycleTimeouts {
            write: Duration::from_secs(1),
            read: Duration::from_secs(1),
        },
        retry: RetryPolicy {
            enabled: true,
            max_retries: 2,
            interval: Duration::from_millis(100),
            multiplier: 2.0,
        },
        flush_silence: Some(Duration::from_millis(100)),
        strict_crc: true,
        registration_timeout: Duration::from_secs(2),
    }
}

fn runtime(limiter: AuthLimiterConfig) -> (Arc<GatewayRuntime>, Arc<RecordingPublisher>) {
    let recorder = Arc::new(RecordingPublisher::new());
    let bus = DeviceBus::new(recorder.clone(), BusTopics::default());
    let platform = StaticPlatformClient::new().with_gateway(CREDENTIAL, platform_config());
    let runtime = GatewayRuntime::new(
        bus,
        Arc::new(platform),
        AuthLimiter::new(limiter),
        settings(),
    );
    (Arc::new(runtime), recorder)
}

/// 建立连接并发送注册凭证，返回设备侧的管道。
async fn connect(runtime: &Arc<GatewayRuntime>, credential: &str) -> DuplexStream {
    let (mut device, gateway) = tokio::io::duplex(4096);
    tokio::spawn(handle_connection(runtime.clone(), gateway, PEER.to_string()));
    // 被封禁时网关侧可能已关闭，写失败不影响断言
    let _ = device.write_all(credential.as_bytes()).await;
    device
}

async fn next_request(device: &mut DuplexStream) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(3), device.read(&mut buf))
        .await
        .expect("request in time")
        .unwrap();
    buf[..n].to_vec()
}

fn read_request_frame() -> Vec<u8> {
    encode_request(ProtocolVariant::Rtu, &ModbusRequest::read(1, 0x03, 10, 2), 0).unwrap()
}

/// 等待满足条件的消息出现。
async fn wait_for(recorder: &RecordingPublisher, topic: &str, pred: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..100 {
        if let Some(found) = recorder.json_on(topic).into_iter().find(|msg| pred(msg)) {
            return found;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    panic!("no matching message on {}", topic);
}

fn nested(message: &Value) -> Value {
    serde_json::from_str(message["values"].as_str().unwrap()).unwrap()
}

fn telemetry_values(recorder: &RecordingPublisher) -> Vec<Value> {
    recorder
        .json_on("devices/telemetry")
        .iter()
        .map(nested)
        .filter(|values| values.get("temp").is_some())
        .collect()
}

#[tokio::test]
async fn registered_gateway_publishes_decoded_telemetry() {
    let (runtime, recorder) = runtime(AuthLimiterConfig::default());
    let mut device = connect(&runtime, CREDENTIAL).await;

    assert_eq!(next_request(&mut device).await, read_request_frame());
    let response = encode_response(ProtocolVariant::Rtu, 0, 1, 0x03, &[0x04, 0x00, 0x00, 0x00, 0x0A]);
    device.write_all(&response).await.unwrap();

    let message = wait_for(&recorder, "devices/telemetry", |_| true).await;
    assert_eq!(message["device_id"], "sub-1");
    assert_eq!(nested(&message), json!({"temp": 10}));

    let status = recorder.json_on("devices/status");
    assert_eq!(status, vec![json!({"device_id": "gw-1", "values": {"status": "1"}})]);
    assert!(runtime.registry().get("gw-1").is_some());
    assert!(runtime.registry().find_by_sub_device("sub-1").is_some());
}

#[tokio::test]
async fn timeouts_are_retried_without_closing() {
    let (runtime, recorder) = runtime(AuthLimiterConfig::default());
    let mut device = connect(&runtime, CREDENTIAL).await;

    // 前两次不应答
    assert_eq!(next_request(&mut device).await, read_request_frame());
    assert_eq!(next_request(&mut device).await, read_request_frame());
    assert_eq!(next_request(&mut device).await, read_request_frame());
    let response = encode_response(ProtocolVariant::Rtu, 0, 1, 0x03, &[0x04, 0x00, 0x00, 0x00, 0x0A]);
    device.write_all(&response).await.unwrap();

    wait_for(&recorder, "devices/telemetry", |_| true).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(telemetry_values(&recorder), vec![json!({"temp": 10})]);
    let status = recorder.json_on("devices/status");
    assert!(status.iter().all(|msg| msg["values"]["status"] == "1"));
    assert!(runtime.registry().get("gw-1").is_some());
}

#[tokio::test]
async fn modbus_exception_is_reported_and_connection_kept() {
    let (runtime, recorder) = runtime(AuthLimiterConfig::default());
    let mut device = connect(&runtime, CREDENTIAL).await;

    next_request(&mut device).await;
    let response = encode_response(ProtocolVariant::Rtu, 0, 1, 0x83, &[0x02]);
    device.write_all(&response).await.unwrap();

    let message = wait_for(&recorder, "devices/telemetry", |_| true).await;
    let report = &nested(&message)["modbus_exception"];
    assert_eq!(report["error_type"], "business_error");
    assert_eq!(report["raw_response"], hex::encode(&response));
    assert_eq!(report["raw_request"], hex::encode(read_request_frame()));
    assert!(
        report["error_message"]
            .as_str()
            .unwrap()
            .contains("Illegal data address")
    );
    assert!(runtime.registry().get("gw-1").is_some());
}

#[tokio::test]
async fn dropped_transport_publishes_offline() {
    let (runtime, recorder) = runtime(AuthLimiterConfig::default());
    let mut device = connect(&runtime, CREDENTIAL).await;
    next_request(&mut device).await;
    drop(device);

    wait_for(&recorder, "devices/status", |msg| msg["values"]["status"] == "0").await;
    assert!(runtime.registry().get("gw-1").is_none());
    assert!(runtime.registry().find_by_sub_device("sub-1").is_none());
}

#[tokio::test]
async fn failed_registrations_block_the_ip() {
    let (runtime, recorder) = runtime(AuthLimiterConfig {
        failure_threshold: 2,
        ..AuthLimiterConfig::default()
    });

    for _ in 0..2 {
        let mut device = connect(&runtime, "unknown").await;
        let mut buf = [0u8; 16];
        assert_eq!(device.read(&mut buf).await.unwrap(), 0);
    }
    // 连接先于失败计数关闭，稍等计数落地
    for _ in 0..50 {
        if runtime.limiter().is_blocked(PEER) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(runtime.limiter().is_blocked(PEER));

    // 封禁期间即使凭证正确也直接关闭
    let mut device = connect(&runtime, CREDENTIAL).await;
    let mut buf = [0u8; 16];
    assert_eq!(device.read(&mut buf).await.unwrap(), 0);
    assert!(runtime.registry().is_empty());
    assert!(recorder.messages().is_empty());
}

#[tokio::test]
async fn control_write_uses_the_session_transport() {
    let (runtime, recorder) = runtime(AuthLimiterConfig::default());
    let mut device = connect(&runtime, CREDENTIAL).await;

    next_request(&mut device).await;
    let response = encode_response(ProtocolVariant::Rtu, 0, 1, 0x03, &[0x04, 0x00, 0x00, 0x00, 0x0A]);
    device.write_all(&response).await.unwrap();
    wait_for(&recorder, "devices/telemetry", |_| true).await;

    let control = SessionControl::new(runtime.clone());
    let write = ControlWrite {
        device_id: "sub-1".to_string(),
        key: "temp".to_string(),
        value: 5.0,
    };
    let pending = tokio::spawn(async move { control.execute(&write).await });

    let expected = encode_request(
        ProtocolVariant::Rtu,
        &ModbusRequest::write(1, 0x10, 10, 2, vec![0x00, 0x00, 0x00, 0x05]),
        0,
    )
    .unwrap();
    assert_eq!(next_request(&mut device).await, expected);
    let ack = encode_response(ProtocolVariant::Rtu, 0, 1, 0x10, &[0x00, 0x0A, 0x00, 0x02]);
    device.write_all(&ack).await.unwrap();

    pending.await.unwrap().expect("control write");

    let unknown = SessionControl::new(runtime.clone())
        .execute(&ControlWrite {
            device_id: "sub-1".to_string(),
            key: "humidity".to_string(),
            value: 1.0,
        })
        .await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn reconfigure_closes_the_live_session() {
    let (runtime, recorder) = runtime(AuthLimiterConfig::default());
    let mut device = connect(&runtime, CREDENTIAL).await;
    next_request(&mut device).await;

    assert!(matches!(
        runtime.reconfigure("gw-unknown").await,
        Err(SessionError::Platform(_))
    ));

    runtime.reconfigure("gw-1").await.expect("reconfigure");
    assert!(runtime.registry().get("gw-1").is_none());
    wait_for(&recorder, "devices/status", |msg| msg["values"]["status"] == "0").await;

    assert!(matches!(
        runtime.reconfigure("gw-1").await,
        Err(SessionError::NotConnected(_))
    ));

    let mut buf = [0u8; 16];
    assert_eq!(device.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn second_registration_replaces_the_first() {
    let (runtime, recorder) = runtime(AuthLimiterConfig::default());
    let mut first = connect(&runtime, CREDENTIAL).await;
    next_request(&mut first).await;
    let first_conn = runtime.registry().get("gw-1").unwrap().conn_id();

    let mut second = connect(&runtime, CREDENTIAL).await;
    next_request(&mut second).await;
    assert_ne!(runtime.registry().get("gw-1").unwrap().conn_id(), first_conn);

    // 旧连接被关闭，读到 EOF
    let mut buf = [0u8; 64];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(3), first.read(&mut buf))
            .await
            .expect("old connection closed")
            .unwrap();
        if n == 0 {
            break;
        }
    }
    assert_eq!(runtime.registry().len(), 1);
    let offline = recorder
        .json_on("devices/status")
        .into_iter()
        .filter(|msg| msg["values"]["status"] == "0")
        .count();
    assert_eq!(offline, 0);
}
