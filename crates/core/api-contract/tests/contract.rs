use api_contract::{DeviceNotification, FormQuery, MetricsSnapshotDto, PluginResponse};
use serde_json::{Value, json};

#[test]
fn success_envelope_has_code_200() {
    let value = serde_json::to_value(PluginResponse::success(json!({"a": 1}))).expect("serialize");
    assert_eq!(value, json!({"code": 200, "message": "success", "data": {"a": 1}}));
}

#[test]
fn bad_request_omits_data() {
    let response: PluginResponse<Value> = PluginResponse::bad_request("connection not found");
    assert!(!response.is_success());
    let value = serde_json::to_value(response).expect("serialize");
    assert_eq!(value, json!({"code": 400, "message": "connection not found"}));
}

#[test]
fn success_null_keeps_data_key() {
    let value = serde_json::to_value(PluginResponse::success_null()).expect("serialize");
    assert_eq!(value, json!({"code": 200, "message": "success", "data": null}));
}

#[test]
fn notification_is_pascal_case() {
    let payload = r#"{"DeviceType":"3","ParentId":"gw-1","DeviceId":"sub-9","Extra":1}"#;
    let notification: DeviceNotification = serde_json::from_str(payload).expect("parse");
    assert_eq!(notification.parent_id, "gw-1");
    assert_eq!(notification.device_id.as_deref(), Some("sub-9"));
    assert!(notification.is_sub_device());

    let gateway: DeviceNotification = serde_json::from_str(r#"{"DeviceType":"2"}"#).expect("parse");
    assert!(!gateway.is_sub_device());
    assert!(gateway.parent_id.is_empty());
}

#[test]
fn form_query_fields_default_to_empty() {
    let query: FormQuery = serde_json::from_str(r#"{"form_type":"CFG"}"#).expect("parse");
    assert_eq!(query.form_type, "CFG");
    assert!(query.device_type.is_empty());
}

#[test]
fn metrics_dto_is_flat() {
    let value = serde_json::to_value(MetricsSnapshotDto {
        polls_ok: 3,
        ..MetricsSnapshotDto::default()
    })
    .expect("serialize");
    assert_eq!(value["polls_ok"], 3);
    assert!(matches!(value["avg_cycle_latency_ms"], Value::Number(_)));
}
