use domain::ProtocolVariant;
use mbgw_protocol::{
    HeartbeatPattern, ReadOutcome, clear_stale, encode_response, flush_late_responses,
    read_response,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

fn deadline(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}

#[tokio::test]
async fn rtu_frame_after_heartbeat() {
    let (mut device, mut gateway) = tokio::io::duplex(1024);
    let heartbeat = HeartbeatPattern::from_credential("REG123");
    let frame = encode_response(ProtocolVariant::Rtu, 0, 1, 0x03, &[0x04, 0, 0, 0, 0x0A]);

    let mut wire = b"REG123".to_vec();
    wire.extend_from_slice(&frame);
    device.write_all(&wire).await.unwrap();

    let outcome = read_response(&mut gateway, ProtocolVariant::Rtu, &heartbeat, deadline(500))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::Frame(frame));
}

#[tokio::test]
async fn rtu_frame_after_unknown_bytes() {
    let (mut device, mut gateway) = tokio::io::duplex(1024);
    let heartbeat = HeartbeatPattern::from_credential("REG-1");
    let frame = encode_response(ProtocolVariant::Rtu, 0, 1, 0x03, &[0x04, 0, 0, 0, 0x0A]);

    // 前缀第二字节恰好是合法功能码，推断长度远超缓冲
    let mut wire = vec![0xAB, 0x03, 0xFF];
    wire.extend_from_slice(&frame);
    device.write_all(&wire).await.unwrap();

    let outcome = read_response(&mut gateway, ProtocolVariant::Rtu, &heartbeat, deadline(300))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::Frame(frame));
}

#[tokio::test]
async fn rtu_slave_with_digit_address() {
    let (mut device, mut gateway) = tokio::io::duplex(1024);
    let heartbeat = HeartbeatPattern::from_credential("REG-1");
    let frame = encode_response(ProtocolVariant::Rtu, 0, 0x35, 0x03, &[0x02, 0x00, 0x07]);
    device.write_all(&frame).await.unwrap();

    let outcome = read_response(&mut gateway, ProtocolVariant::Rtu, &heartbeat, deadline(300))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::Frame(frame));
}

#[tokio::test]
async fn frame_split_across_writes() {
    let (mut device, mut gateway) = tokio::io::duplex(1024);
    let heartbeat = HeartbeatPattern::from_credential("hb");
    let frame = encode_response(ProtocolVariant::Tcp, 9, 1, 0x03, &[0x02, 0x00, 0x2A]);
    let (head, tail) = frame.split_at(5);
    let (head, tail) = (head.to_vec(), tail.to_vec());

    let writer = tokio::spawn(async move {
        device.write_all(&head).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.write_all(&tail).await.unwrap();
        device
    });

    let outcome = read_response(&mut gateway, ProtocolVariant::Tcp, &heartbeat, deadline(1000))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::Frame(frame));
    drop(writer.await.unwrap());
}

#[tokio::test]
async fn heartbeat_only_returns_heartbeat_at_deadline() {
    let (mut device, mut gateway) = tokio::io::duplex(1024);
    let heartbeat = HeartbeatPattern::from_credential("A1B2");
    device.write_all(&[0xA1, 0xB2]).await.unwrap();

    let outcome = read_response(&mut gateway, ProtocolVariant::Rtu, &heartbeat, deadline(200))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::Heartbeat(vec![0xA1, 0xB2]));
}

#[tokio::test]
async fn silence_is_no_data() {
    let (_device, mut gateway) = tokio::io::duplex(1024);
    let heartbeat = HeartbeatPattern::from_credential("hb");
    let outcome = read_response(&mut gateway, ProtocolVariant::Tcp, &heartbeat, deadline(100))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::NoData);
}

#[tokio::test]
async fn garbled_tcp_header_is_drained() {
    let (mut device, mut gateway) = tokio::io::duplex(1024);
    let heartbeat = HeartbeatPattern::from_credential("hb");
    device
        .write_all(&[0x00, 0x01, 0x12, 0x34, 0x00, 0x06, 0x01, 0x03, 0xFF])
        .await
        .unwrap();

    let outcome = read_response(&mut gateway, ProtocolVariant::Tcp, &heartbeat, deadline(300))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::NoData);
}

#[tokio::test]
async fn peer_close_is_an_error() {
    let (device, mut gateway) = tokio::io::duplex(1024);
    drop(device);
    let heartbeat = HeartbeatPattern::from_credential("hb");
    let err = read_response(&mut gateway, ProtocolVariant::Rtu, &heartbeat, deadline(200))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn stale_and_late_bytes_are_discarded() {
    let (mut device, mut gateway) = tokio::io::duplex(1024);
    device.write_all(&[0x01, 0x02, 0x03]).await.unwrap();
    assert_eq!(clear_stale(&mut gateway).await.unwrap(), 3);

    device.write_all(&[0x04, 0x05]).await.unwrap();
    let dropped = flush_late_responses(&mut gateway, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(dropped, 2);

    assert_eq!(clear_stale(&mut gateway).await.unwrap(), 0);
}
