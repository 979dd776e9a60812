//! 响应读取
//!
//! 一条网关连接上会交错出现三类数据：设备心跳包、本次请求的响应、
//! 上一次超时请求迟到的响应。`read_response` 每次调用只取出一帧，
//! 容忍前导心跳与半包，并且永远不会越过调用方给出的期限阻塞。

use crate::frame::{MBAP_HEADER_LEN, crc16, is_valid_function_code, rtu_response_length};
use domain::ProtocolVariant;
use std::io;
use std::ops::Range;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::debug;

/// 缓冲上限，超过即视为乱码整体丢弃。
pub const MAX_BUFFER_LEN: usize = 1024;

const READ_CHUNK: usize = 512;
const STALE_READ_TIMEOUT: Duration = Duration::from_millis(100);
const STALE_MAX: Duration = Duration::from_secs(1);
const FLUSH_READ_TIMEOUT: Duration = Duration::from_millis(50);
const FLUSH_IDLE_LIMIT: Duration = Duration::from_secs(1);
const FLUSH_MAX: Duration = Duration::from_secs(5);

/// 一次读取的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 一个完整的 Modbus 响应帧（含外层封装）
    Frame(Vec<u8>),
    /// 期限内只收到心跳
    Heartbeat(Vec<u8>),
    /// 期限内没有可识别的数据
    NoData,
}

/// 设备心跳特征。
///
/// 注册凭证能按十六进制解码时使用解码后的字节，否则使用原始字节。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatPattern {
    bytes: Vec<u8>,
}

impl HeartbeatPattern {
    pub fn from_credential(credential: &str) -> Self {
        let bytes = match hex::decode(credential) {
            Ok(decoded) if !decoded.is_empty() => decoded,
            _ => credential.as_bytes().to_vec(),
        };
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 缓冲区开头连续心跳包的总长度。
    pub fn leading_len(&self, buf: &[u8]) -> usize {
        if self.bytes.is_empty() {
            return 0;
        }
        let mut offset = 0;
        while buf[offset..].starts_with(&self.bytes) {
            offset += self.bytes.len();
        }
        offset
    }

    /// 剩余数据是否可能是一个尚未收全的心跳包。
    fn is_partial(&self, rest: &[u8]) -> bool {
        !self.bytes.is_empty() && !rest.is_empty() && self.bytes.starts_with(rest)
    }
}

enum Scan {
    Frame(Range<usize>),
    Incomplete,
    Garbled,
}

fn scan(buf: &[u8], variant: ProtocolVariant, heartbeat: &HeartbeatPattern) -> Scan {
    let start = heartbeat.leading_len(buf);
    let data = &buf[start..];
    if heartbeat.is_partial(data) {
        return Scan::Incomplete;
    }
    let found = match variant {
        ProtocolVariant::Rtu => scan_rtu(data),
        ProtocolVariant::Tcp => scan_tcp(data),
    };
    match found {
        Scan::Frame(range) => Scan::Frame(range.start + start..range.end + start),
        other => other,
    }
}

/// 逐个偏移寻找候选帧。
///
/// CRC 正确的候选优先；没有时退回第一个长度够的候选（兼容 CRC 不规范的设备）。
/// ASCII 数字开头的候选多为心跳，只有 CRC 正确才接受。
fn scan_rtu(data: &[u8]) -> Scan {
    if data.len() < 5 {
        return Scan::Incomplete;
    }
    let mut first_fit = None;
    let mut pending = false;
    for i in 0..=data.len() - 5 {
        if !is_valid_function_code(data[i + 1]) {
            continue;
        }
        let Ok(total) = rtu_response_length(&data[i..]) else {
            continue;
        };
        if data.len() - i < total {
            pending = true;
            continue;
        }
        let range = i..i + total;
        if crc_matches(&data[range.clone()]) {
            return Scan::Frame(range);
        }
        if !data[i].is_ascii_digit() && first_fit.is_none() {
            first_fit = Some(range);
        }
    }
    match (first_fit, pending) {
        (Some(range), _) => Scan::Frame(range),
        (None, true) => Scan::Incomplete,
        (None, false) => Scan::Garbled,
    }
}

fn crc_matches(frame: &[u8]) -> bool {
    let (body, crc) = frame.split_at(frame.len() - 2);
    crc16(body) == u16::from_le_bytes([crc[0], crc[1]])
}

fn scan_tcp(data: &[u8]) -> Scan {
    if data.len() < MBAP_HEADER_LEN + 2 {
        return Scan::Incomplete;
    }
    let protocol_id = u16::from_be_bytes([data[2], data[3]]);
    let length = usize::from(u16::from_be_bytes([data[4], data[5]]));
    if protocol_id != 0 || !(2..=254).contains(&length) || !is_valid_function_code(data[7]) {
        return Scan::Garbled;
    }
    let total = MBAP_HEADER_LEN + length;
    if data.len() >= total {
        Scan::Frame(0..total)
    } else {
        Scan::Incomplete
    }
}

/// 在 `deadline` 之前读取一帧响应。
///
/// 只有真正的 IO 错误（含对端关闭）才返回 `Err`；超时与乱码都返回 `NoData`。
pub async fn read_response<R>(
    reader: &mut R,
    variant: ProtocolVariant,
    heartbeat: &HeartbeatPattern,
    deadline: Instant,
) -> io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if !buf.is_empty() {
            match scan(&buf, variant, heartbeat) {
                Scan::Frame(range) => return Ok(ReadOutcome::Frame(buf[range].to_vec())),
                Scan::Garbled => {
                    let dropped = drain_until(reader, deadline).await? + buf.len();
                    debug!(bytes = dropped, "garbled_response_drained");
                    return Ok(ReadOutcome::NoData);
                }
                Scan::Incomplete if buf.len() > MAX_BUFFER_LEN => {
                    let dropped = drain_until(reader, deadline).await? + buf.len();
                    debug!(bytes = dropped, "oversized_buffer_drained");
                    return Ok(ReadOutcome::NoData);
                }
                Scan::Incomplete => {}
            }
        }

        match timeout_at(deadline, reader.read(&mut chunk)).await {
            Err(_) => return Ok(at_deadline(buf, heartbeat)),
            Ok(Ok(0)) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(err)) if is_timeout(&err) => return Ok(at_deadline(buf, heartbeat)),
            Ok(Err(err)) => return Err(err),
        }
    }
}

fn at_deadline(buf: Vec<u8>, heartbeat: &HeartbeatPattern) -> ReadOutcome {
    if !buf.is_empty() && heartbeat.leading_len(&buf) == buf.len() {
        ReadOutcome::Heartbeat(buf)
    } else {
        ReadOutcome::NoData
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// 丢弃数据直到短读超时或到达期限。
async fn drain_until<R>(reader: &mut R, deadline: Instant) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = [0u8; READ_CHUNK];
    let mut dropped = 0;
    while Instant::now() < deadline {
        let read_deadline = (Instant::now() + FLUSH_READ_TIMEOUT).min(deadline);
        match timeout_at(read_deadline, reader.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(Ok(n)) => dropped += n,
            Ok(Err(err)) if is_timeout(&err) => break,
            Ok(Err(err)) => return Err(err),
        }
    }
    Ok(dropped)
}

/// 发送请求前清掉缓冲区里的残留数据，返回丢弃的字节数。
pub async fn clear_stale<R>(reader: &mut R) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let started = Instant::now();
    let mut chunk = [0u8; READ_CHUNK];
    let mut dropped = 0;
    while started.elapsed() < STALE_MAX {
        match timeout(STALE_READ_TIMEOUT, reader.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(Ok(n)) => dropped += n,
            Ok(Err(err)) if is_timeout(&err) => break,
            Ok(Err(err)) => return Err(err),
        }
    }
    if dropped > 0 {
        debug!(bytes = dropped, "stale_bytes_cleared");
    }
    Ok(dropped)
}

/// 超时后持续读取直到连接静默 `silence`，丢弃迟到的响应。
///
/// 1 秒内什么都没收到就提前结束，总时长最多 5 秒。
pub async fn flush_late_responses<R>(reader: &mut R, silence: Duration) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let started = Instant::now();
    let mut last_data = started;
    let mut chunk = [0u8; READ_CHUNK];
    let mut dropped = 0;
    loop {
        let now = Instant::now();
        if now - last_data >= silence
            || (dropped == 0 && now - started >= FLUSH_IDLE_LIMIT)
            || now - started >= FLUSH_MAX
        {
            break;
        }
        match timeout(FLUSH_READ_TIMEOUT, reader.read(&mut chunk)).await {
            Err(_) => {}
            Ok(Ok(0)) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(Ok(n)) => {
                dropped += n;
                last_data = Instant::now();
            }
            Ok(Err(err)) if is_timeout(&err) => {}
            Ok(Err(err)) => return Err(err),
        }
    }
    if dropped > 0 {
        debug!(bytes = dropped, "late_responses_flushed");
    }
    Ok(dropped)
}
