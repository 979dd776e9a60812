use crate::retry::RetryPolicy;
use crate::transport::Transport;
use domain::GatewayConfig;
use mbgw_protocol::{
    Classify, ClassifiedError, HeartbeatPattern, ModbusRequest, ProtocolError, ReadOutcome,
    clear_stale, detect_exception, encode_request, flush_late_responses, parse_response,
    read_response,
};
use mbgw_telemetry::{record_cycle_latency_ms, record_poll_timeout};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// 一次请求/响应周期的期限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTimeouts {
    pub write: Duration,
    pub read: Duration,
}

/// 成功的响应。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// 发出的完整帧
    pub request: Vec<u8>,
    /// 收到的完整帧
    pub response: Vec<u8>,
    /// 剥壳后的 `[unit, fc, ...]`
    pub pdu: Vec<u8>,
}

/// 失败的周期，附带原始报文用于上报。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    pub error: ClassifiedError,
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

/// 一个在线网关。
///
/// 传输在创建时即放入锁内；关闭后锁内为空，之后的请求都得到 `ConnectionClosed`。
pub struct GatewaySession {
    conn_id: u64,
    credential: String,
    peer: String,
    config: GatewayConfig,
    heartbeat: HeartbeatPattern,
    strict_crc: bool,
    flush_silence: Option<Duration>,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    closed: AtomicBool,
    transaction_id: AtomicU16,
    pollers: Mutex<Vec<AbortHandle>>,
}

impl GatewaySession {
    pub fn new(
        conn_id: u64,
        config: GatewayConfig,
        credential: String,
        peer: String,
        transport: Box<dyn Transport>,
        strict_crc: bool,
        flush_silence: Option<Duration>,
    ) -> Self {
        let heartbeat = HeartbeatPattern::from_credential(&credential);
        Self {
            conn_id,
            credential,
            peer,
            config,
            heartbeat,
            strict_crc,
            flush_silence,
            transport: tokio::sync::Mutex::new(Some(transport)),
            closed: AtomicBool::new(false),
            transaction_id: AtomicU16::new(0),
            pollers: Mutex::new(Vec::new()),
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn gateway_id(&self) -> &str {
        &self.config.gateway_id
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// 登记采集任务，关闭时一并终止。
    pub fn track_poller(&self, handle: AbortHandle) {
        if self.is_closed() {
            handle.abort();
            return;
        }
        if let Ok(mut pollers) = self.pollers.lock() {
            pollers.push(handle);
        }
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.lock().map(|pollers| pollers.len()).unwrap_or(0)
    }

    /// 发送请求并取回响应；只有超时会按 `retry` 重试，退避期间不持有传输锁。
    pub async fn request(
        &self,
        request: &ModbusRequest,
        timeouts: CycleTimeouts,
        retry: &RetryPolicy,
    ) -> Result<Reply, CycleFailure> {
        let variant = self.config.variant;
        let mut attempt = 0;
        loop {
            let frame = encode_request(variant, request, self.next_transaction_id()).map_err(|err| {
                CycleFailure {
                    error: err.into_classified(),
                    request: Vec::new(),
                    response: Vec::new(),
                }
            })?;

            let response = match self.exchange(&frame, timeouts).await {
                Ok(response) => response,
                Err(err) => {
                    let error = err.into_classified();
                    if error.is_retryable() {
                        record_poll_timeout();
                        if retry.allows(attempt) {
                            let delay = retry.delay(attempt);
                            attempt += 1;
                            debug!(
                                target: "mbgw.session",
                                gateway_id = %self.gateway_id(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "retry_after_timeout"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    return Err(CycleFailure {
                        error,
                        request: frame,
                        response: Vec::new(),
                    });
                }
            };

            if let Some(exception) = detect_exception(variant, &response) {
                return Err(CycleFailure {
                    error: exception.into_error().into_classified(),
                    request: frame,
                    response,
                });
            }
            let parsed = parse_response(variant, &response, self.strict_crc).map(<[u8]>::to_vec);
            return match parsed {
                Ok(pdu) => Ok(Reply {
                    request: frame,
                    response,
                    pdu,
                }),
                Err(err) => Err(CycleFailure {
                    error: err.into_classified(),
                    request: frame,
                    response,
                }),
            };
        }
    }

    /// 持锁完成一次收发。
    async fn exchange(&self, frame: &[u8], timeouts: CycleTimeouts) -> Result<Vec<u8>, ProtocolError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        let started = Instant::now();
        let result = self.cycle(&mut **transport, frame, timeouts).await;
        record_cycle_latency_ms(started.elapsed().as_millis() as u64);
        result
    }

    async fn cycle(
        &self,
        transport: &mut dyn Transport,
        frame: &[u8],
        timeouts: CycleTimeouts,
    ) -> Result<Vec<u8>, ProtocolError> {
        clear_stale(transport).await?;
        debug!(
            target: "mbgw.session",
            gateway_id = %self.gateway_id(),
            request = %hex::encode(frame),
            "modbus_request"
        );

        let write = async {
            transport.write_all(frame).await?;
            transport.flush().await
        };
        match tokio::time::timeout(timeouts.write, write).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProtocolError::Timeout(format!(
                    "write timed out after {} ms",
                    timeouts.write.as_millis()
                )));
            }
        }

        let deadline = Instant::now() + timeouts.read;
        match read_response(transport, self.config.variant, &self.heartbeat, deadline).await? {
            ReadOutcome::Frame(response) => {
                debug!(
                    target: "mbgw.session",
                    gateway_id = %self.gateway_id(),
                    response = %hex::encode(&response),
                    "modbus_response"
                );
                Ok(response)
            }
            ReadOutcome::Heartbeat(_) | ReadOutcome::NoData => {
                if let Some(silence) = self.flush_silence {
                    flush_late_responses(transport, silence).await?;
                }
                Err(ProtocolError::Timeout(format!(
                    "no response within {} ms",
                    timeouts.read.as_millis()
                )))
            }
        }
    }

    /// 关闭连接并终止采集任务；重复调用返回 false。
    pub async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let pollers = self
            .pollers
            .lock()
            .map(|mut pollers| std::mem::take(&mut *pollers))
            .unwrap_or_default();
        for poller in pollers {
            poller.abort();
        }
        let transport = self.transport.lock().await.take();
        if let Some(mut transport) = transport {
            let _ = transport.shutdown().await;
        }
        true
    }
}
