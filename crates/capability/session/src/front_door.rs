//! 网关接入端：接受连接、限流、读取注册凭证、安装会话。

use crate::runtime::GatewayRuntime;
use crate::transport::Transport;
use mbgw_telemetry::{
    record_connection_accepted, record_connection_blocked, record_registration_failed,
    record_registration_ok,
};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const CREDENTIAL_MAX_LEN: usize = 1024;

/// 接受连接直到监听器出错，每条连接一个任务。
pub async fn serve(listener: TcpListener, runtime: Arc<GatewayRuntime>) -> io::Result<()> {
    info!(target: "mbgw.session", addr = %listener.local_addr()?, "gateway_listener_started");
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                record_connection_accepted();
                let _ = stream.set_nodelay(true);
                let runtime = runtime.clone();
                tokio::spawn(async move {
                    handle_connection(runtime, stream, peer_addr.ip().to_string()).await;
                });
            }
            Err(err) => {
                error!(target: "mbgw.session", error = %err, "gateway_accept_failed");
            }
        }
    }
}

/// 处理一条新连接的注册握手。
///
/// 被封禁的 IP、读不到凭证或平台拒绝时直接关闭连接，不写任何数据。
pub async fn handle_connection<T>(runtime: Arc<GatewayRuntime>, mut stream: T, peer_ip: String)
where
    T: Transport + 'static,
{
    let limiter = runtime.limiter();
    if limiter.is_blocked(&peer_ip) {
        record_connection_blocked();
        if limiter.should_log_block(&peer_ip) {
            warn!(target: "mbgw.session", peer = %peer_ip, "connection_rejected_blocked");
        }
        return;
    }

    let credential = match read_credential(&mut stream, &runtime).await {
        Ok(credential) => credential,
        Err(err) => {
            limiter.record_failure(&peer_ip);
            record_registration_failed();
            debug!(target: "mbgw.session", peer = %peer_ip, error = %err, "credential_read_failed");
            return;
        }
    };

    match runtime.register(&credential, &peer_ip, Box::new(stream)).await {
        Ok(session) => {
            limiter.record_success(&peer_ip);
            record_registration_ok();
            debug!(
                target: "mbgw.session",
                gateway_id = %session.gateway_id(),
                peer = %peer_ip,
                "registration_done"
            );
        }
        Err(err) => {
            limiter.record_failure(&peer_ip);
            record_registration_failed();
            warn!(
                target: "mbgw.session",
                peer = %peer_ip,
                credential = %credential,
                error = %err,
                "registration_failed"
            );
        }
    }
}

async fn read_credential<T>(stream: &mut T, runtime: &GatewayRuntime) -> io::Result<String>
where
    T: Transport,
{
    let mut buf = [0u8; CREDENTIAL_MAX_LEN];
    let n = tokio::time::timeout(
        runtime.settings().registration_timeout,
        stream.read(&mut buf),
    )
    .await
    .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
    let credential = String::from_utf8_lossy(&buf[..n]).trim().to_string();
    if credential.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty credential"));
    }
    Ok(credential)
}
