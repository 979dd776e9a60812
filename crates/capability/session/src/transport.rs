use tokio::io::{AsyncRead, AsyncWrite};

/// 网关连接的字节流（TCP 连接，测试中为内存管道）。
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}
