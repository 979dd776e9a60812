//! 错误分类
//!
//! 把采集/控制过程中的任意失败归入五类，决定是否重试、是否断开连接。
//! 结构化错误按类型映射；不透明错误退回到按错误文本识别。

use crate::error::ProtocolError;
use crate::frame::exception_description;
use std::fmt;
use std::io;
use std::sync::Arc;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 链路故障（断开、写失败、EOF）
    Connection,
    /// 在期限内没有收到响应
    Timeout,
    /// 设备返回了异常响应或不可用的数据
    Business,
    /// 本地配置问题
    ConfigError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Business => "business_error",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::Unknown => "unknown_error",
        }
    }

    /// 只有超时值得重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout)
    }

    /// 只有链路故障需要关闭连接。
    pub fn closes_connection(&self) -> bool {
        matches!(self, ErrorKind::Connection)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分类后的错误。
///
/// 原始错误通过 [`std::error::Error::source`] 取回；比较时不参与。
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub function_code: Option<u8>,
    pub exception_code: Option<u8>,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            function_code: None,
            exception_code: None,
            cause: None,
        }
    }

    /// 附上被分类的原始错误。
    pub fn with_source<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn closes_connection(&self) -> bool {
        self.kind.closes_connection()
    }

    /// 异常码的标准描述（非异常错误为 None）。
    pub fn exception_description(&self) -> Option<&'static str> {
        self.exception_code.map(exception_description)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl PartialEq for ClassifiedError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.function_code == other.function_code
            && self.exception_code == other.exception_code
    }
}

impl Eq for ClassifiedError {}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// 可分类的错误。
pub trait Classify {
    fn classify(&self) -> ClassifiedError;

    /// 分类并保留原始错误。
    fn into_classified(self) -> ClassifiedError
    where
        Self: std::error::Error + Send + Sync + Sized + 'static,
    {
        let classified = self.classify();
        classified.with_source(self)
    }
}

impl Classify for ClassifiedError {
    fn classify(&self) -> ClassifiedError {
        self.clone()
    }

    fn into_classified(self) -> ClassifiedError {
        self
    }
}

impl Classify for io::Error {
    fn classify(&self) -> ClassifiedError {
        let kind = match self.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            _ => ErrorKind::Connection,
        };
        ClassifiedError::new(kind, self.to_string())
    }
}

impl Classify for ProtocolError {
    fn classify(&self) -> ClassifiedError {
        let message = self.to_string();
        match self {
            ProtocolError::Io(err) => err.classify(),
            ProtocolError::Timeout(_) => ClassifiedError::new(ErrorKind::Timeout, message),
            ProtocolError::ConnectionClosed => ClassifiedError::new(ErrorKind::Connection, message),
            ProtocolError::Exception {
                function_code,
                exception_code,
            } => ClassifiedError {
                kind: ErrorKind::Business,
                message,
                function_code: Some(*function_code),
                exception_code: Some(*exception_code),
                cause: None,
            },
            ProtocolError::UnsupportedFunctionCode(_) | ProtocolError::ReadFailed(_) => {
                ClassifiedError::new(ErrorKind::Business, message)
            }
            ProtocolError::Config(_) | ProtocolError::MissingPayload(_) => {
                ClassifiedError::new(ErrorKind::ConfigError, message)
            }
            _ => classify_message(&message),
        }
    }
}

impl Classify for Box<dyn std::error::Error + Send + Sync> {
    fn classify(&self) -> ClassifiedError {
        if let Some(err) = self.downcast_ref::<ClassifiedError>() {
            return err.clone();
        }
        if let Some(err) = self.downcast_ref::<ProtocolError>() {
            return err.classify();
        }
        if let Some(err) = self.downcast_ref::<io::Error>() {
            return err.classify();
        }
        classify_message(&self.to_string())
    }
}

/// 按错误文本分类。
pub fn classify_message(message: &str) -> ClassifiedError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("modbus exception") {
        return ClassifiedError {
            kind: ErrorKind::Business,
            message: message.to_string(),
            function_code: hex_field(&lower, "function_code=0x"),
            exception_code: hex_field(&lower, "exception_code=0x"),
            cause: None,
        };
    }
    if lower.contains("unsupported function code")
        || lower.contains("not supported function code")
        || lower.contains("read failed")
    {
        return ClassifiedError::new(ErrorKind::Business, message);
    }
    ClassifiedError::new(ErrorKind::Unknown, message)
}

fn hex_field(text: &str, marker: &str) -> Option<u8> {
    let start = text.find(marker)? + marker.len();
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .take(2)
        .collect();
    u8::from_str_radix(&digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_classification_extracts_codes() {
        let err = classify_message(
            "Modbus exception response: function_code=0x03, exception_code=0x02, Illegal data address",
        );
        assert_eq!(err.kind, ErrorKind::Business);
        assert_eq!(err.function_code, Some(0x03));
        assert_eq!(err.exception_code, Some(0x02));
    }

    #[test]
    fn only_timeouts_retry_and_only_connection_closes() {
        let kinds = [
            ErrorKind::Connection,
            ErrorKind::Timeout,
            ErrorKind::Business,
            ErrorKind::ConfigError,
            ErrorKind::Unknown,
        ];
        let retryable: Vec<_> = kinds.iter().filter(|k| k.is_retryable()).collect();
        let closing: Vec<_> = kinds.iter().filter(|k| k.closes_connection()).collect();
        assert_eq!(retryable, vec![&ErrorKind::Timeout]);
        assert_eq!(closing, vec![&ErrorKind::Connection]);
    }

    #[test]
    fn boxed_errors_are_downcast() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(io::Error::new(io::ErrorKind::TimedOut, "deadline"));
        assert_eq!(boxed.classify().kind, ErrorKind::Timeout);

        let boxed: Box<dyn std::error::Error + Send + Sync> = "read failed on device".into();
        assert_eq!(boxed.classify().kind, ErrorKind::Business);

        let boxed: Box<dyn std::error::Error + Send + Sync> = "something odd".into();
        assert_eq!(boxed.classify().kind, ErrorKind::Unknown);
    }

    #[test]
    fn owned_classification_keeps_cause() {
        use std::error::Error;

        let err = ProtocolError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone"));
        let classified = err.into_classified();
        assert_eq!(classified.kind, ErrorKind::Connection);

        let cause = classified.source().expect("cause kept");
        let inner = cause.downcast_ref::<ProtocolError>().expect("protocol error");
        assert!(matches!(inner, ProtocolError::Io(err) if err.kind() == io::ErrorKind::BrokenPipe));

        // 比较只看分类结果
        let bare = ClassifiedError::new(ErrorKind::Connection, classified.message.clone());
        assert_eq!(classified, bare);
        assert!(bare.source().is_none());
    }
}
