//! # Modbus 协议能力模块
//!
//! 网关连接上的全部协议处理：
//! - **frame**：RTU（CRC16）/ TCP（MBAP）请求编码与响应解析、异常识别
//! - **reader**：从交错着心跳与迟到响应的字节流里取出一帧
//! - **register**：寄存器字节 → 命名值（字节序、公式、小数位），以及控制写入编码
//! - **classify**：把任意失败归类，决定重试 / 上报 / 断开
//!
//! ## 数据流
//!
//! ```text
//! RegisterCommand ──► ModbusRequest ──► encode_request ──► socket
//!                                                             │
//!                 ValueMap ◄── decode_values ◄── parse_response ◄── read_response
//!                                                             │
//!                                       失败 ──► Classify ──► ErrorKind
//! ```

mod classify;
mod error;
pub mod frame;
pub mod reader;
pub mod register;

pub use classify::{Classify, ClassifiedError, ErrorKind, classify_message};
pub use error::ProtocolError;
pub use frame::{
    ModbusException, ModbusRequest, crc16, detect_exception, encode_request, encode_response,
    exception_description, parse_response, rtu_response_length,
};
pub use reader::{HeartbeatPattern, ReadOutcome, clear_stale, flush_late_responses, read_response};
pub use register::{decode_values, plan_write};
