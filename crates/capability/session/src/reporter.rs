use crate::session::CycleFailure;
use mbgw_bus::ExceptionReport;

/// 把失败周期转换为上报内容，原始报文以十六进制附带。
pub fn exception_report(failure: &CycleFailure) -> ExceptionReport {
    ExceptionReport {
        error_type: failure.error.kind.as_str().to_string(),
        error_message: failure.error.message.clone(),
        raw_request: hex::encode(&failure.request),
        raw_response: hex::encode(&failure.response),
    }
}
