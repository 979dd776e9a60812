//! 协议插件表单：启动时从磁盘读取，原样返回给平台。

use api_contract::FormQuery;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

const FORM_CONFIG: &str = "form_config.json";
const FORM_VOUCHER: &str = "form_voucher.json";
const FORM_VOUCHER_TYPE: &str = "form_voucher_type.json";

/// 网关设备类型
const DEVICE_TYPE_GATEWAY: &str = "2";
/// 子设备类型
const DEVICE_TYPE_SUB: &str = "3";

/// 已加载的表单；读取或解析失败的文件为 None。
#[derive(Debug, Default, Clone)]
pub struct FormStore {
    pub config: Option<Value>,
    pub voucher: Option<Value>,
    pub voucher_type: Option<Value>,
}

impl FormStore {
    pub fn load(dir: &Path) -> Self {
        Self {
            config: read_form(&dir.join(FORM_CONFIG)),
            voucher: read_form(&dir.join(FORM_VOUCHER)),
            voucher_type: read_form(&dir.join(FORM_VOUCHER_TYPE)),
        }
    }

    /// 按查询参数选出表单；`Ok(None)` 表示该设备类型没有此表单。
    ///
    /// CFG 为子设备配置表单，VCR/VCRT 为网关凭证与凭证类型表单。
    pub fn lookup(&self, query: &FormQuery) -> Result<Option<&Value>, String> {
        let protocol = query.protocol_type.trim();
        if protocol != "MODBUS_RTU" && protocol != "MODBUS_TCP" {
            return Err(format!("not support protocol type: {}", protocol));
        }
        let device_type = query.device_type.trim();
        let (form, wanted) = match query.form_type.trim() {
            "CFG" => (&self.config, DEVICE_TYPE_SUB),
            "VCR" => (&self.voucher, DEVICE_TYPE_GATEWAY),
            "VCRT" => (&self.voucher_type, DEVICE_TYPE_GATEWAY),
            other => return Err(format!("not support form type: {}", other)),
        };
        if device_type == wanted {
            Ok(form.as_ref())
        } else {
            Ok(None)
        }
    }
}

fn read_form(path: &Path) -> Option<Value> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target: "mbgw.http", path = %path.display(), error = %err, "form_file_unreadable");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => {
            info!(target: "mbgw.http", path = %path.display(), "form_file_loaded");
            Some(value)
        }
        Err(err) => {
            warn!(target: "mbgw.http", path = %path.display(), error = %err, "form_file_invalid");
            None
        }
    }
}
