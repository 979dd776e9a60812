//! 网关配置模型。
//!
//! 平台返回的设备配置是松散的 JSON（表单模板里字段名为 PascalCase，数值可能缺失），
//! 这里一次性严格解码为强类型结构：
//!
//! ```text
//! PlatformDeviceConfig (serde DTO)
//!       │  GatewayConfig::from_platform
//!       ▼
//! GatewayConfig ── SubDeviceDescriptor ── RegisterCommand
//! ```
//!
//! 单条采集命令或单个子设备解码失败只会被剔除（记录在 `rejected`），不影响其余配置。

use serde::Deserialize;
use std::time::Duration;

/// 配置解码错误（字段级）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainConfigError {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },
    #[error("sub device {device_id}: {reason}")]
    SubDevice { device_id: String, reason: String },
    #[error("sub device {device_id} command #{index}: {reason}")]
    Command {
        device_id: String,
        index: usize,
        reason: String,
    },
}

/// 网关的 Modbus 传输变体。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    Rtu,
    Tcp,
}

impl ProtocolVariant {
    pub fn parse(value: &str) -> Result<Self, DomainConfigError> {
        match value.trim() {
            "MODBUS_RTU" => Ok(Self::Rtu),
            "MODBUS_TCP" => Ok(Self::Tcp),
            other => Err(DomainConfigError::Invalid {
                field: "protocol_type",
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rtu => "MODBUS_RTU",
            Self::Tcp => "MODBUS_TCP",
        }
    }
}

/// 多字节数值的字节序。
///
/// 以 32 位值 `0xAABBCCDD` 为例，线上的字节排列：
/// - `Big`：`AA BB CC DD`
/// - `Little`：`DD CC BB AA`
/// - `ByteSwap`（BADC）：`BB AA DD CC`
/// - `WordByteSwap`（CDAB）：`CC DD AA BB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
    ByteSwap,
    WordByteSwap,
}

impl ByteOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BIG" => Some(Self::Big),
            "LITTLE" => Some(Self::Little),
            "BADC" => Some(Self::ByteSwap),
            "CDAB" => Some(Self::WordByteSwap),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Big => "BIG",
            Self::Little => "LITTLE",
            Self::ByteSwap => "BADC",
            Self::WordByteSwap => "CDAB",
        }
    }
}

/// 寄存器数据类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    /// 线圈/离散量，每个标识符占响应中的 1 个字节
    Coil,
}

impl DataType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "int16" => Some(Self::Int16),
            "uint16" => Some(Self::Uint16),
            "int32" => Some(Self::Int32),
            "uint32" => Some(Self::Uint32),
            "int64" => Some(Self::Int64),
            "uint64" => Some(Self::Uint64),
            "float32" => Some(Self::Float32),
            "float64" => Some(Self::Float64),
            "coil" => Some(Self::Coil),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Coil => "coil",
        }
    }

    /// 单个值在响应数据区占用的字节数。
    pub fn byte_width(&self) -> usize {
        match self {
            Self::Coil => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
        }
    }

    /// 单个值占用的寄存器（或线圈）个数，用于计算写地址偏移。
    pub fn register_span(&self) -> u16 {
        match self {
            Self::Coil => 1,
            other => (other.byte_width() / 2) as u16,
        }
    }
}

/// 一组寄存器采集命令。
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterCommand {
    pub function_code: u8,
    pub starting_address: u16,
    pub quantity: u16,
    pub byte_order: ByteOrder,
    /// 采集间隔，下限 1 秒
    pub interval: Duration,
    pub data_type: DataType,
    /// 按顺序排列的值标识符
    pub identifiers: Vec<String>,
    pub equations: Vec<String>,
    pub decimal_places: Vec<String>,
}

impl RegisterCommand {
    /// 标识符在本组中的位置。
    pub fn identifier_index(&self, key: &str) -> Option<usize> {
        self.identifiers.iter().position(|id| id == key)
    }

    /// 第 `index` 个值适用的公式；只配置一条公式时作用于所有值。
    pub fn equation_for(&self, index: usize) -> Option<&str> {
        pick_entry(&self.equations, index)
    }

    /// 第 `index` 个值适用的小数位配置；只配置一项时作用于所有值。
    pub fn decimal_places_for(&self, index: usize) -> Option<&str> {
        pick_entry(&self.decimal_places, index)
    }
}

fn pick_entry(entries: &[String], index: usize) -> Option<&str> {
    let entry = match entries.len() {
        0 => None,
        1 => Some(entries[0].as_str()),
        _ => entries.get(index).map(String::as_str),
    };
    entry.filter(|entry| !entry.is_empty())
}

/// 子设备描述（挂在某个网关下的一个 Modbus 从站）。
#[derive(Debug, Clone, PartialEq)]
pub struct SubDeviceDescriptor {
    pub device_id: String,
    pub parent_id: String,
    pub slave_id: u8,
    pub commands: Vec<RegisterCommand>,
}

impl SubDeviceDescriptor {
    /// 找到包含指定标识符的命令及其位置。
    pub fn locate(&self, key: &str) -> Option<(&RegisterCommand, usize)> {
        self.commands
            .iter()
            .find_map(|command| command.identifier_index(key).map(|index| (command, index)))
    }
}

/// 已解码的网关配置快照。
///
/// 重连或重配置时整体替换，从不就地修改。
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub gateway_id: String,
    pub voucher: String,
    pub variant: ProtocolVariant,
    pub sub_devices: Vec<SubDeviceDescriptor>,
    /// 被剔除的子设备/命令及原因
    pub rejected: Vec<DomainConfigError>,
}

impl GatewayConfig {
    /// 从平台 DTO 严格解码。
    ///
    /// 网关级字段错误（缺少 id、未知协议类型）直接失败；
    /// 子设备与命令级错误收集到 `rejected`。
    pub fn from_platform(raw: PlatformDeviceConfig) -> Result<Self, DomainConfigError> {
        if raw.id.trim().is_empty() {
            return Err(DomainConfigError::Missing("id"));
        }
        let variant = ProtocolVariant::parse(&raw.protocol_type)?;

        let mut sub_devices = Vec::with_capacity(raw.sub_devices.len());
        let mut rejected = Vec::new();
        for sub in raw.sub_devices {
            match decode_sub_device(&raw.id, sub, &mut rejected) {
                Ok(descriptor) => sub_devices.push(descriptor),
                Err(err) => rejected.push(err),
            }
        }

        Ok(Self {
            gateway_id: raw.id,
            voucher: raw.voucher,
            variant,
            sub_devices,
            rejected,
        })
    }

    pub fn sub_device(&self, device_id: &str) -> Option<&SubDeviceDescriptor> {
        self.sub_devices
            .iter()
            .find(|sub| sub.device_id == device_id)
    }
}

/// 平台设备配置响应中的 `data` 部分。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformDeviceConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub voucher: String,
    #[serde(default)]
    pub device_type: Option<serde_json::Value>,
    #[serde(default)]
    pub protocol_type: String,
    #[serde(default)]
    pub sub_devices: Vec<PlatformSubDevice>,
}

/// 平台子设备条目。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformSubDevice {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub voucher: String,
    #[serde(default)]
    pub sub_device_addr: String,
    #[serde(default)]
    pub protocol_config_template: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FormTemplate {
    #[serde(rename = "SlaveID", default)]
    slave_id: Option<u8>,
    #[serde(default)]
    command_raw_list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCommand {
    function_code: u8,
    starting_address: u16,
    quantity: u16,
    #[serde(default)]
    endianess: String,
    #[serde(default)]
    interval: u64,
    data_type: String,
    #[serde(rename = "DataIdentifierListStr")]
    data_identifier_list_str: String,
    #[serde(default)]
    equation_list_str: String,
    #[serde(default)]
    decimal_places_list_str: String,
}

fn decode_sub_device(
    gateway_id: &str,
    sub: PlatformSubDevice,
    rejected: &mut Vec<DomainConfigError>,
) -> Result<SubDeviceDescriptor, DomainConfigError> {
    let device_id = sub.device_id.clone();
    let sub_error = |reason: String| DomainConfigError::SubDevice {
        device_id: device_id.clone(),
        reason,
    };

    if device_id.trim().is_empty() {
        return Err(sub_error("device_id is empty".to_string()));
    }
    let template = sub
        .protocol_config_template
        .ok_or_else(|| sub_error("protocol_config_template is missing".to_string()))?;
    let template: FormTemplate =
        serde_json::from_value(template).map_err(|err| sub_error(err.to_string()))?;

    let slave_id = match template.slave_id {
        Some(slave_id) => slave_id,
        None => sub.sub_device_addr.trim().parse::<u8>().map_err(|_| {
            sub_error(format!("invalid sub_device_addr: {}", sub.sub_device_addr))
        })?,
    };

    let mut commands = Vec::with_capacity(template.command_raw_list.len());
    for (index, value) in template.command_raw_list.into_iter().enumerate() {
        let command_error = |reason: String| DomainConfigError::Command {
            device_id: device_id.clone(),
            index,
            reason,
        };
        let decoded = serde_json::from_value::<RawCommand>(value)
            .map_err(|err| command_error(err.to_string()))
            .and_then(|raw| decode_command(raw).map_err(command_error));
        match decoded {
            Ok(command) => commands.push(command),
            Err(err) => rejected.push(err),
        }
    }

    Ok(SubDeviceDescriptor {
        device_id,
        parent_id: gateway_id.to_string(),
        slave_id,
        commands,
    })
}

fn decode_command(raw: RawCommand) -> Result<RegisterCommand, String> {
    if !(1..=4).contains(&raw.function_code) {
        return Err(format!(
            "function code {} is not a read function",
            raw.function_code
        ));
    }
    if raw.quantity == 0 {
        return Err("quantity must be positive".to_string());
    }
    let data_type = DataType::parse(&raw.data_type)
        .ok_or_else(|| format!("unsupported data type: {}", raw.data_type))?;
    // 未知字节序按大端处理
    let byte_order = ByteOrder::parse(&raw.endianess).unwrap_or_default();
    let identifiers = split_list(&raw.data_identifier_list_str);
    if identifiers.is_empty() {
        return Err("no data identifiers".to_string());
    }

    Ok(RegisterCommand {
        function_code: raw.function_code,
        starting_address: raw.starting_address,
        quantity: raw.quantity,
        byte_order,
        interval: Duration::from_secs(raw.interval.max(1)),
        data_type,
        identifiers,
        equations: split_list(&raw.equation_list_str),
        decimal_places: split_list(&raw.decimal_places_list_str),
    })
}

fn split_list(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(',').map(|item| item.trim().to_string()).collect()
}
