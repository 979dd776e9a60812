use crate::session::GatewaySession;
use dashmap::DashMap;
use std::sync::Arc;

/// 网关 id → 在线会话。
///
/// 另外维护子设备 id → 网关 id 的索引，供控制写入查找连接。
/// 所有操作都不跨越 IO 持有分片锁。
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, Arc<GatewaySession>>,
    sub_devices: DashMap<String, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, gateway_id: &str) -> Option<Arc<GatewaySession>> {
        self.sessions.get(gateway_id).map(|entry| entry.value().clone())
    }

    /// 子设备所在网关的会话。
    pub fn find_by_sub_device(&self, device_id: &str) -> Option<Arc<GatewaySession>> {
        let gateway_id = self.sub_devices.get(device_id)?.value().clone();
        self.get(&gateway_id)
    }

    /// 安装会话，返回被替换的旧会话（由调用方关闭）。
    pub fn put(&self, session: Arc<GatewaySession>) -> Option<Arc<GatewaySession>> {
        let gateway_id = session.gateway_id().to_string();
        for sub in &session.config().sub_devices {
            self.sub_devices
                .insert(sub.device_id.clone(), gateway_id.clone());
        }
        self.sessions.insert(gateway_id, session)
    }

    pub fn remove(&self, gateway_id: &str) -> Option<Arc<GatewaySession>> {
        let (_, session) = self.sessions.remove(gateway_id)?;
        self.drop_index(&session);
        Some(session)
    }

    /// 仅当登记的仍是同一条连接时才删除，防止旧连接的关闭误删新会话。
    pub fn compare_and_remove(&self, gateway_id: &str, conn_id: u64) -> Option<Arc<GatewaySession>> {
        let (_, session) = self
            .sessions
            .remove_if(gateway_id, |_, session| session.conn_id() == conn_id)?;
        self.drop_index(&session);
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn gateway_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    fn drop_index(&self, session: &GatewaySession) {
        for sub in &session.config().sub_devices {
            self.sub_devices
                .remove_if(&sub.device_id, |_, gateway| gateway == session.gateway_id());
        }
    }
}
