//! Controller commands that are not part of recording: actuation enable,
//! module discovery, ping and position targets.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    device_link::{DeviceLink, DEFAULT_CMD_TIMEOUT},
    errors::Error,
    wire::PacketType,
    Result,
};

pub const CMD_BLDC_GET: u16 = 0x0200;
pub const CMD_BLDC_SET: u16 = 0x0201;
pub const CMD_MAIN_GET_MODULE_CNT: u16 = 0x0204;
pub const CMD_MAIN_GET_MODULE_INFO: u16 = 0x0205;
pub const CMD_MAIN_SEND_POSITION: u16 = 0x020C;
pub const CMD_MAIN_SEND_PING: u16 = 0x020D;

const BLDC_ITEM_ENABLE: u8 = 0;
const MODULE_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub index: u8,
    pub kind: u8,
    pub name: String,
}

/// Hand controller on top of a [`DeviceLink`]. Actuation enabled through
/// this handle is disabled again on drop.
pub struct Hand {
    link: Arc<DeviceLink>,
    enabled: bool,
    timeout: Duration,
}

fn check(code: u16) -> Result<()> {
    match code {
        0 => Ok(()),
        code => Err(Error::Device { code }),
    }
}

impl Hand {
    pub fn new(link: Arc<DeviceLink>) -> Self {
        Self {
            link,
            enabled: false,
            timeout: DEFAULT_CMD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    fn request(&self, cmd: u16, payload: &[u8]) -> Result<Vec<u8>> {
        let (code, data) = self.link.send_and_await(cmd, payload, self.timeout)?;
        check(code)?;
        Ok(data)
    }

    pub fn set_enable(&mut self, enable: bool) -> Result<()> {
        let mut payload = vec![BLDC_ITEM_ENABLE];
        payload.extend_from_slice(&(enable as u32).to_le_bytes());
        self.request(CMD_BLDC_SET, &payload)?;
        self.enabled = enable;
        info!("{}", if enable { "enable ok" } else { "disable ok" });
        Ok(())
    }

    pub fn query_enable(&self) -> Result<bool> {
        let data = self.request(CMD_BLDC_GET, &[BLDC_ITEM_ENABLE])?;
        match data.get(1..5) {
            Some(raw) => Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) != 0),
            None => Err(Error::MalformedPacket(format!(
                "enable response is {} bytes",
                data.len()
            ))),
        }
    }

    pub fn module_count(&self) -> Result<u8> {
        let data = self.request(CMD_MAIN_GET_MODULE_CNT, &[])?;
        data.first()
            .copied()
            .ok_or_else(|| Error::MalformedPacket("empty module count response".into()))
    }

    pub fn module_info(&self, index: u8) -> Result<ModuleInfo> {
        let data = self.request(CMD_MAIN_GET_MODULE_INFO, &[index])?;
        if data.len() < 2 + MODULE_NAME_LEN {
            return Err(Error::MalformedPacket(format!(
                "module info response is {} bytes",
                data.len()
            )));
        }
        let name = &data[2..2 + MODULE_NAME_LEN];
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        Ok(ModuleInfo {
            index: data[0],
            kind: data[1],
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
        })
    }

    pub fn ping(&self) -> Result<()> {
        self.link.send(PacketType::Ctrl, CMD_MAIN_SEND_PING, &[])
    }

    pub fn send_position(&self, id: u8, position: f32, velocity: f32) -> Result<()> {
        let mut payload = vec![id];
        payload.extend_from_slice(&position.to_le_bytes());
        payload.extend_from_slice(&velocity.to_le_bytes());
        self.link
            .send(PacketType::Ctrl, CMD_MAIN_SEND_POSITION, &payload)
    }

    /// Logs the modules the controller reports. Failures are not fatal.
    pub fn log_modules(&self) {
        match self.module_count() {
            Ok(count) => {
                info!(count, "hand modules");
                for index in 0..count {
                    match self.module_info(index) {
                        Ok(m) => info!(index = m.index, kind = m.kind, name = %m.name, "module"),
                        Err(e) => warn!(index, "module info failed: {e}"),
                    }
                }
            }
            Err(e) => warn!("module count failed: {e}"),
        }
    }
}

impl Drop for Hand {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = self.set_enable(false) {
                warn!("disable on release failed: {e}");
            }
        }
    }
}
