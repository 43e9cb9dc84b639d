/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::connection::port::MTKPort;
use crate::connection::{BlVersion, Connection, TargetConfig};
use crate::core::chipconfig::{ChipConfig, chip_config};
use crate::core::crypto::config::CryptoSetup;
use crate::error::Result;
use log::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub hw_code: u16,
    pub hw_sub_code: u16,
    pub hw_ver: u16,
    pub sw_ver: u16,
    pub bl_ver: Option<BlVersion>,
    pub meid: Vec<u8>,
    pub socid: Vec<u8>,
    pub target_config: Option<TargetConfig>,
    pub chip: Option<&'static ChipConfig>,
}

/// One physical device session: the synchronized connection plus everything
/// read off the chip during bring-up.
pub struct Device {
    pub conn: Connection,
    pub info: DeviceInfo,
}

impl Device {
    /// Brings a freshly plugged device up: handshake, identity, watchdog,
    /// secure-boot configuration.
    pub async fn init(port: Box<dyn MTKPort>, max_tries: Option<u32>) -> Result<Self> {
        let mut conn = Connection::new(port);
        info!("Status: Waiting for PreLoader VCOM, please connect mobile");
        conn.handshake(max_tries).await?;

        let (hw_code, mut hw_ver) = match conn.get_hw_code().await {
            Ok(v) => v,
            Err(_) => {
                // One resync attempt before declaring the link dead.
                conn.get_hw_code().await.inspect_err(|_| {
                    error!("Sync error. Please power off the device and retry.");
                })?
            }
        };

        let chip = chip_config(hw_code);
        match chip {
            Some(c) => {
                info!("\tCPU:\t\t\t{}", c.name);
                info!("\tWDT:\t\t\t{:#x}", c.watchdog);
                info!("\tUart:\t\t\t{:#x}", c.uart);
                info!("\tBrom payload addr:\t{:#x}", c.brom_payload_addr);
                info!("\tDA payload addr:\t{:#x}", c.da_payload_addr);
                if let Some(dxcc) = c.dxcc_base {
                    info!("\tDXCC addr:\t\t{:#x}", dxcc);
                }
            }
            None => warn!("Unknown hw code {:#06x}, no chip config", hw_code),
        }

        let (hw_sub_code, hw_ver2, sw_ver) = match conn.get_hw_sw_ver().await {
            Ok(v) => v,
            Err(e) => {
                debug!("GetHwSwVer unsupported: {}", e);
                (0, 0, 0)
            }
        };
        if hw_ver2 != 0 {
            hw_ver = hw_ver2;
        }
        info!("\tHW subcode:\t\t{:#x}", hw_sub_code);
        info!("\tHW Ver:\t\t\t{:#x}", hw_ver);
        info!("\tSW Ver:\t\t\t{:#x}", sw_ver);

        let mut device = Device {
            conn,
            info: DeviceInfo {
                hw_code,
                hw_sub_code,
                hw_ver,
                sw_ver,
                chip,
                ..DeviceInfo::default()
            },
        };

        info!("Disabling Watchdog...");
        if let Err(e) = device.disable_watchdog().await {
            warn!("Could not disable watchdog: {}", e);
        }
        info!("HW code:\t\t\t{:#x}", hw_code);

        device.info.target_config = match device.conn.get_target_config().await {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                warn!("CMD Get_Target_Config not supported: {}", e);
                None
            }
        };
        device.info.bl_ver = device.conn.get_bl_ver().await.ok();

        device.info.meid = device.conn.get_meid().await.unwrap_or_default();
        if !device.info.meid.is_empty() {
            info!("ME_ID:\t\t\t{}", hex::encode_upper(&device.info.meid));
        }
        device.info.socid = device.conn.get_socid().await.unwrap_or_default();
        if !device.info.socid.is_empty() {
            info!("SOC_ID:\t\t\t{}", hex::encode_upper(&device.info.socid));
        }

        Ok(device)
    }

    /// Parks the watchdog so the BootROM does not reset mid-session. A few
    /// chips need an extra register poke on top of the generic write.
    pub async fn disable_watchdog(&mut self) -> Result<()> {
        let Some(chip) = self.info.chip else {
            warn!("No chip config, skipping watchdog disable");
            return Ok(());
        };
        let (addr, value) = chip.watchdog_disable();
        self.conn.write32(addr, &[value]).await?;
        match self.info.hw_code {
            0x6592 => self.conn.write32(0x10000500, &[0x22000000]).await,
            0x6575 | 0x6577 => self.conn.write32(0x2200, &[0xC0000000]).await,
            _ => Ok(()),
        }
    }

    /// Register transport plus base addresses for the crypto drivers.
    /// `None` when the chip is unknown or has no DXCC block.
    pub fn crypto_setup(&mut self) -> Option<CryptoSetup<'_>> {
        let chip = self.info.chip?;
        let dxcc_base = chip.dxcc_base?;
        Some(CryptoSetup::new(
            self.info.hw_code,
            dxcc_base,
            chip.da_payload_addr,
            &mut self.conn,
        ))
    }
}
