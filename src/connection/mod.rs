/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod backend;
pub mod command;
mod jump;
mod memory;
pub mod payload;
pub mod port;

use crate::connection::command::Command;
use crate::connection::port::{ConnectionType, MTKPort};
use crate::error::{ProtocolError, Result, status_str};
use log::{debug, error, info};
use std::io::Write as _;
use std::time::Duration;

const START_CMD: [u8; 4] = [0xA0, 0x0A, 0x50, 0x05];
const HANDSHAKE_TRIES: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlVersion {
    /// The opcode was echoed back, meaning we talk to the BootROM itself.
    Brom,
    Preloader(u8),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TargetConfig {
    pub raw: u32,
    pub sbc: bool,
    pub sla: bool,
    pub daa: bool,
    pub swjtag: bool,
    pub epp: bool,
    pub root_cert: bool,
    pub mem_read_auth: bool,
    pub mem_write_auth: bool,
    pub cmd_c8_blocked: bool,
}

impl TargetConfig {
    pub fn from_raw(raw: u32) -> Self {
        TargetConfig {
            raw,
            sbc: raw & 0x1 != 0,
            sla: raw & 0x2 != 0,
            daa: raw & 0x4 != 0,
            swjtag: raw & 0x6 != 0,
            epp: raw & 0x8 != 0,
            root_cert: raw & 0x10 != 0,
            mem_read_auth: raw & 0x20 != 0,
            mem_write_auth: raw & 0x40 != 0,
            cmd_c8_blocked: raw & 0x80 != 0,
        }
    }
}

#[derive(Debug)]
pub struct Connection {
    pub port: Box<dyn MTKPort>,
    pub connection_type: ConnectionType,
    pub baudrate: u32,
    pub connected: bool,
}

impl Connection {
    pub fn new(port: Box<dyn MTKPort>) -> Self {
        let connection_type = port.get_connection_type();
        let baudrate = port.get_baudrate();

        Connection {
            port,
            connection_type,
            baudrate,
            connected: false,
        }
    }

    /// Establishes byte-level synchronization with the BootROM/Preloader.
    ///
    /// Each probe byte must come back as its bitwise complement. On a
    /// mismatch the probe restarts from the first byte after a line break
    /// and baud reconfiguration, spending one of the 100 tries of this
    /// connection attempt. `max_tries` caps the outer connect loop; `None`
    /// waits for a device forever.
    pub async fn handshake(&mut self, max_tries: Option<u32>) -> Result<()> {
        let mut counter = 0u32;
        while !self.connected {
            if let Some(cap) = max_tries {
                if counter == cap {
                    break;
                }
            }
            counter += 1;

            if let Err(e) = self.port.open().await {
                debug!("Port open failed: {}", e);
                self.wait_for_device().await;
                continue;
            }

            let mut tries = HANDSHAKE_TRIES;
            let mut i = 0usize;
            while i < START_CMD.len() && tries > 0 {
                if let Err(e) = self.port.write_all(&START_CMD[i..=i]).await {
                    debug!("Handshake write failed: {}", e);
                    break;
                }
                let mut rsp = [0u8; 1];
                match self.port.read_exact(&mut rsp).await {
                    Ok(_) => {
                        if i == 0 && rsp[0] == b'R' {
                            // READY preamble: swallow the remaining 4 bytes
                            // and retry the probe without spending a try.
                            // TODO: confirm against silicon that actually
                            // emits READY here instead of the complement.
                            let mut rest = [0u8; 4];
                            let _ = self.port.read_exact(&mut rest).await;
                            continue;
                        }
                        if rsp[0] == !START_CMD[i] {
                            i += 1;
                        } else {
                            i = 0;
                            let _ = self.port.set_break().await;
                            let _ = self.port.set_line_coding(self.baudrate).await;
                            tries -= 1;
                        }
                    }
                    Err(e) => {
                        debug!("Handshake read failed: {}", e);
                        i = 0;
                        tries -= 1;
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            }

            if i == START_CMD.len() {
                println!();
                info!("Device detected :)");
                self.connected = true;
                return Ok(());
            }

            let _ = self.port.close().await;
            self.wait_for_device().await;
        }

        error!("No MTK device detected.");
        Err(ProtocolError::Sync)
    }

    async fn wait_for_device(&self) {
        print!(".");
        let _ = std::io::stdout().flush();
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    /// Writes `data` and verifies the device echoes it back byte for byte.
    pub async fn echo(&mut self, data: &[u8]) -> Result<bool> {
        self.port.write_all(data).await?;
        let mut buf = vec![0u8; data.len()];
        self.port.read_exact(&mut buf).await?;
        if buf != data {
            error!("Echo mismatch. Expected: {:x?}, Got: {:x?}", data, buf);
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn echo_u32(&mut self, value: u32) -> Result<bool> {
        self.echo(&value.to_be_bytes()).await
    }

    /// Echoes chunks in order, stopping at the first mismatch.
    pub async fn echo_chunks(&mut self, chunks: &[&[u8]]) -> Result<bool> {
        for chunk in chunks {
            if !self.echo(chunk).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) async fn echo_or_desync(&mut self, data: &[u8]) -> Result<()> {
        if self.echo(data).await? {
            Ok(())
        } else {
            Err(ProtocolError::EchoMismatch)
        }
    }

    pub(crate) async fn echo_u32_or_desync(&mut self, value: u32) -> Result<()> {
        self.echo_or_desync(&value.to_be_bytes()).await
    }

    /// Raw command write with opcode acknowledgment. With `no_ack` the
    /// response is returned unconditionally; otherwise the device must echo
    /// the command buffer first, and only its opcode byte is checked.
    pub async fn send_cmd(
        &mut self,
        cmd: &[u8],
        bytes_to_read: usize,
        no_ack: bool,
    ) -> Result<Vec<u8>> {
        self.port.write_all(cmd).await?;
        if no_ack {
            let mut rsp = vec![0u8; bytes_to_read];
            self.port.read_exact(&mut rsp).await?;
            return Ok(rsp);
        }

        let mut ack = vec![0u8; cmd.len()];
        self.port.read_exact(&mut ack).await?;
        if ack[0] != cmd[0] {
            error!("Cmd error: {}", hex::encode(&ack));
            return Err(ProtocolError::EchoMismatch);
        }

        let mut rsp = vec![0u8; bytes_to_read];
        if bytes_to_read > 0 {
            self.port.read_exact(&mut rsp).await?;
        }
        Ok(rsp)
    }

    pub(crate) async fn read_status(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.port.read_exact(&mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    pub(crate) async fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.port.read_exact(&mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) async fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.port.read_exact(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    pub async fn get_hw_code(&mut self) -> Result<(u16, u16)> {
        let res = self.send_cmd(&[Command::GetHwCode as u8], 4, false).await?;
        let hw_code = u16::from_be_bytes([res[0], res[1]]);
        let hw_ver = u16::from_be_bytes([res[2], res[3]]);
        Ok((hw_code, hw_ver))
    }

    /// Returns (hw subcode, hw version, sw version).
    pub async fn get_hw_sw_ver(&mut self) -> Result<(u16, u16, u16)> {
        let res = self.send_cmd(&[Command::GetHwSwVer as u8], 8, false).await?;
        let hw_sub_code = u16::from_be_bytes([res[0], res[1]]);
        let hw_ver = u16::from_be_bytes([res[2], res[3]]);
        let sw_ver = u16::from_be_bytes([res[4], res[5]]);
        let status = u16::from_be_bytes([res[6], res[7]]);
        if status > 0xFF {
            error!("GetHwSwVer failed: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok((hw_sub_code, hw_ver, sw_ver))
    }

    pub async fn get_plcap(&mut self) -> Result<(u32, u32)> {
        let res = self.send_cmd(&[Command::GetPlCap as u8], 8, false).await?;
        let cap0 = u32::from_be_bytes(res[0..4].try_into().unwrap());
        let cap1 = u32::from_be_bytes(res[4..8].try_into().unwrap());
        Ok((cap0, cap1))
    }

    pub async fn get_bl_ver(&mut self) -> Result<BlVersion> {
        self.port.write_all(&[Command::GetBlVer as u8]).await?;
        let mut res = [0u8; 1];
        self.port.read_exact(&mut res).await?;
        if res[0] == Command::GetBlVer as u8 {
            info!("BROM mode detected.");
            return Ok(BlVersion::Brom);
        }
        Ok(BlVersion::Preloader(res[0]))
    }

    /// Reads the ME ID. Only the BootROM answers this; a preloader link
    /// yields an empty ID.
    pub async fn get_meid(&mut self) -> Result<Vec<u8>> {
        self.read_identity(Command::GetMeId).await
    }

    /// Reads the SoC ID, BootROM only, like [`Connection::get_meid`].
    pub async fn get_socid(&mut self) -> Result<Vec<u8>> {
        self.read_identity(Command::GetSocId).await
    }

    async fn read_identity(&mut self, cmd: Command) -> Result<Vec<u8>> {
        if self.get_bl_ver().await? != BlVersion::Brom {
            return Ok(Vec::new());
        }
        self.port.write_all(&[cmd as u8]).await?;
        let mut op = [0u8; 1];
        self.port.read_exact(&mut op).await?;
        if op[0] != cmd as u8 {
            error!("Identity cmd {:02X} not acknowledged", cmd as u8);
            return Err(ProtocolError::EchoMismatch);
        }
        let length = self.read_u32_be().await? as usize;
        let mut id = vec![0u8; length];
        self.port.read_exact(&mut id).await?;
        let status = self.read_status().await?;
        if status != 0 {
            error!("Identity cmd {:02X} failed: {}", cmd as u8, status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok(id)
    }

    pub async fn get_target_config(&mut self) -> Result<TargetConfig> {
        self.echo_or_desync(&[Command::GetTargetConfig as u8]).await?;
        let raw = self.read_u32_be().await?;
        let status = self.read_status().await?;
        if status > 0xFF {
            error!("GetTargetConfig failed: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        let cfg = TargetConfig::from_raw(raw);
        info!("Target config:\t\t{:#x}", raw);
        info!("\tSBC enabled:\t\t{}", cfg.sbc);
        info!("\tSLA enabled:\t\t{}", cfg.sla);
        info!("\tDAA enabled:\t\t{}", cfg.daa);
        info!("\tRoot cert required:\t{}", cfg.root_cert);
        Ok(cfg)
    }

    /// Cache-control sequence used before poking the crypto engines.
    pub async fn run_ext_cmd(&mut self, cmd: u8) -> Result<()> {
        self.port.write_all(&[Command::CmdC8 as u8]).await?;
        let mut r = [0u8; 1];
        self.port.read_exact(&mut r).await?;
        if r[0] != Command::CmdC8 as u8 {
            error!("CMD_C8 not acknowledged: {:02X}", r[0]);
            return Err(ProtocolError::EchoMismatch);
        }
        self.port.write_all(&[cmd]).await?;
        self.port.read_exact(&mut r).await?;
        if r[0] != cmd {
            error!("Ext cmd {:02X} not acknowledged: {:02X}", cmd, r[0]);
            return Err(ProtocolError::EchoMismatch);
        }
        self.port.read_exact(&mut r).await?;
        let mut tail = [0u8; 2];
        self.port.read_exact(&mut tail).await?;
        Ok(())
    }

    pub async fn uart1_log_enable(&mut self) -> Result<()> {
        self.echo_or_desync(&[Command::Uart1LogEn as u8]).await?;
        let status = self.read_status().await?;
        if status != 0 {
            error!("Uart1 log enable error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok(())
    }

    pub async fn uart1_set_baud(&mut self, baudrate: u32) -> Result<()> {
        self.echo_or_desync(&[Command::Uart1SetBaudrate as u8]).await?;
        self.port.write_all(&baudrate.to_be_bytes()).await?;
        let status = self.read_status().await?;
        if status != 0 {
            error!("Uart1 set baudrate error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok(())
    }

    pub async fn get_brom_log_new(&mut self) -> Result<Vec<u8>> {
        self.echo_or_desync(&[Command::GetBromLogNew as u8]).await?;
        let length = self.read_u32_le().await? as usize;
        let mut log_data = vec![0u8; length];
        self.port.read_exact(&mut log_data).await?;
        let status = self.read_status().await?;
        if status != 0 {
            error!("Brom log status error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok(log_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::backend::MockPort;

    fn mock_connection() -> (Connection, MockPort) {
        let port = MockPort::new();
        let handle = port.handle();
        (Connection::new(Box::new(port)), handle)
    }

    #[tokio::test]
    async fn handshake_completes_against_complementing_stub() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0x5F, 0xF5, 0xAF, 0xFA]);

        conn.handshake(Some(1)).await.unwrap();

        assert!(conn.connected);
        assert_eq!(
            handle.writes(),
            vec![vec![0xA0], vec![0x0A], vec![0x50], vec![0x05]]
        );
    }

    #[tokio::test]
    async fn handshake_ready_preamble_is_consumed_without_reset() {
        let (mut conn, handle) = mock_connection();
        handle.queue(b"READY");
        handle.queue(&[0x5F, 0xF5, 0xAF, 0xFA]);

        conn.handshake(Some(1)).await.unwrap();

        assert!(conn.connected);
        assert_eq!(handle.breaks(), 0);
        // The first probe byte is sent twice: once answered by READY, once
        // by its complement.
        assert_eq!(
            handle.writes(),
            vec![vec![0xA0], vec![0xA0], vec![0x0A], vec![0x50], vec![0x05]]
        );
    }

    #[tokio::test]
    async fn handshake_mismatch_resets_probe_and_reconfigures_line() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0x00]); // garbage instead of the complement
        handle.queue(&[0x5F, 0xF5, 0xAF, 0xFA]);

        conn.handshake(Some(1)).await.unwrap();

        assert!(conn.connected);
        assert_eq!(handle.breaks(), 1);
        assert_eq!(handle.line_codings(), vec![115_200]);
        assert_eq!(handle.opens(), 1);
    }

    #[tokio::test]
    async fn handshake_gives_up_after_attempt_cap() {
        let (mut conn, _handle) = mock_connection();
        // Empty rx queue: every probe read times out until the try budget
        // of the single attempt is gone.
        let err = conn.handshake(Some(1)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Sync));
        assert!(!conn.connected);
    }

    #[tokio::test]
    async fn echo_detects_mismatch() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xD1]);
        assert!(conn.echo(&[0xD1]).await.unwrap());

        handle.queue(&[0xD2]);
        assert!(!conn.echo(&[0xD1]).await.unwrap());
    }

    #[tokio::test]
    async fn echo_chunks_stops_at_first_mismatch() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xAA]);
        handle.queue(&[0x00]); // second chunk comes back wrong

        let ok = conn
            .echo_chunks(&[&[0xAA], &[0xBB], &[0xCC]])
            .await
            .unwrap();

        assert!(!ok);
        // The third chunk was never sent.
        assert_eq!(handle.writes().len(), 2);
    }

    #[tokio::test]
    async fn send_cmd_rejects_wrong_opcode_ack() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0x00]);
        let err = conn.send_cmd(&[0xFD], 4, false).await.unwrap_err();
        assert!(matches!(err, ProtocolError::EchoMismatch));
    }

    #[tokio::test]
    async fn send_cmd_no_ack_returns_raw_bytes() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[1, 2, 3]);
        let rsp = conn.send_cmd(&[0xFD], 3, true).await.unwrap();
        assert_eq!(rsp, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn target_config_decodes_flag_set() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xD8]); // opcode echo
        handle.queue(&0x00000017u32.to_be_bytes());
        handle.queue_u16_le(0x0000);

        let cfg = conn.get_target_config().await.unwrap();
        assert!(cfg.sbc && cfg.sla && cfg.daa && cfg.root_cert);
        assert!(!cfg.epp);
        assert!(cfg.swjtag); // 0x6 mask overlaps sla/daa
    }

    #[tokio::test]
    async fn meid_read_requires_brom_and_checks_status() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0xFE]); // GET_BL_VER echoed -> BROM
        handle.queue(&[0xE1]); // GET_ME_ID acknowledged
        handle.queue(&4u32.to_be_bytes());
        handle.queue(&[0xDE, 0xAD, 0xBE, 0xEF]);
        handle.queue_u16_le(0x0000);

        let meid = conn.get_meid().await.unwrap();
        assert_eq!(meid, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[tokio::test]
    async fn meid_read_outside_brom_is_empty() {
        let (mut conn, handle) = mock_connection();
        handle.queue(&[0x01]); // preloader version byte
        let meid = conn.get_meid().await.unwrap();
        assert!(meid.is_empty());
        assert_eq!(handle.writes().len(), 1); // only the GET_BL_VER probe
    }
}
