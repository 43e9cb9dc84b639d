/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::connection::Connection;
use crate::connection::command::Command;
use crate::error::{ProtocolError, Result, status_str};
use log::{debug, error, info};

const UPLOAD_CHUNK: usize = 64;
const PARTITION_CHUNK: usize = 0x200;
const PARTITION_NAME_LEN: usize = 64;

/// Truncates `data` to `max_size`, appends `sig`, pads the result to an
/// even length and computes the 16-bit XOR checksum over its LE words.
pub fn prepare_data(data: &[u8], sig: &[u8], max_size: usize) -> (u16, Vec<u8>) {
    let mut out = data[..data.len().min(max_size)].to_vec();
    out.extend_from_slice(sig);
    if out.len() % 2 != 0 {
        out.push(0);
    }
    let mut checksum = 0u16;
    for pair in out.chunks_exact(2) {
        checksum ^= u16::from_le_bytes([pair[0], pair[1]]);
    }
    (checksum, out)
}

/// 32-bit additive checksum over LE words, trailing bytes summed
/// individually. Used by the preloader-as-DA partition upload only; not
/// interchangeable with the XOR checksum above.
pub fn calc_xflash_checksum(data: &[u8]) -> u32 {
    let mut checksum = 0u32;
    let words = data.len() / 4;
    for chunk in data[..words * 4].chunks_exact(4) {
        checksum = checksum.wrapping_add(u32::from_le_bytes(chunk.try_into().unwrap()));
    }
    for byte in &data[words * 4..] {
        checksum = checksum.wrapping_add(*byte as u32);
    }
    checksum
}

fn partition_name_bytes(name: &str) -> [u8; PARTITION_NAME_LEN] {
    let mut out = [0u8; PARTITION_NAME_LEN];
    let raw = name.as_bytes();
    let len = raw.len().min(PARTITION_NAME_LEN);
    out[..len].copy_from_slice(&raw[..len]);
    out
}

impl Connection {
    /// Streams `data` in 64-byte chunks without per-chunk acknowledgment,
    /// then verifies the device-computed checksum and final status.
    pub async fn upload_data(&mut self, data: &[u8], checksum: u16) -> Result<()> {
        for chunk in data.chunks(UPLOAD_CHUNK) {
            self.port.write_all(chunk).await?;
        }

        let echoed_checksum = self.read_status().await?;
        let status = self.read_status().await?;
        if echoed_checksum != checksum && echoed_checksum != 0 {
            error!(
                "Checksum of upload doesn't match: {:#06X} != {:#06X}",
                echoed_checksum, checksum
            );
            return Err(ProtocolError::ChecksumMismatch);
        }
        if status > 0xFF {
            error!("Upload status error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok(())
    }

    /// Uploads a Download Agent image. `blob` carries `size` bytes of code
    /// followed by a `sig_len`-byte signature.
    pub async fn send_da(
        &mut self,
        address: u32,
        size: usize,
        sig_len: usize,
        blob: &[u8],
    ) -> Result<()> {
        let body = &blob[..blob.len() - sig_len];
        let sig = &blob[blob.len() - sig_len..];
        let (checksum, data) = prepare_data(body, sig, size);

        debug!("Sending DA to {:#010X}, {} bytes", address, data.len());
        self.echo_or_desync(&[Command::SendDa as u8]).await?;
        self.echo_u32_or_desync(address).await?;
        self.echo_u32_or_desync(data.len() as u32).await?;
        self.echo_u32_or_desync(sig_len as u32).await?;

        let status = self.read_status().await?;
        if status > 0xFF {
            error!("SendDa status error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }

        self.upload_data(&data, checksum).await
    }

    pub async fn send_root_cert(&mut self, cert: &[u8]) -> Result<()> {
        self.checked_upload(Command::SendCert, cert).await
    }

    pub async fn send_auth(&mut self, auth: &[u8]) -> Result<()> {
        self.checked_upload(Command::SendAuth, auth).await
    }

    async fn checked_upload(&mut self, cmd: Command, payload: &[u8]) -> Result<()> {
        let (checksum, data) = prepare_data(payload, &[], payload.len());
        self.echo_or_desync(&[cmd as u8]).await?;
        self.echo_u32_or_desync(data.len() as u32).await?;
        let status = self.read_status().await?;
        if status > 0xFF {
            error!("Upload cmd {:02X} error: {}", cmd as u8, status_str(status));
            return Err(ProtocolError::status(status));
        }
        self.upload_data(&data, checksum).await
    }

    /// Preloader-as-DA raw partition write, closed with the additive
    /// checksum instead of a status word.
    pub async fn send_partition_data(&mut self, partition: &str, data: &[u8]) -> Result<()> {
        let checksum = calc_xflash_checksum(data);
        let name = partition_name_bytes(partition);

        self.echo_or_desync(&[Command::SendPartitionData as u8])
            .await?;
        self.port.write_all(&name).await?;
        self.port.write_all(&(data.len() as u32).to_be_bytes()).await?;
        let status = self.read_status().await?;
        if status > 0xFF {
            error!("SendPartitionData status error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }

        info!("Writing partition {} ({} bytes)", partition, data.len());
        for chunk in data.chunks(PARTITION_CHUNK) {
            self.port.write_all(chunk).await?;
        }
        self.port.write_all(&checksum.to_be_bytes()).await?;
        Ok(())
    }

    pub async fn jump_to_partition(&mut self, partition: &str) -> Result<()> {
        let name = partition_name_bytes(partition);
        self.echo_or_desync(&[Command::JumpToPartition as u8])
            .await?;
        self.port.write_all(&name).await?;
        let status = self.read_status().await?;
        if status > 0xFF {
            error!("JumpToPartition status error: {}", status_str(status));
            return Err(ProtocolError::status(status));
        }
        Ok(())
    }
}
