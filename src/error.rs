/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no handshake within the attempt budget, device not detected")]
    Sync,

    #[error("echo mismatch, link out of sync")]
    EchoMismatch,

    #[error("device status {code:#06X} ({})", status_str(*.code))]
    Status { code: u16 },

    #[error("upload checksum mismatch")]
    ChecksumMismatch,

    #[error("jump verification failed at {addr:#010X}")]
    JumpFailed { addr: u32 },

    #[error("crypto engine fault {0:#010X}")]
    HardwareFault(u32),

    #[error("{reason} ({code:#010X})")]
    Validation { code: u32, reason: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn status(code: u16) -> Self {
        ProtocolError::Status { code }
    }
}

/// Decodes a BROM/preloader status word. Subset of the vendor status table;
/// everything the BootROM actually returns over VCOM lands in these bands.
pub fn status_str(code: u16) -> &'static str {
    match code {
        0x0000 => "S_DONE",
        0x1001 => "S_UNKNOWN_TARGET_BBCHIP",
        0x1002 => "S_UNSUPPORTED_VER_OF_BOOT_ROM",
        0x1003 => "S_UNSUPPORTED_VER_OF_BLOADER",
        0x1004 => "S_UNSUPPORTED_VER_OF_DA",
        0x1D05 => "S_BROM_CHKSUM16_MEM_RESULT_DIFF",
        0x2004 => "S_BROM_DOWNLOAD_DA_FAIL",
        0x2005 => "S_BROM_CMD_STARTCMD_TIMEOUT",
        0x2006 => "S_BROM_CMD_SEND_DA_TIMEOUT",
        0x2007 => "S_BROM_CMD_JUMP_DA_FAIL",
        0x3001 => "S_DA_EXT_RAM_ERROR",
        0x7001 => "S_SECURITY_SECURE_BOOT_ENABLED",
        0x7002 => "S_SECURITY_SLA_FAIL",
        0x7004 => "S_SECURITY_DAA_FAIL",
        0x7017 => "S_SECURITY_SEND_AUTH_MISSING",
        0x7024 => "S_SECURITY_SEND_CERT_MISSING",
        _ => "unknown status",
    }
}
