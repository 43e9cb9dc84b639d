/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Driver for the DXCC AES/CMAC DMA engine.
//!
//! The engine is only reachable through the memory read/write primitives of
//! the boot protocol: descriptors are written into a six-word submission
//! window and the engine starts executing the moment the last word lands.
//! All offsets, descriptor words and the scratch layout below the DA
//! payload address are opaque platform constants taken from the silicon;
//! renumbering any of them bricks the call.

use crate::core::crypto::config::CryptoSetup;
use crate::error::{ProtocolError, Result};
use log::{debug, error};

pub const RPMB_IKEY: &[u8] = b"RPMB KEY";
pub const RPMB_SALT: &[u8] = b"SASI";
pub const FDE_IKEY: &[u8] = b"SQNC!LFZ";
pub const FDE_SALT: &[u8] = b"TBTJ";
const TRUSTONIC_LABEL: &[u8] = b"TrustedCorekeymaster";

const ERR_ENC_MODE: u32 = 0xF2000002;
const ERR_REQUESTED_LEN: u32 = 0xF2000003;
const ERR_KEY_LEN: u32 = 0xF2000004;
const ERR_ENGINE_FAULT: u32 = 0xF6000001;

/// One descriptor-queue entry: six 32-bit words describing a DMA+crypto
/// micro-operation.
pub type Descriptor = [u32; 6];

/// Register map of the engine, offsets from the chip's DXCC base.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DxccReg {
    HostIrr = 0xA00,
    HostIcr = 0xA08,
    HostSepHostGpr4 = 0xAA0,
    /// Completion counter; reads 1 once a submitted sequence finished.
    DescCompletion = 0xBA0,
    Queue0Word0 = 0xE80,
    Queue0Word1 = 0xE84,
    Queue0Word2 = 0xE88,
    Queue0Word3 = 0xE8C,
    Queue0Word4 = 0xE90,
    Queue0Word5 = 0xE94,
    Queue0Content = 0xE9C,
}

const QUEUE0_WORDS: [DxccReg; 6] = [
    DxccReg::Queue0Word0,
    DxccReg::Queue0Word1,
    DxccReg::Queue0Word2,
    DxccReg::Queue0Word3,
    DxccReg::Queue0Word4,
    DxccReg::Queue0Word5,
];

pub struct DxccEngine<'a, 'b> {
    setup: &'b mut CryptoSetup<'a>,
}

impl<'a, 'b> DxccEngine<'a, 'b> {
    pub fn new(setup: &'b mut CryptoSetup<'a>) -> Self {
        Self { setup }
    }

    fn reg_addr(&self, reg: DxccReg) -> u32 {
        self.setup.dxcc_base + reg as u32
    }

    async fn read_reg(&mut self, reg: DxccReg) -> Result<u32> {
        let addr = self.reg_addr(reg);
        let words = self.setup.io.read32(addr, 1).await?;
        Ok(words[0])
    }

    async fn write_reg(&mut self, reg: DxccReg, value: u32) -> Result<()> {
        let addr = self.reg_addr(reg);
        self.setup.io.write32(addr, &[value]).await
    }

    async fn clear_interrupt(&mut self) -> Result<()> {
        self.write_reg(DxccReg::HostIcr, 4).await
    }

    /// Polls the interrupt register until it reads non-zero. Unbounded: a
    /// silent engine is an unrecoverable hardware fault, and any watchdog
    /// belongs to the caller.
    async fn crypto_wait(&mut self) -> Result<u32> {
        loop {
            let value = self.read_reg(DxccReg::HostIrr).await?;
            if value != 0 {
                return Ok(value);
            }
        }
    }

    // The map/unmap pair does nothing on this platform but is part of the
    // fixed submission sequence.
    fn pal_dma_map(&self, value: u32) -> u32 {
        value
    }

    fn pal_dma_unmap(&self, _value: u32) {}

    /// Waits for a free submission slot, then lands the six words in strict
    /// order. The engine starts on the last word.
    pub async fn submit_descriptor(&mut self, desc: Descriptor) -> Result<()> {
        loop {
            let content = self.read_reg(DxccReg::Queue0Content).await?;
            if content << 0x1C != 0 {
                break;
            }
        }
        for (reg, word) in QUEUE0_WORDS.iter().zip(desc) {
            self.write_reg(*reg, word).await?;
        }
        Ok(())
    }

    /// Reads back the 0x100-byte result blob at `destptr` and waits for the
    /// completion register; any value other than 1 is a fatal engine fault.
    pub async fn wait_completion(&mut self, destptr: u32) -> Result<()> {
        self.clear_interrupt().await?;
        let mapped = self.pal_dma_map(0);

        let desc: Descriptor = [
            0x0,
            0x8000011, // DIN_DMA | DOUT_DMA | DIN_CONST
            destptr,
            0x8000012,
            0x100,
            hi_word(destptr),
        ];
        self.submit_descriptor(desc).await?;

        while self.crypto_wait().await? & 4 == 0 {}

        let value = loop {
            let value = self.read_reg(DxccReg::DescCompletion).await?;
            if value != 0 {
                break value;
            }
        };
        if value != 1 {
            error!("Crypto engine completion fault: {:#x}", value);
            return Err(ProtocolError::HardwareFault(ERR_ENGINE_FAULT));
        }
        self.clear_interrupt().await?;
        self.pal_dma_unmap(mapped);
        Ok(())
    }

    /// Issues the CMAC descriptor chain. Mode 0 loads externally supplied
    /// key material through the salt pointer; non-zero modes select fused
    /// hardware keys.
    pub async fn aes_cmac_driver(
        &mut self,
        enc_mode: u32,
        salt_ptr: u32,
        data_ptr: u32,
        dest_ptr: u32,
        buffer_len: u32,
    ) -> Result<()> {
        let key_len: u32 = if enc_mode == 1 {
            if self.read_reg(DxccReg::HostSepHostGpr4).await? & 2 != 0 {
                0x20
            } else {
                0x10
            }
        } else {
            0x10
        };

        self.clear_interrupt().await?;
        let output_len = (key_len << 19).wrapping_sub(0x800000);

        self.submit_descriptor([0, 0x8000041, 0, 0, output_len | 0x1001C20, 0])
            .await?;

        let mut desc: Descriptor = [0; 6];
        if enc_mode == 0 {
            desc[0] = salt_ptr;
            desc[1] = 0x42;
            desc[5] = hi_word(salt_ptr);
        }
        desc[4] =
            output_len | ((enc_mode & 3) << 15) | (((enc_mode >> 2) & 3) << 20) | 0x4001C20;
        self.submit_descriptor(desc).await?;

        self.submit_descriptor([
            data_ptr,
            (4 * (buffer_len & 0xFFFFFF)) | 2,
            0,
            0,
            1,
            0,
        ])
        .await?;

        if enc_mode != 2 {
            self.submit_descriptor([0, 0, salt_ptr, 0x42, 0x8001C26, 0])
                .await?;
        }

        self.wait_completion(dest_ptr).await
    }

    /// Stages `buffer` and `salt` into the scratch area below `dest_addr`
    /// (the layout mirrors the boot ROM's own stack frame), runs the CMAC
    /// chain and returns the destination scratch address.
    pub async fn aes_cmac(
        &mut self,
        enc_mode: u32,
        salt: u64,
        buffer: &[u8],
        buffer_len: usize,
        dest_addr: u32,
    ) -> Result<u32> {
        let data_ptr = dest_addr + 0x118;
        let salt_ptr = data_ptr - 0x10;
        let dest_ptr = salt_ptr - 0x108;

        self.setup.io.writemem(data_ptr, &buffer[..buffer_len]).await?;
        self.setup.io.writemem(salt_ptr, &salt.to_le_bytes()).await?;
        self.aes_cmac_driver(enc_mode, salt_ptr, data_ptr, dest_ptr, buffer_len as u32)
            .await?;
        Ok(dest_ptr)
    }

    /// Counter-mode CMAC key derivation.
    ///
    /// `enc_mode` must be 1..=5 with its bit set in the 0x17 mask,
    /// `requested_len` must fit the packed bit-length field (<= 0xFF and a
    /// multiple of 16), and the key must be 1..=32 bytes. Violations return
    /// a distinct status without touching the hardware.
    pub async fn key_derivation(
        &mut self,
        enc_mode: u32,
        key: &[u8],
        salt: &[u8],
        requested_len: usize,
        dest_addr: u32,
    ) -> Result<Vec<u8>> {
        if enc_mode.wrapping_sub(1) > 4 || (1u32 << (enc_mode - 1)) & 0x17 == 0 {
            return Err(ProtocolError::Validation {
                code: ERR_ENC_MODE,
                reason: "unsupported key derivation mode",
            });
        }
        if requested_len > 0xFF || ((requested_len as u32) << 28) != 0 {
            return Err(ProtocolError::Validation {
                code: ERR_REQUESTED_LEN,
                reason: "requested length overflows the bit-length field",
            });
        }
        if key.is_empty() || key.len() > 0x20 {
            return Err(ProtocolError::Validation {
                code: ERR_KEY_LEN,
                reason: "key length out of range",
            });
        }
        self.derive(enc_mode, key, salt, requested_len, dest_addr).await
    }

    /// The derivation loop proper. The fused-key presets reach this
    /// directly: the trusted-keymaster construction predates the key-length
    /// check and derives with an empty key.
    async fn derive(
        &mut self,
        enc_mode: u32,
        key: &[u8],
        salt: &[u8],
        requested_len: usize,
        dest_addr: u32,
    ) -> Result<Vec<u8>> {
        // Scratch layout: counter byte, key, zero separator, salt, then the
        // LE bit-length of the requested output.
        let key_end = if key.is_empty() { 1 } else { key.len() + 1 };
        let salt_start = key_end + 1;
        let mut buffer = vec![0u8; 0x43usize.max(salt_start + salt.len() + 4)];
        buffer[1..1 + key.len()].copy_from_slice(key);
        buffer[salt_start..salt_start + salt.len()].copy_from_slice(salt);
        buffer[salt_start + salt.len()..salt_start + salt.len() + 4]
            .copy_from_slice(&((8 * requested_len) as u32).to_le_bytes());

        let buffer_len = salt.len() + 3 + key.len();
        let iterations = (requested_len + 0xF) >> 4;
        debug!(
            "Key derivation: mode {}, {} iterations, {} byte output",
            enc_mode, iterations, requested_len
        );

        let mut result = Vec::with_capacity(iterations * 16);
        for i in 0..iterations {
            buffer[0] = (i + 1) as u8;
            let dst_addr = self
                .aes_cmac(enc_mode, 0, &buffer, buffer_len, dest_addr)
                .await?;
            for word in self.setup.io.read32(dst_addr + 0x108, 4).await? {
                result.extend_from_slice(&word.to_le_bytes());
            }
        }
        Ok(result)
    }

    /// Gates the crypto clock around a derivation. Magic writes into the
    /// platform clock block; required before the engine accepts work.
    async fn tzcc_clk(&mut self, enable: bool) -> Result<()> {
        if enable {
            self.setup.io.write32(0x1000108C, &[0x18000000]).await
        } else {
            self.setup.io.write32(0x10001088, &[0x8000000]).await
        }
    }

    fn scratch_addr(&self) -> u32 {
        self.setup.da_payload_addr - 0x300
    }

    /// Device-unique RPMB key (32 bytes).
    pub async fn generate_rpmb(&mut self) -> Result<Vec<u8>> {
        self.tzcc_clk(true).await?;
        let dst_addr = self.scratch_addr();
        let key = self
            .key_derivation(1, RPMB_IKEY, RPMB_SALT, 0x20, dst_addr)
            .await;
        self.tzcc_clk(false).await?;
        key
    }

    /// Device-unique FDE key (16 bytes).
    pub async fn generate_fde(&mut self) -> Result<Vec<u8>> {
        self.tzcc_clk(true).await?;
        let dst_addr = self.scratch_addr();
        let key = self
            .key_derivation(1, FDE_IKEY, FDE_SALT, 0x10, dst_addr)
            .await;
        self.tzcc_clk(false).await?;
        key
    }

    /// Trusted-keymaster FDE key: 16-byte blocks derived from a fixed label
    /// with an incrementing counter byte, no input key.
    pub async fn generate_trustonic_fde(&mut self, key_size: usize) -> Result<Vec<u8>> {
        let dst_addr = self.scratch_addr();
        let mut fde_key = Vec::with_capacity(key_size);
        for ctr in 0..key_size / 16 {
            self.tzcc_clk(true).await?;
            let mut seed = TRUSTONIC_LABEL.to_vec();
            seed.extend_from_slice(&[0x07; 0x10]);
            seed.push(ctr as u8);
            let block = self.derive(1, &[], &seed, 0x10, dst_addr).await;
            self.tzcc_clk(false).await?;
            fde_key.extend_from_slice(&block?);
        }
        Ok(fde_key)
    }
}

fn hi_word(ptr: u32) -> u32 {
    ((ptr as u64 >> 32) << 16) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::config::{CryptoIO, CryptoSetup};
    use std::collections::HashMap;

    const DXCC_BASE: u32 = 0x10210000;
    const DA_PAYLOAD: u32 = 0x201000;

    /// Register-level model of a healthy engine: always a free queue slot,
    /// interrupt pending, completion 1. Poll loops finish instantly.
    struct EngineStub {
        mem: HashMap<u32, u32>,
        writes: Vec<(u32, u32)>,
        io_calls: usize,
        gpr4: u32,
        completion: u32,
        result_words: [u32; 4],
    }

    impl EngineStub {
        fn new() -> Self {
            Self {
                mem: HashMap::new(),
                writes: Vec::new(),
                io_calls: 0,
                gpr4: 0,
                completion: 1,
                result_words: [0x11111111, 0x22222222, 0x33333333, 0x44444444],
            }
        }

        fn descriptor_count(&self) -> usize {
            self.writes
                .iter()
                .filter(|(addr, _)| *addr == DXCC_BASE + DxccReg::Queue0Word0 as u32)
                .count()
        }

        fn word4_values(&self) -> Vec<u32> {
            self.writes
                .iter()
                .filter(|(addr, _)| *addr == DXCC_BASE + DxccReg::Queue0Word4 as u32)
                .map(|(_, v)| *v)
                .collect()
        }
    }

    #[async_trait::async_trait(?Send)]
    impl CryptoIO for EngineStub {
        async fn read32(&mut self, addr: u32, dwords: usize) -> Result<Vec<u32>> {
            self.io_calls += 1;
            let mut out = Vec::with_capacity(dwords);
            for i in 0..dwords {
                let a = addr + (i as u32) * 4;
                let value = match a.checked_sub(DXCC_BASE) {
                    Some(0xE9C) => 1,
                    Some(0xA00) => 4,
                    Some(0xBA0) => self.completion,
                    Some(0xAA0) => self.gpr4,
                    _ => {
                        let idx = (i % 4) as usize;
                        *self.mem.get(&a).unwrap_or(&self.result_words[idx])
                    }
                };
                out.push(value);
            }
            Ok(out)
        }

        async fn write32(&mut self, addr: u32, words: &[u32]) -> Result<()> {
            self.io_calls += 1;
            for (i, word) in words.iter().enumerate() {
                let a = addr + (i as u32) * 4;
                self.mem.insert(a, *word);
                self.writes.push((a, *word));
            }
            Ok(())
        }

        async fn writemem(&mut self, addr: u32, data: &[u8]) -> Result<()> {
            for (i, chunk) in data.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.write32(addr + (i as u32) * 4, &[u32::from_le_bytes(word)])
                    .await?;
            }
            Ok(())
        }

        async fn refresh_cache(&mut self, _cmd: u8) -> Result<()> {
            Ok(())
        }
    }

    fn validation_code(err: ProtocolError) -> u32 {
        match err {
            ProtocolError::Validation { code, .. } => code,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn key_derivation_rejects_bad_mode_without_io() {
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);

        for mode in [0u32, 4, 6, 0xFF] {
            let err = dxcc
                .key_derivation(mode, b"RPMB KEY", b"SASI", 0x20, DA_PAYLOAD - 0x300)
                .await
                .unwrap_err();
            assert_eq!(validation_code(err), 0xF2000002, "mode {mode}");
        }
        assert_eq!(stub.io_calls, 0);
    }

    #[tokio::test]
    async fn key_derivation_rejects_bad_length_without_io() {
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);

        for len in [0x100usize, 0x18, 0x1F] {
            let err = dxcc
                .key_derivation(1, b"RPMB KEY", b"SASI", len, DA_PAYLOAD - 0x300)
                .await
                .unwrap_err();
            assert_eq!(validation_code(err), 0xF2000003, "len {len:#x}");
        }
        assert_eq!(stub.io_calls, 0);
    }

    #[tokio::test]
    async fn key_derivation_rejects_bad_key_without_io() {
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);

        let err = dxcc
            .key_derivation(1, &[], b"SASI", 0x10, DA_PAYLOAD - 0x300)
            .await
            .unwrap_err();
        assert_eq!(validation_code(err), 0xF2000004);

        let err = dxcc
            .key_derivation(1, &[0xAA; 0x21], b"SASI", 0x10, DA_PAYLOAD - 0x300)
            .await
            .unwrap_err();
        assert_eq!(validation_code(err), 0xF2000004);
        assert_eq!(stub.io_calls, 0);
    }

    #[tokio::test]
    async fn rpmb_derivation_runs_two_cmac_iterations() {
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);

        let key = dxcc.generate_rpmb().await.unwrap();
        assert_eq!(key.len(), 0x20);

        // 5 descriptors per CMAC call (4 chain + 1 completion readback),
        // two iterations for a 32-byte output.
        assert_eq!(stub.descriptor_count(), 10);
        // Clock gating around the whole derivation.
        assert!(stub.writes.contains(&(0x1000108C, 0x18000000)));
        assert!(stub.writes.contains(&(0x10001088, 0x8000000)));
    }

    #[tokio::test]
    async fn fde_derivation_is_single_iteration() {
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);

        let key = dxcc.generate_fde().await.unwrap();
        assert_eq!(key.len(), 0x10);
        assert_eq!(stub.descriptor_count(), 5);
    }

    #[tokio::test]
    async fn trustonic_fde_concatenates_counter_blocks() {
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);

        let key = dxcc.generate_trustonic_fde(32).await.unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(stub.descriptor_count(), 10);
    }

    #[tokio::test]
    async fn gpr4_status_bit_selects_key_length() {
        // Bit 2 clear: 16-byte key, output length field 0.
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);
        dxcc.generate_fde().await.unwrap();
        assert_eq!(stub.word4_values()[0], 0x1001C20);

        // Bit 2 set: 32-byte key.
        let mut stub = EngineStub::new();
        stub.gpr4 = 2;
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);
        dxcc.generate_fde().await.unwrap();
        assert_eq!(stub.word4_values()[0], 0x800000 | 0x1001C20);
    }

    #[tokio::test]
    async fn unexpected_completion_value_is_a_hardware_fault() {
        let mut stub = EngineStub::new();
        stub.completion = 2;
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);

        let err = dxcc.generate_rpmb().await.unwrap_err();
        assert!(matches!(err, ProtocolError::HardwareFault(0xF6000001)));
    }

    #[tokio::test]
    async fn derivation_buffer_lands_in_scratch_memory() {
        let mut stub = EngineStub::new();
        let mut setup = CryptoSetup::new(0x0766, DXCC_BASE, DA_PAYLOAD, &mut stub);
        let mut dxcc = DxccEngine::new(&mut setup);
        dxcc.generate_fde().await.unwrap();

        // Counter byte + key start at data_ptr: 01 'S' 'Q' 'N'.
        let data_ptr = (DA_PAYLOAD - 0x300) + 0x118;
        assert_eq!(stub.mem[&data_ptr], u32::from_le_bytes([0x01, b'S', b'Q', b'N']));
    }
}
