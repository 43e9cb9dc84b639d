/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod config;
pub mod dxcc;

use crate::core::crypto::config::{CryptoIO, CryptoSetup};
use crate::core::crypto::dxcc::DxccEngine;
use crate::error::Result;
use log::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoBackend {
    Sej,
    Gcpu,
    Dxcc,
    Cqdma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    Cbc,
    Ebc,
    Fde,
    Rpmb,
    TrustonicFde,
}

/// Range-blacklist control surface of the sibling DMA engines. The engines
/// themselves live outside this crate; callers plug in an implementation
/// per chip.
#[async_trait::async_trait(?Send)]
pub trait RangeBlacklist {
    async fn init(&mut self, io: &mut dyn CryptoIO) -> Result<()>;
    async fn acquire(&mut self, io: &mut dyn CryptoIO) -> Result<()>;
    async fn disable_range_blacklist(&mut self, io: &mut dyn CryptoIO) -> Result<()>;
}

/// Routes hardware crypto requests to the engine that can serve them.
pub struct HwCrypto<'a> {
    pub setup: CryptoSetup<'a>,
    pub gcpu: Option<Box<dyn RangeBlacklist>>,
    pub cqdma: Option<Box<dyn RangeBlacklist>>,
}

impl<'a> HwCrypto<'a> {
    pub fn new(setup: CryptoSetup<'a>) -> Self {
        Self {
            setup,
            gcpu: None,
            cqdma: None,
        }
    }

    /// Dispatches a (backend, mode) pair. Unknown combinations log an error
    /// and return empty output instead of failing the session.
    pub async fn aes_hwcrypt(
        &mut self,
        _data: &[u8],
        _iv: Option<&[u8]>,
        _encrypt: bool,
        mode: CryptoMode,
        backend: CryptoBackend,
    ) -> Result<Vec<u8>> {
        match backend {
            CryptoBackend::Dxcc => {
                let mut dxcc = DxccEngine::new(&mut self.setup);
                match mode {
                    CryptoMode::Fde => dxcc.generate_fde().await,
                    CryptoMode::Rpmb => dxcc.generate_rpmb().await,
                    CryptoMode::TrustonicFde => dxcc.generate_trustonic_fde(32).await,
                    _ => {
                        error!("Unsupported dxcc mode: {:?}", mode);
                        Ok(Vec::new())
                    }
                }
            }
            _ => {
                error!("Unknown aes_hwcrypt backend: {:?}", backend);
                error!("aes_hwcrypt supported backends are: dxcc");
                Ok(Vec::new())
            }
        }
    }

    /// Lifts the DMA range blacklist so the engines can touch protected
    /// regions. The GCPU handshake is flaky on first contact, hence the
    /// doubled init/acquire sequence.
    pub async fn disable_range_blacklist(&mut self, backend: CryptoBackend) -> Result<()> {
        match backend {
            CryptoBackend::Gcpu => {
                let Some(gcpu) = self.gcpu.as_mut() else {
                    error!("No GCPU engine configured for this chip");
                    return Ok(());
                };
                info!("GCPU Init Crypto Engine");
                gcpu.init(self.setup.io).await?;
                gcpu.acquire(self.setup.io).await?;
                gcpu.init(self.setup.io).await?;
                gcpu.acquire(self.setup.io).await?;
                info!("Disable Caches");
                self.setup.io.refresh_cache(0xB1).await?;
                info!("GCPU Disable Range Blacklist");
                gcpu.disable_range_blacklist(self.setup.io).await
            }
            CryptoBackend::Cqdma => {
                let Some(cqdma) = self.cqdma.as_mut() else {
                    error!("No CQDMA engine configured for this chip");
                    return Ok(());
                };
                info!("Disable Caches");
                self.setup.io.refresh_cache(0xB1).await?;
                info!("CQDMA Disable Range Blacklist");
                cqdma.disable_range_blacklist(self.setup.io).await
            }
            _ => {
                error!("Backend {:?} has no range blacklist", backend);
                Ok(())
            }
        }
    }
}
