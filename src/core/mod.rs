/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod chipconfig;
pub mod crypto;
pub mod device;
pub mod stage2;
