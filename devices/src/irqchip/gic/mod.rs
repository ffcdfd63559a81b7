// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Userspace GICv2/GICv3 emulation.
//!
//! This module emulates the guest-visible register interface of an ARM Generic Interrupt
//! Controller and routes interrupts raised by the host to the VCPUs that the guest targeted:
//! - Distributor (GICD) - global enable state and interrupt targeting, plus SGI dispatch
//! - Redistributor (GICR) - per-CPU identity frames, GICv3 only
//!
//! The host GIC generation decides which of the two targeting schemes the guest sees. GICv2
//! guests target shared interrupts with per-interrupt CPU masks (ITARGETSR); GICv3 guests may
//! switch the distributor to affinity routing (GICD_CTLR.ARE_NS) and route each shared interrupt
//! to one VCPU or to all of them (GICD_IROUTER).
//!
//! Pending, active, priority and group state are not modeled. The corresponding registers read as
//! zero and ignore writes.

mod distributor;
mod layout;
mod redistributor;
mod registers;
mod vcpu;

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

pub use self::distributor::GicDistributor;
pub use self::layout::GicDriverConfig;
pub use self::layout::GicLayout;
pub use self::layout::GicMemoryMap;
pub use self::layout::Gicv2DriverConfig;
pub use self::layout::Gicv3DriverConfig;
pub use self::redistributor::GicRedistributor;
pub use self::registers::gicd_access_width;
pub use self::registers::gicr_access_width;
pub use self::registers::GicdRegister;
pub use self::registers::GicrRegister;
pub use self::registers::SgiTarget;
pub use self::registers::SoftwareGeneratedInterrupt;
pub use self::registers::GICD_CTLR_ARE_NS;
pub use self::registers::GICD_IROUTER_IRM;
pub use self::vcpu::GicVersionQuery;
pub use self::vcpu::InterruptControllerType;
pub use self::vcpu::Vcpu;
use crate::bus;

/// Number of interrupt IDs the distributor models.
pub const NUM_INTERRUPTS: usize = 256;

/// Number of SGIs and PPIs. These IDs are private to each CPU and never routed globally.
pub const NUM_SGIS_AND_PPIS: usize = 32;

/// Number of shared peripheral interrupts, starting at `NUM_SGIS_AND_PPIS`.
pub const NUM_SPIS: usize = NUM_INTERRUPTS - NUM_SGIS_AND_PPIS;

/// Maximum number of VCPUs. Legacy CPU target masks are one byte wide.
pub const MAX_VCPUS: usize = 8;

/// Architecture revision of the emulated GIC. Fixed once the distributor is created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum GicVersion {
    V2,
    V3,
}

impl GicVersion {
    /// The value of the ArchRev field of GICD_PIDR2 / GICR_PIDR2.
    pub fn arch_revision(self) -> u32 {
        match self {
            GicVersion::V2 => 2,
            GicVersion::V3 => 3,
        }
    }
}

#[sorted]
#[derive(ThisError, Debug, Copy, Clone, Eq, PartialEq)]
pub enum InvalidArgument {
    #[error("interrupt {0} cannot be delivered")]
    Interrupt(u32),
    #[error("register at offset {0:#x} is read-only")]
    ReadOnlyRegister(u64),
}

#[sorted]
#[derive(ThisError, Debug, Copy, Clone, Eq, PartialEq)]
pub enum NotSupported {
    #[error("interrupt controller type {0:?}")]
    ControllerType(InterruptControllerType),
    #[error("read of register at offset {0:#x}")]
    Read(u64),
    #[error("SGI target list filter {0:#b}")]
    SgiTargetFilter(u8),
    #[error("write of register at offset {0:#x}")]
    Write(u64),
}

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("vcpu slot {0} is already registered")]
    AlreadyExists(usize),
    #[error("failed to inject interrupt {irq} into vcpu {vcpu}: {source:#}")]
    Inject {
        vcpu: usize,
        irq: u32,
        source: anyhow::Error,
    },
    #[error("invalid {size}-byte access at offset {offset:#x}")]
    InvalidAccess { offset: u64, size: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(InvalidArgument),
    #[error("cannot create a GIC for {0} vcpus")]
    InvalidVcpuCount(usize),
    #[error("invalid GIC memory map: {0}")]
    MemoryMap(&'static str),
    #[error("not supported: {0}")]
    NotSupported(NotSupported),
    #[error("vcpu slot {0} is out of range")]
    OutOfRange(usize),
    #[error("failed to query the host interrupt controller: {0:#}")]
    QueryVersion(anyhow::Error),
    #[error("failed to register GIC region {base:#x}+{size:#x}: {source}")]
    RegisterRegion {
        base: u64,
        size: u64,
        source: bus::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns the single-bit CPU mask for `vcpu`, or an empty mask if it does not fit in one byte.
fn vcpu_bit(vcpu: usize) -> u8 {
    if vcpu < MAX_VCPUS {
        1 << vcpu
    } else {
        0
    }
}

/// Helper to read a little-endian value of up to 8 bytes from a byte slice
fn read_le_u64(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let len = std::cmp::min(data.len(), 8);
    bytes[..len].copy_from_slice(&data[..len]);
    u64::from_le_bytes(bytes)
}

/// Helper to write a little-endian value of up to 8 bytes to a byte slice
fn write_le_u64(data: &mut [u8], value: u64) {
    let bytes = value.to_le_bytes();
    let len = std::cmp::min(data.len(), 8);
    data[..len].copy_from_slice(&bytes[..len]);
}
