// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Guest physical placement of the GIC frames and the boot metadata derived from it.

use serde::Deserialize;
use serde::Serialize;

use super::registers::GICR_SGI_BASE;
use super::Error;
use super::GicVersion;
use super::Result;

// Fixed guest physical map.
const GICV2_DIST_BASE: u64 = 0x8_0000_1000;
const GICV2_DIST_SIZE: u64 = 0x1000;
const GICV2_CPU_INTERFACE_SIZE: u64 = 0x2000;
const GICV3_DIST_BASE: u64 = 0x8_0000_0000;
const GICV3_DIST_SIZE: u64 = 0x10000;
const GICV3_REDIST_BASE: u64 = 0x8_0001_0000;
const GICV3_REDIST_SIZE: u64 = 0x10000;
const GICV3_REDIST_SGI_SIZE: u64 = 0x10000;
const GICV3_REDIST_STRIDE: u64 = 0x20000;

// The distributor must cover at least GICD_SGIR and GICD_PIDR2 of its revision.
const GICV2_DIST_MIN_SIZE: u64 = 0x1000;
const GICV3_DIST_MIN_SIZE: u64 = 0x10000;

const IPI_BASE: u32 = 12;

/// Guest physical addresses and sizes of the GIC frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GicMemoryMap {
    pub gicv2_distributor_base: u64,
    pub gicv2_distributor_size: u64,
    pub gicv2_cpu_interface_size: u64,
    pub gicv3_distributor_base: u64,
    pub gicv3_distributor_size: u64,
    pub gicv3_redistributor_base: u64,
    pub gicv3_redistributor_size: u64,
    pub gicv3_redistributor_sgi_size: u64,
    pub gicv3_redistributor_stride: u64,
}

impl Default for GicMemoryMap {
    fn default() -> Self {
        GicMemoryMap {
            gicv2_distributor_base: GICV2_DIST_BASE,
            gicv2_distributor_size: GICV2_DIST_SIZE,
            gicv2_cpu_interface_size: GICV2_CPU_INTERFACE_SIZE,
            gicv3_distributor_base: GICV3_DIST_BASE,
            gicv3_distributor_size: GICV3_DIST_SIZE,
            gicv3_redistributor_base: GICV3_REDIST_BASE,
            gicv3_redistributor_size: GICV3_REDIST_SIZE,
            gicv3_redistributor_sgi_size: GICV3_REDIST_SGI_SIZE,
            gicv3_redistributor_stride: GICV3_REDIST_STRIDE,
        }
    }
}

impl GicMemoryMap {
    /// Checks that every frame is large enough for the registers decoded in it and that the
    /// frames of one GIC revision do not overlap.
    pub fn validate(&self) -> Result<()> {
        if self.gicv2_distributor_size < GICV2_DIST_MIN_SIZE {
            return Err(Error::MemoryMap("GICv2 distributor frame is too small"));
        }
        if self.gicv2_cpu_interface_size == 0 {
            return Err(Error::MemoryMap("GICv2 CPU interface frame is empty"));
        }
        if self.gicv3_distributor_size < GICV3_DIST_MIN_SIZE {
            return Err(Error::MemoryMap("GICv3 distributor frame is too small"));
        }
        // SGI frame registers are decoded at a fixed offset from the RD frame.
        if self.gicv3_redistributor_size != GICR_SGI_BASE {
            return Err(Error::MemoryMap(
                "GICv3 redistributor RD frame must be 64 KiB",
            ));
        }
        if self.gicv3_redistributor_sgi_size < GICR_SGI_BASE {
            return Err(Error::MemoryMap("GICv3 redistributor SGI frame is too small"));
        }
        if self.gicv3_redistributor_stride < self.redistributor_region_size() {
            return Err(Error::MemoryMap(
                "GICv3 redistributor stride is smaller than a redistributor",
            ));
        }
        if self
            .gicv3_distributor_base
            .checked_add(self.gicv3_distributor_size)
            .map_or(true, |end| end > self.gicv3_redistributor_base)
        {
            return Err(Error::MemoryMap(
                "GICv3 redistributors must follow the distributor",
            ));
        }
        let max_redistributor_end = (super::MAX_VCPUS as u64)
            .checked_mul(self.gicv3_redistributor_stride)
            .and_then(|len| len.checked_add(self.gicv3_redistributor_base));
        if max_redistributor_end.is_none() {
            return Err(Error::MemoryMap(
                "GICv3 redistributors overflow the address space",
            ));
        }
        if self
            .gicv2_distributor_base
            .checked_add(self.gicv2_distributor_size)
            .and_then(|end| end.checked_add(self.gicv2_cpu_interface_size))
            .is_none()
        {
            return Err(Error::MemoryMap("GICv2 frames overflow the address space"));
        }
        Ok(())
    }

    /// Size of the bus region of one redistributor, RD and SGI frames together.
    pub fn redistributor_region_size(&self) -> u64 {
        self.gicv3_redistributor_size
            .saturating_add(self.gicv3_redistributor_sgi_size)
    }
}

/// Boot-image driver record for a GICv2.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Gicv2DriverConfig {
    pub mmio_phys: u64,
    pub gicd_offset: u64,
    pub gicc_offset: u64,
    pub ipi_base: u32,
    pub optional: bool,
    pub use_msi: bool,
}

/// Boot-image driver record for a GICv3.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Gicv3DriverConfig {
    pub mmio_phys: u64,
    pub gicd_offset: u64,
    pub gicr_offset: u64,
    pub gicr_stride: u64,
    pub ipi_base: u32,
    pub optional: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum GicDriverConfig {
    V2(Gicv2DriverConfig),
    V3(Gicv3DriverConfig),
}

/// Where the GIC frames of a created distributor live in guest physical memory.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct GicLayout {
    pub version: GicVersion,
    pub distributor_base: u64,
    pub distributor_size: u64,
    /// GICv2 CPU interface, directly after the distributor. `None` for GICv3.
    pub cpu_interface: Option<(u64, u64)>,
    pub redistributor_base: u64,
    pub redistributor_size: u64,
    pub redistributor_stride: u64,
    pub redistributor_count: usize,
}

impl GicLayout {
    /// Places the frames of `version` according to `memory_map`, which must have passed
    /// `GicMemoryMap::validate`.
    pub(super) fn new(
        version: GicVersion,
        memory_map: &GicMemoryMap,
        num_cpus: usize,
    ) -> GicLayout {
        match version {
            GicVersion::V2 => GicLayout {
                version,
                distributor_base: memory_map.gicv2_distributor_base,
                distributor_size: memory_map.gicv2_distributor_size,
                cpu_interface: Some((
                    memory_map.gicv2_distributor_base + memory_map.gicv2_distributor_size,
                    memory_map.gicv2_cpu_interface_size,
                )),
                redistributor_base: 0,
                redistributor_size: 0,
                redistributor_stride: 0,
                redistributor_count: 0,
            },
            GicVersion::V3 => GicLayout {
                version,
                distributor_base: memory_map.gicv3_distributor_base,
                distributor_size: memory_map.gicv3_distributor_size,
                cpu_interface: None,
                redistributor_base: memory_map.gicv3_redistributor_base,
                redistributor_size: memory_map.redistributor_region_size(),
                redistributor_stride: memory_map.gicv3_redistributor_stride,
                redistributor_count: num_cpus,
            },
        }
    }

    /// Returns the `(base, size)` bus region of the redistributor of CPU `index`.
    pub fn redistributor_region(&self, index: usize) -> Option<(u64, u64)> {
        if index >= self.redistributor_count {
            return None;
        }
        let base = (index as u64)
            .checked_mul(self.redistributor_stride)
            .and_then(|offset| offset.checked_add(self.redistributor_base))?;
        Some((base, self.redistributor_size))
    }

    pub fn fdt_compatible(&self) -> &'static str {
        match self.version {
            GicVersion::V2 => "arm,gic-400",
            GicVersion::V3 => "arm,gic-v3",
        }
    }

    /// Cells of the interrupt controller's `reg` property.
    pub fn fdt_reg(&self) -> [u64; 4] {
        match self.cpu_interface {
            Some((gicc_base, gicc_size)) => [
                self.distributor_base,
                self.distributor_size,
                gicc_base,
                gicc_size,
            ],
            None => [
                self.distributor_base,
                self.distributor_size,
                self.redistributor_base,
                self.redistributor_stride
                    .saturating_mul(self.redistributor_count as u64),
            ],
        }
    }

    /// The `reg` property as stored in a flattened device tree.
    pub fn fdt_reg_bytes(&self) -> Vec<u8> {
        self.fdt_reg()
            .iter()
            .flat_map(|cell| cell.to_be_bytes())
            .collect()
    }

    /// Value of `#redistributor-regions`, which only GICv3 nodes carry.
    pub fn fdt_redistributor_regions(&self) -> Option<u32> {
        match self.version {
            GicVersion::V2 => None,
            GicVersion::V3 => Some(1),
        }
    }

    pub fn driver_config(&self) -> GicDriverConfig {
        match self.version {
            GicVersion::V2 => GicDriverConfig::V2(Gicv2DriverConfig {
                mmio_phys: self.distributor_base,
                gicd_offset: 0,
                gicc_offset: self.distributor_size,
                ipi_base: IPI_BASE,
                optional: true,
                use_msi: true,
            }),
            GicVersion::V3 => GicDriverConfig::V3(Gicv3DriverConfig {
                mmio_phys: self.distributor_base,
                gicd_offset: 0,
                gicr_offset: self.redistributor_base.saturating_sub(self.distributor_base),
                gicr_stride: self.redistributor_stride,
                ipi_base: IPI_BASE,
                optional: true,
            }),
        }
    }
}
