// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::error;
use log::trace;

use super::read_le_u64;
use super::registers::gicr_access_width;
use super::registers::gicr_typer;
use super::registers::pidr2;
use super::registers::GicrRegister;
use super::write_le_u64;
use super::Error;
use super::GicVersion;
use super::NotSupported;
use super::Result;
use crate::bus::BusAccessInfo;
use crate::bus::BusDeviceSync;

/// GICv3 redistributor of a single VCPU.
///
/// Only the identification registers carry information. Per-CPU enable, pending and
/// configuration state for SGIs and PPIs is accepted and discarded.
#[derive(Debug)]
pub struct GicRedistributor {
    index: u16,
    is_last: bool,
}

impl GicRedistributor {
    pub fn new(index: u16, is_last: bool) -> GicRedistributor {
        GicRedistributor { index, is_last }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    /// Whether this is the highest-numbered redistributor, reported through GICR_TYPER.Last.
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    fn check_access(&self, offset: u64, size: usize) -> Result<()> {
        if offset % 4 != 0 || size != gicr_access_width(offset) {
            return Err(Error::InvalidAccess { offset, size });
        }
        Ok(())
    }

    pub fn read(&self, offset: u64, size: usize) -> Result<u64> {
        self.check_access(offset, size)?;
        let value = match GicrRegister::decode(offset) {
            Some(GicrRegister::Ctl)
            | Some(GicrRegister::Wake)
            | Some(GicrRegister::Icfg0)
            | Some(GicrRegister::Icfg1) => 0,
            Some(GicrRegister::Type) => gicr_typer(self.index, self.is_last),
            Some(GicrRegister::Pid2) => pidr2(GicVersion::V3).into(),
            _ => {
                error!(
                    "Unhandled GIC redistributor {} read at offset {:#x}",
                    self.index, offset
                );
                return Err(Error::NotSupported(NotSupported::Read(offset)));
            }
        };
        Ok(value)
    }

    /// Accepts and discards writes to the SGI/PPI state registers and GICR_WAKER.
    ///
    /// Width is checked against the register's own width, so an 8-byte write to the read-only
    /// GICR_TYPER is reported as `NotSupported` rather than as an invalid access.
    pub fn write(&self, offset: u64, size: usize, value: u64) -> Result<()> {
        self.check_access(offset, size)?;
        match GicrRegister::decode(offset) {
            Some(GicrRegister::Icenable0)
            | Some(GicrRegister::Isenable0)
            | Some(GicrRegister::Wake)
            | Some(GicrRegister::Igroup0)
            | Some(GicrRegister::Icpend0)
            | Some(GicrRegister::Icactive0)
            | Some(GicrRegister::Ipriority)
            | Some(GicrRegister::Icfg0)
            | Some(GicrRegister::Icfg1) => {
                trace!(
                    "GIC redistributor {} ignoring write of {:#x} at offset {:#x}",
                    self.index,
                    value,
                    offset
                );
                Ok(())
            }
            _ => {
                error!(
                    "Unhandled GIC redistributor {} write at offset {:#x}",
                    self.index, offset
                );
                Err(Error::NotSupported(NotSupported::Write(offset)))
            }
        }
    }
}

impl BusDeviceSync for GicRedistributor {
    fn debug_label(&self) -> String {
        format!("GICv3 redistributor {}", self.index)
    }

    fn read(&self, info: BusAccessInfo, data: &mut [u8]) -> anyhow::Result<()> {
        let value = GicRedistributor::read(self, info.offset, data.len())?;
        write_le_u64(data, value);
        Ok(())
    }

    fn write(&self, info: BusAccessInfo, data: &[u8]) -> anyhow::Result<()> {
        GicRedistributor::write(self, info.offset, data.len(), read_le_u64(data))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_registers() {
        let redist = GicRedistributor::new(1, false);
        assert_eq!(redist.read(0x8, 8).unwrap(), (1 << 8) | (1 << 32));
        assert_eq!(redist.read(0xffe8, 4).unwrap(), 0x30);
        assert_eq!(redist.read(0x0, 4).unwrap(), 0);
        assert_eq!(redist.read(0x14, 4).unwrap(), 0);
        assert_eq!(redist.read(0x10c00, 4).unwrap(), 0);
        assert_eq!(redist.read(0x10c04, 4).unwrap(), 0);

        let last = GicRedistributor::new(3, true);
        assert!(last.is_last());
        assert_eq!(last.read(0x8, 8).unwrap(), (3 << 8) | (3 << 32) | (1 << 4));
    }

    #[test]
    fn access_width_enforced() {
        let redist = GicRedistributor::new(0, true);
        assert!(matches!(
            redist.read(0x8, 4),
            Err(Error::InvalidAccess {
                offset: 0x8,
                size: 4
            })
        ));
        assert!(matches!(
            redist.read(0x0, 8),
            Err(Error::InvalidAccess { .. })
        ));
        assert!(matches!(
            redist.write(0x10102, 4, 0),
            Err(Error::InvalidAccess { .. })
        ));
    }

    #[test]
    fn sgi_frame_writes_ignored() {
        let redist = GicRedistributor::new(0, true);
        for offset in [
            0x14, 0x10080, 0x10100, 0x10180, 0x10280, 0x10380, 0x10400, 0x104fc, 0x10c00, 0x10c04,
        ] {
            redist.write(offset, 4, 0xffff_ffff).unwrap();
        }
        assert_eq!(redist.read(0x14, 4).unwrap(), 0);
    }

    #[test]
    fn unsupported_registers() {
        let redist = GicRedistributor::new(0, true);
        assert!(matches!(
            redist.read(0x10100, 4),
            Err(Error::NotSupported(NotSupported::Read(0x10100)))
        ));
        assert!(matches!(
            redist.write(0x0, 4, 1),
            Err(Error::NotSupported(NotSupported::Write(0x0)))
        ));
        assert!(matches!(
            redist.write(0x8, 8, 0),
            Err(Error::NotSupported(NotSupported::Write(0x8)))
        ));
    }

    #[test]
    fn bus_device_encodes_little_endian() {
        let redist = GicRedistributor::new(2, false);
        let info = BusAccessInfo {
            offset: 0x8,
            address: 0x8_0005_0008,
            id: 0,
        };
        let mut data = [0u8; 8];
        BusDeviceSync::read(&redist, info, &mut data).unwrap();
        assert_eq!(data, [0, 2, 0, 0, 2, 0, 0, 0]);
    }
}
