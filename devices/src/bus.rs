// Copyright 2017 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Handles routing to devices in an address space.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use remain::sorted;
use sync::Mutex;
use thiserror::Error as ThisError;

/// Information about how a device was accessed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BusAccessInfo {
    /// Offset from base address that the device was accessed at.
    pub offset: u64,
    /// Absolute address of the device's access in its address space.
    pub address: u64,
    /// ID of the entity requesting a device access, usually the VCPU id.
    pub id: usize,
}

impl fmt::Display for BusAccessInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A device that responds to reads or writes in an arbitrary address space.
///
/// The device does not care where it exists in address space as each method is only given an
/// offset into its allocated portion of address space. The same device is called from every VCPU
/// thread at once, so it does its own locking and only needs `&self`.
pub trait BusDeviceSync: Send + Sync {
    /// Returns a label suitable for debug output.
    fn debug_label(&self) -> String;
    /// Reads at `info.offset` from this device. The access width is `data.len()`.
    fn read(&self, info: BusAccessInfo, data: &mut [u8]) -> anyhow::Result<()>;
    /// Writes at `info.offset` to this device. The access width is `data.len()`.
    fn write(&self, info: BusAccessInfo, data: &[u8]) -> anyhow::Result<()>;
}

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("{label} failed to handle access {info}: {source:#}")]
    Device {
        label: String,
        info: BusAccessInfo,
        source: anyhow::Error,
    },
    #[error("no device is mapped at {0:#x}")]
    NoDevice(u64),
    #[error("no device is registered at {base:#x} with length {len:#x}")]
    NotRegistered { base: u64, len: u64 },
    #[error("new device {base:#x}+{len:#x} overlaps with an old device {other_base:#x}+{other_len:#x}")]
    Overlap {
        base: u64,
        len: u64,
        other_base: u64,
        other_len: u64,
    },
    #[error("device range at {0:#x} has zero length or wraps the address space")]
    ZeroLength(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Holds a base and length representing the address space occupied by a `BusDevice`.
///
/// * base - The address at which the range start.
/// * len - The length of the range in bytes.
#[derive(Debug, Copy, Clone)]
pub struct BusRange {
    pub base: u64,
    pub len: u64,
}

impl BusRange {
    /// Returns true if `addr` is within the range.
    pub fn contains(&self, addr: u64) -> bool {
        self.base <= addr && addr - self.base < self.len
    }

    /// Returns true if there is overlap with the given range.
    pub fn overlaps(&self, base: u64, len: u64) -> bool {
        self.base < base.saturating_add(len) && base < self.base.saturating_add(self.len)
    }
}

impl Eq for BusRange {}

impl PartialEq for BusRange {
    fn eq(&self, other: &BusRange) -> bool {
        self.base == other.base
    }
}

impl Ord for BusRange {
    fn cmp(&self, other: &BusRange) -> Ordering {
        self.base.cmp(&other.base)
    }
}

impl PartialOrd for BusRange {
    fn partial_cmp(&self, other: &BusRange) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The kind of address space a `Bus` routes. Devices trapped on an MMIO bus are reached through
/// guest physical memory accesses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusType {
    Mmio,
    Io,
}

/// A device container for routing reads and writes over some address space.
///
/// This doesn't have any restrictions on what kind of device or address space this applies to. The
/// only restriction is that no two devices can overlap in this address space.
///
/// Clones share the same set of devices. Each VCPU thread owns its own clone with its access id set
/// to the VCPU index, which is how a device learns which VCPU performed an access.
#[derive(Clone)]
pub struct Bus {
    devices: Arc<Mutex<BTreeMap<BusRange, Arc<dyn BusDeviceSync>>>>,
    access_id: usize,
    bus_type: BusType,
}

impl Bus {
    /// Constructs a bus with an empty address space.
    pub fn new(bus_type: BusType) -> Bus {
        Bus {
            devices: Arc::new(Mutex::new(BTreeMap::new())),
            access_id: 0,
            bus_type,
        }
    }

    /// Sets the id that will be used for BusAccessInfo.
    pub fn set_access_id(&mut self, id: usize) {
        self.access_id = id;
    }

    pub fn bus_type(&self) -> BusType {
        self.bus_type
    }

    fn get_device(&self, addr: u64) -> Option<(u64, u64, Arc<dyn BusDeviceSync>)> {
        let devices = self.devices.lock();
        let (range, dev) = devices
            .range(
                ..=BusRange {
                    base: addr,
                    len: 1,
                },
            )
            .next_back()?;
        if range.contains(addr) {
            Some((addr - range.base, addr, dev.clone()))
        } else {
            None
        }
    }

    /// Puts the given device at the given address space.
    pub fn insert(&self, device: Arc<dyn BusDeviceSync>, base: u64, len: u64) -> Result<()> {
        if len == 0 || base.checked_add(len).is_none() {
            return Err(Error::ZeroLength(base));
        }

        let mut devices = self.devices.lock();
        if let Some(old) = devices.keys().find(|range| range.overlaps(base, len)) {
            return Err(Error::Overlap {
                base,
                len,
                other_base: old.base,
                other_len: old.len,
            });
        }

        devices.insert(BusRange { base, len }, device);
        Ok(())
    }

    /// Removes the device registered at exactly `base` with length `len`.
    pub fn remove(&self, base: u64, len: u64) -> Result<()> {
        let mut devices = self.devices.lock();
        let key = BusRange { base, len };
        let registered_len = devices.get_key_value(&key).map(|(range, _)| range.len);
        if registered_len != Some(len) {
            return Err(Error::NotRegistered { base, len });
        }
        devices.remove(&key);
        Ok(())
    }

    /// Returns the ranges of all registered devices, in address order.
    pub fn ranges(&self) -> Vec<BusRange> {
        self.devices.lock().keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Reads data from the device that owns the range containing `addr` and puts it into `data`.
    ///
    /// The device map lock is released before the device handler runs.
    pub fn read(&self, addr: u64, data: &mut [u8]) -> Result<()> {
        let (offset, address, dev) = self.get_device(addr).ok_or(Error::NoDevice(addr))?;
        let info = BusAccessInfo {
            offset,
            address,
            id: self.access_id,
        };
        dev.read(info, data).map_err(|source| Error::Device {
            label: dev.debug_label(),
            info,
            source,
        })
    }

    /// Writes `data` to the device that owns the range containing `addr`.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        let (offset, address, dev) = self.get_device(addr).ok_or(Error::NoDevice(addr))?;
        let info = BusAccessInfo {
            offset,
            address,
            id: self.access_id,
        };
        dev.write(info, data).map_err(|source| Error::Device {
            label: dev.debug_label(),
            info,
            source,
        })
    }
}
