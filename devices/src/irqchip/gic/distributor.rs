// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;

use log::debug;
use log::error;
use log::trace;
use log::warn;
use sync::Mutex;

use super::layout::GicLayout;
use super::layout::GicMemoryMap;
use super::read_le_u64;
use super::redistributor::GicRedistributor;
use super::registers::gicd_access_width;
use super::registers::gicd_typer;
use super::registers::pidr2;
use super::registers::GicdRegister;
use super::registers::SgiTarget;
use super::registers::SoftwareGeneratedInterrupt;
use super::registers::GICD_CTLR_ARE_NS;
use super::registers::GICD_CTLR_DEFAULT;
use super::registers::GICD_IROUTER_IRM;
use super::vcpu::GicVersionQuery;
use super::vcpu::InterruptControllerType;
use super::vcpu::Vcpu;
use super::vcpu_bit;
use super::write_le_u64;
use super::Error;
use super::GicVersion;
use super::InvalidArgument;
use super::NotSupported;
use super::Result;
use super::MAX_VCPUS;
use super::NUM_INTERRUPTS;
use super::NUM_SGIS_AND_PPIS;
use super::NUM_SPIS;
use crate::bus::Bus;
use crate::bus::BusAccessInfo;
use crate::bus::BusDeviceSync;

const ENABLE_WORDS: usize = NUM_INTERRUPTS / 32;

/// How shared interrupts pick their destination VCPUs.
enum Targeting {
    /// Legacy ITARGETSR routing: a CPU mask per interrupt ID.
    CpuMask([u8; NUM_INTERRUPTS]),
    /// GICv3 affinity routing: a VCPU index per shared interrupt, or all VCPUs.
    Affinity {
        routes: [u8; NUM_SPIS],
        broadcast: [bool; NUM_SPIS],
    },
}

impl Targeting {
    /// Affinity routing as it starts out when the guest enables it: everything broadcast.
    fn affinity() -> Targeting {
        Targeting::Affinity {
            routes: [0; NUM_SPIS],
            broadcast: [true; NUM_SPIS],
        }
    }
}

struct DistributorState {
    enabled: [u32; ENABLE_WORDS],
    targeting: Targeting,
    vcpus: [Option<Arc<dyn Vcpu>>; MAX_VCPUS],
}

impl DistributorState {
    fn new() -> DistributorState {
        DistributorState {
            enabled: [0; ENABLE_WORDS],
            targeting: Targeting::CpuMask([0; NUM_INTERRUPTS]),
            vcpus: Default::default(),
        }
    }

    /// CPU mask with a bit set for every registered VCPU slot.
    fn registered_mask(&self) -> u8 {
        self.vcpus
            .iter()
            .enumerate()
            .filter(|(_, vcpu)| vcpu.is_some())
            .fold(0, |mask, (slot, _)| mask | vcpu_bit(slot))
    }

    fn reset_cpu_masks(&mut self) {
        let mask = self.registered_mask();
        self.targeting = Targeting::CpuMask([mask; NUM_INTERRUPTS]);
    }

    fn is_enabled(&self, irq: u32) -> bool {
        let word = irq as usize / 32;
        self.enabled
            .get(word)
            .map_or(false, |bits| bits & (1 << (irq % 32)) != 0)
    }

    fn affinity_routing(&self) -> bool {
        matches!(self.targeting, Targeting::Affinity { .. })
    }
}

/// Index of a shared interrupt in the affinity routing tables.
fn spi_index(irq: u32) -> Option<usize> {
    (irq as usize)
        .checked_sub(NUM_SGIS_AND_PPIS)
        .filter(|&index| index < NUM_SPIS)
}

fn query_gic_version(query: &dyn GicVersionQuery) -> Result<GicVersion> {
    match query
        .interrupt_controller_type()
        .map_err(Error::QueryVersion)?
    {
        InterruptControllerType::GicV2 => Ok(GicVersion::V2),
        InterruptControllerType::GicV3 => Ok(GicVersion::V3),
        other => Err(Error::NotSupported(NotSupported::ControllerType(other))),
    }
}

/// GIC distributor shared by all VCPUs.
///
/// Register accesses arrive concurrently from every VCPU thread through the MMIO bus, and
/// interrupts are raised from device threads through [`GicDistributor::interrupt`]. All mutable
/// state lives behind one lock, which is never held while a VCPU is being interrupted.
pub struct GicDistributor {
    version: GicVersion,
    num_cpus: usize,
    layout: GicLayout,
    redistributors: Vec<Arc<GicRedistributor>>,
    state: Mutex<DistributorState>,
}

impl GicDistributor {
    /// Creates a distributor for `num_cpus` VCPUs at the default guest physical addresses and maps
    /// it, and for GICv3 one redistributor per VCPU, on `mmio_bus`.
    ///
    /// `version_query` is asked once for the host interrupt controller, which decides whether the
    /// guest sees a GICv2 or a GICv3.
    pub fn init(
        mmio_bus: &Bus,
        version_query: &dyn GicVersionQuery,
        num_cpus: usize,
    ) -> Result<Arc<GicDistributor>> {
        Self::init_with_memory_map(mmio_bus, version_query, num_cpus, GicMemoryMap::default())
    }

    /// Like [`GicDistributor::init`], with the GIC frames placed according to `memory_map`.
    ///
    /// If any region cannot be mapped, the regions already mapped are removed again.
    pub fn init_with_memory_map(
        mmio_bus: &Bus,
        version_query: &dyn GicVersionQuery,
        num_cpus: usize,
        memory_map: GicMemoryMap,
    ) -> Result<Arc<GicDistributor>> {
        if num_cpus == 0 || num_cpus > MAX_VCPUS {
            return Err(Error::InvalidVcpuCount(num_cpus));
        }
        memory_map.validate()?;
        let version = query_gic_version(version_query)?;

        let redistributors = match version {
            GicVersion::V2 => Vec::new(),
            GicVersion::V3 => (0..num_cpus)
                .map(|index| Arc::new(GicRedistributor::new(index as u16, index == num_cpus - 1)))
                .collect(),
        };
        let distributor = Arc::new(GicDistributor {
            version,
            num_cpus,
            layout: GicLayout::new(version, &memory_map, num_cpus),
            redistributors,
            state: Mutex::new(DistributorState::new()),
        });
        distributor.register_regions(mmio_bus)?;
        Ok(distributor)
    }

    fn register_regions(self: &Arc<Self>, mmio_bus: &Bus) -> Result<()> {
        let gicd: Arc<dyn BusDeviceSync> = self.clone();
        let mut regions = vec![(
            self.layout.distributor_base,
            self.layout.distributor_size,
            gicd,
        )];
        for (index, redistributor) in self.redistributors.iter().enumerate() {
            if let Some((base, size)) = self.layout.redistributor_region(index) {
                let gicr: Arc<dyn BusDeviceSync> = redistributor.clone();
                regions.push((base, size, gicr));
            }
        }

        let mut registered: Vec<(u64, u64)> = Vec::new();
        for (base, size, device) in regions {
            let label = device.debug_label();
            if let Err(e) = mmio_bus.insert(device, base, size) {
                error!("Failed to register {} at {:#x}: {}", label, base, e);
                for (base, size) in registered.into_iter().rev() {
                    if let Err(e) = mmio_bus.remove(base, size) {
                        warn!("Failed to unregister GIC region at {:#x}: {}", base, e);
                    }
                }
                return Err(Error::RegisterRegion {
                    base,
                    size,
                    source: e,
                });
            }
            debug!("{} registered at {:#x} (size {:#x})", label, base, size);
            registered.push((base, size));
        }
        Ok(())
    }

    pub fn version(&self) -> GicVersion {
        self.version
    }

    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    pub fn layout(&self) -> GicLayout {
        self.layout
    }

    pub fn redistributors(&self) -> &[Arc<GicRedistributor>] {
        &self.redistributors
    }

    /// Whether the guest has switched the distributor to affinity routing.
    pub fn affinity_routing(&self) -> bool {
        self.state.lock().affinity_routing()
    }

    /// Attaches `vcpu` to `slot` so that interrupts targeted at that CPU reach it.
    ///
    /// Registering a VCPU resets the CPU mask of every interrupt to the set of registered VCPUs.
    pub fn register_vcpu(&self, slot: usize, vcpu: Arc<dyn Vcpu>) -> Result<()> {
        if slot >= MAX_VCPUS {
            return Err(Error::OutOfRange(slot));
        }
        let mut state = self.state.lock();
        if state.vcpus[slot].is_some() {
            return Err(Error::AlreadyExists(slot));
        }
        state.vcpus[slot] = Some(vcpu);
        // Affinity routing keeps its routes, masks are rebuilt when it is turned off.
        if !state.affinity_routing() {
            state.reset_cpu_masks();
        }
        debug!("GIC vcpu {} registered", slot);
        Ok(())
    }

    /// Raises interrupt `irq` on the VCPUs the guest has targeted it at.
    pub fn interrupt(&self, irq: u32) -> Result<()> {
        let cpu_mask = {
            let state = self.state.lock();
            match &state.targeting {
                Targeting::CpuMask(masks) => *masks
                    .get(irq as usize)
                    .ok_or(Error::InvalidArgument(InvalidArgument::Interrupt(irq)))?,
                Targeting::Affinity { routes, broadcast } => {
                    let index = spi_index(irq)
                        .ok_or(Error::InvalidArgument(InvalidArgument::Interrupt(irq)))?;
                    if broadcast[index] {
                        u8::MAX
                    } else {
                        vcpu_bit(routes[index] as usize)
                    }
                }
            }
        };
        self.target_interrupt(irq, cpu_mask)
    }

    /// Delivers `irq` to every registered VCPU in `cpu_mask`, lowest slot first.
    ///
    /// Disabled interrupts are dropped. Delivery stops at the first VCPU that fails, so the VCPUs
    /// before it have already been interrupted.
    pub fn target_interrupt(&self, irq: u32, cpu_mask: u8) -> Result<()> {
        if irq as usize >= NUM_INTERRUPTS {
            return Err(Error::InvalidArgument(InvalidArgument::Interrupt(irq)));
        }
        let enabled = self.state.lock().is_enabled(irq);
        if !enabled {
            trace!("GIC dropping disabled interrupt {}", irq);
            return Ok(());
        }
        for slot in 0..MAX_VCPUS {
            if cpu_mask & vcpu_bit(slot) == 0 {
                continue;
            }
            let vcpu = match self.state.lock().vcpus[slot].clone() {
                Some(vcpu) => vcpu,
                None => continue,
            };
            trace!("GIC delivering interrupt {} to vcpu {}", irq, slot);
            vcpu.interrupt(irq).map_err(|source| Error::Inject {
                vcpu: slot,
                irq,
                source,
            })?;
        }
        Ok(())
    }

    fn check_access(&self, offset: u64, size: usize) -> Result<()> {
        if offset % 4 != 0 || size != gicd_access_width(offset) {
            return Err(Error::InvalidAccess { offset, size });
        }
        Ok(())
    }

    /// Reads the distributor register at `info.offset` on behalf of VCPU `info.id`.
    pub fn read(&self, info: BusAccessInfo, size: usize) -> Result<u64> {
        let offset = info.offset;
        self.check_access(offset, size)?;
        let value: u64 = match GicdRegister::decode(offset) {
            Some(GicdRegister::Ctl) => {
                let mut ctlr = GICD_CTLR_DEFAULT;
                if self.version == GicVersion::V3 && self.state.lock().affinity_routing() {
                    ctlr |= GICD_CTLR_ARE_NS;
                }
                ctlr.into()
            }
            Some(GicdRegister::Type) => gicd_typer(self.version, self.num_cpus).into(),
            Some(GicdRegister::Pid2(revision)) => pidr2(revision).into(),
            Some(GicdRegister::Isenable(word)) | Some(GicdRegister::Icenable(word)) => {
                let state = self.state.lock();
                state.enabled.get(word).copied().unwrap_or(0).into()
            }
            Some(GicdRegister::ItargetsPrivate) => {
                // Each byte names the reading CPU.
                u32::from_ne_bytes([vcpu_bit(info.id); 4]).into()
            }
            Some(GicdRegister::ItargetsShared(word)) => match &self.state.lock().targeting {
                Targeting::CpuMask(masks) => {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(&masks[word * 4..word * 4 + 4]);
                    u32::from_le_bytes(bytes).into()
                }
                Targeting::Affinity { .. } => 0,
            },
            Some(GicdRegister::Iroute(irq)) => match &self.state.lock().targeting {
                Targeting::Affinity { routes, broadcast } => match spi_index(irq) {
                    Some(index) if broadcast[index] => GICD_IROUTER_IRM,
                    Some(index) => routes[index].into(),
                    None => 0,
                },
                Targeting::CpuMask(_) => 0,
            },
            Some(GicdRegister::Icfg(0)) => u32::MAX.into(),
            Some(GicdRegister::Icfg(_))
            | Some(GicdRegister::Igroup)
            | Some(GicdRegister::Igrpmod)
            | Some(GicdRegister::Icpend)
            | Some(GicdRegister::Icactive)
            | Some(GicdRegister::Ipriority) => 0,
            Some(GicdRegister::Sgi) | None => {
                error!("Unhandled GIC distributor read at offset {:#x}", offset);
                return Err(Error::NotSupported(NotSupported::Read(offset)));
            }
        };
        Ok(value)
    }

    /// Writes `value` to the distributor register at `info.offset` on behalf of VCPU `info.id`.
    pub fn write(&self, info: BusAccessInfo, size: usize, value: u64) -> Result<()> {
        let offset = info.offset;
        self.check_access(offset, size)?;
        let reg = match GicdRegister::decode(offset) {
            Some(reg) => reg,
            None => {
                error!("Unhandled GIC distributor write at offset {:#x}", offset);
                return Err(Error::NotSupported(NotSupported::Write(offset)));
            }
        };

        // Every register but IROUTER is 32 bits wide.
        let value32 = value as u32;
        match reg {
            GicdRegister::Ctl => {
                let mut state = self.state.lock();
                if self.version == GicVersion::V3 && value32 & GICD_CTLR_ARE_NS != 0 {
                    state.targeting = Targeting::affinity();
                } else {
                    state.reset_cpu_masks();
                }
            }
            GicdRegister::Isenable(word) => {
                let mut state = self.state.lock();
                if let Some(bits) = state.enabled.get_mut(word) {
                    *bits |= value32;
                }
            }
            GicdRegister::Icenable(word) => {
                let mut state = self.state.lock();
                if let Some(bits) = state.enabled.get_mut(word) {
                    *bits &= !value32;
                }
            }
            GicdRegister::ItargetsPrivate => {
                error!(
                    "Write to read-only GIC distributor register at offset {:#x}",
                    offset
                );
                return Err(Error::InvalidArgument(InvalidArgument::ReadOnlyRegister(
                    offset,
                )));
            }
            GicdRegister::ItargetsShared(word) => {
                let mut state = self.state.lock();
                if let Targeting::CpuMask(masks) = &mut state.targeting {
                    masks[word * 4..word * 4 + 4].copy_from_slice(&value32.to_le_bytes());
                }
            }
            GicdRegister::Iroute(irq) => {
                let mut state = self.state.lock();
                if let Targeting::Affinity { routes, broadcast } = &mut state.targeting {
                    if let Some(index) = spi_index(irq) {
                        if value == GICD_IROUTER_IRM {
                            broadcast[index] = true;
                        } else {
                            broadcast[index] = false;
                            routes[index] = value as u8;
                        }
                    }
                }
            }
            GicdRegister::Sgi => {
                let sgi = SoftwareGeneratedInterrupt::new(value32);
                let cpu_mask = match sgi.target() {
                    Some(SgiTarget::Mask(mask)) => mask,
                    Some(SgiTarget::AllButLocal) => !vcpu_bit(info.id),
                    Some(SgiTarget::Local) => vcpu_bit(info.id),
                    None => {
                        error!(
                            "Unsupported GIC SGI target list filter {:#b}",
                            sgi.target_list_filter
                        );
                        return Err(Error::NotSupported(NotSupported::SgiTargetFilter(
                            sgi.target_list_filter,
                        )));
                    }
                };
                return self.target_interrupt(sgi.vector.into(), cpu_mask);
            }
            GicdRegister::Icfg(_)
            | GicdRegister::Igroup
            | GicdRegister::Igrpmod
            | GicdRegister::Icpend
            | GicdRegister::Icactive
            | GicdRegister::Ipriority => {}
            GicdRegister::Type | GicdRegister::Pid2(_) => {
                error!("Unhandled GIC distributor write at offset {:#x}", offset);
                return Err(Error::NotSupported(NotSupported::Write(offset)));
            }
        }
        Ok(())
    }
}

impl BusDeviceSync for GicDistributor {
    fn debug_label(&self) -> String {
        format!("GICv{} distributor", self.version.arch_revision())
    }

    fn read(&self, info: BusAccessInfo, data: &mut [u8]) -> anyhow::Result<()> {
        let value = GicDistributor::read(self, info, data.len())?;
        write_le_u64(data, value);
        Ok(())
    }

    fn write(&self, info: BusAccessInfo, data: &[u8]) -> anyhow::Result<()> {
        GicDistributor::write(self, info, data.len(), read_le_u64(data))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusType;

    #[derive(Default)]
    struct RecordingVcpu {
        interrupts: Mutex<Vec<u32>>,
    }

    impl Vcpu for RecordingVcpu {
        fn interrupt(&self, irq: u32) -> anyhow::Result<()> {
            self.interrupts.lock().push(irq);
            Ok(())
        }
    }

    impl RecordingVcpu {
        fn take(&self) -> Vec<u32> {
            std::mem::take(&mut *self.interrupts.lock())
        }
    }

    fn access(offset: u64, id: usize) -> BusAccessInfo {
        BusAccessInfo {
            offset,
            address: offset,
            id,
        }
    }

    fn new_gic(
        controller: InterruptControllerType,
        num_cpus: usize,
    ) -> (Arc<GicDistributor>, Vec<Arc<RecordingVcpu>>) {
        let bus = Bus::new(BusType::Mmio);
        let gic = GicDistributor::init(&bus, &controller, num_cpus).unwrap();
        let vcpus: Vec<Arc<RecordingVcpu>> = (0..num_cpus)
            .map(|_| Arc::new(RecordingVcpu::default()))
            .collect();
        for (slot, vcpu) in vcpus.iter().enumerate() {
            gic.register_vcpu(slot, vcpu.clone()).unwrap();
        }
        (gic, vcpus)
    }

    #[test]
    fn ctlr_and_identification() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 2);
        assert_eq!(gic.read(access(0x0, 0), 4).unwrap(), 0x7);
        assert_eq!(gic.read(access(0x4, 0), 4).unwrap(), 0x7 | (1 << 5));
        assert_eq!(gic.read(access(0xfe8, 0), 4).unwrap(), 0x20);
        assert_eq!(gic.read(access(0x1fe8, 0), 4).unwrap(), 0x30);

        let (gic, _) = new_gic(InterruptControllerType::GicV3, 1);
        assert_eq!(gic.read(access(0x4, 0), 4).unwrap(), 0x7 | (7 << 19));
        // PIDR2 revision depends on the alias, not on the controller.
        assert_eq!(gic.read(access(0xfe8, 0), 4).unwrap(), 0x20);
        assert_eq!(gic.read(access(0x1fe8, 0), 4).unwrap(), 0x30);
        assert_eq!(gic.read(access(0xffe8, 0), 4).unwrap(), 0x30);
    }

    #[test]
    fn enable_bits() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 1);
        gic.write(access(0x104, 0), 4, 0x0000_0300).unwrap();
        assert_eq!(gic.read(access(0x104, 0), 4).unwrap(), 0x300);
        assert_eq!(gic.read(access(0x184, 0), 4).unwrap(), 0x300);
        gic.write(access(0x184, 0), 4, 0x0000_0100).unwrap();
        assert_eq!(gic.read(access(0x104, 0), 4).unwrap(), 0x200);
        assert_eq!(gic.read(access(0x100, 0), 4).unwrap(), 0);
    }

    #[test]
    fn disabled_interrupt_not_delivered() {
        let (gic, vcpus) = new_gic(InterruptControllerType::GicV2, 1);
        gic.interrupt(40).unwrap();
        assert!(vcpus[0].take().is_empty());
        gic.write(access(0x104, 0), 4, 1 << 8).unwrap();
        gic.interrupt(40).unwrap();
        assert_eq!(vcpus[0].take(), vec![40]);
    }

    #[test]
    fn private_targets_read_only() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 4);
        assert_eq!(gic.read(access(0x800, 2), 4).unwrap(), 0x0404_0404);
        assert_eq!(gic.read(access(0x81c, 0), 4).unwrap(), 0x0101_0101);
        assert!(matches!(
            gic.write(access(0x808, 0), 4, 0),
            Err(Error::InvalidArgument(InvalidArgument::ReadOnlyRegister(
                0x808
            )))
        ));
    }

    #[test]
    fn shared_targets_round_trip() {
        let (gic, vcpus) = new_gic(InterruptControllerType::GicV2, 2);
        // Registration sets every mask to the registered VCPUs.
        assert_eq!(gic.read(access(0x820, 0), 4).unwrap(), 0x0303_0303);
        gic.write(access(0x828, 0), 4, 0x0201_0102).unwrap();
        assert_eq!(gic.read(access(0x828, 0), 4).unwrap(), 0x0201_0102);

        // Interrupt 40 is the first byte of ITARGETSR10.
        gic.write(access(0x104, 0), 4, u32::MAX.into()).unwrap();
        gic.interrupt(40).unwrap();
        assert!(vcpus[0].take().is_empty());
        assert_eq!(vcpus[1].take(), vec![40]);
    }

    #[test]
    fn icfgr_values() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 1);
        assert_eq!(gic.read(access(0xc00, 0), 4).unwrap(), 0xffff_ffff);
        assert_eq!(gic.read(access(0xc04, 0), 4).unwrap(), 0);
        gic.write(access(0xc08, 0), 4, 0x5555_5555).unwrap();
        assert_eq!(gic.read(access(0xc08, 0), 4).unwrap(), 0);
    }

    #[test]
    fn unmodeled_registers_read_zero() {
        let (gic, _) = new_gic(InterruptControllerType::GicV3, 1);
        for offset in [0x80, 0x280, 0x380, 0x400, 0x4fc, 0xd00] {
            gic.write(access(offset, 0), 4, 0xffff_ffff).unwrap();
            assert_eq!(gic.read(access(offset, 0), 4).unwrap(), 0);
        }
    }

    #[test]
    fn affinity_routing_toggle() {
        let (gic, _) = new_gic(InterruptControllerType::GicV3, 2);
        gic.write(access(0x0, 0), 4, (GICD_CTLR_ARE_NS | 0x7).into())
            .unwrap();
        assert!(gic.affinity_routing());
        assert_eq!(gic.read(access(0x0, 0), 4).unwrap(), 0x27);
        assert_eq!(gic.read(access(0x6140, 0), 8).unwrap(), GICD_IROUTER_IRM);
        assert_eq!(gic.read(access(0x820, 0), 4).unwrap(), 0);

        gic.write(access(0x0, 0), 4, 0x7).unwrap();
        assert!(!gic.affinity_routing());
        assert_eq!(gic.read(access(0x0, 0), 4).unwrap(), 0x7);
        assert_eq!(gic.read(access(0x8fc, 0), 4).unwrap(), 0x0303_0303);
        assert_eq!(gic.read(access(0x6140, 0), 8).unwrap(), 0);
    }

    #[test]
    fn affinity_routing_ignored_on_v2() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 1);
        gic.write(access(0x0, 0), 4, GICD_CTLR_ARE_NS.into()).unwrap();
        assert!(!gic.affinity_routing());
        assert_eq!(gic.read(access(0x0, 0), 4).unwrap(), 0x7);
    }

    #[test]
    fn irouter_routes_to_one_vcpu() {
        let (gic, vcpus) = new_gic(InterruptControllerType::GicV3, 3);
        gic.write(access(0x0, 0), 4, GICD_CTLR_ARE_NS.into()).unwrap();
        gic.write(access(0x104, 0), 4, 1 << 8).unwrap();

        gic.interrupt(40).unwrap();
        for vcpu in &vcpus {
            assert_eq!(vcpu.take(), vec![40]);
        }

        gic.write(access(0x6140, 0), 8, 2).unwrap();
        assert_eq!(gic.read(access(0x6140, 0), 8).unwrap(), 2);
        gic.interrupt(40).unwrap();
        assert!(vcpus[0].take().is_empty());
        assert!(vcpus[1].take().is_empty());
        assert_eq!(vcpus[2].take(), vec![40]);

        gic.write(access(0x6140, 0), 8, GICD_IROUTER_IRM).unwrap();
        assert_eq!(gic.read(access(0x6140, 0), 8).unwrap(), GICD_IROUTER_IRM);
    }

    #[test]
    fn irouter_beyond_modeled_interrupts() {
        let (gic, _) = new_gic(InterruptControllerType::GicV3, 1);
        gic.write(access(0x0, 0), 4, GICD_CTLR_ARE_NS.into()).unwrap();
        // Interrupt 256 is past the last modeled ID.
        gic.write(access(0x6800, 0), 8, 1).unwrap();
        assert_eq!(gic.read(access(0x6800, 0), 8).unwrap(), 0);
    }

    #[test]
    fn interrupt_out_of_range() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 1);
        assert!(matches!(
            gic.interrupt(256),
            Err(Error::InvalidArgument(InvalidArgument::Interrupt(256)))
        ));
        assert!(matches!(
            gic.target_interrupt(300, 1),
            Err(Error::InvalidArgument(InvalidArgument::Interrupt(300)))
        ));
    }

    #[test]
    fn sgi_targets() {
        let (gic, vcpus) = new_gic(InterruptControllerType::GicV2, 3);
        gic.write(access(0x100, 0), 4, 0xffff).unwrap();

        // All but the requesting VCPU.
        gic.write(access(0xf00, 1), 4, (1 << 24) | 5).unwrap();
        assert_eq!(vcpus[0].take(), vec![5]);
        assert!(vcpus[1].take().is_empty());
        assert_eq!(vcpus[2].take(), vec![5]);

        // Only the requesting VCPU.
        gic.write(access(0xf00, 2), 4, (2 << 24) | 1).unwrap();
        assert!(vcpus[0].take().is_empty());
        assert_eq!(vcpus[2].take(), vec![1]);

        // Explicit target list.
        gic.write(access(0xf00, 0), 4, (0b011 << 16) | 7).unwrap();
        assert_eq!(vcpus[0].take(), vec![7]);
        assert_eq!(vcpus[1].take(), vec![7]);
        assert!(vcpus[2].take().is_empty());

        assert!(matches!(
            gic.write(access(0xf00, 0), 4, 3 << 24),
            Err(Error::NotSupported(NotSupported::SgiTargetFilter(3)))
        ));
    }

    #[test]
    fn sgir_is_write_only() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 1);
        assert!(matches!(
            gic.read(access(0xf00, 0), 4),
            Err(Error::NotSupported(NotSupported::Read(0xf00)))
        ));
    }

    #[test]
    fn invalid_accesses() {
        let (gic, _) = new_gic(InterruptControllerType::GicV3, 1);
        assert!(matches!(
            gic.read(access(0x102, 0), 4),
            Err(Error::InvalidAccess {
                offset: 0x102,
                size: 4
            })
        ));
        assert!(matches!(
            gic.write(access(0x100, 0), 2, 1),
            Err(Error::InvalidAccess { .. })
        ));
        assert!(matches!(
            gic.read(access(0x6140, 0), 4),
            Err(Error::InvalidAccess { .. })
        ));
        assert!(matches!(
            gic.read(access(0x9000, 0), 8),
            Err(Error::InvalidAccess { .. })
        ));
        assert!(matches!(
            gic.read(access(0x9000, 0), 4),
            Err(Error::NotSupported(NotSupported::Read(0x9000)))
        ));
        assert!(matches!(
            gic.write(access(0x4, 0), 4, 0),
            Err(Error::NotSupported(NotSupported::Write(0x4)))
        ));
    }

    #[test]
    fn register_vcpu_errors() {
        let (gic, _) = new_gic(InterruptControllerType::GicV2, 1);
        let vcpu = Arc::new(RecordingVcpu::default());
        assert!(matches!(
            gic.register_vcpu(0, vcpu.clone()),
            Err(Error::AlreadyExists(0))
        ));
        assert!(matches!(
            gic.register_vcpu(MAX_VCPUS, vcpu.clone()),
            Err(Error::OutOfRange(8))
        ));
        gic.register_vcpu(MAX_VCPUS - 1, vcpu).unwrap();
        assert_eq!(gic.read(access(0x820, 0), 4).unwrap(), 0x8181_8181);
    }

    #[test]
    fn empty_slots_skipped() {
        let bus = Bus::new(BusType::Mmio);
        let gic = GicDistributor::init(&bus, &InterruptControllerType::GicV2, 4).unwrap();
        let vcpu = Arc::new(RecordingVcpu::default());
        gic.register_vcpu(2, vcpu.clone()).unwrap();
        gic.write(access(0x100, 0), 4, 0xffff).unwrap();
        gic.target_interrupt(3, 0xff).unwrap();
        assert_eq!(vcpu.take(), vec![3]);
    }

    struct FailingVcpu;

    impl Vcpu for FailingVcpu {
        fn interrupt(&self, _irq: u32) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("vcpu is gone"))
        }
    }

    #[test]
    fn delivery_stops_at_first_failure() {
        let bus = Bus::new(BusType::Mmio);
        let gic = GicDistributor::init(&bus, &InterruptControllerType::GicV2, 3).unwrap();
        let first = Arc::new(RecordingVcpu::default());
        let last = Arc::new(RecordingVcpu::default());
        gic.register_vcpu(0, first.clone()).unwrap();
        gic.register_vcpu(1, Arc::new(FailingVcpu)).unwrap();
        gic.register_vcpu(2, last.clone()).unwrap();
        gic.write(access(0x100, 0), 4, 0xffff).unwrap();

        assert!(matches!(
            gic.target_interrupt(2, 0b111),
            Err(Error::Inject { vcpu: 1, irq: 2, .. })
        ));
        assert_eq!(first.take(), vec![2]);
        assert!(last.take().is_empty());
    }
}
