// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Register offsets and decoding for the GIC distributor and redistributor frames.

use super::GicVersion;
use super::NUM_INTERRUPTS;
use super::NUM_SGIS_AND_PPIS;

// GICD register offsets
const GICD_CTLR: u64 = 0x0000;
const GICD_TYPER: u64 = 0x0004;
const GICD_IGROUPR: u64 = 0x0080;
const GICD_IGROUPR_END: u64 = 0x00fc;
const GICD_ISENABLER: u64 = 0x0100;
const GICD_ISENABLER_END: u64 = 0x011c;
const GICD_ICENABLER: u64 = 0x0180;
const GICD_ICENABLER_END: u64 = 0x019c;
const GICD_ICPENDR: u64 = 0x0280;
const GICD_ICPENDR_END: u64 = 0x02bc;
const GICD_ICACTIVER: u64 = 0x0380;
const GICD_ICACTIVER_END: u64 = 0x03bc;
const GICD_IPRIORITYR: u64 = 0x0400;
const GICD_IPRIORITYR_END: u64 = 0x04fc;
const GICD_ITARGETSR: u64 = 0x0800;
const GICD_ITARGETSR_PRIVATE_END: u64 = 0x081c;
const GICD_ITARGETSR_SHARED: u64 = 0x0820;
const GICD_ITARGETSR_END: u64 = 0x08fc;
const GICD_ICFGR: u64 = 0x0c00;
const GICD_ICFGR_END: u64 = 0x0c7c;
const GICD_IGRPMODR: u64 = 0x0d00;
const GICD_IGRPMODR_END: u64 = 0x0d7c;
const GICD_SGIR: u64 = 0x0f00;
const GICD_PIDR2_V2: u64 = 0x0fe8;
const GICD_PIDR2_V2_COMPAT: u64 = 0x1fe8;
const GICD_PIDR2: u64 = 0xffe8;
const GICD_IROUTER: u64 = 0x6000;
const GICD_IROUTER_SPI: u64 = GICD_IROUTER + 8 * NUM_SGIS_AND_PPIS as u64;
const GICD_IROUTER_END: u64 = 0x7fd8;

// GICR register offsets. The SGI/PPI frame follows the RD frame.
pub(super) const GICR_SGI_BASE: u64 = 0x10000;
const GICR_CTLR: u64 = 0x0000;
const GICR_TYPER: u64 = 0x0008;
const GICR_WAKER: u64 = 0x0014;
const GICR_PIDR2: u64 = 0xffe8;
const GICR_IGROUPR0: u64 = GICR_SGI_BASE + 0x0080;
const GICR_ISENABLER0: u64 = GICR_SGI_BASE + 0x0100;
const GICR_ICENABLER0: u64 = GICR_SGI_BASE + 0x0180;
const GICR_ICPENDR0: u64 = GICR_SGI_BASE + 0x0280;
const GICR_ICACTIVER0: u64 = GICR_SGI_BASE + 0x0380;
const GICR_IPRIORITYR: u64 = GICR_SGI_BASE + 0x0400;
const GICR_IPRIORITYR_END: u64 = GICR_SGI_BASE + 0x04fc;
const GICR_ICFGR0: u64 = GICR_SGI_BASE + 0x0c00;
const GICR_ICFGR1: u64 = GICR_SGI_BASE + 0x0c04;

/// GICD_CTLR value with EnableGrp0, EnableGrp1NS and EnableGrp1S set.
pub(super) const GICD_CTLR_DEFAULT: u32 = 0x7;
/// Affinity routing enable, non-secure state.
pub const GICD_CTLR_ARE_NS: u32 = 1 << 5;
/// Interrupt Routing Mode: deliver to any participating PE.
pub const GICD_IROUTER_IRM: u64 = 1 << 31;

const GICD_TYPER_ITLINES_MASK: u32 = 0x1f;
const GICD_TYPER_CPUS_SHIFT: u32 = 5;
const GICD_TYPER_CPUS_MASK: u32 = 0x7;
const GICD_TYPER_IDBITS_SHIFT: u32 = 19;
const GICD_TYPER_IDBITS_MASK: u32 = 0x1f;

const PIDR2_ARCH_REV_SHIFT: u32 = 4;

const GICR_TYPER_LAST: u64 = 1 << 4;
const GICR_TYPER_PROCESSOR_NUMBER_SHIFT: u64 = 8;
const GICR_TYPER_AFFINITY_SHIFT: u64 = 32;

const SGIR_TARGET_LIST_FILTER_SHIFT: u32 = 24;
const SGIR_TARGET_LIST_FILTER_MASK: u32 = 0x3;
const SGIR_CPU_TARGET_LIST_SHIFT: u32 = 16;
const SGIR_CPU_TARGET_LIST_MASK: u32 = 0xff;
const SGIR_INTID_MASK: u32 = 0xf;

/// A decoded distributor register. Banked registers carry the index of the 32-bit word within
/// their bank.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GicdRegister {
    Ctl,
    Type,
    Igroup,
    Isenable(usize),
    Icenable(usize),
    Icpend,
    Icactive,
    Ipriority,
    /// ITARGETSR0-7, the read-only targets of SGIs and PPIs.
    ItargetsPrivate,
    /// ITARGETSR8 onwards, four shared interrupts per word.
    ItargetsShared(usize),
    Icfg(usize),
    Igrpmod,
    Sgi,
    /// PIDR2 alias reporting the given architecture revision.
    Pid2(GicVersion),
    /// IROUTER of the given interrupt ID.
    Iroute(u32),
}

impl GicdRegister {
    /// Maps a distributor offset to the register it addresses, if any.
    pub fn decode(offset: u64) -> Option<GicdRegister> {
        let reg = match offset {
            GICD_CTLR => GicdRegister::Ctl,
            GICD_TYPER => GicdRegister::Type,
            GICD_IGROUPR..=GICD_IGROUPR_END => GicdRegister::Igroup,
            GICD_ISENABLER..=GICD_ISENABLER_END => {
                GicdRegister::Isenable(word_index(offset, GICD_ISENABLER))
            }
            GICD_ICENABLER..=GICD_ICENABLER_END => {
                GicdRegister::Icenable(word_index(offset, GICD_ICENABLER))
            }
            GICD_ICPENDR..=GICD_ICPENDR_END => GicdRegister::Icpend,
            GICD_ICACTIVER..=GICD_ICACTIVER_END => GicdRegister::Icactive,
            GICD_IPRIORITYR..=GICD_IPRIORITYR_END => GicdRegister::Ipriority,
            GICD_ITARGETSR..=GICD_ITARGETSR_PRIVATE_END => GicdRegister::ItargetsPrivate,
            GICD_ITARGETSR_SHARED..=GICD_ITARGETSR_END => {
                GicdRegister::ItargetsShared(word_index(offset, GICD_ITARGETSR))
            }
            GICD_ICFGR..=GICD_ICFGR_END => GicdRegister::Icfg(word_index(offset, GICD_ICFGR)),
            GICD_IGRPMODR..=GICD_IGRPMODR_END => GicdRegister::Igrpmod,
            GICD_SGIR => GicdRegister::Sgi,
            GICD_PIDR2_V2 => GicdRegister::Pid2(GicVersion::V2),
            // PIDR2 as placed when the GICv3 distributor and redistributor are 0x1000 apart.
            GICD_PIDR2_V2_COMPAT | GICD_PIDR2 => GicdRegister::Pid2(GicVersion::V3),
            GICD_IROUTER_SPI..=GICD_IROUTER_END if (offset - GICD_IROUTER) % 8 == 0 => {
                GicdRegister::Iroute(((offset - GICD_IROUTER) / 8) as u32)
            }
            _ => return None,
        };
        Some(reg)
    }
}

/// A decoded redistributor register, offset relative to the start of the RD frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GicrRegister {
    Ctl,
    Type,
    Wake,
    Pid2,
    Igroup0,
    Isenable0,
    Icenable0,
    Icpend0,
    Icactive0,
    Ipriority,
    Icfg0,
    Icfg1,
}

impl GicrRegister {
    pub fn decode(offset: u64) -> Option<GicrRegister> {
        let reg = match offset {
            GICR_CTLR => GicrRegister::Ctl,
            GICR_TYPER => GicrRegister::Type,
            GICR_WAKER => GicrRegister::Wake,
            GICR_PIDR2 => GicrRegister::Pid2,
            GICR_IGROUPR0 => GicrRegister::Igroup0,
            GICR_ISENABLER0 => GicrRegister::Isenable0,
            GICR_ICENABLER0 => GicrRegister::Icenable0,
            GICR_ICPENDR0 => GicrRegister::Icpend0,
            GICR_ICACTIVER0 => GicrRegister::Icactive0,
            GICR_IPRIORITYR..=GICR_IPRIORITYR_END => GicrRegister::Ipriority,
            GICR_ICFGR0 => GicrRegister::Icfg0,
            GICR_ICFGR1 => GicrRegister::Icfg1,
            _ => return None,
        };
        Some(reg)
    }
}

fn word_index(offset: u64, base: u64) -> usize {
    ((offset - base) / 4) as usize
}

/// Returns the access width in bytes the distributor requires at `offset`.
///
/// IROUTER entries are 64 bits wide. Everything else, mapped or not, is accessed as 32 bits.
pub fn gicd_access_width(offset: u64) -> usize {
    if (GICD_IROUTER_SPI..=GICD_IROUTER_END).contains(&offset) {
        8
    } else {
        4
    }
}

/// Returns the access width in bytes the redistributor requires at `offset`.
pub fn gicr_access_width(offset: u64) -> usize {
    if offset == GICR_TYPER {
        8
    } else {
        4
    }
}

/// Builds GICD_TYPER for a distributor of `num_interrupts` IDs shared by `num_cpus` CPUs.
pub(super) fn gicd_typer(version: GicVersion, num_cpus: usize) -> u32 {
    let it_lines = ((NUM_INTERRUPTS >> 5) as u32).saturating_sub(1) & GICD_TYPER_ITLINES_MASK;
    let cpus = ((num_cpus as u32).saturating_sub(1) & GICD_TYPER_CPUS_MASK) << GICD_TYPER_CPUS_SHIFT;
    let mut typer = it_lines | cpus;
    if version == GicVersion::V3 {
        // Number of bits needed to hold the largest interrupt ID.
        let id_bits = u32::BITS - (NUM_INTERRUPTS as u32 - 1).leading_zeros();
        typer |= ((id_bits - 1) & GICD_TYPER_IDBITS_MASK) << GICD_TYPER_IDBITS_SHIFT;
    }
    typer
}

pub(super) fn pidr2(version: GicVersion) -> u32 {
    version.arch_revision() << PIDR2_ARCH_REV_SHIFT
}

/// Builds GICR_TYPER for the redistributor of CPU `index`. Affinity 0 and the processor number
/// both equal the index.
pub(super) fn gicr_typer(index: u16, is_last: bool) -> u64 {
    let mut typer = (u64::from(index) << GICR_TYPER_PROCESSOR_NUMBER_SHIFT)
        | (u64::from(index) << GICR_TYPER_AFFINITY_SHIFT);
    if is_last {
        typer |= GICR_TYPER_LAST;
    }
    typer
}

/// The CPUs an SGI is sent to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SgiTarget {
    /// The CPUs named in the CPU target list.
    Mask(u8),
    /// Every CPU except the requesting one.
    AllButLocal,
    /// Only the requesting CPU.
    Local,
}

/// A write to GICD_SGIR.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SoftwareGeneratedInterrupt {
    pub target_list_filter: u8,
    pub cpu_target_list: u8,
    pub vector: u8,
}

impl SoftwareGeneratedInterrupt {
    pub fn new(value: u32) -> SoftwareGeneratedInterrupt {
        SoftwareGeneratedInterrupt {
            target_list_filter: ((value >> SGIR_TARGET_LIST_FILTER_SHIFT)
                & SGIR_TARGET_LIST_FILTER_MASK) as u8,
            cpu_target_list: ((value >> SGIR_CPU_TARGET_LIST_SHIFT) & SGIR_CPU_TARGET_LIST_MASK)
                as u8,
            vector: (value & SGIR_INTID_MASK) as u8,
        }
    }

    /// Returns the targets selected by the filter, or `None` for the reserved filter value.
    pub fn target(&self) -> Option<SgiTarget> {
        match self.target_list_filter {
            0b00 => Some(SgiTarget::Mask(self.cpu_target_list)),
            0b01 => Some(SgiTarget::AllButLocal),
            0b10 => Some(SgiTarget::Local),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_distributor_banks() {
        assert_eq!(GicdRegister::decode(0x0), Some(GicdRegister::Ctl));
        assert_eq!(GicdRegister::decode(0x4), Some(GicdRegister::Type));
        assert_eq!(GicdRegister::decode(0x100), Some(GicdRegister::Isenable(0)));
        assert_eq!(GicdRegister::decode(0x11c), Some(GicdRegister::Isenable(7)));
        assert_eq!(GicdRegister::decode(0x120), None);
        assert_eq!(GicdRegister::decode(0x184), Some(GicdRegister::Icenable(1)));
        assert_eq!(GicdRegister::decode(0x81c), Some(GicdRegister::ItargetsPrivate));
        assert_eq!(GicdRegister::decode(0x820), Some(GicdRegister::ItargetsShared(8)));
        assert_eq!(GicdRegister::decode(0x8fc), Some(GicdRegister::ItargetsShared(63)));
        assert_eq!(GicdRegister::decode(0xc00), Some(GicdRegister::Icfg(0)));
        assert_eq!(GicdRegister::decode(0xc7c), Some(GicdRegister::Icfg(31)));
        assert_eq!(GicdRegister::decode(0xf00), Some(GicdRegister::Sgi));
        assert_eq!(GicdRegister::decode(0xc80), None);
    }

    #[test]
    fn decode_pidr2_aliases() {
        assert_eq!(
            GicdRegister::decode(0xfe8),
            Some(GicdRegister::Pid2(GicVersion::V2))
        );
        for offset in [0x1fe8, 0xffe8] {
            assert_eq!(
                GicdRegister::decode(offset),
                Some(GicdRegister::Pid2(GicVersion::V3))
            );
        }
    }

    #[test]
    fn decode_irouter() {
        assert_eq!(GicdRegister::decode(0x6100), Some(GicdRegister::Iroute(32)));
        assert_eq!(GicdRegister::decode(0x6140), Some(GicdRegister::Iroute(40)));
        assert_eq!(GicdRegister::decode(0x7fd8), Some(GicdRegister::Iroute(1019)));
        // SGI/PPI entries and the upper half of an entry are not registers.
        assert_eq!(GicdRegister::decode(0x6000), None);
        assert_eq!(GicdRegister::decode(0x6104), None);
        assert_eq!(GicdRegister::decode(0x7fe0), None);
    }

    #[test]
    fn access_widths() {
        assert_eq!(gicd_access_width(0x0), 4);
        assert_eq!(gicd_access_width(0x60fc), 4);
        assert_eq!(gicd_access_width(0x6100), 8);
        assert_eq!(gicd_access_width(0x7fd8), 8);
        assert_eq!(gicd_access_width(0x9000), 4);
        assert_eq!(gicr_access_width(0x8), 8);
        assert_eq!(gicr_access_width(0x0), 4);
        assert_eq!(gicr_access_width(0x10100), 4);
    }

    #[test]
    fn decode_redistributor() {
        assert_eq!(GicrRegister::decode(0x8), Some(GicrRegister::Type));
        assert_eq!(GicrRegister::decode(0x14), Some(GicrRegister::Wake));
        assert_eq!(GicrRegister::decode(0xffe8), Some(GicrRegister::Pid2));
        assert_eq!(GicrRegister::decode(0x10100), Some(GicrRegister::Isenable0));
        assert_eq!(GicrRegister::decode(0x10480), Some(GicrRegister::Ipriority));
        assert_eq!(GicrRegister::decode(0x10c04), Some(GicrRegister::Icfg1));
        assert_eq!(GicrRegister::decode(0x4), None);
        assert_eq!(GicrRegister::decode(0x10104), None);
    }

    #[test]
    fn typer_values() {
        assert_eq!(gicd_typer(GicVersion::V2, 1), 0x7);
        assert_eq!(gicd_typer(GicVersion::V2, 4), 0x7 | (3 << 5));
        assert_eq!(gicd_typer(GicVersion::V3, 2), 0x7 | (1 << 5) | (7 << 19));
        assert_eq!(gicd_typer(GicVersion::V3, 8), 0x7 | (7 << 5) | (7 << 19));
    }

    #[test]
    fn pidr2_values() {
        assert_eq!(pidr2(GicVersion::V2), 0x20);
        assert_eq!(pidr2(GicVersion::V3), 0x30);
    }

    #[test]
    fn redistributor_typer() {
        assert_eq!(gicr_typer(0, false), 0);
        assert_eq!(gicr_typer(2, false), (2 << 8) | (2 << 32));
        assert_eq!(gicr_typer(3, true), (3 << 8) | (3 << 32) | (1 << 4));
    }

    #[test]
    fn sgi_decode() {
        let sgi = SoftwareGeneratedInterrupt::new(0x0005_0003);
        assert_eq!(sgi.vector, 3);
        assert_eq!(sgi.target(), Some(SgiTarget::Mask(0b101)));

        let sgi = SoftwareGeneratedInterrupt::new((1 << 24) | 0xff_0001);
        assert_eq!(sgi.vector, 1);
        assert_eq!(sgi.target(), Some(SgiTarget::AllButLocal));

        assert_eq!(
            SoftwareGeneratedInterrupt::new(2 << 24).target(),
            Some(SgiTarget::Local)
        );
        assert_eq!(SoftwareGeneratedInterrupt::new(3 << 24).target(), None);
        // Only the low four bits name the SGI.
        assert_eq!(SoftwareGeneratedInterrupt::new(0x1f).vector, 0xf);
    }
}
