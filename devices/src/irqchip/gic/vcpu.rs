// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::Result;

/// Interrupt controller implemented by the host, as reported by the hypervisor.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InterruptControllerType {
    GicV2,
    GicV3,
    /// Any other controller, identified by the hypervisor's raw type code.
    Unknown(u32),
}

/// Source of the host interrupt controller type. Consulted once, when the GIC is created.
pub trait GicVersionQuery {
    fn interrupt_controller_type(&self) -> Result<InterruptControllerType>;
}

impl<F> GicVersionQuery for F
where
    F: Fn() -> Result<InterruptControllerType>,
{
    fn interrupt_controller_type(&self) -> Result<InterruptControllerType> {
        self()
    }
}

impl GicVersionQuery for InterruptControllerType {
    fn interrupt_controller_type(&self) -> Result<InterruptControllerType> {
        Ok(*self)
    }
}

/// A VCPU that can have interrupts injected into it.
pub trait Vcpu: Send + Sync {
    /// Marks `irq` pending on this VCPU and wakes it if it is halted.
    fn interrupt(&self, irq: u32) -> Result<()>;
}
