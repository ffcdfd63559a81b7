// Copyright 2017 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Emulates the ARM Generic Interrupt Controller for virtual machines.

pub mod bus;
pub mod irqchip;

pub use self::bus::Bus;
pub use self::bus::BusAccessInfo;
pub use self::bus::BusDeviceSync;
pub use self::bus::BusRange;
pub use self::bus::BusType;
pub use self::bus::Error as BusError;
