// Copyright 2018 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sync primitive types whose methods panic rather than returning error in case of poison.
//!
//! The Mutex type in this module wraps the standard library Mutex and mirrors the same methods,
//! except that it panics where the standard library would return a PoisonError. This API codifies
//! our error handling strategy around poisoned mutexes.
//!
//! - Release builds use panic=abort so poisoning never occurs. A panic while a mutex
//!   is held (or ever) takes down the entire process. Thus we would like for code not to have to
//!   consider the possibility of poison.
//!
//! - We could ask developers to always write `.lock().unwrap()` on a standard library mutex.
//!   However, we would like to stigmatize the use of unwrap. It is confusing to permit unwrap but
//!   only on mutex lock results.

mod mutex;

pub use crate::mutex::Mutex;
pub use crate::mutex::WouldBlock;
