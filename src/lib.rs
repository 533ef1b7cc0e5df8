//! # The L4 mapping database
//!
//! The address-space core of an L4-family microkernel: one mapping database
//! per resource kind that records who derived access to which page, port,
//! capability slot or kernel object from whom, and the generic `map` /
//! `unmap` algorithm that moves and revokes that access across four space
//! backends.

// Useful for adding comments about different branches
#![allow(clippy::if_same_then_else)]
// Not implementing default is sometimes useful in the case something has significant cost
// to allocate. Not fun in kernel space
#![allow(clippy::new_without_default)]
// Used to make it nicer to return errors, for example, .ok_or(Error::new(ESRCH))
#![allow(clippy::or_fun_call)]
// map and unmap take the full IPC parameter set
#![allow(clippy::too_many_arguments)]
// This is usually a serious issue - a missing import of a define where it is interpreted
// as a catch-all variable in a match, for example
#![deny(unreachable_patterns)]
// Ensure that all must_use results are used
#![deny(unused_must_use)]
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
/// Shared data structures
pub mod common;

/// Constants like memory locations
pub mod consts;

/// Debugger
pub mod debugger;

/// Error handling
pub mod error;

/// Flexpages
pub mod fpage;

/// Kernel state
pub mod kernel;

/// Logging
pub mod log;

/// Generic map and unmap
pub mod map_util;

/// Mapping database
pub mod mapdb;

/// Memory accounting
pub mod memory;

/// Space backends
pub mod space;

/// Synchronization primitives
pub mod sync;

/// Tasks
pub mod task;

pub use crate::kernel::{init, Kernel, KernelConfig};
