#![cfg_attr(not(test), no_std)]

//! Kernel core services: the virtual file system and its pluggable
//! providers (FAT-over-block-device, sysinfo, shared memory, Unix-domain
//! sockets).
//!
//! This crate is compiled `no_std` when it backs the kernel binary and
//! with `std` under `cargo test`, so the VFS and provider logic can be
//! exercised directly without the real boot/interrupt/memory subsystems.

extern crate alloc;

pub mod device;
pub mod drivers;
pub mod external;
pub mod fs;
pub mod net;
pub mod util;
