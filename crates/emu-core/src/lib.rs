//! Core types shared between the RISC-V emulator core and its hosts.
//!
//! Hosts (program loaders, debug front-ends) see exactly two seams: a
//! [`Memory`] that accepts page mappings, and execution engines
//! implementing [`Cpu`] constructed over that memory with an initialized
//! register file. Everything raised mid-execution travels through the
//! closed [`Fault`] set or the two in-band records [`MemAccess`] and
//! [`Jump`].

mod cpu;
mod fault;
mod mem;

pub use cpu::{Breakpoints, Cpu};
pub use fault::{Dir, Fault, Jump, MemAccess};
pub use mem::{perm, Memory, PageBuf, Width, PAGE_SIZE};
