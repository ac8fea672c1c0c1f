//! Runtime hooking engine for injected Windows layers.
//!
//! The engine redirects calls to another module's exported functions, or to
//! entries of a virtual dispatch table, to replacement functions supplied by
//! the hosting library, while keeping the original behavior reachable through
//! a trampoline. Targets may be registered before their module is loaded: the
//! engine hooks the dynamic-load entry points themselves and finishes
//! installation the moment a matching module load is observed.
//!
//! Physical entry patching is delegated to a [`DetourBackend`], module and
//! page-protection bookkeeping to a [`ModuleApi`]. Production implementations
//! of both live in [`windows`]; tests run the full engine against fakes and
//! synthetic images.

mod common;
pub mod error;
mod exports;
mod manager;
mod platform;
mod registry;

#[cfg(windows)]
pub mod windows;

#[cfg(test)]
pub(crate) mod test_image;

pub use common::Address;
pub use error::{HookError, Result};
pub use exports::{ModuleExport, module_exports};
pub use manager::HookManager;
pub use platform::{DetourBackend, LoadEntryPoint, ModuleApi};
pub use registry::{Hook, HookMechanism, HookStatus};
