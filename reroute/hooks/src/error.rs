//! `reroute-hooks` errors.
//!
//! Nothing here escalates to the process: every failure is logged where it
//! happens and surfaced to the immediate caller as a `bool` or a `None`.

use std::path::PathBuf;

use thiserror::Error;

use crate::common::Address;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("changing page protection was rejected by the operating system")]
    MemoryProtection,

    #[error("unable to resolve hook for replacement {0}")]
    Lookup(Address),

    #[error("failed to load deferred module `{}`", .0.display())]
    ModuleLoad(PathBuf),

    #[error("detour backend initialization failed: {0}")]
    BackendInit(String),
}

pub type Result<T> = std::result::Result<T, HookError>;
