//! Seams to the process environment.
//!
//! The engine decides *when* and *for which addresses* a redirection happens;
//! the jump patching and the module bookkeeping belong to the platform. Both
//! sit behind traits so the whole engine runs against fakes in tests, and
//! against minhook plus the Windows loader in production (see
//! [`crate::windows`]).
//!
//! Implementations must not call back into the engine: several of these
//! methods run while the registry lock is held.

use std::path::{Path, PathBuf};

use crate::{common::Address, error::Result, registry::HookStatus};

/// A dynamic-load entry point and the detour that should service it.
#[derive(Debug, Clone, Copy)]
pub struct LoadEntryPoint {
    pub target: Address,
    pub detour: Address,
}

/// The external detour primitive: entry patching and trampoline synthesis.
pub trait DetourBackend: Send + Sync {
    /// Redirects `target` to `replacement`. On success returns the
    /// trampoline, a callable path to the original body.
    fn install(&self, target: Address, replacement: Address) -> std::result::Result<Address, HookStatus>;

    /// Reverts a previously installed redirection.
    fn uninstall(&self, target: Address) -> HookStatus;

    /// Temporarily suspends or resumes an installed redirection without
    /// discarding its trampoline. Unknown targets are ignored.
    fn set_enabled(&self, target: Address, enabled: bool);
}

/// Module and page-protection primitives of the host system.
pub trait ModuleApi: Send + Sync {
    /// Base address of the module hosting this engine.
    fn current_module(&self) -> Address;

    /// Fully qualified path of a loaded module.
    fn module_path(&self, module: Address) -> Option<PathBuf>;

    /// Base address of an already loaded module, by path or bare name.
    fn loaded_module(&self, path: &Path) -> Option<Address>;

    /// Loads a module and returns its base address.
    fn load_module(&self, path: &Path) -> Option<Address>;

    /// Releases a module previously obtained from [`ModuleApi::load_module`].
    fn free_module(&self, module: Address);

    /// The load entry points the engine intercepts to observe module loads,
    /// paired with their detours. Narrow- and wide-name variants on Windows.
    fn load_entry_points(&self) -> Vec<LoadEntryPoint>;

    /// Runs `write` with `[addr, addr + len)` made writable, restoring the
    /// previous protection on every exit path.
    ///
    /// # Safety
    ///
    /// `addr` must be a mapped address valid for `len` bytes, and `write`
    /// must only touch that range.
    unsafe fn with_writable(
        &self,
        addr: Address,
        len: usize,
        write: &mut dyn FnMut(),
    ) -> Result<()>;
}
