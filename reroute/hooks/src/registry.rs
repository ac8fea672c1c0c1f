//! Shared hook registry state.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use path_stem::stems_match;

use crate::common::Address;

/// Outcome of the last install or uninstall attempt on a [`Hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookStatus {
    #[default]
    Unknown,
    Success,
    /// The page protection change was rejected by the operating system.
    MemoryProtectionFailure,
    /// The detour backend could not allocate a trampoline near the target.
    AllocationFailure,
    /// The detour backend refused the target entry (too short to patch, or
    /// not relocatable).
    UnsupportedFunction,
}

/// How a redirection was put in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMechanism {
    /// Nothing was patched: the replacement module was substituted for the
    /// target at load time, so the redirection is implicit.
    Export,
    /// The detour backend patched the function entry and synthesized a
    /// trampoline.
    FunctionHook,
    /// A virtual dispatch table slot was overwritten in place.
    VTableHook,
}

/// One redirection from a target function to its replacement.
#[derive(Debug, Clone, Copy)]
pub struct Hook {
    pub target: Address,
    pub replacement: Address,
    /// Callable path to the original behavior; present once installed.
    pub trampoline: Option<Address>,
    pub status: HookStatus,
}

impl Hook {
    pub fn new(target: Address, replacement: Address) -> Self {
        Self {
            target,
            replacement,
            trampoline: None,
            status: HookStatus::Unknown,
        }
    }

    /// A hook is actionable when both ends exist and differ.
    pub fn is_valid(&self) -> bool {
        !self.target.is_null() && !self.replacement.is_null() && self.target != self.replacement
    }

    pub fn is_installed(&self) -> bool {
        self.trampoline.is_some()
    }

    /// The original callable, for detours that need to fall through.
    pub fn callable(&self) -> Option<Address> {
        self.trampoline
    }
}

/// Everything the engine mutates. One mutex in the manager guards the whole
/// struct; the vtable slot map deliberately lives under the same lock as the
/// hook list so two install attempts on the same slot serialize.
#[derive(Default)]
pub(crate) struct Registry {
    /// Installed hooks tagged with their mechanism. Insertion order is the
    /// teardown iteration order.
    pub hooks: Vec<(Hook, HookMechanism)>,

    /// Original vtable entry value -> address of the slot that held it.
    /// An entry exists exactly while a vtable hook occupies that slot.
    pub vtable_slots: HashMap<Address, Address>,

    /// Paths whose hook installation waits for a module load.
    pub pending_paths: Vec<PathBuf>,

    /// Target whose stem collides with the hosting module's own stem; its
    /// replacement module is loaded lazily on first call resolution.
    pub export_redirect: Option<PathBuf>,

    /// Module loaded on behalf of the export redirect, freed on teardown.
    pub export_module: Option<Address>,
}

impl Registry {
    pub fn find_by_replacement(&self, replacement: Address) -> Option<Hook> {
        self.hooks
            .iter()
            .find(|(hook, _)| hook.replacement == replacement)
            .map(|(hook, _)| *hook)
    }

    pub fn find_pending(&self, loaded: &Path) -> Option<usize> {
        self.pending_paths
            .iter()
            .position(|pending| stems_match(pending, loaded))
    }
}
