//! Hook orchestration: export matching, installation bookkeeping, deferred
//! registration and call resolution.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use path_stem::stems_match;
use tracing::{error, info, trace, warn};

use crate::{
    common::Address,
    error::HookError,
    exports,
    platform::{DetourBackend, ModuleApi},
    registry::{Hook, HookMechanism, HookStatus, Registry},
};

/// Exports tied to DXGI's internal diagnostics. They are never hooked, even
/// when both sides export them; redirecting them breaks the subsystem they
/// report on.
const UNHOOKABLE_EXPORTS: [&str; 2] = ["DXGIReportAdapterConfiguration", "DXGIDumpJournal"];
const UNHOOKABLE_EXPORT_PREFIXES: [&str; 1] = ["DXGID3D10"];

fn hookable(name: &str) -> bool {
    !UNHOOKABLE_EXPORTS.contains(&name)
        && !UNHOOKABLE_EXPORT_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// The hooking engine.
///
/// Owns the lock-protected [`Registry`] and orchestrates the two platform
/// seams: [`ModuleApi`] for module and page-protection bookkeeping,
/// [`DetourBackend`] for the actual entry patching. One instance lives for
/// the whole time the engine is active; [`HookManager::uninstall`] is the
/// teardown.
pub struct HookManager {
    registry: Mutex<Registry>,
    modules: Arc<dyn ModuleApi>,
    detours: Arc<dyn DetourBackend>,
}

impl HookManager {
    pub fn new(modules: Arc<dyn ModuleApi>, detours: Arc<dyn DetourBackend>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            modules,
            detours,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A panicked holder leaves no torn state worth refusing: every
        // mutation below completes before the guard drops.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests hooks for `target_path`'s exports, now or whenever a module
    /// with a matching filename stem loads.
    ///
    /// The first thing this does is intercept the dynamic-load entry points
    /// themselves, so deferred targets become hookable the moment the host
    /// loads them. Repeated calls re-request that bootstrap, which
    /// short-circuits as already installed.
    pub fn register(&self, target_path: &Path) {
        let mut registry = self.lock();

        for entry in self.modules.load_entry_points() {
            self.install_pair(&mut registry, entry.target, entry.detour);
        }

        info!("registering hooks for {}", target_path.display());

        let replacement_module = self.modules.current_module();
        let replacement_path = self
            .modules
            .module_path(replacement_module)
            .unwrap_or_default();

        if stems_match(target_path, &replacement_path) {
            // Loading this target would re-enter the hosting module, so its
            // replacement is loaded lazily on first call resolution.
            info!("> delayed (export redirect)");
            registry.export_redirect = Some(target_path.to_path_buf());
        } else if let Some(target_module) = self.modules.loaded_module(target_path) {
            info!("> libraries loaded");
            self.install_module_hooks(
                &mut registry,
                target_module,
                replacement_module,
                HookMechanism::FunctionHook,
            );
        } else {
            info!("> delayed");
            registry.pending_paths.push(target_path.to_path_buf());
        }
    }

    /// Installs a function hook from `target` to `replacement`.
    ///
    /// Returns `true` when installed, or when `replacement` was already
    /// hooked to this same `target`. Hooking a function onto itself, or
    /// re-hooking a replacement onto a different target, is refused.
    pub fn install(&self, target: Address, replacement: Address) -> bool {
        if !Hook::new(target, replacement).is_valid() {
            return false;
        }

        let mut registry = self.lock();
        self.install_pair(&mut registry, target, replacement)
    }

    fn install_pair(&self, registry: &mut Registry, target: Address, replacement: Address) -> bool {
        if target == replacement {
            return false;
        }

        if let Some(existing) = registry.find_by_replacement(replacement) {
            if existing.is_installed() {
                return existing.target == target;
            }
        }

        self.install_single(registry, target, replacement, HookMechanism::FunctionHook)
    }

    /// Installs a hook on one slot of a virtual dispatch table.
    ///
    /// The slot's current value is recorded as the original for later
    /// restoration, then overwritten with `replacement` under a temporary
    /// protection change. Re-installing the same redirection on an already
    /// hooked slot is a no-op success; redefining the slot to a different
    /// replacement is refused. On a failed install the slot recording is
    /// rolled back.
    ///
    /// # Safety
    ///
    /// `vtable` must point to at least `index + 1` slots, valid for reads,
    /// and the table must outlive the hook.
    pub unsafe fn install_vtable(
        &self,
        vtable: *mut Address,
        index: usize,
        replacement: Address,
    ) -> bool {
        if vtable.is_null() || replacement.is_null() {
            return false;
        }

        let slot = Address::new(unsafe { vtable.add(index) } as *mut _);
        let original = unsafe { vtable.add(index).read() };

        let mut registry = self.lock();

        // Slot already hooked: idempotent iff it holds the same redirection.
        if let Some((&occupant, _)) = registry.vtable_slots.iter().find(|(_, &s)| s == slot) {
            return registry.hooks.iter().any(|(hook, mechanism)| {
                *mechanism == HookMechanism::VTableHook
                    && hook.target == occupant
                    && hook.replacement == replacement
            });
        }

        // The same original registered through another table's slot: the
        // redirection already exists, nothing new to patch.
        if registry.vtable_slots.contains_key(&original) {
            return true;
        }

        if original == replacement {
            return false;
        }

        registry.vtable_slots.insert(original, slot);

        if self.install_single(&mut registry, original, replacement, HookMechanism::VTableHook) {
            true
        } else {
            registry.vtable_slots.remove(&original);
            false
        }
    }

    /// Reverts every registered hook and releases engine-owned resources.
    ///
    /// Safe to call twice; the second call finds nothing to revert.
    pub fn uninstall(&self) {
        let mut registry = self.lock();

        info!("uninstalling {} hook(s)", registry.hooks.len());

        let mut hooks = std::mem::take(&mut registry.hooks);
        for (hook, mechanism) in &mut hooks {
            self.uninstall_single(&mut registry, hook, *mechanism);
        }

        registry.pending_paths.clear();
        registry.export_redirect = None;

        if let Some(module) = registry.export_module.take() {
            self.modules.free_module(module);
        }
    }

    /// Lock-protected lookup of the hook whose replacement is `replacement`.
    pub fn find(&self, replacement: Address) -> Option<Hook> {
        self.lock().find_by_replacement(replacement)
    }

    /// Resolves the original callable for a replacement function.
    ///
    /// Services the pending export redirect first, so its hooks exist by the
    /// time the first intercepted call asks for an original. Returns `None`
    /// when no installed hook matches; the caller must not call through a
    /// `None`.
    pub fn call(&self, replacement: Address) -> Option<Address> {
        let registry = self.fulfill_export_redirect(self.lock());

        match registry
            .find_by_replacement(replacement)
            .and_then(|hook| hook.callable())
        {
            Some(trampoline) => Some(trampoline),
            None => {
                error!("{}", HookError::Lookup(replacement));
                None
            }
        }
    }

    /// Activation phase of deferred registration, entered from the
    /// intercepted load entry points after the original load succeeded.
    ///
    /// On a stem match against a pending path, the just-loaded module is
    /// matched against the hosting module. The path stays pending if the
    /// batch fails, eligible for a later load with the same stem.
    pub fn module_loaded(&self, path: &Path, module: Address) {
        if module.is_null() {
            return;
        }

        let mut registry = self.lock();

        let Some(index) = registry.find_pending(path) else {
            return;
        };

        info!(
            "installing delayed hooks for {} (just loaded via {})",
            registry.pending_paths[index].display(),
            path.display()
        );

        let replacement_module = self.modules.current_module();
        if self.install_module_hooks(
            &mut registry,
            module,
            replacement_module,
            HookMechanism::FunctionHook,
        ) {
            registry.pending_paths.remove(index);
        }
    }

    /// Matches `target_module`'s named exports against `replacement_module`'s
    /// by exact name and installs one hook per match.
    ///
    /// Partial failure is a normal outcome: the batch succeeds when at least
    /// one hook installs.
    fn install_module_hooks(
        &self,
        registry: &mut Registry,
        target_module: Address,
        replacement_module: Address,
        mechanism: HookMechanism,
    ) -> bool {
        let target_exports = unsafe { exports::module_exports(target_module) };
        let replacement_exports = unsafe { exports::module_exports(replacement_module) };

        if target_exports.is_empty() {
            info!("> empty export table, skipped");
            return false;
        }

        let mut matches = Vec::with_capacity(replacement_exports.len());

        trace!("> analyzing export table:");
        trace!("  +--------------------+---------+----------------------------------------------------+");
        trace!("  | Address            | Ordinal | Name                                               |");
        trace!("  +--------------------+---------+----------------------------------------------------+");

        for symbol in &target_exports {
            let (Some(address), Some(name)) = (symbol.address, symbol.name.as_deref()) else {
                continue;
            };

            let replacement = if hookable(name) {
                replacement_exports
                    .iter()
                    .find(|it| it.name.as_deref() == Some(name))
                    .and_then(|it| it.address)
            } else {
                None
            };

            match replacement {
                Some(replacement_address) => {
                    trace!("  | {address:<18} | {:<7} | {name:<50} | <", symbol.ordinal);
                    matches.push((address, replacement_address));
                }
                None => trace!("  | {address:<18} | {:<7} | {name:<50} |", symbol.ordinal),
            }
        }

        trace!("  +--------------------+---------+----------------------------------------------------+");
        info!("> found {} match(es), installing", matches.len());

        let mut installed = 0usize;
        for (target, replacement) in matches {
            if self.install_single(registry, target, replacement, mechanism) {
                installed += 1;
            }
        }

        if installed != 0 {
            info!("> installed {installed} hook(s)");
            true
        } else {
            warn!("> installed 0 hook(s)");
            false
        }
    }

    fn install_single(
        &self,
        registry: &mut Registry,
        target: Address,
        replacement: Address,
        mechanism: HookMechanism,
    ) -> bool {
        trace!("installing hook for {target} with {replacement} using {mechanism:?}");

        let mut hook = Hook::new(target, replacement);
        hook.trampoline = Some(target);

        hook.status = match mechanism {
            // The replacement module was substituted for the target at load
            // time; there is nothing to patch.
            HookMechanism::Export => HookStatus::Success,
            HookMechanism::FunctionHook => match self.detours.install(target, replacement) {
                Ok(trampoline) => {
                    hook.trampoline = Some(trampoline);
                    HookStatus::Success
                }
                Err(status) => status,
            },
            HookMechanism::VTableHook => {
                // Contract: `install_vtable` records the slot before this
                // path runs.
                let slot = *registry
                    .vtable_slots
                    .get(&target)
                    .expect("vtable slot recorded before install");
                self.write_slot(slot, replacement)
            }
        };

        if hook.status == HookStatus::Success {
            trace!("> succeeded");
            registry.hooks.push((hook, mechanism));
            true
        } else {
            error!("failed to install hook for {target}: {:?}", hook.status);
            false
        }
    }

    fn uninstall_single(
        &self,
        registry: &mut Registry,
        hook: &mut Hook,
        mechanism: HookMechanism,
    ) -> bool {
        trace!("uninstalling hook for {}", hook.target);

        if !hook.is_installed() {
            trace!("> already uninstalled");
            return true;
        }

        if mechanism == HookMechanism::Export {
            // Implicit redirection, nothing to revert; the substituted
            // module is released by the teardown.
            trace!("> skipped");
            return true;
        }

        let status = if mechanism == HookMechanism::FunctionHook {
            self.detours.uninstall(hook.target)
        } else {
            match registry.vtable_slots.get(&hook.target).copied() {
                Some(slot) => {
                    let status = self.write_slot(slot, hook.target);
                    if status == HookStatus::Success {
                        registry.vtable_slots.remove(&hook.target);
                    }
                    status
                }
                // Slot recording already gone; nothing left to restore.
                None => HookStatus::Success,
            }
        };

        hook.status = status;

        if status == HookStatus::Success {
            trace!("> succeeded");
            hook.trampoline = None;
            true
        } else {
            warn!("failed to uninstall hook for {}: {status:?}", hook.target);
            false
        }
    }

    /// Single pointer-sized write under a scoped protection change.
    fn write_slot(&self, slot: Address, value: Address) -> HookStatus {
        let mut write = || unsafe { (slot.as_ptr() as *mut Address).write(value) };

        match unsafe {
            self.modules
                .with_writable(slot, std::mem::size_of::<Address>(), &mut write)
        } {
            Ok(()) => HookStatus::Success,
            Err(err) => {
                error!("vtable slot {slot}: {err}");
                HookStatus::MemoryProtectionFailure
            }
        }
    }

    fn fulfill_export_redirect<'a>(
        &'a self,
        mut registry: MutexGuard<'a, Registry>,
    ) -> MutexGuard<'a, Registry> {
        let Some(path) = registry.export_redirect.take() else {
            return registry;
        };

        info!("installing delayed hooks for {}", path.display());

        // The loader serializes module loads on its own internal lock. A
        // thread inside an intercepted entry point holds that lock while it
        // waits for the registry, so the registry must not be held across
        // the load.
        drop(registry);
        let module = self.load_without_interception(&path);
        let mut registry = self.lock();

        match module {
            Some(module) => {
                registry.export_module = Some(module);
                self.install_module_hooks(
                    &mut registry,
                    module,
                    self.modules.current_module(),
                    HookMechanism::Export,
                );
            }
            None => {
                error!("{}", HookError::ModuleLoad(path.clone()));
                // Stays armed for a later call.
                registry.export_redirect = Some(path);
            }
        }

        registry
    }

    /// Loads a module with the intercepted load entry points suspended, so
    /// the load is not observed by our own detours.
    fn load_without_interception(&self, path: &Path) -> Option<Address> {
        let entry_points = self.modules.load_entry_points();

        for entry in &entry_points {
            self.detours.set_enabled(entry.target, false);
        }
        let module = self.modules.load_module(path);
        for entry in &entry_points {
            self.detours.set_enabled(entry.target, true);
        }

        module
    }
}
