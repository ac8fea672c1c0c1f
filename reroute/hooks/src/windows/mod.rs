//! Windows implementations of the platform seams, and the loader detours
//! that drive deferred registration.
//!
//! The [`DetourBackend`] is minhook behind [`DetourGuard`]; the [`ModuleApi`]
//! is the Windows loader plus `VirtualProtect`. The `LoadLibraryA`/
//! `LoadLibraryW` detours call through to the real loader first, then hand
//! the loaded path to [`HookManager::module_loaded`] so pending
//! registrations activate.

use std::{
    os::windows::ffi::OsStrExt,
    path::{Path, PathBuf},
    ptr::null_mut,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use minhook_detours_rs::guard::DetourGuard;
use path_stem::{narrow_ptr_to_path, u16_buffer_to_path, wide_ptr_to_path};
use tracing::warn;
use tracing_subscriber::prelude::*;
use winapi::{
    shared::minwindef::{DWORD, FALSE, HMODULE},
    um::{
        libloaderapi::{
            FreeLibrary, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
            GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT, GetModuleFileNameW, GetModuleHandleExW,
            GetModuleHandleW, GetProcAddress, LoadLibraryW,
        },
        memoryapi::VirtualProtect,
        winnt::{LPCSTR, LPCWSTR, PAGE_READWRITE},
    },
};

use crate::{
    common::Address,
    error::{HookError, Result},
    manager::HookManager,
    platform::{DetourBackend, LoadEntryPoint, ModuleApi},
    registry::HookStatus,
};

static MANAGER: OnceLock<HookManager> = OnceLock::new();

/// Initializes the process-wide engine over the Windows loader and the
/// minhook backend. Idempotent; later calls return the existing instance.
pub fn init() -> Result<&'static HookManager> {
    if let Some(manager) = MANAGER.get() {
        return Ok(manager);
    }

    let detours = MinHookDetours::new()?;
    Ok(MANAGER
        .get_or_init(|| HookManager::new(Arc::new(WinModules), Arc::new(detours))))
}

/// The process-wide engine; [`init`] must have succeeded first.
pub fn global() -> &'static HookManager {
    MANAGER.get().expect("hooking engine not initialized")
}

/// Initializes stderr tracing for the injected layer; honors `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(Some(0)).collect()
}

type LoadLibraryAFn = unsafe extern "system" fn(LPCSTR) -> HMODULE;
type LoadLibraryWFn = unsafe extern "system" fn(LPCWSTR) -> HMODULE;

unsafe extern "system" fn load_library_a_detour(file_name: LPCSTR) -> HMODULE {
    let Some(original) = global().call(Address::from(load_library_a_detour as usize)) else {
        return null_mut();
    };
    let original: LoadLibraryAFn = unsafe { std::mem::transmute(original.as_ptr()) };

    let handle = unsafe { original(file_name) };
    if handle.is_null() {
        return handle;
    }

    if let Some(path) = unsafe { narrow_ptr_to_path(file_name as *const u8) } {
        global().module_loaded(&path, Address::new(handle as _));
    }

    handle
}

unsafe extern "system" fn load_library_w_detour(file_name: LPCWSTR) -> HMODULE {
    let Some(original) = global().call(Address::from(load_library_w_detour as usize)) else {
        return null_mut();
    };
    let original: LoadLibraryWFn = unsafe { std::mem::transmute(original.as_ptr()) };

    let handle = unsafe { original(file_name) };
    if handle.is_null() {
        return handle;
    }

    if let Some(path) = unsafe { wide_ptr_to_path(file_name) } {
        global().module_loaded(&path, Address::new(handle as _));
    }

    handle
}

fn current_module_anchor() {}

/// Module and page-protection bookkeeping over the Windows loader.
struct WinModules;

impl ModuleApi for WinModules {
    fn current_module(&self) -> Address {
        let mut handle: HMODULE = null_mut();

        unsafe {
            GetModuleHandleExW(
                GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS
                    | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
                current_module_anchor as usize as _,
                &mut handle,
            );
        }

        Address::new(handle as _)
    }

    fn module_path(&self, module: Address) -> Option<PathBuf> {
        let mut buffer = [0u16; 512];

        let written = unsafe {
            GetModuleFileNameW(module.as_ptr() as _, buffer.as_mut_ptr(), buffer.len() as _)
        };

        (written != 0).then(|| u16_buffer_to_path(&buffer[..written as usize]))
    }

    fn loaded_module(&self, path: &Path) -> Option<Address> {
        let handle = unsafe { GetModuleHandleW(wide(path).as_ptr()) };
        (!handle.is_null()).then(|| Address::new(handle as _))
    }

    fn load_module(&self, path: &Path) -> Option<Address> {
        let handle = unsafe { LoadLibraryW(wide(path).as_ptr()) };
        (!handle.is_null()).then(|| Address::new(handle as _))
    }

    fn free_module(&self, module: Address) {
        unsafe {
            FreeLibrary(module.as_ptr() as _);
        }
    }

    fn load_entry_points(&self) -> Vec<LoadEntryPoint> {
        let kernel32 = unsafe { GetModuleHandleW(wide(Path::new("kernel32.dll")).as_ptr()) };
        if kernel32.is_null() {
            return Vec::new();
        }

        [
            ("LoadLibraryA\0", load_library_a_detour as usize),
            ("LoadLibraryW\0", load_library_w_detour as usize),
        ]
        .iter()
        .filter_map(|&(name, detour)| {
            let target = unsafe { GetProcAddress(kernel32, name.as_ptr() as LPCSTR) };
            (!target.is_null()).then(|| LoadEntryPoint {
                target: Address::from(target as usize),
                detour: Address::from(detour),
            })
        })
        .collect()
    }

    unsafe fn with_writable(
        &self,
        addr: Address,
        len: usize,
        write: &mut dyn FnMut(),
    ) -> Result<()> {
        let mut previous: DWORD = 0;

        if unsafe { VirtualProtect(addr.as_ptr(), len, PAGE_READWRITE, &mut previous) } == FALSE {
            return Err(HookError::MemoryProtection);
        }

        write();

        let mut restored: DWORD = 0;
        if unsafe { VirtualProtect(addr.as_ptr(), len, previous, &mut restored) } == FALSE {
            warn!("failed to restore page protection at {addr}");
        }

        Ok(())
    }
}

type RawFn = unsafe extern "system" fn();

/// The minhook detour primitive.
struct MinHookDetours {
    guard: Mutex<DetourGuard<'static>>,
}

// The guard is only touched while the mutex is held.
unsafe impl Send for MinHookDetours {}
unsafe impl Sync for MinHookDetours {}

impl MinHookDetours {
    fn new() -> Result<Self> {
        let guard = DetourGuard::new().map_err(|err| HookError::BackendInit(err.to_string()))?;

        Ok(Self {
            guard: Mutex::new(guard),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DetourGuard<'static>> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DetourBackend for MinHookDetours {
    fn install(
        &self,
        target: Address,
        replacement: Address,
    ) -> std::result::Result<Address, HookStatus> {
        let mut guard = self.lock();

        let trampoline = match guard
            .create_hook::<RawFn>(target.as_ptr() as _, replacement.as_ptr() as _)
        {
            Ok(original) => Address::from(*original as usize),
            Err(err) => {
                warn!("creating detour for {target} failed: {err}");
                return Err(HookStatus::UnsupportedFunction);
            }
        };

        if let Err(err) = guard.enable_hook(target.as_ptr() as _) {
            warn!("enabling detour for {target} failed: {err}");
            return Err(HookStatus::AllocationFailure);
        }

        Ok(trampoline)
    }

    fn uninstall(&self, target: Address) -> HookStatus {
        match self.lock().remove_hook(target.as_ptr() as _) {
            Ok(()) => HookStatus::Success,
            Err(err) => {
                warn!("removing detour for {target} failed: {err}");
                HookStatus::Unknown
            }
        }
    }

    fn set_enabled(&self, target: Address, enabled: bool) {
        let mut guard = self.lock();

        let result = if enabled {
            guard.enable_hook(target.as_ptr() as _)
        } else {
            guard.disable_hook(target.as_ptr() as _)
        };

        if let Err(err) = result {
            warn!("toggling detour for {target} failed: {err}");
        }
    }
}
