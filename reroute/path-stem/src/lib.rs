//! Module path helpers shared by the hooking engine.
//!
//! The loader entry points hand us module names as null-terminated narrow or
//! wide buffers, in whatever case the caller felt like using, sometimes as a
//! bare name and sometimes as a fully qualified path. Matching a registered
//! module against a just-loaded one therefore happens on the filename *stem*
//! (`"C:\x\FOO.DLL"` and `"foo.dll"` both have the stem `foo`), compared
//! case-insensitively.

use std::path::{Path, PathBuf};

/// Filename stem of `path`, lowercased for comparison.
///
/// `None` when the path has no filename component (e.g. an empty path or a
/// bare directory prefix). Separators are recognized regardless of the host:
/// the loader hands out backslash paths even when this code is exercised on
/// another OS.
pub fn module_stem<P: AsRef<Path>>(path: P) -> Option<String> {
    let path = path.as_ref().to_string_lossy();
    let name = path
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())?;

    let stem = match name.rfind('.') {
        // A lone leading dot is part of the name, not an extension marker.
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    };

    Some(stem.to_lowercase())
}

/// Case-insensitive filename-stem equality.
///
/// Paths without a filename component never match anything, including each
/// other.
pub fn stems_match<P: AsRef<Path>, Q: AsRef<Path>>(a: P, b: Q) -> bool {
    match (module_stem(a), module_stem(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Decodes a null-terminated narrow buffer into a path.
///
/// Invalid UTF-8 is decoded lossily; module names the loader accepts are
/// ASCII in practice.
pub fn u8_buffer_to_path<T: AsRef<[u8]>>(buffer: T) -> PathBuf {
    let buffer = buffer.as_ref();
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());

    PathBuf::from(String::from_utf8_lossy(&buffer[..len]).into_owned())
}

/// Decodes a null-terminated wide (UTF-16) buffer into a path.
pub fn u16_buffer_to_path<T: AsRef<[u16]>>(buffer: T) -> PathBuf {
    let buffer = buffer.as_ref();
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());

    PathBuf::from(String::from_utf16_lossy(&buffer[..len]))
}

/// Decodes a null-terminated narrow string pointer into a path.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated narrow string.
pub unsafe fn narrow_ptr_to_path(ptr: *const u8) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }

    let len = (0..).take_while(|&i| unsafe { *ptr.offset(i) != 0 }).count();
    let slice = unsafe { std::slice::from_raw_parts(ptr, len) };

    Some(PathBuf::from(String::from_utf8_lossy(slice).into_owned()))
}

/// Decodes a null-terminated wide string pointer into a path.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated wide string.
pub unsafe fn wide_ptr_to_path(ptr: *const u16) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }

    let len = (0..).take_while(|&i| unsafe { *ptr.offset(i) != 0 }).count();
    let slice = unsafe { std::slice::from_raw_parts(ptr, len) };

    Some(PathBuf::from(String::from_utf16_lossy(slice)))
}
