//! In-memory export table reader.
//!
//! Walks the export directory of a module already mapped by the loader, so
//! every RVA in the image is a plain offset from the module base. Access is
//! offset-based and bounds-checked against the counts the directory declares;
//! nothing in the image is trusted to be well-formed.

use crate::common::Address;

/// One named export of a loaded module.
///
/// Transient: produced per [`module_exports`] call, never stored.
#[derive(Debug, Clone)]
pub struct ModuleExport {
    /// Resolved entry address; absent when the image declares no exported
    /// functions or the name's ordinal falls outside the address table.
    pub address: Option<Address>,
    pub name: Option<String>,
    pub ordinal: u16,
}

const DOS_MAGIC: u16 = 0x5a4d; // "MZ"
const DOS_LFANEW_OFFSET: usize = 0x3c;
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const FILE_HEADER_SIZE: usize = 20;
const OPTIONAL_MAGIC_PE32: u16 = 0x010b;
const OPTIONAL_MAGIC_PE32_PLUS: u16 = 0x020b;

/// Offset of the export data-directory entry within the optional header.
const EXPORT_DIRECTORY_PE32: usize = 96;
const EXPORT_DIRECTORY_PE32_PLUS: usize = 112;

// IMAGE_EXPORT_DIRECTORY field offsets.
const EXPORT_ORDINAL_BASE: usize = 16;
const EXPORT_NUMBER_OF_FUNCTIONS: usize = 20;
const EXPORT_NUMBER_OF_NAMES: usize = 24;
const EXPORT_ADDRESS_OF_FUNCTIONS: usize = 28;
const EXPORT_ADDRESS_OF_NAMES: usize = 32;
const EXPORT_ADDRESS_OF_NAME_ORDINALS: usize = 36;

unsafe fn read_u16(base: *const u8, offset: usize) -> u16 {
    unsafe { base.add(offset).cast::<u16>().read_unaligned() }
}

unsafe fn read_u32(base: *const u8, offset: usize) -> u32 {
    unsafe { base.add(offset).cast::<u32>().read_unaligned() }
}

unsafe fn read_c_string(base: *const u8, offset: usize) -> Option<String> {
    if offset == 0 {
        return None;
    }

    let ptr = unsafe { base.add(offset) };
    let len = (0..).take_while(|&i| unsafe { *ptr.add(i) != 0 }).count();
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };

    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Reads the named exports of the module mapped at `module`, in name-table
/// order.
///
/// Returns an empty sequence when the image has no recognizable PE headers or
/// an empty export directory; a module that exports nothing is a valid state,
/// not an error. Ordinal-only exports have no name-table entry and are not
/// surfaced.
///
/// # Safety
///
/// `module` must be the base address of an image mapped by the loader (or a
/// buffer laid out like one), valid for reads across its headers and export
/// tables.
pub unsafe fn module_exports(module: Address) -> Vec<ModuleExport> {
    let base = module.as_ptr() as *const u8;
    if base.is_null() {
        return Vec::new();
    }

    unsafe {
        if read_u16(base, 0) != DOS_MAGIC {
            return Vec::new();
        }

        let nt_offset = read_u32(base, DOS_LFANEW_OFFSET) as usize;
        if read_u32(base, nt_offset) != PE_SIGNATURE {
            return Vec::new();
        }

        let optional = nt_offset + 4 + FILE_HEADER_SIZE;
        let directory = match read_u16(base, optional) {
            OPTIONAL_MAGIC_PE32 => EXPORT_DIRECTORY_PE32,
            OPTIONAL_MAGIC_PE32_PLUS => EXPORT_DIRECTORY_PE32_PLUS,
            _ => return Vec::new(),
        };

        let export_rva = read_u32(base, optional + directory) as usize;
        let export_size = read_u32(base, optional + directory + 4);
        if export_rva == 0 || export_size == 0 {
            return Vec::new();
        }

        let ordinal_base = read_u32(base, export_rva + EXPORT_ORDINAL_BASE) as u16;
        let number_of_functions = read_u32(base, export_rva + EXPORT_NUMBER_OF_FUNCTIONS) as usize;
        let number_of_names = read_u32(base, export_rva + EXPORT_NUMBER_OF_NAMES) as usize;
        let functions = read_u32(base, export_rva + EXPORT_ADDRESS_OF_FUNCTIONS) as usize;
        let names = read_u32(base, export_rva + EXPORT_ADDRESS_OF_NAMES) as usize;
        let ordinals = read_u32(base, export_rva + EXPORT_ADDRESS_OF_NAME_ORDINALS) as usize;

        let mut exports = Vec::with_capacity(number_of_names);

        for i in 0..number_of_names {
            // The ordinal table holds indexes into the function-address
            // table; the export's ordinal is that index plus the declared
            // base.
            let index = read_u16(base, ordinals + i * 2) as usize;
            let ordinal = (index as u16).wrapping_add(ordinal_base);

            let name_rva = read_u32(base, names + i * 4) as usize;
            let name = read_c_string(base, name_rva);

            let address = (number_of_functions > 0 && index < number_of_functions).then(|| {
                let function_rva = read_u32(base, functions + index * 4) as usize;
                Address::new(base.add(function_rva) as *mut _)
            });

            exports.push(ModuleExport {
                address,
                name,
                ordinal,
            });
        }

        exports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_image::TestImage;

    #[test]
    fn named_exports_in_name_table_order() {
        let image = TestImage::with_exports(&["glBegin", "glEnd", "glFlush"]);
        let exports = unsafe { module_exports(image.base()) };

        assert_eq!(exports.len(), 3);
        for (i, name) in ["glBegin", "glEnd", "glFlush"].iter().enumerate() {
            assert_eq!(exports[i].name.as_deref(), Some(*name));
            assert_eq!(exports[i].ordinal, TestImage::ORDINAL_BASE + i as u16);
            assert_eq!(exports[i].address, Some(image.export_address(i)));
        }
    }

    #[test]
    fn empty_export_directory_yields_nothing() {
        let image = TestImage::empty();
        assert!(unsafe { module_exports(image.base()) }.is_empty());
    }

    #[test]
    fn unrecognizable_image_yields_nothing() {
        let garbage = vec![0u8; 0x200];
        let base = Address::new(garbage.as_ptr() as *mut _);
        assert!(unsafe { module_exports(base) }.is_empty());
    }

    #[test]
    fn zero_function_count_leaves_addresses_absent() {
        let image = TestImage::without_function_addresses(&["CreateDXGIFactory"]);
        let exports = unsafe { module_exports(image.base()) };

        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].name.as_deref(), Some("CreateDXGIFactory"));
        assert_eq!(exports[0].address, None);
    }

    #[test]
    fn out_of_range_ordinal_leaves_address_absent() {
        let mut image = TestImage::with_exports(&["D3D11CreateDevice", "D3D11CoreCreateDevice"]);
        image.corrupt_ordinal(1, 0x4000);
        let exports = unsafe { module_exports(image.base()) };

        assert_eq!(exports[0].address, Some(image.export_address(0)));
        assert_eq!(exports[1].address, None);
    }
}
