//! Synthetic PE images for exercising the export reader and the matcher
//! without a live loader.
//!
//! Images are flat buffers laid out like a mapped module: RVAs are plain
//! offsets from the buffer start, so the production reader works on them
//! unchanged. Function RVAs point into a padding region inside the buffer,
//! which keeps the resolved addresses inside the allocation.

use crate::common::Address;

fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) struct TestImage {
    bytes: Box<[u8]>,
    names: Vec<String>,
    ordinal_table: usize,
}

impl TestImage {
    pub const ORDINAL_BASE: u16 = 3;

    const SIZE: usize = 0x2000;
    const NT_OFFSET: usize = 0x40;
    const OPTIONAL_OFFSET: usize = Self::NT_OFFSET + 4 + 20;
    // Export data-directory entry of a PE32+ optional header.
    const DIRECTORY_OFFSET: usize = Self::OPTIONAL_OFFSET + 112;
    const EXPORT_DIR: usize = 0x100;
    const TABLES: usize = 0x140;
    const FUNCTION_RVA_BASE: usize = 0x1000;
    const FUNCTION_RVA_STRIDE: usize = 0x20;

    pub fn with_exports(names: &[&str]) -> Self {
        Self::build(names, names.len() as u32, true)
    }

    /// An image whose export directory declares names but zero exported
    /// functions.
    pub fn without_function_addresses(names: &[&str]) -> Self {
        Self::build(names, 0, true)
    }

    /// Well-formed headers, zero-sized export directory.
    pub fn empty() -> Self {
        Self::build(&[], 0, false)
    }

    fn build(names: &[&str], number_of_functions: u32, with_directory: bool) -> Self {
        let mut bytes = vec![0u8; Self::SIZE].into_boxed_slice();

        put_u16(&mut bytes, 0, 0x5a4d); // "MZ"
        put_u32(&mut bytes, 0x3c, Self::NT_OFFSET as u32);
        put_u32(&mut bytes, Self::NT_OFFSET, 0x0000_4550); // "PE\0\0"
        put_u16(&mut bytes, Self::OPTIONAL_OFFSET, 0x020b); // PE32+

        let count = names.len();
        let functions = Self::TABLES;
        let name_table = functions + count * 4;
        let ordinal_table = name_table + count * 4;
        let mut string_cursor = ordinal_table + count * 2;

        if with_directory {
            put_u32(&mut bytes, Self::DIRECTORY_OFFSET, Self::EXPORT_DIR as u32);
            put_u32(&mut bytes, Self::DIRECTORY_OFFSET + 4, 0x100);

            put_u32(&mut bytes, Self::EXPORT_DIR + 16, Self::ORDINAL_BASE as u32);
            put_u32(&mut bytes, Self::EXPORT_DIR + 20, number_of_functions);
            put_u32(&mut bytes, Self::EXPORT_DIR + 24, count as u32);
            put_u32(&mut bytes, Self::EXPORT_DIR + 28, functions as u32);
            put_u32(&mut bytes, Self::EXPORT_DIR + 32, name_table as u32);
            put_u32(&mut bytes, Self::EXPORT_DIR + 36, ordinal_table as u32);
        }

        for (i, name) in names.iter().enumerate() {
            let function_rva = Self::FUNCTION_RVA_BASE + i * Self::FUNCTION_RVA_STRIDE;
            put_u32(&mut bytes, functions + i * 4, function_rva as u32);
            put_u16(&mut bytes, ordinal_table + i * 2, i as u16);

            put_u32(&mut bytes, name_table + i * 4, string_cursor as u32);
            bytes[string_cursor..string_cursor + name.len()].copy_from_slice(name.as_bytes());
            string_cursor += name.len() + 1;
        }

        Self {
            bytes,
            names: names.iter().map(|name| name.to_string()).collect(),
            ordinal_table,
        }
    }

    pub fn base(&self) -> Address {
        Address::new(self.bytes.as_ptr() as *mut _)
    }

    /// Resolved address of the `index`-th export.
    pub fn export_address(&self, index: usize) -> Address {
        Address::from(
            self.base().as_usize() + Self::FUNCTION_RVA_BASE + index * Self::FUNCTION_RVA_STRIDE,
        )
    }

    /// Resolved address of an export, by name.
    pub fn export(&self, name: &str) -> Address {
        let index = self
            .names
            .iter()
            .position(|n| n == name)
            .expect("export name present in image");
        self.export_address(index)
    }

    /// Overwrites the `index`-th name-ordinal entry with an arbitrary value.
    pub fn corrupt_ordinal(&mut self, index: usize, value: u16) {
        put_u16(&mut self.bytes, self.ordinal_table + index * 2, value);
    }
}
