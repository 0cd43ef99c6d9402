//! Builds small managed PE images in memory.
//!
//! Every table stays far below 2^16 rows and every heap below 64 KiB, so all
//! indexes are two bytes wide and the layout needs no width computation.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TYPE_NOT_PUBLIC: u32 = 0x0000_0000;
pub const TYPE_PUBLIC: u32 = 0x0000_0001;
pub const TYPE_NESTED_PUBLIC: u32 = 0x0000_0002;

pub const METHOD_PRIVATE: u16 = 0x0001;
pub const METHOD_PUBLIC: u16 = 0x0006;
pub const METHOD_STATIC: u16 = 0x0010;
pub const METHOD_SPECIAL_NAME: u16 = 0x0800;

pub const SEMANTICS_SETTER: u16 = 0x0001;
pub const SEMANTICS_GETTER: u16 = 0x0002;

const MODULE: u8 = 0x00;
const TYPE_REF: u8 = 0x01;
const TYPE_DEF: u8 = 0x02;
const METHOD_DEF: u8 = 0x06;
const PARAM: u8 = 0x08;
const PROPERTY_MAP: u8 = 0x15;
const PROPERTY: u8 = 0x17;
const METHOD_SEMANTICS: u8 = 0x18;
const TYPE_SPEC: u8 = 0x1b;
const ASSEMBLY: u8 = 0x20;
const ASSEMBLY_REF: u8 = 0x23;
const EXPORTED_TYPE: u8 = 0x27;
const NESTED_CLASS: u8 = 0x29;
const GENERIC_PARAM: u8 = 0x2a;

const SECTION_RVA: u32 = 0x2000;
const SECTION_ALIGNMENT: u32 = 0x2000;
const FILE_ALIGNMENT: usize = 0x200;
/// `CNT_CODE | MEM_EXECUTE | MEM_READ`
const TEXT_CHARACTERISTICS: u32 = 0x6000_0020;
/// Module version id of every built image
const MVID: [u8; 16] = [
    0x5d, 0x2e, 0x31, 0x8a, 0x0c, 0x44, 0x4f, 0x1b, 0x9e, 0x77, 0x10, 0x3a, 0x6b, 0x52, 0xc4, 0x01,
];
const CLI_HEADER_SIZE: usize = 72;
const PE_OFFSET: usize = 0x80;
const OPTIONAL_HEADER: usize = PE_OFFSET + 4 + 20;
const OPTIONAL_HEADER_SIZE: usize = 0xe0;
/// Data directory 14 of a PE32 optional header
pub const CLI_DIRECTORY_OFFSET: usize = OPTIONAL_HEADER + 96 + 14 * 8;

/// `TypeDefOrRef` coded index / encoded token of a `TypeDef` row
pub fn type_def_token(row: u32) -> u16 {
    (row << 2) as u16
}

/// `TypeDefOrRef` coded index / encoded token of a `TypeRef` row
pub fn type_ref_token(row: u32) -> u16 {
    ((row << 2) | 1) as u16
}

/// `TypeDefOrRef` coded index / encoded token of a `TypeSpec` row
pub fn type_spec_token(row: u32) -> u16 {
    ((row << 2) | 2) as u16
}

/// Signature blob helpers
pub mod sig {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const I4: u8 = 0x08;
    pub const STRING: u8 = 0x0e;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const GENERICINST: u8 = 0x15;

    const HASTHIS: u8 = 0x20;
    const PROPERTY: u8 = 0x08;

    /// Instance `MethodDefSig`
    pub fn instance(ret: &[u8], params: &[&[u8]]) -> Vec<u8> {
        method(HASTHIS, ret, params)
    }

    /// Static `MethodDefSig`
    pub fn static_method(ret: &[u8], params: &[&[u8]]) -> Vec<u8> {
        method(0, ret, params)
    }

    fn method(head: u8, ret: &[u8], params: &[&[u8]]) -> Vec<u8> {
        let mut blob = vec![head, params.len() as u8];
        blob.extend_from_slice(ret);
        for param in params {
            blob.extend_from_slice(param);
        }
        blob
    }

    /// Instance `PropertySig` without indexer parameters
    pub fn property(ty: &[u8]) -> Vec<u8> {
        indexer(ty, &[])
    }

    /// Instance `PropertySig` with indexer parameters
    pub fn indexer(ty: &[u8], params: &[&[u8]]) -> Vec<u8> {
        let mut blob = vec![HASTHIS | PROPERTY, params.len() as u8];
        blob.extend_from_slice(ty);
        for param in params {
            blob.extend_from_slice(param);
        }
        blob
    }

    /// `CLASS` reference to an encoded token
    pub fn class(token: u16) -> Vec<u8> {
        vec![CLASS, token as u8]
    }
}

enum Cell {
    Short(u16),
    Long(u32),
}

use Cell::{Long, Short};

/// Accumulates heaps and table rows, then lays out a PE32 image
pub struct ImageBuilder {
    strings: Vec<u8>,
    blobs: Vec<u8>,
    tables: BTreeMap<u8, (u32, Vec<u8>)>,
}

impl ImageBuilder {
    /// An assembly called `name` with its `<Module>` type
    pub fn new(name: &str) -> Self {
        let mut builder = Self::netmodule(&format!("{}.dll", name));
        let name = builder.string(name);
        builder.row(
            ASSEMBLY,
            &[
                Long(0x8004),
                Short(1),
                Short(0),
                Short(0),
                Short(0),
                Long(0),
                Short(0),
                Short(name),
                Short(0),
            ],
        );
        builder
    }

    /// A module without an `Assembly` row
    pub fn netmodule(module_name: &str) -> Self {
        let mut builder = Self {
            strings: vec![0],
            blobs: vec![0],
            tables: BTreeMap::new(),
        };
        let module = builder.string(module_name);
        builder.row(MODULE, &[Short(0), Short(module), Short(1), Short(0), Short(0)]);
        builder.type_def(TYPE_NOT_PUBLIC, "", "<Module>", 0);
        builder
    }

    pub fn string(&mut self, value: &str) -> u16 {
        if value.is_empty() {
            return 0;
        }
        let index = self.strings.len() as u16;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        index
    }

    pub fn blob(&mut self, value: &[u8]) -> u16 {
        assert!(value.len() < 0x80, "test blobs use one-byte lengths");
        let index = self.blobs.len() as u16;
        self.blobs.push(value.len() as u8);
        self.blobs.extend_from_slice(value);
        index
    }

    fn count(&self, table: u8) -> u32 {
        self.tables.get(&table).map(|(count, _)| *count).unwrap_or(0)
    }

    fn row(&mut self, table: u8, cells: &[Cell]) -> u32 {
        let (count, bytes) = self.tables.entry(table).or_insert_with(|| (0, Vec::new()));
        for cell in cells {
            match cell {
                Short(value) => bytes.extend_from_slice(&value.to_le_bytes()),
                Long(value) => bytes.extend_from_slice(&value.to_le_bytes()),
            }
        }
        *count += 1;
        *count
    }

    /// Adds a type; methods added afterwards belong to it
    pub fn type_def(&mut self, flags: u32, namespace: &str, name: &str, extends: u16) -> u32 {
        let name = self.string(name);
        let namespace = self.string(namespace);
        let method_list = (self.count(METHOD_DEF) + 1) as u16;
        self.row(
            TYPE_DEF,
            &[
                Long(flags),
                Short(name),
                Short(namespace),
                Short(extends),
                Short(1),
                Short(method_list),
            ],
        )
    }

    /// Adds a method to the last type; params added afterwards belong to it
    pub fn method(&mut self, flags: u16, name: &str, signature: &[u8]) -> u32 {
        let name = self.string(name);
        let signature = self.blob(signature);
        let param_list = (self.count(PARAM) + 1) as u16;
        self.row(
            METHOD_DEF,
            &[
                Long(0),
                Short(0),
                Short(flags),
                Short(name),
                Short(signature),
                Short(param_list),
            ],
        )
    }

    pub fn param(&mut self, sequence: u16, name: &str) -> u32 {
        let name = self.string(name);
        self.row(PARAM, &[Short(0), Short(sequence), Short(name)])
    }

    /// Starts the property list of `parent`; properties added afterwards
    /// belong to it
    pub fn property_map(&mut self, parent: u32) -> u32 {
        let property_list = (self.count(PROPERTY) + 1) as u16;
        self.row(PROPERTY_MAP, &[Short(parent as u16), Short(property_list)])
    }

    pub fn property(&mut self, name: &str, signature: &[u8]) -> u32 {
        let name = self.string(name);
        let signature = self.blob(signature);
        self.row(PROPERTY, &[Short(0), Short(name), Short(signature)])
    }

    pub fn semantics(&mut self, semantics: u16, method: u32, property: u32) -> u32 {
        let association = ((property << 1) | 1) as u16;
        self.row(
            METHOD_SEMANTICS,
            &[Short(semantics), Short(method as u16), Short(association)],
        )
    }

    pub fn type_spec(&mut self, signature: &[u8]) -> u32 {
        let signature = self.blob(signature);
        self.row(TYPE_SPEC, &[Short(signature)])
    }

    pub fn assembly_ref(&mut self, name: &str) -> u32 {
        let name = self.string(name);
        self.row(
            ASSEMBLY_REF,
            &[
                Short(1),
                Short(0),
                Short(0),
                Short(0),
                Long(0),
                Short(0),
                Short(name),
                Short(0),
                Short(0),
            ],
        )
    }

    /// A `TypeRef` scoped to an `AssemblyRef`
    pub fn type_ref(&mut self, assembly_ref: u32, namespace: &str, name: &str) -> u32 {
        let scope = ((assembly_ref << 2) | 2) as u16;
        let name = self.string(name);
        let namespace = self.string(namespace);
        self.row(TYPE_REF, &[Short(scope), Short(name), Short(namespace)])
    }

    /// An `ExportedType` forwarding `namespace.name` to an `AssemblyRef`
    pub fn forward(&mut self, assembly_ref: u32, namespace: &str, name: &str) -> u32 {
        let implementation = ((assembly_ref << 2) | 1) as u16;
        let name = self.string(name);
        let namespace = self.string(namespace);
        self.row(
            EXPORTED_TYPE,
            &[
                Long(0x0020_0000),
                Long(0),
                Short(name),
                Short(namespace),
                Short(implementation),
            ],
        )
    }

    pub fn nested_class(&mut self, nested: u32, enclosing: u32) -> u32 {
        self.row(NESTED_CLASS, &[Short(nested as u16), Short(enclosing as u16)])
    }

    /// Generic parameter of a `TypeDef`
    pub fn generic_param(&mut self, number: u16, owner: u32, name: &str) -> u32 {
        let name = self.string(name);
        let owner = (owner << 1) as u16;
        self.row(GENERIC_PARAM, &[Short(number), Short(0), Short(owner), Short(name)])
    }

    /// Lays out the complete image
    pub fn build(&self) -> Vec<u8> {
        let metadata = metadata_root(&[
            ("#~", self.tables_stream()),
            ("#Strings", padded(self.strings.clone())),
            ("#US", padded(vec![0])),
            ("#GUID", MVID.to_vec()),
            ("#Blob", padded(self.blobs.clone())),
        ]);
        pe_image(&metadata)
    }

    /// Writes the image to `dir/file_name`
    pub fn write(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        fs::write(&path, self.build()).unwrap();
        path
    }

    fn tables_stream(&self) -> Vec<u8> {
        let valid = self
            .tables
            .keys()
            .fold(0u64, |valid, table| valid | (1u64 << *table));

        let mut stream = vec![0, 0, 0, 0, 2, 0, 0, 1];
        stream.extend_from_slice(&valid.to_le_bytes());
        stream.extend_from_slice(&0u64.to_le_bytes());
        for (count, _) in self.tables.values() {
            stream.extend_from_slice(&count.to_le_bytes());
        }
        for (_, rows) in self.tables.values() {
            stream.extend_from_slice(rows);
        }
        padded(stream)
    }
}

/// Clears the CLI header directory, turning the image into a native one
pub fn strip_cli_header(image: &mut [u8]) {
    image[CLI_DIRECTORY_OFFSET..CLI_DIRECTORY_OFFSET + 8].fill(0);
}

fn padded(mut bytes: Vec<u8>) -> Vec<u8> {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn metadata_root(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let version = b"v4.0.30319\0\0";
    let headers_len: usize = streams
        .iter()
        .map(|(name, _)| 8 + ((name.len() + 4) & !3))
        .sum();
    let root_len = 16 + version.len() + 4 + headers_len;

    let mut root = Vec::new();
    root.extend_from_slice(b"BSJB");
    root.extend_from_slice(&1u16.to_le_bytes());
    root.extend_from_slice(&1u16.to_le_bytes());
    root.extend_from_slice(&0u32.to_le_bytes());
    root.extend_from_slice(&(version.len() as u32).to_le_bytes());
    root.extend_from_slice(version);
    root.extend_from_slice(&0u16.to_le_bytes());
    root.extend_from_slice(&(streams.len() as u16).to_le_bytes());

    let mut offset = root_len;
    for (name, data) in streams {
        root.extend_from_slice(&(offset as u32).to_le_bytes());
        root.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let mut padded_name = name.as_bytes().to_vec();
        padded_name.push(0);
        root.extend_from_slice(&padded(padded_name));
        offset += data.len();
    }
    assert_eq!(root.len(), root_len);

    for (_, data) in streams {
        root.extend_from_slice(data);
    }
    root
}

fn pe_image(metadata: &[u8]) -> Vec<u8> {
    let mut section = vec![0u8; CLI_HEADER_SIZE];
    put_u32(&mut section, 0, CLI_HEADER_SIZE as u32);
    put_u16(&mut section, 4, 2);
    put_u16(&mut section, 6, 5);
    put_u32(&mut section, 8, SECTION_RVA + CLI_HEADER_SIZE as u32);
    put_u32(&mut section, 12, metadata.len() as u32);
    put_u32(&mut section, 16, 1);
    section.extend_from_slice(metadata);
    let virtual_size = section.len();
    section.resize(virtual_size.div_ceil(FILE_ALIGNMENT) * FILE_ALIGNMENT, 0);

    let mut image = vec![0u8; FILE_ALIGNMENT];
    image[..2].copy_from_slice(b"MZ");
    put_u32(&mut image, 0x3c, PE_OFFSET as u32);
    image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

    let coff = PE_OFFSET + 4;
    put_u16(&mut image, coff, 0x014c);
    put_u16(&mut image, coff + 2, 1);
    put_u16(&mut image, coff + 16, OPTIONAL_HEADER_SIZE as u16);
    put_u16(&mut image, coff + 18, 0x2102);

    let image_size = SECTION_RVA + (virtual_size as u32).div_ceil(SECTION_ALIGNMENT) * SECTION_ALIGNMENT;
    put_u16(&mut image, OPTIONAL_HEADER, 0x010b);
    put_u32(&mut image, OPTIONAL_HEADER + 4, section.len() as u32);
    put_u32(&mut image, OPTIONAL_HEADER + 20, SECTION_RVA);
    put_u32(&mut image, OPTIONAL_HEADER + 28, 0x0040_0000);
    put_u32(&mut image, OPTIONAL_HEADER + 32, SECTION_ALIGNMENT);
    put_u32(&mut image, OPTIONAL_HEADER + 36, FILE_ALIGNMENT as u32);
    put_u16(&mut image, OPTIONAL_HEADER + 40, 4);
    put_u16(&mut image, OPTIONAL_HEADER + 48, 4);
    put_u32(&mut image, OPTIONAL_HEADER + 56, image_size);
    put_u32(&mut image, OPTIONAL_HEADER + 60, FILE_ALIGNMENT as u32);
    put_u16(&mut image, OPTIONAL_HEADER + 68, 3);
    put_u16(&mut image, OPTIONAL_HEADER + 70, 0x8540);
    put_u32(&mut image, OPTIONAL_HEADER + 72, 0x0010_0000);
    put_u32(&mut image, OPTIONAL_HEADER + 76, 0x1000);
    put_u32(&mut image, OPTIONAL_HEADER + 80, 0x0010_0000);
    put_u32(&mut image, OPTIONAL_HEADER + 84, 0x1000);
    put_u32(&mut image, OPTIONAL_HEADER + 92, 16);
    put_u32(&mut image, CLI_DIRECTORY_OFFSET, SECTION_RVA);
    put_u32(&mut image, CLI_DIRECTORY_OFFSET + 4, CLI_HEADER_SIZE as u32);

    let header = OPTIONAL_HEADER + OPTIONAL_HEADER_SIZE;
    image[header..header + 5].copy_from_slice(b".text");
    put_u32(&mut image, header + 8, virtual_size as u32);
    put_u32(&mut image, header + 12, SECTION_RVA);
    put_u32(&mut image, header + 16, section.len() as u32);
    put_u32(&mut image, header + 20, FILE_ALIGNMENT as u32);
    put_u32(&mut image, header + 36, TEXT_CHARACTERISTICS);

    image.extend_from_slice(&section);
    image
}
