//! Loading .NET assemblies from their PE images.
//!
//! dotscope parses the PE container, the metadata root and the tables
//! stream. [`AssemblyImage`] copies the rows it needs into owned records
//! and builds its lookup indexes (nesting, property lists, accessors,
//! generic parameters, types by name, forwarded types) once at load time,
//! so nothing borrows from the file after loading.

pub mod resolver;
pub mod signature;

use crate::error::{Error, Result};
use crate::reflect::TypeSig;
use dotscope::prelude::{
    AssemblyRaw, AssemblyRefRaw, CodedIndex, ExportedTypeRaw, GenericParamRaw, MethodDefRaw,
    MethodSemanticsRaw, ModuleRaw, NestedClassRaw, ParamRaw, PropertyMapRaw, PropertyRaw, TableId,
    TypeDefRaw, TypeRefRaw, TypeSpecRaw,
};
use dotscope::{CilAssemblyView, File};
use signature::{parse_type_spec, TypeLookup, TypeTable, TypeToken, MAX_SIGNATURE_DEPTH};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub use resolver::AssemblyResolver;

/// `MethodSemanticsAttributes.Setter`
const SEMANTICS_SETTER: u32 = 0x0001;
/// `MethodSemanticsAttributes.Getter`
const SEMANTICS_GETTER: u32 = 0x0002;

/// Collects every row of a metadata table, in row order
macro_rules! rows {
    ($tables:expr, $raw:ty) => {
        $tables
            .table::<$raw>()
            .map(|table| table.iter().collect::<Vec<$raw>>())
            .unwrap_or_default()
    };
}

/// Owner of a generic parameter list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericOwner {
    /// A `TypeDef` row
    Type(u32),
    /// A `MethodDef` row
    Method(u32),
}

/// Get/set accessor rows of one property
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyAccessors {
    /// `MethodDef` row of the getter
    pub getter: Option<u32>,
    /// `MethodDef` row of the setter
    pub setter: Option<u32>,
}

/// A `TypeDef` row
#[derive(Debug, Clone)]
pub struct TypeDefRecord {
    /// `TypeAttributes`
    pub flags: u32,
    /// Simple name
    pub name: String,
    /// Namespace as declared; empty for nested types
    pub namespace: String,
    /// Base type, if any
    pub extends: Option<TypeToken>,
    methods: Range<u32>,
}

/// Where a `TypeRef` is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionScope {
    /// This module (a `Module` scope or the null scope)
    CurrentModule,
    /// Another assembly, by `AssemblyRef` row
    AssemblyRef(u32),
    /// Nested in another `TypeRef`
    Enclosing(u32),
    /// `ModuleRef` scopes, which are not followed
    Other,
}

/// A `TypeRef` row
#[derive(Debug, Clone)]
pub struct TypeRefRecord {
    /// Simple name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Defining scope
    pub scope: ResolutionScope,
}

/// A `MethodDef` row
#[derive(Debug, Clone)]
pub struct MethodRecord {
    /// `MethodAttributes`
    pub flags: u32,
    /// Method name
    pub name: String,
    /// `MethodDefSig` blob
    pub signature: Vec<u8>,
    params: Range<u32>,
}

/// A `Param` row
#[derive(Debug, Clone)]
pub struct ParamRecord {
    /// Position; 0 is the return value
    pub sequence: u32,
    /// Parameter name
    pub name: String,
}

/// A `Property` row
#[derive(Debug, Clone)]
pub struct PropertyRecord {
    /// Property name
    pub name: String,
    /// `PropertySig` blob
    pub signature: Vec<u8>,
}

/// A loaded .NET assembly
#[derive(Debug)]
pub struct AssemblyImage {
    path: Option<PathBuf>,
    name: String,
    runtime_version: String,
    type_defs: Vec<TypeDefRecord>,
    type_refs: Vec<TypeRefRecord>,
    type_specs: Vec<Vec<u8>>,
    methods: Vec<MethodRecord>,
    params: Vec<ParamRecord>,
    properties: Vec<PropertyRecord>,
    assembly_refs: Vec<String>,
    /// Per `TypeDef`: full name and the namespace of its outermost type
    qualified: Vec<(String, String)>,
    nesting: HashMap<u32, u32>,
    property_lists: HashMap<u32, Range<u32>>,
    accessors: HashMap<u32, PropertyAccessors>,
    generic_params: HashMap<GenericOwner, Vec<String>>,
    types_by_name: HashMap<(String, String), u32>,
    forwards: HashMap<(String, String), u32>,
}

impl AssemblyImage {
    /// Reads and parses the assembly at `path`
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading assembly {}", path.display());
        let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        let mut image = Self::from_bytes(data)?;
        image.path = Some(path.to_path_buf());
        Ok(image)
    }

    /// Parses an assembly already held in memory
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let file = File::from_mem(data).map_err(Error::load)?;
        if !file.is_clr() {
            return Err(Error::NotManagedAssembly);
        }
        let view = CilAssemblyView::from_mem(file.into_data()).map_err(Error::load)?;
        let image = Self::from_view(&view)?;

        debug!(
            "Loaded assembly '{}' (runtime {}): {} types, {} methods",
            image.name,
            image.runtime_version,
            image.type_defs.len(),
            image.methods.len()
        );
        Ok(image)
    }

    fn from_view(view: &CilAssemblyView) -> Result<Self> {
        let tables = view.tables().ok_or(Error::MissingStream { name: "#~" })?;
        let strings = view.strings().ok_or(Error::MissingStream { name: "#Strings" })?;
        let blobs = view.blobs();

        let string = |index: u32| -> Result<String> {
            strings
                .get(index as usize)
                .map(str::to_string)
                .map_err(|e| Error::invalid_image(format!("#Strings[{:#x}]: {}", index, e)))
        };
        let blob = |index: u32| -> Result<Vec<u8>> {
            let heap = blobs.ok_or(Error::MissingStream { name: "#Blob" })?;
            heap.get(index as usize)
                .map(<[u8]>::to_vec)
                .map_err(|e| Error::invalid_image(format!("#Blob[{:#x}]: {}", index, e)))
        };

        let params = rows!(tables, ParamRaw)
            .iter()
            .map(|raw| {
                Ok(ParamRecord {
                    sequence: u32::from(raw.sequence),
                    name: string(raw.name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let method_rows = rows!(tables, MethodDefRaw);
        let param_ranges = list_ranges(
            &method_rows.iter().map(|m| m.param_list).collect::<Vec<_>>(),
            params.len(),
        );
        let methods = method_rows
            .iter()
            .zip(param_ranges)
            .map(|(raw, params)| {
                Ok(MethodRecord {
                    flags: u32::from(raw.flags),
                    name: string(raw.name)?,
                    signature: blob(raw.signature)?,
                    params,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let type_rows = rows!(tables, TypeDefRaw);
        let method_ranges = list_ranges(
            &type_rows.iter().map(|t| t.method_list).collect::<Vec<_>>(),
            methods.len(),
        );
        let type_defs = type_rows
            .iter()
            .zip(method_ranges)
            .map(|(raw, methods)| {
                Ok(TypeDefRecord {
                    flags: raw.flags,
                    name: string(raw.type_name)?,
                    namespace: string(raw.type_namespace)?,
                    extends: TypeToken::from_coded(&raw.extends),
                    methods,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let type_refs = rows!(tables, TypeRefRaw)
            .iter()
            .map(|raw| {
                Ok(TypeRefRecord {
                    name: string(raw.type_name)?,
                    namespace: string(raw.type_namespace)?,
                    scope: resolution_scope(&raw.resolution_scope),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let type_specs = rows!(tables, TypeSpecRaw)
            .iter()
            .map(|raw| blob(raw.signature))
            .collect::<Result<Vec<_>>>()?;

        let properties = rows!(tables, PropertyRaw)
            .iter()
            .map(|raw| {
                Ok(PropertyRecord {
                    name: string(raw.name)?,
                    signature: blob(raw.signature)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let assembly_refs = rows!(tables, AssemblyRefRaw)
            .iter()
            .map(|raw| string(raw.name))
            .collect::<Result<Vec<_>>>()?;

        let name = match rows!(tables, AssemblyRaw).first() {
            Some(assembly) => string(assembly.name)?,
            // netmodules have no Assembly row; fall back to the module file stem
            None => match rows!(tables, ModuleRaw).first() {
                Some(module) => {
                    let module = string(module.name)?;
                    module
                        .rsplit_once('.')
                        .map(|(stem, _)| stem.to_string())
                        .unwrap_or(module)
                }
                None => String::new(),
            },
        };

        let nesting: HashMap<u32, u32> = rows!(tables, NestedClassRaw)
            .iter()
            .map(|raw| (raw.nested_class, raw.enclosing_class))
            .collect();

        let map_rows = rows!(tables, PropertyMapRaw);
        let property_ranges = list_ranges(
            &map_rows.iter().map(|m| m.property_list).collect::<Vec<_>>(),
            properties.len(),
        );
        let property_lists: HashMap<u32, Range<u32>> = map_rows
            .iter()
            .map(|m| m.parent)
            .zip(property_ranges)
            .collect();

        let mut accessors: HashMap<u32, PropertyAccessors> = HashMap::new();
        for raw in rows!(tables, MethodSemanticsRaw) {
            if !matches!(raw.association.tag, TableId::Property) {
                continue;
            }
            let entry = accessors.entry(raw.association.row).or_default();
            let semantics = u32::from(raw.semantics);
            if semantics & SEMANTICS_GETTER != 0 {
                entry.getter = Some(raw.method);
            }
            if semantics & SEMANTICS_SETTER != 0 {
                entry.setter = Some(raw.method);
            }
        }

        let mut numbered: HashMap<GenericOwner, Vec<(u32, String)>> = HashMap::new();
        for raw in rows!(tables, GenericParamRaw) {
            let owner = match raw.owner.tag {
                TableId::TypeDef => GenericOwner::Type(raw.owner.row),
                TableId::MethodDef => GenericOwner::Method(raw.owner.row),
                _ => continue,
            };
            numbered
                .entry(owner)
                .or_default()
                .push((u32::from(raw.number), string(raw.name)?));
        }
        let generic_params = numbered
            .into_iter()
            .map(|(owner, mut params)| {
                params.sort_by_key(|(number, _)| *number);
                (owner, params.into_iter().map(|(_, name)| name).collect())
            })
            .collect();

        let qualified = (1..=type_defs.len() as u32)
            .map(|row| qualify_type_def(&type_defs, &nesting, row))
            .collect::<Result<Vec<_>>>()?;

        let mut types_by_name = HashMap::new();
        for (index, record) in type_defs.iter().enumerate() {
            let row = index as u32 + 1;
            if !nesting.contains_key(&row) {
                types_by_name
                    .entry((record.namespace.clone(), record.name.clone()))
                    .or_insert(row);
            }
        }

        let mut forwards = HashMap::new();
        for raw in rows!(tables, ExportedTypeRaw) {
            if matches!(raw.implementation.tag, TableId::AssemblyRef) {
                forwards
                    .entry((string(raw.namespace)?, string(raw.name)?))
                    .or_insert(raw.implementation.row);
            }
        }

        trace!(
            "Indexed {} nested types, {} property lists, {} properties with accessors, {} forwards",
            nesting.len(),
            property_lists.len(),
            accessors.len(),
            forwards.len()
        );

        Ok(Self {
            path: None,
            name,
            runtime_version: view.metadata_root().version.clone(),
            type_defs,
            type_refs,
            type_specs,
            methods,
            params,
            properties,
            assembly_refs,
            qualified,
            nesting,
            property_lists,
            accessors,
            generic_params,
            types_by_name,
            forwards,
        })
    }

    /// Assembly simple name, e.g. `cYo.Common`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the image was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runtime version string from the metadata root, e.g. `v4.0.30319`
    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    /// Number of `TypeDef` rows
    pub fn type_count(&self) -> u32 {
        self.type_defs.len() as u32
    }

    /// A `TypeDef` row
    pub fn type_def(&self, row: u32) -> Result<&TypeDefRecord> {
        record(&self.type_defs, "TypeDef", row)
    }

    /// A `TypeRef` row
    pub fn type_ref(&self, row: u32) -> Result<&TypeRefRecord> {
        record(&self.type_refs, "TypeRef", row)
    }

    /// Signature blob of a `TypeSpec` row
    pub fn type_spec(&self, row: u32) -> Result<&[u8]> {
        record(&self.type_specs, "TypeSpec", row).map(Vec::as_slice)
    }

    /// A `MethodDef` row
    pub fn method_def(&self, row: u32) -> Result<&MethodRecord> {
        record(&self.methods, "MethodDef", row)
    }

    /// A `Param` row
    pub fn param(&self, row: u32) -> Result<&ParamRecord> {
        record(&self.params, "Param", row)
    }

    /// A `Property` row
    pub fn property(&self, row: u32) -> Result<&PropertyRecord> {
        record(&self.properties, "Property", row)
    }

    /// Enclosing type of a nested `TypeDef`
    pub fn enclosing_type(&self, type_def: u32) -> Option<u32> {
        self.nesting.get(&type_def).copied()
    }

    /// Full name of a `TypeDef`: `Namespace.Name`, nested types joined by `+`
    pub fn type_def_full_name(&self, type_def: u32) -> Result<String> {
        record(&self.qualified, "TypeDef", type_def).map(|(full_name, _)| full_name.clone())
    }

    /// Namespace a `TypeDef` lives in. Nested types report the namespace
    /// of their outermost enclosing type.
    pub fn namespace_of(&self, type_def: u32) -> Result<&str> {
        record(&self.qualified, "TypeDef", type_def).map(|(_, namespace)| namespace.as_str())
    }

    /// Full name of a `TypeRef`
    pub fn type_ref_full_name(&self, type_ref: u32) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = type_ref;
        loop {
            let row = self.type_ref(current)?;
            match row.scope {
                ResolutionScope::Enclosing(enclosing) if parts.len() < MAX_SIGNATURE_DEPTH => {
                    parts.push(row.name.clone());
                    current = enclosing;
                }
                _ => {
                    parts.push(qualify(&row.namespace, &row.name));
                    break;
                }
            }
        }
        parts.reverse();
        Ok(parts.join("+"))
    }

    /// Finds a top-level `TypeDef` by namespace and name
    pub fn find_type_def(&self, namespace: &str, name: &str) -> Option<u32> {
        self.types_by_name
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
    }

    /// Name of the assembly an `ExportedType` forwards `namespace.name` to
    pub fn forwarded_to(&self, namespace: &str, name: &str) -> Option<&str> {
        let assembly_ref = self
            .forwards
            .get(&(namespace.to_string(), name.to_string()))?;
        self.assembly_ref_name(*assembly_ref).ok()
    }

    /// Simple name of an `AssemblyRef`
    pub fn assembly_ref_name(&self, assembly_ref: u32) -> Result<&str> {
        record(&self.assembly_refs, "AssemblyRef", assembly_ref).map(String::as_str)
    }

    /// `MethodDef` rows owned by a type
    pub fn methods_of(&self, type_def: u32) -> Result<Vec<u32>> {
        Ok(self.type_def(type_def)?.methods.clone().collect())
    }

    /// `Param` rows owned by a method
    pub fn params_of(&self, method_def: u32) -> Result<Vec<u32>> {
        Ok(self.method_def(method_def)?.params.clone().collect())
    }

    /// `Property` rows owned by a type
    pub fn properties_of(&self, type_def: u32) -> Result<Vec<u32>> {
        self.type_def(type_def)?;
        Ok(self
            .property_lists
            .get(&type_def)
            .map(|range| range.clone().collect())
            .unwrap_or_default())
    }

    /// Accessor methods of a property
    pub fn accessors_of(&self, property: u32) -> PropertyAccessors {
        self.accessors.get(&property).copied().unwrap_or_default()
    }

    /// Generic parameter names of a type or method, by ordinal
    pub fn generic_params_of(&self, owner: GenericOwner) -> &[String] {
        self.generic_params
            .get(&owner)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl TypeLookup for AssemblyImage {
    fn lookup(&self, token: TypeToken, depth: usize) -> Result<TypeSig> {
        match token.table {
            TypeTable::TypeDef => self.type_def_full_name(token.row).map(TypeSig::Named),
            TypeTable::TypeRef => self.type_ref_full_name(token.row).map(TypeSig::Named),
            TypeTable::TypeSpec => parse_type_spec(self.type_spec(token.row)?, self, depth),
        }
    }
}

/// Row `row` (1-based) of a materialized table
fn record<'a, T>(rows: &'a [T], table: &'static str, row: u32) -> Result<&'a T> {
    (row as usize)
        .checked_sub(1)
        .and_then(|index| rows.get(index))
        .ok_or_else(|| Error::invalid_index(table, row))
}

/// Turns the `*List` column of consecutive owner rows into row ranges of
/// the target table. Each run ends where the next owner's starts; the
/// last one runs to the end of the table. Out-of-range starts are clamped.
fn list_ranges(starts: &[u32], target_rows: usize) -> Vec<Range<u32>> {
    let end = target_rows as u32 + 1;
    starts
        .iter()
        .enumerate()
        .map(|(index, &start)| {
            let next = starts.get(index + 1).copied().unwrap_or(end);
            let start = start.clamp(1, end);
            start..next.clamp(start, end)
        })
        .collect()
}

fn resolution_scope(index: &CodedIndex) -> ResolutionScope {
    if index.row == 0 {
        return ResolutionScope::CurrentModule;
    }
    match index.tag {
        TableId::Module => ResolutionScope::CurrentModule,
        TableId::AssemblyRef => ResolutionScope::AssemblyRef(index.row),
        TableId::TypeRef => ResolutionScope::Enclosing(index.row),
        _ => ResolutionScope::Other,
    }
}

/// Full name and outermost namespace of a `TypeDef`
fn qualify_type_def(
    type_defs: &[TypeDefRecord],
    nesting: &HashMap<u32, u32>,
    type_def: u32,
) -> Result<(String, String)> {
    let mut parts = Vec::new();
    let mut current = type_def;
    loop {
        let row = record(type_defs, "TypeDef", current)?;
        match nesting.get(&current) {
            Some(&enclosing) if parts.len() < MAX_SIGNATURE_DEPTH => {
                parts.push(row.name.clone());
                current = enclosing;
            }
            _ => {
                parts.push(qualify(&row.namespace, &row.name));
                parts.reverse();
                return Ok((parts.join("+"), row.namespace.clone()));
            }
        }
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}
