//! Signature decoding (ECMA-335 II.23.2).
//!
//! Blobs are parsed by dotscope; this module turns the parsed signatures
//! into [`TypeSig`]s. Type tokens are named through [`TypeLookup`], which
//! keeps the conversion testable on hand-written blobs.

use crate::error::{Error, Result};
use crate::reflect::TypeSig;
use dotscope::prelude::{
    parse_method_signature, parse_property_signature, parse_type_spec_signature, CodedIndex,
    SignatureParameter, TableId, TypeSignature,
};

/// Guard against self-referencing `TypeSpec` chains
pub const MAX_SIGNATURE_DEPTH: usize = 64;

/// Table a type token points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTable {
    /// `TypeDef`
    TypeDef,
    /// `TypeRef`
    TypeRef,
    /// `TypeSpec`
    TypeSpec,
}

/// A `TypeDefOrRef` reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeToken {
    /// Target table
    pub table: TypeTable,
    /// 1-based row
    pub row: u32,
}

impl TypeToken {
    /// Splits a full metadata token (`0x02000005`) into table and row
    pub fn from_value(value: u32) -> Option<Self> {
        let table = match value >> 24 {
            0x02 => TypeTable::TypeDef,
            0x01 => TypeTable::TypeRef,
            0x1b => TypeTable::TypeSpec,
            _ => return None,
        };
        let row = value & 0x00ff_ffff;
        (row != 0).then_some(Self { table, row })
    }

    /// Reads a `TypeDefOrRef` coded index; the null index yields `None`
    pub fn from_coded(index: &CodedIndex) -> Option<Self> {
        let table = match index.tag {
            TableId::TypeDef => TypeTable::TypeDef,
            TableId::TypeRef => TypeTable::TypeRef,
            TableId::TypeSpec => TypeTable::TypeSpec,
            _ => return None,
        };
        (index.row != 0).then_some(Self {
            table,
            row: index.row,
        })
    }
}

/// Resolves type tokens to type signatures
pub trait TypeLookup {
    /// Returns the type a token designates. `depth` is the current nesting
    /// level, to be passed back into [`parse_type_spec`] for `TypeSpec`s.
    fn lookup(&self, token: TypeToken, depth: usize) -> Result<TypeSig>;
}

/// Decoded `MethodDefSig`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    /// Return type
    pub return_type: TypeSig,
    /// Parameter types in order
    pub params: Vec<TypeSig>,
}

/// Decoded `PropertySig`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySig {
    /// Property type
    pub ty: TypeSig,
    /// Indexer parameters
    pub params: Vec<TypeSig>,
}

/// Decodes a `MethodDefSig` blob
pub fn parse_method_sig(blob: &[u8], lookup: &dyn TypeLookup) -> Result<MethodSig> {
    let sig = parse_method_signature(blob).map_err(signature_error)?;
    Ok(MethodSig {
        return_type: convert_param(&sig.return_type, lookup, 0)?,
        params: sig
            .params
            .iter()
            .map(|param| convert_param(param, lookup, 0))
            .collect::<Result<_>>()?,
    })
}

/// Decodes a `PropertySig` blob
pub fn parse_property_sig(blob: &[u8], lookup: &dyn TypeLookup) -> Result<PropertySig> {
    let sig = parse_property_signature(blob).map_err(signature_error)?;
    Ok(PropertySig {
        ty: convert(&sig.base, lookup, 0)?,
        params: sig
            .params
            .iter()
            .map(|param| convert_param(param, lookup, 0))
            .collect::<Result<_>>()?,
    })
}

/// Decodes a `TypeSpec` blob
pub fn parse_type_spec(blob: &[u8], lookup: &dyn TypeLookup, depth: usize) -> Result<TypeSig> {
    let spec = parse_type_spec_signature(blob).map_err(signature_error)?;
    convert(&spec.base, lookup, depth)
}

/// Decodes a `GENERICINST` type spec into the token of its generic
/// definition, left unresolved, and its converted type arguments.
///
/// Other type specs yield `None`.
pub fn parse_generic_instance(
    blob: &[u8],
    lookup: &dyn TypeLookup,
) -> Result<Option<(TypeToken, Vec<TypeSig>)>> {
    let spec = parse_type_spec_signature(blob).map_err(signature_error)?;
    let TypeSignature::GenericInst(definition, args) = &spec.base else {
        return Ok(None);
    };
    let token = match &**definition {
        TypeSignature::Class(token) | TypeSignature::ValueType(token) => {
            TypeToken::from_value(token.value())
        }
        _ => None,
    };
    let Some(token) = token else {
        return Ok(None);
    };
    let args = args
        .iter()
        .map(|arg| convert(arg, lookup, 1))
        .collect::<Result<_>>()?;
    Ok(Some((token, args)))
}

fn signature_error(err: dotscope::Error) -> Error {
    Error::invalid_signature(err.to_string())
}

/// `RetType` / `Param`: the parameter type, wrapped when passed by reference
fn convert_param(param: &SignatureParameter, lookup: &dyn TypeLookup, depth: usize) -> Result<TypeSig> {
    let ty = convert(&param.base, lookup, depth)?;
    Ok(if param.by_ref {
        TypeSig::ByRef(Box::new(ty))
    } else {
        ty
    })
}

fn convert(ty: &TypeSignature, lookup: &dyn TypeLookup, depth: usize) -> Result<TypeSig> {
    if depth > MAX_SIGNATURE_DEPTH {
        return Err(Error::invalid_signature("signature nesting too deep"));
    }

    let named = |name: &str| Ok(TypeSig::named(name));
    match ty {
        TypeSignature::Void => named("System.Void"),
        TypeSignature::Boolean => named("System.Boolean"),
        TypeSignature::Char => named("System.Char"),
        TypeSignature::I1 => named("System.SByte"),
        TypeSignature::U1 => named("System.Byte"),
        TypeSignature::I2 => named("System.Int16"),
        TypeSignature::U2 => named("System.UInt16"),
        TypeSignature::I4 => named("System.Int32"),
        TypeSignature::U4 => named("System.UInt32"),
        TypeSignature::I8 => named("System.Int64"),
        TypeSignature::U8 => named("System.UInt64"),
        TypeSignature::R4 => named("System.Single"),
        TypeSignature::R8 => named("System.Double"),
        TypeSignature::String => named("System.String"),
        TypeSignature::Object => named("System.Object"),
        TypeSignature::I => named("System.IntPtr"),
        TypeSignature::U => named("System.UIntPtr"),
        TypeSignature::TypedByRef => named("System.TypedReference"),
        TypeSignature::FnPtr(_) => named("System.IntPtr"),
        TypeSignature::Ptr(pointer) => Ok(TypeSig::Pointer(Box::new(convert(
            &pointer.base,
            lookup,
            depth + 1,
        )?))),
        TypeSignature::ByRef(inner) => {
            Ok(TypeSig::ByRef(Box::new(convert(inner, lookup, depth + 1)?)))
        }
        TypeSignature::Pinned(inner) => convert(inner, lookup, depth + 1),
        TypeSignature::Class(token) | TypeSignature::ValueType(token) => {
            let value = token.value();
            let token = TypeToken::from_value(value).ok_or_else(|| {
                Error::invalid_signature(format!("bad type token {:#010x}", value))
            })?;
            lookup.lookup(token, depth + 1)
        }
        TypeSignature::GenericParamType(n) => Ok(TypeSig::TypeParam(*n)),
        TypeSignature::GenericParamMethod(n) => Ok(TypeSig::MethodParam(*n)),
        TypeSignature::SzArray(array) => Ok(TypeSig::SzArray(Box::new(convert(
            &array.base,
            lookup,
            depth + 1,
        )?))),
        TypeSignature::Array(array) => Ok(TypeSig::Array {
            element: Box::new(convert(&array.base, lookup, depth + 1)?),
            rank: array.rank as u32,
        }),
        TypeSignature::GenericInst(definition, args) => {
            let definition = convert(definition, lookup, depth + 1)?.to_string();
            let args = args
                .iter()
                .map(|arg| convert(arg, lookup, depth + 1))
                .collect::<Result<_>>()?;
            Ok(TypeSig::GenericInst { definition, args })
        }
        _ => Err(Error::invalid_signature("unsupported element type")),
    }
}
