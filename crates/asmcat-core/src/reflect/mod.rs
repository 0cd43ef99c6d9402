//! Reflection model: the types and members an assembly exposes.
//!
//! Everything downstream of loading (walking, formatting, writing) works on
//! these plain structs, obtained through the [`ReflectionSource`] trait. The
//! metadata-backed implementation lives in [`metadata`]; tests drive the
//! walker with hand-built sources instead.
//!
//! ```no_run
//! use asmcat_core::reflect::{ReflectionSource, ReflectedType};
//! use asmcat_core::Result;
//!
//! struct Fixed(Vec<ReflectedType>);
//!
//! impl ReflectionSource for Fixed {
//!     fn assembly_name(&self) -> &str {
//!         "Fixed"
//!     }
//!
//!     fn types(&mut self) -> Result<Vec<ReflectedType>> {
//!         Ok(self.0.clone())
//!     }
//! }
//! ```

pub mod metadata;

use crate::error::Result;
use std::fmt;

pub use metadata::MetadataReflector;

/// A resolved, image-independent type reference.
///
/// `Display` renders the same text as .NET's `Type.ToString()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// A named type, e.g. `System.String` or `Foo.Outer+Inner`
    Named(String),
    /// An instantiated generic type, e.g. ``System.Nullable`1[System.Int32]``
    GenericInst {
        /// Full name of the generic definition, arity suffix included
        definition: String,
        /// Type arguments
        args: Vec<TypeSig>,
    },
    /// Single-dimension zero-based array, `T[]`
    SzArray(Box<TypeSig>),
    /// General array, `T[,]`
    Array {
        /// Element type
        element: Box<TypeSig>,
        /// Number of dimensions
        rank: u32,
    },
    /// Managed reference, `T&`
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer, `T*`
    Pointer(Box<TypeSig>),
    /// Generic parameter of the enclosing type, by ordinal
    TypeParam(u32),
    /// Generic parameter of the method, by ordinal
    MethodParam(u32),
}

impl TypeSig {
    /// Shorthand for [`TypeSig::Named`]
    pub fn named(name: impl Into<String>) -> Self {
        TypeSig::Named(name.into())
    }

    /// Replaces generic parameters by the given arguments.
    ///
    /// Ordinals without a matching argument are kept as they are.
    pub fn substitute(&self, type_args: &[TypeSig], method_args: &[TypeSig]) -> TypeSig {
        match self {
            TypeSig::Named(_) => self.clone(),
            TypeSig::TypeParam(n) => type_args
                .get(*n as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeSig::MethodParam(n) => method_args
                .get(*n as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeSig::GenericInst { definition, args } => TypeSig::GenericInst {
                definition: definition.clone(),
                args: args
                    .iter()
                    .map(|arg| arg.substitute(type_args, method_args))
                    .collect(),
            },
            TypeSig::SzArray(inner) => {
                TypeSig::SzArray(Box::new(inner.substitute(type_args, method_args)))
            }
            TypeSig::Array { element, rank } => TypeSig::Array {
                element: Box::new(element.substitute(type_args, method_args)),
                rank: *rank,
            },
            TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(inner.substitute(type_args, method_args))),
            TypeSig::Pointer(inner) => {
                TypeSig::Pointer(Box::new(inner.substitute(type_args, method_args)))
            }
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Named(name) => f.write_str(name),
            TypeSig::GenericInst { definition, args } => {
                write!(f, "{}[", definition)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str("]")
            }
            TypeSig::SzArray(inner) => write!(f, "{}[]", inner),
            TypeSig::Array { element, rank } => {
                if *rank <= 1 {
                    write!(f, "{}[*]", element)
                } else {
                    write!(f, "{}[{}]", element, ",".repeat(*rank as usize - 1))
                }
            }
            TypeSig::ByRef(inner) => write!(f, "{}&", inner),
            TypeSig::Pointer(inner) => write!(f, "{}*", inner),
            TypeSig::TypeParam(n) => write!(f, "!{}", n),
            TypeSig::MethodParam(n) => write!(f, "!!{}", n),
        }
    }
}

/// Visibility of a property accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessibility {
    /// Callable from outside the assembly
    Public,
    /// Private, internal, protected or any combination thereof
    NonPublic,
}

impl Accessibility {
    /// Returns true for [`Accessibility::Public`]
    pub fn is_public(self) -> bool {
        self == Accessibility::Public
    }
}

/// One parameter of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedParameter {
    /// Declared name; empty when the metadata carries none
    pub name: String,
    /// Parameter type
    pub ty: TypeSig,
}

impl ReflectedParameter {
    /// Creates a parameter
    pub fn new(name: impl Into<String>, ty: TypeSig) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A method as reported by reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedMethod {
    /// Simple name
    pub name: String,
    /// Compiler-synthesized (accessor, operator, constructor)
    pub is_special_name: bool,
    /// Public visibility
    pub is_public: bool,
    /// Static rather than instance
    pub is_static: bool,
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Name of the assembly the declaring type lives in
    pub declaring_assembly: String,
    /// Parameters in declaration order
    pub parameters: Vec<ReflectedParameter>,
    /// Return type
    pub return_type: TypeSig,
}

/// A property as reported by reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedProperty {
    /// Simple name
    pub name: String,
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Property type
    pub ty: TypeSig,
    /// Get accessor, if any
    pub getter: Option<Accessibility>,
    /// Set accessor, if any
    pub setter: Option<Accessibility>,
}

impl ReflectedProperty {
    /// The property has a get accessor
    pub fn can_read(&self) -> bool {
        self.getter.is_some()
    }

    /// The property has a set accessor
    pub fn can_write(&self) -> bool {
        self.setter.is_some()
    }

    /// At least one accessor exists and is public
    pub fn has_public_accessor(&self) -> bool {
        self.getter.is_some_and(Accessibility::is_public)
            || self.setter.is_some_and(Accessibility::is_public)
    }
}

/// A type declared in the reflected assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedType {
    /// Namespace, `None` for the global namespace and for nested types
    pub namespace: Option<String>,
    /// Full name (`Namespace.Name`, nested types joined with `+`)
    pub full_name: String,
    /// Top-level public visibility
    pub is_public: bool,
    /// Public methods, declared first, then inherited
    pub methods: Vec<ReflectedMethod>,
    /// Public properties, declared first, then inherited
    pub properties: Vec<ReflectedProperty>,
}

/// Source of reflection data for one assembly
pub trait ReflectionSource {
    /// Name of the reflected assembly
    fn assembly_name(&self) -> &str;

    /// Every type declared in the assembly, in metadata order
    fn types(&mut self) -> Result<Vec<ReflectedType>>;
}
