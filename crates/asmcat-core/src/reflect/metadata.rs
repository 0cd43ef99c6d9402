//! Reflection answers computed from ECMA-335 metadata.
//!
//! [`MetadataReflector`] reproduces what `Type.GetMethods` and
//! `Type.GetProperties` return for `Public | Instance | Static`:
//!
//! - public methods and properties declared by the type, static or not;
//! - public *instance* members of every base class, most derived first;
//! - base members hidden by a derived member with the same name and
//!   parameter types (indexer parameters for properties) are left out.
//!
//! Bases in other assemblies are followed through an [`AssemblyResolver`];
//! when a base cannot be resolved the chain stops there.

use crate::error::Result;
use crate::image::signature::{
    parse_generic_instance, parse_method_sig, parse_property_sig, TypeTable, TypeToken,
};
use crate::image::{AssemblyImage, AssemblyResolver, GenericOwner, ResolutionScope};
use crate::reflect::{
    Accessibility, ReflectedMethod, ReflectedParameter, ReflectedProperty, ReflectedType,
    ReflectionSource, TypeSig,
};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, trace};

/// `TypeAttributes.VisibilityMask`
const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;
/// `TypeAttributes.Public`
const TYPE_PUBLIC: u32 = 0x0000_0001;

/// `MethodAttributes.MemberAccessMask`
const METHOD_ACCESS_MASK: u32 = 0x0007;
/// `MethodAttributes.Public`
const METHOD_PUBLIC: u32 = 0x0006;
/// `MethodAttributes.Static`
const METHOD_STATIC: u32 = 0x0010;
/// `MethodAttributes.SpecialName`
const METHOD_SPECIAL_NAME: u32 = 0x0800;

/// Upper bound on base-class chain length
const MAX_INHERITANCE_DEPTH: usize = 64;
/// Upper bound on type-forwarding hops
const MAX_FORWARDS: usize = 8;

/// One class in a base chain, with the type arguments it was instantiated with
struct ChainLink {
    image: Rc<AssemblyImage>,
    type_def: u32,
    type_args: Vec<TypeSig>,
}

/// [`ReflectionSource`] backed by an [`AssemblyImage`]
#[derive(Debug)]
pub struct MetadataReflector {
    image: Rc<AssemblyImage>,
    resolver: AssemblyResolver,
}

impl MetadataReflector {
    /// Reflects over `image`, resolving external bases with `resolver`
    pub fn new(image: AssemblyImage, mut resolver: AssemblyResolver) -> Self {
        let image = Rc::new(image);
        resolver.register(Rc::clone(&image));
        Self { image, resolver }
    }

    /// The reflected image
    pub fn image(&self) -> &AssemblyImage {
        &self.image
    }

    fn reflect_type(&mut self, type_def: u32) -> Result<ReflectedType> {
        let image = Rc::clone(&self.image);
        let row = image.type_def(type_def)?;
        let namespace = image.namespace_of(type_def)?;
        let full_name = image.type_def_full_name(type_def)?;
        let nested = image.enclosing_type(type_def).is_some();
        let is_public = !nested && row.flags & TYPE_VISIBILITY_MASK == TYPE_PUBLIC;

        let mut reflected = ReflectedType {
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            full_name,
            is_public,
            methods: Vec::new(),
            properties: Vec::new(),
        };

        // Only public top-level types are reachable through reflection from
        // outside the assembly; their members are the only ones resolved.
        if reflected.is_public {
            let own_args: Vec<TypeSig> = image
                .generic_params_of(GenericOwner::Type(type_def))
                .iter()
                .map(|name| TypeSig::named(name.clone()))
                .collect();
            let chain = self.base_chain(ChainLink {
                image,
                type_def,
                type_args: own_args,
            })?;
            let (methods, properties) = collect_members(&chain)?;
            reflected.methods = methods;
            reflected.properties = properties;
        }

        Ok(reflected)
    }

    /// Walks `Extends` from `start` up to the root of the hierarchy
    fn base_chain(&mut self, start: ChainLink) -> Result<Vec<ChainLink>> {
        let mut chain = vec![start];
        while chain.len() < MAX_INHERITANCE_DEPTH {
            let Some(link) = chain.last() else { break };
            let Some(extends) = link.image.type_def(link.type_def)?.extends else {
                break;
            };
            let image = Rc::clone(&link.image);
            let type_args = link.type_args.clone();
            match self.resolve_base(&image, extends, &type_args)? {
                Some(next) => chain.push(next),
                None => break,
            }
        }
        Ok(chain)
    }

    fn resolve_base(
        &mut self,
        image: &Rc<AssemblyImage>,
        token: TypeToken,
        type_args: &[TypeSig],
    ) -> Result<Option<ChainLink>> {
        match token.table {
            TypeTable::TypeDef => Ok(Some(ChainLink {
                image: Rc::clone(image),
                type_def: token.row,
                type_args: Vec::new(),
            })),
            TypeTable::TypeRef => self.resolve_type_ref(image, token.row),
            TypeTable::TypeSpec => {
                let blob = image.type_spec(token.row)?;
                let Some((definition, args)) = parse_generic_instance(blob, &**image)? else {
                    debug!("Unsupported base type spec {} in {}", token.row, image.name());
                    return Ok(None);
                };
                let args = args
                    .iter()
                    .map(|arg| arg.substitute(type_args, &[]))
                    .collect();
                let link = match definition.table {
                    TypeTable::TypeDef => Some(ChainLink {
                        image: Rc::clone(image),
                        type_def: definition.row,
                        type_args: Vec::new(),
                    }),
                    TypeTable::TypeRef => self.resolve_type_ref(image, definition.row)?,
                    TypeTable::TypeSpec => None,
                };
                Ok(link.map(|link| ChainLink {
                    type_args: args,
                    ..link
                }))
            }
        }
    }

    fn resolve_type_ref(
        &mut self,
        image: &Rc<AssemblyImage>,
        type_ref: u32,
    ) -> Result<Option<ChainLink>> {
        let row = image.type_ref(type_ref)?;
        let (namespace, name) = (row.namespace.as_str(), row.name.as_str());

        let mut target = match row.scope {
            ResolutionScope::AssemblyRef(assembly_ref) => {
                let assembly = image.assembly_ref_name(assembly_ref)?;
                match self.resolver.resolve(assembly) {
                    Some(target) => target,
                    None => {
                        trace!(
                            "Base {}.{} lives in unresolved assembly '{}'",
                            namespace,
                            name,
                            assembly
                        );
                        return Ok(None);
                    }
                }
            }
            ResolutionScope::CurrentModule => Rc::clone(image),
            ResolutionScope::Enclosing(_) | ResolutionScope::Other => {
                trace!("Unsupported resolution scope for base {}.{}", namespace, name);
                return Ok(None);
            }
        };

        for _ in 0..MAX_FORWARDS {
            if let Some(type_def) = target.find_type_def(namespace, name) {
                return Ok(Some(ChainLink {
                    image: target,
                    type_def,
                    type_args: Vec::new(),
                }));
            }
            let Some(forward) = target.forwarded_to(namespace, name).map(str::to_string) else {
                break;
            };
            match self.resolver.resolve(&forward) {
                Some(next) => target = next,
                None => break,
            }
        }

        trace!("Base {}.{} not found in '{}'", namespace, name, target.name());
        Ok(None)
    }
}

impl ReflectionSource for MetadataReflector {
    fn assembly_name(&self) -> &str {
        self.image.name()
    }

    fn types(&mut self) -> Result<Vec<ReflectedType>> {
        let count = self.image.type_count();
        (1..=count).map(|row| self.reflect_type(row)).collect()
    }
}

fn collect_members(chain: &[ChainLink]) -> Result<(Vec<ReflectedMethod>, Vec<ReflectedProperty>)> {
    let mut methods = Vec::new();
    let mut properties = Vec::new();
    let mut seen_methods: HashSet<(String, Vec<TypeSig>)> = HashSet::new();
    let mut seen_properties: HashSet<(String, Vec<TypeSig>)> = HashSet::new();

    for (level, link) in chain.iter().enumerate() {
        let inherited = level > 0;
        let image: &AssemblyImage = &link.image;
        let declaring_type = image.type_def_full_name(link.type_def)?;

        let mut level_methods = Vec::new();
        for method_def in image.methods_of(link.type_def)? {
            let row = image.method_def(method_def)?;
            let is_public = row.flags & METHOD_ACCESS_MASK == METHOD_PUBLIC;
            let is_static = row.flags & METHOD_STATIC != 0;
            if !is_public || (inherited && is_static) {
                continue;
            }

            let name = row.name.clone();
            let sig = parse_method_sig(&row.signature, image)?;
            let method_args: Vec<TypeSig> = image
                .generic_params_of(GenericOwner::Method(method_def))
                .iter()
                .map(|name| TypeSig::named(name.clone()))
                .collect();
            let bind = |ty: &TypeSig| ty.substitute(&link.type_args, &method_args);

            let param_types: Vec<TypeSig> = sig.params.iter().map(bind).collect();
            if !seen_methods.insert((name.clone(), param_types.clone())) && inherited {
                trace!("{}.{} hidden by a derived declaration", declaring_type, name);
                continue;
            }

            let names = parameter_names(image, method_def, param_types.len())?;
            level_methods.push(ReflectedMethod {
                name,
                is_special_name: row.flags & METHOD_SPECIAL_NAME != 0,
                is_public,
                is_static,
                declaring_type: declaring_type.clone(),
                declaring_assembly: image.name().to_string(),
                parameters: names
                    .into_iter()
                    .zip(param_types)
                    .map(|(name, ty)| ReflectedParameter::new(name, ty))
                    .collect(),
                return_type: bind(&sig.return_type),
            });
        }
        methods.extend(level_methods);

        for property in image.properties_of(link.type_def)? {
            let row = image.property(property)?;
            let accessors = image.accessors_of(property);
            let access_of = |method: Option<u32>| -> Result<Option<(Accessibility, bool)>> {
                let Some(method) = method else {
                    return Ok(None);
                };
                let flags = image.method_def(method)?.flags;
                let access = if flags & METHOD_ACCESS_MASK == METHOD_PUBLIC {
                    Accessibility::Public
                } else {
                    Accessibility::NonPublic
                };
                Ok(Some((access, flags & METHOD_STATIC != 0)))
            };
            let getter = access_of(accessors.getter)?;
            let setter = access_of(accessors.setter)?;

            let any_public = [getter, setter]
                .iter()
                .flatten()
                .any(|(access, _)| access.is_public());
            let is_static = [getter, setter].iter().flatten().any(|(_, s)| *s);
            if !any_public || (inherited && is_static) {
                continue;
            }

            let sig = parse_property_sig(&row.signature, image)?;
            let index_types: Vec<TypeSig> = sig
                .params
                .iter()
                .map(|ty| ty.substitute(&link.type_args, &[]))
                .collect();
            if !seen_properties.insert((row.name.clone(), index_types)) && inherited {
                trace!("{}.{} hidden by a derived declaration", declaring_type, row.name);
                continue;
            }

            properties.push(ReflectedProperty {
                name: row.name.clone(),
                declaring_type: declaring_type.clone(),
                ty: sig.ty.substitute(&link.type_args, &[]),
                getter: getter.map(|(access, _)| access),
                setter: setter.map(|(access, _)| access),
            });
        }
    }

    Ok((methods, properties))
}

/// Parameter names by position; missing `Param` rows leave a name empty
fn parameter_names(image: &AssemblyImage, method_def: u32, count: usize) -> Result<Vec<String>> {
    let mut names = vec![String::new(); count];
    for param in image.params_of(method_def)? {
        let row = image.param(param)?;
        let sequence = row.sequence as usize;
        if (1..=count).contains(&sequence) {
            names[sequence - 1] = row.name.clone();
        }
    }
    Ok(names)
}
