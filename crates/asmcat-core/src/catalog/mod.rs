//! Walking reflected types and turning their public surface into report rows.
//!
//! The walker only sees [`ReflectionSource`], so the same filtering and
//! formatting runs against real metadata and against hand-built fixtures.

pub mod config;
pub mod format;

pub use config::CatalogConfig;
pub use format::{clean_strings, sanitize, SignatureFormatter};

use crate::error::Result;
use crate::reflect::{ReflectedMethod, ReflectedProperty, ReflectedType, ReflectionSource};
use crate::report::ReportRow;
use tracing::{debug, info};

/// Kind label of method rows
pub const METHOD_LABEL: &str = " Method ";
/// Kind label of property rows
pub const PROPERTY_LABEL: &str = " Property ";

/// Enumerates types and members and produces report rows
#[derive(Debug, Clone, Default)]
pub struct TypeWalker {
    config: CatalogConfig,
}

impl TypeWalker {
    /// Creates a walker with the given configuration
    pub fn new(config: CatalogConfig) -> Self {
        Self { config }
    }

    /// Returns the walker's configuration
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Reflects every type of `source` and returns its rows in metadata
    /// order
    pub fn walk(&self, source: &mut dyn ReflectionSource) -> Result<Vec<ReportRow>> {
        let types = source.types()?;
        info!(
            "Reflected {} types from '{}'",
            types.len(),
            source.assembly_name()
        );
        Ok(self.walk_types(&types))
    }

    /// Produces the rows for already reflected types.
    ///
    /// Every type in a non-framework namespace closes with a blank row;
    /// only public ones contribute member rows before it.
    pub fn walk_types(&self, types: &[ReflectedType]) -> Vec<ReportRow> {
        let mut rows = Vec::new();
        let mut retained = 0usize;

        for ty in types {
            let Some(namespace) = self.catalogued_namespace(ty) else {
                continue;
            };

            if ty.is_public {
                retained += 1;
                debug!("Namespace: {}", namespace);
                debug!("Class: {}", ty.full_name);

                for method in ty.methods.iter().filter(|m| self.passes_method_filter(m)) {
                    rows.push(self.method_row(namespace, &ty.full_name, method));
                }

                for property in ty.properties.iter().filter(|p| p.has_public_accessor()) {
                    if let Some(row) = self.property_row(namespace, &ty.full_name, property) {
                        rows.push(row);
                    }
                }
            }

            rows.push(ReportRow::blank());
        }

        info!("Retained {} of {} types", retained, types.len());
        rows
    }

    /// Returns the namespace of `ty` unless it is absent or a framework one
    fn catalogued_namespace<'t>(&self, ty: &'t ReflectedType) -> Option<&'t str> {
        let namespace = ty.namespace.as_deref().filter(|ns| !ns.is_empty())?;
        let framework = self
            .config
            .framework_namespaces
            .iter()
            .any(|prefix| namespace.starts_with(prefix.as_str()));
        (!framework).then_some(namespace)
    }

    /// A public, non special-name method that neither deny-list matches
    pub fn passes_method_filter(&self, method: &ReflectedMethod) -> bool {
        if !method.is_public || method.is_special_name {
            return false;
        }
        if self.config.denied_methods.iter().any(|n| *n == method.name) {
            return false;
        }
        !self
            .config
            .denied_assemblies
            .iter()
            .any(|denied| is_same_or_child(&method.declaring_assembly, denied))
    }

    fn method_row(&self, namespace: &str, class: &str, method: &ReflectedMethod) -> ReportRow {
        let formatter = SignatureFormatter::new(&self.config.type_aliases);
        let parameters = method
            .parameters
            .iter()
            .map(|p| format!("{} ({})", p.name, formatter.legible_type(&p.ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let parameters = clean_strings(&parameters);
        let return_type = formatter.legible_type(&method.return_type);

        debug!("Method: {}", method.name);
        debug!("Parameters: {}", parameters);
        debug!("Return type: {}", return_type);

        self.finish(ReportRow {
            namespace: namespace.to_string(),
            class: class.to_string(),
            kind: METHOD_LABEL.to_string(),
            name: method.name.clone(),
            parameters,
            return_type,
            access: String::new(),
        })
    }

    fn property_row(
        &self,
        namespace: &str,
        class: &str,
        property: &ReflectedProperty,
    ) -> Option<ReportRow> {
        let formatter = SignatureFormatter::new(&self.config.type_aliases);
        let ty = clean_strings(&formatter.legible_type(&property.ty));
        if self.config.hide_framework_property_types && ty.starts_with("System") {
            debug!("Skipping property {} of framework type {}", property.name, ty);
            return None;
        }
        let access = access_label(property);

        debug!("Property: {}", property.name);
        debug!("Type: {}", ty);
        debug!("Access: {}", access);

        Some(self.finish(ReportRow {
            namespace: namespace.to_string(),
            class: class.to_string(),
            kind: PROPERTY_LABEL.to_string(),
            name: property.name.clone(),
            parameters: String::new(),
            return_type: ty,
            access: access.to_string(),
        }))
    }

    fn finish(&self, row: ReportRow) -> ReportRow {
        if self.config.sanitize {
            row.map_fields(sanitize)
        } else {
            row
        }
    }
}

/// `get`, `set` or `get/set`
pub fn access_label(property: &ReflectedProperty) -> &'static str {
    match (property.can_read(), property.can_write()) {
        (true, true) => "get/set",
        (false, true) => "set",
        _ => "get",
    }
}

/// `name` equals `root` or is a dotted child of it (`System.Core` under `System`)
fn is_same_or_child(name: &str, root: &str) -> bool {
    name.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}
