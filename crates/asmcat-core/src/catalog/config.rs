//! Fixed filtering and naming tables, bundled as immutable configuration.

use std::collections::HashMap;

/// Namespaces treated as framework code and never catalogued
pub const FRAMEWORK_NAMESPACE_PREFIXES: [&str; 2] = ["Microsoft", "System"];

/// Method names dropped as object-protocol noise
pub const DEFAULT_DENIED_METHODS: [&str; 9] = [
    "Equals",
    "GetHashCode",
    "GetType",
    "ToString",
    "Clone",
    "Set",
    "Match",
    "IsSame",
    "CompareTo",
];

/// Assemblies whose members are dropped, along with their dotted children
pub const DEFAULT_DENIED_ASSEMBLIES: [&str; 3] = [
    "mscorlib",
    "System",
    "cYo.Projects.ComicRack.Engine.CacheManager",
];

/// Full .NET type names and their short aliases
pub const DEFAULT_TYPE_ALIASES: [(&str, &str); 15] = [
    ("System.String", "str"),
    ("System.Int32", "int32"),
    ("System.Boolean", "bool"),
    ("System.Object", "object"),
    ("System.Void", "void"),
    ("System.Double", "double"),
    ("System.Float", "float"),
    ("System.Decimal", "decimal"),
    ("System.Char", "char"),
    ("System.Byte", "byte"),
    ("System.Int64", "int64"),
    ("System.UInt32", "uint32"),
    ("System.UInt64", "uint64"),
    ("System.Int16", "int16"),
    ("System.UInt16", "uint16"),
];

/// Configuration for the type walker and signature formatter
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Namespace prefixes excluded from the catalog
    pub framework_namespaces: Vec<String>,
    /// Method names excluded from the catalog
    pub denied_methods: Vec<String>,
    /// Declaring assemblies whose methods are excluded
    pub denied_assemblies: Vec<String>,
    /// Exact full-name to alias substitutions
    pub type_aliases: HashMap<String, String>,
    /// Skip properties whose cleaned type still reads `System...`
    pub hide_framework_property_types: bool,
    /// Strip control and non-XML characters from every field
    pub sanitize: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            framework_namespaces: to_strings(&FRAMEWORK_NAMESPACE_PREFIXES),
            denied_methods: to_strings(&DEFAULT_DENIED_METHODS),
            denied_assemblies: to_strings(&DEFAULT_DENIED_ASSEMBLIES),
            type_aliases: DEFAULT_TYPE_ALIASES
                .iter()
                .map(|(name, alias)| (name.to_string(), alias.to_string()))
                .collect(),
            hide_framework_property_types: true,
            sanitize: false,
        }
    }
}

impl CatalogConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds method names to the deny-list
    pub fn deny_methods<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_methods.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds assembly names to the deny-list
    pub fn deny_assemblies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_assemblies
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds or replaces a type alias
    pub fn type_alias(mut self, full_name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.type_aliases.insert(full_name.into(), alias.into());
        self
    }

    /// Sets whether framework-typed properties are skipped
    pub fn hide_framework_property_types(mut self, hide: bool) -> Self {
        self.hide_framework_property_types = hide;
        self
    }

    /// Sets whether fields are stripped of invalid characters
    pub fn sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
