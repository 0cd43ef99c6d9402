//! asmcat - Catalog the public surface of .NET assemblies
//!
//! This tool reads a managed library's metadata and writes its public
//! classes, methods and properties to a `;`-separated report.

use anyhow::{bail, Context, Result};
use asmcat_core::report::{self, ReportWriter};
use asmcat_core::{AssemblyImage, AssemblyResolver, CatalogConfig, MetadataReflector, TypeWalker};
use clap::Parser;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Library catalogued when none is given
const DEFAULT_LIBRARY_PATH: &str = r"C:\Program Files\ComicRack Community Edition\cYo.Common.dll";

/// Export public classes, methods and properties of a .NET assembly to CSV
#[derive(Parser, Debug)]
#[command(name = "asmcat")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the assembly to catalog
    #[arg(default_value = DEFAULT_LIBRARY_PATH)]
    library: PathBuf,

    /// Output directory for the report (default: next to the executable)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory searched for referenced assemblies (repeatable)
    #[arg(short, long = "reference-dir", value_name = "DIR")]
    reference_dirs: Vec<PathBuf>,

    /// Additional method name to leave out (repeatable)
    #[arg(long = "deny-method", value_name = "NAME")]
    deny_methods: Vec<String>,

    /// Additional declaring assembly to leave out (repeatable)
    #[arg(long = "deny-assembly", value_name = "NAME")]
    deny_assemblies: Vec<String>,

    /// Also report properties whose type lives in the System namespace
    #[arg(long)]
    all_property_types: bool,

    /// Remove control and non-XML characters from every field
    #[arg(long)]
    strip_invalid_chars: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig::new()
            .deny_methods(self.deny_methods.iter().cloned())
            .deny_assemblies(self.deny_assemblies.iter().cloned())
            .hide_framework_property_types(!self.all_property_types)
            .sanitize(self.strip_invalid_chars)
    }

    fn output_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.output {
            return Ok(dir.clone());
        }
        let exe = env::current_exe().context("Failed to locate the running executable")?;
        Ok(exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let timestamp = chrono::Local::now().naive_local();
    let output_path = report::output_path(&cli.output_dir()?, &cli.library, timestamp);
    export(&cli, &output_path)
}

/// Catalog the library and write the report to `output_path`
fn export(cli: &Cli, output_path: &Path) -> Result<()> {
    let library = &cli.library;
    if !library.exists() {
        bail!("Library does not exist: {}", library.display());
    }
    if !library.is_file() {
        bail!("Library path is not a file: {}", library.display());
    }

    let image = AssemblyImage::from_path(library)
        .with_context(|| format!("Failed to load assembly: {}", library.display()))?;
    info!(
        "Loaded assembly '{}' (runtime {})",
        image.name(),
        image.runtime_version()
    );

    let mut resolver = AssemblyResolver::new().search_dirs(cli.reference_dirs.iter().cloned());
    if let Some(parent) = library.parent().filter(|p| !p.as_os_str().is_empty()) {
        resolver = resolver.search_dir(parent);
    }
    let mut reflector = MetadataReflector::new(image, resolver);

    let rows = TypeWalker::new(cli.catalog_config())
        .walk(&mut reflector)
        .with_context(|| format!("Failed to reflect types of {}", library.display()))?;
    debug!("Collected {} rows", rows.len());

    println!("Creating the file: {}", output_path.display());
    ReportWriter::new()
        .write_file(&rows, output_path)
        .with_context(|| format!("Failed to write report: {}", output_path.display()))?;
    println!(
        "The CSV file '{}' has been successfully created.",
        output_path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use tempfile::TempDir;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["asmcat"]);
        assert_eq!(cli.library, PathBuf::from(DEFAULT_LIBRARY_PATH));
        assert!(cli.output.is_none());
        assert!(cli.reference_dirs.is_empty());

        let config = cli.catalog_config();
        assert!(config.hide_framework_property_types);
        assert!(!config.sanitize);
        assert_eq!(
            config.denied_methods.len(),
            CatalogConfig::default().denied_methods.len()
        );
    }

    #[test]
    fn test_flags_reach_config() {
        let cli = Cli::parse_from([
            "asmcat",
            "Vendor.dll",
            "-o",
            "out",
            "-r",
            "refs/a",
            "--reference-dir",
            "refs/b",
            "--deny-method",
            "Dispose",
            "--deny-assembly",
            "Vendor.Internal",
            "--all-property-types",
            "--strip-invalid-chars",
            "-vv",
        ]);
        assert_eq!(cli.output_dir().unwrap(), PathBuf::from("out"));
        assert_eq!(cli.reference_dirs.len(), 2);
        assert_eq!(cli.verbose, 2);

        let config = cli.catalog_config();
        assert!(config.denied_methods.iter().any(|m| m == "Dispose"));
        assert!(config.denied_assemblies.iter().any(|a| a == "Vendor.Internal"));
        assert!(!config.hide_framework_property_types);
        assert!(config.sanitize);
    }

    #[test]
    fn test_output_dir_defaults_to_executable_dir() {
        let cli = Cli::parse_from(["asmcat"]);
        let exe = env::current_exe().unwrap();
        assert_eq!(cli.output_dir().unwrap(), exe.parent().unwrap());
    }

    #[test]
    fn test_export_missing_library() {
        let temp_dir = TempDir::new().unwrap();
        let library = temp_dir.path().join("Missing.dll");
        let cli = Cli::parse_from([OsStr::new("asmcat"), library.as_os_str()]);
        let output = temp_dir.path().join("Missing.csv");

        let err = export(&cli, &output).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(!output.exists());
    }

    #[test]
    fn test_export_rejects_unmanaged_file() {
        let temp_dir = TempDir::new().unwrap();
        let library = temp_dir.path().join("Native.dll");
        std::fs::write(&library, b"MZ but nothing else").unwrap();
        let cli = Cli::parse_from([OsStr::new("asmcat"), library.as_os_str()]);
        let output = temp_dir.path().join("Native.csv");

        let err = export(&cli, &output).unwrap_err();
        assert!(err.to_string().contains("Failed to load assembly"));
        assert!(!output.exists());
    }
}
