//! Various helper functions for testing
//!
//! Builds the synthetic registry and configuration snapshots the
//! integration tests resolve against. The fixture is small but exercises
//! every interesting shape: a virtual with two providers, a conditional
//! dependency, a tagged build tool and a leaf library shared by several
//! consumers.

use cairn::Registry;
use cairn::ResolveOptions;
use cairn::config::CompilerInstance;
use cairn::registry::Recipe;
use cairn::registry::recipe::{DependencyDecl, VariantDecl, VersionDecl};
use cairn::spec::DepFlags;

/// A registry fixture:
/// - `hdf5` links `mpi` (only with `+mpi`) and `zlib`, builds with `cmake`
/// - `mpi` is virtual, provided by `mpich` and `openmpi`
/// - `cmake` is tagged `build-tools`
/// - `foo` carries the version spread used by range-resolution tests
pub fn sample_registry() -> Registry {
	let mut registry = Registry::new();

	let mut zlib = Recipe::new("zlib");
	zlib.versions = vec![VersionDecl::new("1.3"), VersionDecl::new("1.2.13"), VersionDecl::new("1.2.11")];
	zlib.variants.insert("shared".to_string(), VariantDecl::bool(true));
	registry.add_recipe(zlib);

	let mut cmake = Recipe::new("cmake");
	cmake.versions = vec![VersionDecl::new("3.27"), VersionDecl::new("3.24")];
	cmake.tags.insert("build-tools".to_string());
	registry.add_recipe(cmake);

	let mut mpich = Recipe::new("mpich");
	mpich.versions = vec![VersionDecl::new("4.1"), VersionDecl::new("3.4.3")];
	mpich.provides.insert("mpi".to_string());
	registry.add_recipe(mpich);

	let mut openmpi = Recipe::new("openmpi");
	openmpi.versions = vec![VersionDecl::new("4.1.5")];
	openmpi.provides.insert("mpi".to_string());
	registry.add_recipe(openmpi);

	let mut hdf5 = Recipe::new("hdf5");
	hdf5.versions = vec![VersionDecl::new("1.14.3"), VersionDecl::new("1.12.2")];
	hdf5.variants.insert("mpi".to_string(), VariantDecl::bool(true));
	hdf5.variants.insert("shared".to_string(), VariantDecl::bool(true));
	let mut mpi_dep = DependencyDecl::new("mpi", DepFlags::LINK);
	mpi_dep.when = Some(when("+mpi"));
	hdf5.dependencies.push(mpi_dep);
	hdf5.dependencies.push(DependencyDecl::new("zlib", DepFlags::LINK));
	hdf5.dependencies.push(DependencyDecl::new("cmake", DepFlags::BUILD));
	registry.add_recipe(hdf5);

	let mut foo = Recipe::new("foo");
	foo.versions = vec![VersionDecl::new("1.5"), VersionDecl::new("1.3"), VersionDecl::new("1.0")];
	registry.add_recipe(foo);

	registry
}

/// Options with a two-compiler inventory and the default platform.
pub fn sample_options() -> ResolveOptions {
	let mut options = ResolveOptions::default();
	options.compilers = vec![
		CompilerInstance::new("gcc", "12.1"),
		CompilerInstance::new("clang", "15.0"),
	];
	options
}

/// Parses an anonymous constraint spec, e.g. a `when` condition.
pub fn when(literal: &str) -> cairn::spec::Spec {
	cairn::spec::parser::parse_one(literal)
		.expect("fixture literal should parse")
		.root_node()
		.clone()
}
