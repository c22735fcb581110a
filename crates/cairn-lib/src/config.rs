//! The resolution configuration snapshot.
//!
//! Everything the engine is allowed to know about site policy lives here:
//! unification policy, buildability overrides, externals, provider and
//! version preferences, the compiler inventory and the target policy.
//! Loading configuration files is external to the engine; a snapshot is
//! handed to [`crate::concretize::Context`] and [`crate::concretize::Counter`]
//! and must not change for their lifetime.

use std::collections::HashMap;

use serde::{Serialize, Deserialize};

use crate::platform::Platform;
use crate::registry::version::{Version, VersionConstraint};
use crate::spec::{CompilerSpec, DepFlags, Spec};

/// How aggressively nodes of one package must unify within a graph.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnifyPolicy {
	/// At most one node per package name in the whole graph.
	NoDuplicates,
	/// Only `build-tools` tagged packages may duplicate.
	#[default] MinimalDuplicates,
	/// Multiplicity follows actual build/link divergence, capped at two.
	FullDuplicates,
}

/// How far from the host microarchitecture concretized targets may stray.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetGranularity {
	#[default] Microarchitectures,
	/// Restrict choices to generic family levels.
	Generic,
}

/// A package installation outside the build system's control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSpec {
	pub spec: Spec,
	pub prefix: String,
}

impl ExternalSpec {
	pub fn from_literal(literal: &str, prefix: &str) -> crate::Result<Self> {
		Ok(ExternalSpec {
			spec: crate::spec::parser::parse_one(literal)?.root_node().clone(),
			prefix: prefix.to_string(),
		})
	}
}

/// One compiler installation the site has configured, in preference order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerInstance {
	pub spec: CompilerSpec,
	pub operating_system: Option<String>,
	pub target: Option<String>,
}

impl CompilerInstance {
	pub fn new(name: &str, version: &str) -> Self {
		let mut spec = CompilerSpec::new(name);
		spec.version = VersionConstraint::exact(Version::new(version));
		CompilerInstance { spec, operating_system: None, target: None }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveOptions {
	pub unify: UnifyPolicy,
	pub platform: Platform,
	/// Overrides a recipe's own buildable flag, keyed by package name.
	pub buildable: HashMap<String, bool>,
	pub externals: HashMap<String, Vec<ExternalSpec>>,
	/// Ordered provider preferences per virtual name.
	pub preferred_providers: HashMap<String, Vec<String>>,
	/// When set, only configured preferred providers are acceptable.
	pub providers_only: bool,
	/// Ordered version preferences per package name.
	pub version_preferences: HashMap<String, Vec<Version>>,
	/// The compiler inventory, in site preference order.
	pub compilers: Vec<CompilerInstance>,
	/// Per-package compiler name ordering, consulted before the inventory
	/// order.
	pub compiler_preferences: HashMap<String, Vec<String>>,
	pub require_host_compatible: bool,
	pub granularity: TargetGranularity,
	/// Configured hard requirement specs per package, used for fast
	/// reachability rejection.
	pub requirements: HashMap<String, Vec<Spec>>,
	/// Dependency types that define reachability for duplicate bounds.
	pub dependency_types: DepFlags,
}

impl Default for ResolveOptions {
	fn default() -> Self {
		ResolveOptions {
			unify: Default::default(),
			platform: Default::default(),
			buildable: Default::default(),
			externals: Default::default(),
			preferred_providers: Default::default(),
			providers_only: false,
			version_preferences: Default::default(),
			compilers: Vec::new(),
			compiler_preferences: Default::default(),
			require_host_compatible: true,
			granularity: Default::default(),
			requirements: Default::default(),
			dependency_types: DepFlags::ALL,
		}
	}
}

impl ResolveOptions {
	/// The effective buildable flag for `name`, given the recipe default.
	pub fn is_buildable(&self, name: &str, recipe_default: bool) -> bool {
		self.buildable.get(name).copied().unwrap_or(recipe_default)
	}

	pub fn has_externals(&self, name: &str) -> bool {
		self.externals.get(name).map(|e| !e.is_empty()).unwrap_or(false)
	}
}
