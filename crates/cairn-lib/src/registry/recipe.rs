//! Build-recipe declarations as the engine sees them.
//!
//! A [`Recipe`] is the registry's read-only view of one package: which
//! versions exist, which variants and dependencies are declared, which
//! virtuals it provides. How recipes are authored and loaded is the
//! registry's own business.

use std::collections::{HashMap, HashSet};

use serde::{Serialize, Deserialize};

use super::version::{Version, VersionConstraint};
use crate::spec::{DepFlags, Spec, VariantValue};

/// One known version of a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDecl {
	pub version: Version,
	/// Recipe authors may single out a version to break preference ties.
	pub preferred: bool,
}

impl VersionDecl {
	pub fn new(version: &str) -> Self {
		VersionDecl { version: Version::new(version), preferred: false }
	}
}

/// A variant a package declares, with the default used when a request
/// leaves it open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDecl {
	pub default: VariantValue,
	pub description: Option<String>,
	/// Allowed values for string variants; `None` leaves the value free.
	pub values: Option<Vec<String>>,
}

impl VariantDecl {
	pub fn bool(default: bool) -> Self {
		VariantDecl { default: VariantValue::Bool(default), description: None, values: None }
	}

	pub fn string(default: &str) -> Self {
		VariantDecl { default: VariantValue::String(default.to_string()), description: None, values: None }
	}
}

/// A declared dependency on another package or on a virtual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyDecl {
	pub name: String,
	pub constraint: VersionConstraint,
	pub depflags: DepFlags,
	/// The dependency only applies to nodes satisfying this condition.
	pub when: Option<Spec>,
}

impl DependencyDecl {
	pub fn new(name: &str, depflags: DepFlags) -> Self {
		DependencyDecl { name: name.to_string(), constraint: VersionConstraint::Any, depflags, when: None }
	}
}

/// A hard requirement the recipe places on every node of the package,
/// e.g. a platform restriction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementRule {
	pub require: Spec,
	pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
	pub name: String,
	/// Known versions, newest first.
	pub versions: Vec<VersionDecl>,
	pub variants: HashMap<String, VariantDecl>,
	pub dependencies: Vec<DependencyDecl>,
	/// Virtual names this package can stand in for.
	pub provides: HashSet<String>,
	pub requirements: Vec<RequirementRule>,
	/// Free-form classification tags, e.g. `build-tools` or `runtime`.
	pub tags: HashSet<String>,
	pub buildable: bool,
}

impl Recipe {
	pub fn new(name: &str) -> Self {
		Recipe {
			name: name.to_string(),
			versions: Vec::new(),
			variants: HashMap::new(),
			dependencies: Vec::new(),
			provides: HashSet::new(),
			requirements: Vec::new(),
			tags: HashSet::new(),
			buildable: true,
		}
	}

	pub fn is_tagged(&self, tag: &str) -> bool {
		self.tags.contains(tag)
	}

	pub fn declares_variant(&self, name: &str) -> bool {
		self.variants.contains_key(name)
	}

	/// Dependency declarations whose `when` condition `node` satisfies.
	pub fn dependencies_of<'a>(&'a self, node: &'a Spec) -> impl Iterator<Item = &'a DependencyDecl> {
		self.dependencies.iter().filter(move |decl| {
			match &decl.when {
				Some(condition) => node.satisfies(condition),
				None => true,
			}
		})
	}
}
