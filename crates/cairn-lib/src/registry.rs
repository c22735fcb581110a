//! # The build-recipe registry
//!
//! The engine's read interface to the package universe: recipe lookups,
//! virtual/provider queries and the store of already installed concrete
//! specs. The registry is an immutable snapshot for the lifetime of one
//! resolution; how it is populated (recipe files, remote indexes) is
//! external to this crate.

use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};

use serde::{Serialize, Deserialize};

pub mod version;
pub mod recipe;
pub mod iterator;

pub use version::Version;
pub use version::VersionRange;
pub use version::VersionConstraint;
pub use version::GitVersion;
pub use recipe::Recipe;

use crate::spec::record::RecordMap;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Registry {
	recipes: HashMap<String, Recipe>,
	/// Installed concrete specs, keyed by their root content hash.
	installed: HashMap<String, RecordMap>,
}

impl Registry {
	pub fn new() -> Self {
		Default::default()
	}

	pub fn add_recipe(&mut self, recipe: Recipe) {
		self.recipes.insert(recipe.name.clone(), recipe);
	}

	pub fn recipe(&self, name: &str) -> Option<&Recipe> {
		self.recipes.get(name)
	}

	pub fn recipes(&self) -> impl Iterator<Item = &Recipe> {
		self.recipes.values()
	}

	pub fn is_known(&self, name: &str) -> bool {
		self.recipes.contains_key(name)
	}

	/// A name is virtual when no recipe owns it but at least one recipe
	/// provides it.
	pub fn is_virtual(&self, name: &str) -> bool {
		!self.recipes.contains_key(name)
			&& self.recipes.values().any(|r| r.provides.contains(name))
	}

	pub fn virtual_names(&self) -> BTreeSet<String> {
		let mut out = BTreeSet::new();
		for recipe in self.recipes.values() {
			for name in &recipe.provides {
				if !self.recipes.contains_key(name) {
					out.insert(name.clone());
				}
			}
		}
		out
	}

	/// All recipes providing `virtual_name`, in name order so callers see a
	/// deterministic baseline before any preference reordering.
	pub fn providers_of(&self, virtual_name: &str) -> Vec<&Recipe> {
		let mut out: Vec<&Recipe> = self.recipes.values()
			.filter(|r| r.provides.contains(virtual_name))
			.collect();
		out.sort_by(|a, b| a.name.cmp(&b.name));
		out
	}

	pub fn packages_with_tag(&self, tag: &str) -> Vec<&Recipe> {
		let mut out: Vec<&Recipe> = self.recipes.values()
			.filter(|r| r.is_tagged(tag))
			.collect();
		out.sort_by(|a, b| a.name.cmp(&b.name));
		out
	}

	pub fn register_installed(&mut self, records: RecordMap) {
		self.installed.insert(records.root.clone(), records);
	}

	pub fn is_package_installed(&self, name: &str) -> bool {
		self.installed.values()
			.any(|records| records.nodes.values().any(|node| node.name == name))
	}

	/// Finds an installed node whose content hash starts with `prefix`,
	/// returning the full hash and the record map containing it.
	pub fn lookup_hash(&self, prefix: &str) -> Option<(String, &RecordMap)> {
		for records in self.installed.values() {
			for hash in records.nodes.keys() {
				if hash.starts_with(prefix) {
					return Some((hash.clone(), records))
				}
			}
		}
		None
	}

	pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
		let data = bincode::serialize(self)?;
		let mut f = std::fs::File::create(path)?;
		f.write_all(&data)?;
		Ok(())
	}

	pub fn load(path: &std::path::Path) -> crate::Result<Self> {
		let mut f = std::fs::File::open(path)?;
		let mut data = Vec::<u8>::new();
		f.read_to_end(&mut data)?;
		Ok(bincode::deserialize(&data)?)
	}

	pub fn from_json(json: &str) -> crate::Result<Self> {
		Ok(serde_json::from_str(json)?)
	}
}
