//! The platform snapshot and the microarchitecture lineage table.
//!
//! A target name resolves to a [`Microarch`] whose parent chain walks back
//! to the generic baseline of its family; anything a host can run, its
//! ancestors describe. Host detection happens outside the engine, the
//! snapshot only records its result.

use serde::{Serialize, Deserialize};

/// One microarchitecture in the built-in lineage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Microarch {
	pub name: &'static str,
	/// The closest older target whose code this one can still run.
	pub parent: Option<&'static str>,
	pub family: &'static str,
	/// Generic levels carry no vendor-specific extensions.
	pub generic: bool,
}

const MICROARCHES: &[Microarch] = &[
	Microarch { name: "x86_64", parent: None, family: "x86_64", generic: true },
	Microarch { name: "x86_64_v2", parent: Some("x86_64"), family: "x86_64", generic: true },
	Microarch { name: "x86_64_v3", parent: Some("x86_64_v2"), family: "x86_64", generic: true },
	Microarch { name: "x86_64_v4", parent: Some("x86_64_v3"), family: "x86_64", generic: true },
	Microarch { name: "haswell", parent: Some("x86_64_v2"), family: "x86_64", generic: false },
	Microarch { name: "broadwell", parent: Some("haswell"), family: "x86_64", generic: false },
	Microarch { name: "skylake", parent: Some("broadwell"), family: "x86_64", generic: false },
	Microarch { name: "icelake", parent: Some("skylake"), family: "x86_64", generic: false },
	Microarch { name: "zen2", parent: Some("x86_64_v2"), family: "x86_64", generic: false },
	Microarch { name: "zen3", parent: Some("zen2"), family: "x86_64", generic: false },
	Microarch { name: "zen4", parent: Some("zen3"), family: "x86_64", generic: false },
	Microarch { name: "aarch64", parent: None, family: "aarch64", generic: true },
	Microarch { name: "armv8.2a", parent: Some("aarch64"), family: "aarch64", generic: true },
	Microarch { name: "neoverse_n1", parent: Some("armv8.2a"), family: "aarch64", generic: false },
	Microarch { name: "neoverse_v1", parent: Some("neoverse_n1"), family: "aarch64", generic: false },
	Microarch { name: "ppc64le", parent: None, family: "ppc64le", generic: true },
	Microarch { name: "power9", parent: Some("ppc64le"), family: "ppc64le", generic: false },
	Microarch { name: "power10", parent: Some("power9"), family: "ppc64le", generic: false },
];

pub fn microarch(name: &str) -> Option<&'static Microarch> {
	MICROARCHES.iter().find(|m| m.name == name)
}

pub fn family_members(family: &str) -> Vec<&'static Microarch> {
	MICROARCHES.iter().filter(|m| m.family == family).collect()
}

impl Microarch {
	/// Older targets this one is compatible with, nearest first.
	pub fn ancestors(&self) -> Vec<&'static Microarch> {
		let mut out = Vec::new();
		let mut cursor = self.parent;
		while let Some(name) = cursor {
			match microarch(name) {
				Some(m) => {
					out.push(m);
					cursor = m.parent;
				},
				None => break,
			}
		}
		out
	}
}

/// Where a resolution is happening; supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
	pub name: String,
	pub os: String,
	pub host_target: String,
}

impl Default for Platform {
	fn default() -> Self {
		Platform {
			name: "linux".to_string(),
			os: "ubuntu22.04".to_string(),
			host_target: "x86_64_v3".to_string(),
		}
	}
}
