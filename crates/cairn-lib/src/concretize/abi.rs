//! ABI compatibility between specs, used to rank provider candidates
//! against an exemplar node so chosen providers link cleanly with the rest
//! of the graph.

use crate::spec::Spec;

/// Same compiler, same compiler version, and no conflicting operating
/// system. Artifacts built this way are safe to link together.
pub fn strict_compatible(candidate: &Spec, exemplar: &Spec) -> bool {
	if !os_compatible(candidate, exemplar) {
		return false
	}
	match (&candidate.compiler, &exemplar.compiler) {
		(Some(a), Some(b)) => {
			a.name == b.name
				&& !a.version.intersect(&b.version).is_unsatisfiable()
		},
		_ => false,
	}
}

/// Same compiler family only; version skew is tolerated.
pub fn loose_compatible(candidate: &Spec, exemplar: &Spec) -> bool {
	if !os_compatible(candidate, exemplar) {
		return false
	}
	match (&candidate.compiler, &exemplar.compiler) {
		(Some(a), Some(b)) => a.name == b.name,
		_ => false,
	}
}

fn os_compatible(candidate: &Spec, exemplar: &Spec) -> bool {
	let a = candidate.arch.as_ref().and_then(|a| a.os.as_ref());
	let b = exemplar.arch.as_ref().and_then(|a| a.os.as_ref());
	match (a, b) {
		(Some(a), Some(b)) => a == b,
		_ => true,
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::spec::CompilerSpec;
	use crate::registry::version::{Version, VersionConstraint};

	fn with_compiler(name: &str, version: Option<&str>) -> Spec {
		let mut spec = Spec::named("pkg");
		let mut compiler = CompilerSpec::new(name);
		if let Some(v) = version {
			compiler.version = VersionConstraint::exact(Version::new(v));
		}
		spec.compiler = Some(compiler);
		spec
	}

	#[test]
	fn same_compiler_and_version_is_strict() {
		let a = with_compiler("gcc", Some("12.1"));
		let b = with_compiler("gcc", Some("12.1"));
		assert!(strict_compatible(&a, &b));
		assert!(loose_compatible(&a, &b));
	}

	#[test]
	fn version_skew_downgrades_to_loose() {
		let a = with_compiler("gcc", Some("12.1"));
		let b = with_compiler("gcc", Some("11.3"));
		assert!(!strict_compatible(&a, &b));
		assert!(loose_compatible(&a, &b));
	}

	#[test]
	fn different_compiler_is_incompatible() {
		let a = with_compiler("gcc", Some("12.1"));
		let b = with_compiler("clang", Some("15.0"));
		assert!(!strict_compatible(&a, &b));
		assert!(!loose_compatible(&a, &b));
	}

	#[test]
	fn missing_compiler_never_ranks() {
		let a = Spec::named("pkg");
		let b = with_compiler("gcc", Some("12.1"));
		assert!(!strict_compatible(&a, &b));
		assert!(!loose_compatible(&a, &b));
	}
}
