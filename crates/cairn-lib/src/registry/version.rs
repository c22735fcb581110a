//! Version literals, ranges and constraints.
//!
//! A [`Version`] is a single literal such as `1.2.3` or `2021.5-rc1`.
//! A [`VersionRange`] bounds versions from one or both sides.
//! A [`VersionConstraint`] is what a spec node carries: a union of ranges
//! (satisfied when any range admits the version) or a git pin, open until
//! concretized down to a single value.

use serde::{Serialize, Deserialize};

/// A single version literal.
///
/// Comparison is segment-wise: runs of digits compare numerically, runs of
/// letters compare lexically, so `1.2.10` sorts above `1.2.9` and `1.2b`
/// above `1.2a`. Separators (`.`, `-`, `_`) only delimit segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
	text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Segment {
	/* Str before Num so a numeric segment outranks a letter segment at the same position. */
	Str(String),
	Num(u64),
}

impl Version {
	pub fn new(text: &str) -> Self {
		Version { text: text.to_string() }
	}

	pub fn as_str(&self) -> &str {
		&self.text
	}

	fn segments(&self) -> Vec<Segment> {
		let mut out = Vec::new();
		let mut chars = self.text.chars().peekable();
		while let Some(&c) = chars.peek() {
			if c.is_ascii_digit() {
				let mut run = String::new();
				while let Some(&d) = chars.peek() {
					if !d.is_ascii_digit() { break }
					run.push(d);
					chars.next();
				}
				/* Segments long enough to overflow a u64 compare as text. */
				match run.parse::<u64>() {
					Ok(n) => out.push(Segment::Num(n)),
					Err(_) => out.push(Segment::Str(run)),
				}
			} else if c.is_alphanumeric() {
				let mut run = String::new();
				while let Some(&d) = chars.peek() {
					if !d.is_alphanumeric() || d.is_ascii_digit() { break }
					run.push(d);
					chars.next();
				}
				out.push(Segment::Str(run));
			} else {
				chars.next();
			}
		}
		out
	}
}

impl PartialEq for Version {
	fn eq(&self, other: &Self) -> bool {
		self.segments() == other.segments()
	}
}

impl Eq for Version {}

impl Ord for Version {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		let lhs = self.segments();
		let rhs = other.segments();
		for (l, r) in lhs.iter().zip(rhs.iter()) {
			match l.cmp(r) {
				std::cmp::Ordering::Equal => {},
				ord => return ord,
			}
		}
		/* The shorter version is the lesser one: 1.2 < 1.2.3 */
		lhs.len().cmp(&rhs.len())
	}
}

impl PartialOrd for Version {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::hash::Hash for Version {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.segments().hash(state);
	}
}

impl std::fmt::Display for Version {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.text)
	}
}

impl From<&str> for Version {
	fn from(value: &str) -> Self { Version::new(value) }
}

/// A version pinned to a git reference rather than a released number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitVersion {
	/// Branch or tag name, or a full commit sha when `commit` is set.
	pub reference: String,
	pub commit: bool,
	/// Declared equivalent release, used when the pin must be ordered or
	/// checked against plain version ranges.
	pub mapped: Option<Version>,
}

impl std::fmt::Display for GitVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if !self.commit {
			write!(f, "git.")?;
		}
		write!(f, "{}", self.reference)?;
		if let Some(v) = &self.mapped {
			write!(f, "={}", v)?;
		}
		Ok(())
	}
}

/// A contiguous range of versions.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionRange {
	#[default] Any,
	Explicit(Version),
	MinOnly(Version),
	MaxOnly(Version),
	MinMax(Version, Version),
}

impl VersionRange {
	pub fn is_version_within(&self, other: &Version) -> bool {
		match self {
			VersionRange::Any => true,
			VersionRange::Explicit(v) => other == v,
			VersionRange::MinOnly(min) => other >= min,
			VersionRange::MaxOnly(max) => other <= max,
			VersionRange::MinMax(min, max) => min <= other && other <= max,
		}
	}

	/// Gets the intersection between the ranges, if no intersection exists returns `None`
	pub fn inner_join(&self, other: &Self) -> Option<Self> {
		let lhs = self.clone();
		let rhs = other.clone();

		match (lhs, rhs) {
			(VersionRange::Any, r) => Some(r),
			(l, VersionRange::Any) => Some(l),

			(VersionRange::Explicit(a), VersionRange::Explicit(b)) => if a == b { Some(VersionRange::Explicit(a)) } else { None },
			(VersionRange::Explicit(a), b) => if b.is_version_within(&a) { Some(VersionRange::Explicit(a)) } else { None },
			(a, VersionRange::Explicit(b)) => if a.is_version_within(&b) { Some(VersionRange::Explicit(b)) } else { None },

			(VersionRange::MinOnly(a), VersionRange::MinOnly(b)) => Some(VersionRange::MinOnly(std::cmp::max(a, b))),
			(VersionRange::MaxOnly(a), VersionRange::MaxOnly(b)) => Some(VersionRange::MaxOnly(std::cmp::min(a, b))),

			(VersionRange::MinOnly(a), VersionRange::MaxOnly(b)) | (VersionRange::MaxOnly(b), VersionRange::MinOnly(a)) =>
				if a <= b { Some(VersionRange::MinMax(a, b)) } else { None },

			(VersionRange::MinOnly(a), VersionRange::MinMax(b, c)) | (VersionRange::MinMax(b, c), VersionRange::MinOnly(a)) => {
				let min = std::cmp::max(a, b);
				if min > c { None } else { Some(VersionRange::MinMax(min, c)) }
			}

			(VersionRange::MaxOnly(a), VersionRange::MinMax(b, c)) | (VersionRange::MinMax(b, c), VersionRange::MaxOnly(a)) => {
				let max = std::cmp::min(a, c);
				if max < b { None } else { Some(VersionRange::MinMax(b, max)) }
			}

			(VersionRange::MinMax(a, b), VersionRange::MinMax(c, d)) => {
				let min = std::cmp::max(a, c);
				let max = std::cmp::min(b, d);
				if min <= max { Some(VersionRange::MinMax(min, max)) } else { None }
			},
		}
	}
}

impl std::str::FromStr for VersionRange {
	type Err = crate::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let parts: Vec<&str> = s.split(':').collect();
		match parts.as_slice() {
			[v] if !v.is_empty() => Ok(VersionRange::Explicit(Version::new(v))),
			["", ""] => Ok(VersionRange::Any),
			[min, ""] => Ok(VersionRange::MinOnly(Version::new(min))),
			["", max] => Ok(VersionRange::MaxOnly(Version::new(max))),
			[min, max] => {
				let (min, max) = (Version::new(min), Version::new(max));
				if min > max {
					return Err(crate::Error::Validation(format!("inverted version range '{}'", s)))
				}
				Ok(VersionRange::MinMax(min, max))
			},
			_ => Err(crate::Error::Validation(format!("malformed version range '{}'", s))),
		}
	}
}

impl std::fmt::Display for VersionRange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			VersionRange::Any => write!(f, ":"),
			VersionRange::Explicit(v) => write!(f, "{}", v),
			VersionRange::MinOnly(v) => write!(f, "{}:", v),
			VersionRange::MaxOnly(v) => write!(f, ":{}", v),
			VersionRange::MinMax(min, max) => write!(f, "{}:{}", min, max),
		}
	}
}

/// The version attribute of a spec node.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionConstraint {
	/// No constraint at all; any known version may be chosen.
	#[default] Any,
	/// A union of ranges; satisfied when any one range admits the version.
	/// An empty union is unsatisfiable.
	Ranges(Vec<VersionRange>),
	/// Pinned to a git reference; concrete on its own.
	Git(GitVersion),
}

impl VersionConstraint {
	pub fn exact(version: Version) -> Self {
		VersionConstraint::Ranges(vec![VersionRange::Explicit(version)])
	}

	pub fn satisfies(&self, version: &Version) -> bool {
		match self {
			VersionConstraint::Any => true,
			VersionConstraint::Ranges(ranges) => ranges.iter().any(|r| r.is_version_within(version)),
			VersionConstraint::Git(git) => git.mapped.as_ref() == Some(version),
		}
	}

	/// Intersects two constraints. The result may be unsatisfiable; see
	/// [`VersionConstraint::is_unsatisfiable`].
	pub fn intersect(&self, other: &Self) -> Self {
		match (self, other) {
			(VersionConstraint::Any, r) => r.clone(),
			(l, VersionConstraint::Any) => l.clone(),
			(VersionConstraint::Git(a), VersionConstraint::Git(b)) => {
				if a == b { VersionConstraint::Git(a.clone()) } else { VersionConstraint::Ranges(vec![]) }
			},
			(VersionConstraint::Git(g), VersionConstraint::Ranges(ranges))
			| (VersionConstraint::Ranges(ranges), VersionConstraint::Git(g)) => {
				let admitted = match &g.mapped {
					Some(v) => ranges.iter().any(|r| r.is_version_within(v)),
					/* An unmapped pin can't be checked against ranges, only narrowed to nothing. */
					None => false,
				};
				if admitted { VersionConstraint::Git(g.clone()) } else { VersionConstraint::Ranges(vec![]) }
			},
			(VersionConstraint::Ranges(lhs), VersionConstraint::Ranges(rhs)) => {
				let mut joined = Vec::new();
				for l in lhs {
					for r in rhs {
						if let Some(j) = l.inner_join(r) {
							if !joined.contains(&j) { joined.push(j) }
						}
					}
				}
				VersionConstraint::Ranges(joined)
			},
		}
	}

	/// True when no version can ever satisfy the constraint.
	pub fn is_unsatisfiable(&self) -> bool {
		matches!(self, VersionConstraint::Ranges(ranges) if ranges.is_empty())
	}

	/// A constraint is concrete once it has collapsed to a single value.
	pub fn is_concrete(&self) -> bool {
		match self {
			VersionConstraint::Any => false,
			VersionConstraint::Ranges(ranges) => matches!(ranges.as_slice(), [VersionRange::Explicit(_)]),
			VersionConstraint::Git(_) => true,
		}
	}

	pub fn concrete_version(&self) -> Option<&Version> {
		match self {
			VersionConstraint::Ranges(ranges) => match ranges.as_slice() {
				[VersionRange::Explicit(v)] => Some(v),
				_ => None,
			},
			VersionConstraint::Git(git) => git.mapped.as_ref(),
			VersionConstraint::Any => None,
		}
	}

	pub fn ranges(&self) -> &[VersionRange] {
		match self {
			VersionConstraint::Ranges(ranges) => ranges,
			_ => &[],
		}
	}
}

impl std::str::FromStr for VersionConstraint {
	type Err = crate::Error;

	/// Parses a comma separated union of ranges, e.g. `1.2:1.4,2.0`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut ranges = Vec::new();
		for part in s.split(',') {
			if part.is_empty() {
				return Err(crate::Error::Validation(format!("empty range in version list '{}'", s)))
			}
			ranges.push(part.parse::<VersionRange>()?);
		}
		if matches!(ranges.as_slice(), [VersionRange::Any]) {
			return Ok(VersionConstraint::Any)
		}
		Ok(VersionConstraint::Ranges(ranges))
	}
}

impl std::fmt::Display for VersionConstraint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			VersionConstraint::Any => Ok(()),
			VersionConstraint::Ranges(ranges) => {
				let text: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
				write!(f, "{}", text.join(","))
			},
			VersionConstraint::Git(git) => write!(f, "{}", git),
		}
	}
}
