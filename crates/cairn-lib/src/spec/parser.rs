//! Recursive-descent parsing of spec literals into abstract spec graphs.
//!
//! The parser holds the current and lookahead tokens and consumes through
//! `accept`/`expect`. A literal holds one or more whitespace separated
//! specs; within one spec, every `^` dependency attaches to the root node,
//! optionally carrying an explicit edge-property block. Node attributes may
//! appear in any order but each at most once per node.

use petgraph::prelude::NodeIndex;

use super::Spec;
use super::ArchSpec;
use super::CompilerSpec;
use super::DepFlags;
use super::Variant;
use super::VariantValue;
use super::graph::{SpecGraph, DepEdge};
use super::lexer::{Token, TokenKind, Tokens, tokenize, underline};
use super::record::RecordMap;
use crate::registry::version::{Version, GitVersion, VersionConstraint};

/// Structural errors; every variant carries the literal and the offending
/// span so the message can underline it.
#[derive(Debug, Clone)]
pub enum SpecParsingError {
	UnexpectedToken { message: String, text: String, start: usize, end: usize },
	DuplicateAttribute { attribute: String, text: String, start: usize, end: usize },
	DanglingDependency { text: String, start: usize, end: usize },
	RedundantDependency { name: String, text: String, start: usize, end: usize },
	UnrecognizedEdgeProperty { key: String, text: String, start: usize, end: usize },
}

impl std::fmt::Display for SpecParsingError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SpecParsingError::UnexpectedToken { message, text, start, end } => {
				write!(f, "{}\n{}", message, underline(text, *start, *end))
			},
			SpecParsingError::DuplicateAttribute { attribute, text, start, end } => {
				write!(f, "'{}' may only appear once per node\n{}", attribute, underline(text, *start, *end))
			},
			SpecParsingError::DanglingDependency { text, start, end } => {
				write!(f, "dependency sigil is not followed by a package\n{}", underline(text, *start, *end))
			},
			SpecParsingError::RedundantDependency { name, text, start, end } => {
				write!(f, "cannot add a dependency to '{}', it is already concrete\n{}", name, underline(text, *start, *end))
			},
			SpecParsingError::UnrecognizedEdgeProperty { key, text, start, end } => {
				write!(f, "'{}' is not an edge property, expected 'deptypes' or 'virtuals'\n{}", key, underline(text, *start, *end))
			},
		}
	}
}

impl std::error::Error for SpecParsingError {}

/// Parses every spec in `text`.
pub fn parse(text: &str) -> crate::Result<Vec<SpecGraph>> {
	SpecParser::new(text)?.parse_all()
}

/// Parses a literal expected to hold exactly one spec.
pub fn parse_one(text: &str) -> crate::Result<SpecGraph> {
	let mut specs = parse(text)?;
	if specs.len() != 1 {
		return Err(crate::Error::Validation(format!("expected exactly one spec, found {}", specs.len())))
	}
	Ok(specs.remove(0))
}

pub struct SpecParser<'t> {
	text: &'t str,
	tokens: Tokens<'t>,
	current: Option<Token>,
	lookahead: Option<Token>,
	consumed: usize,
}

impl<'t> SpecParser<'t> {
	pub fn new(text: &'t str) -> crate::Result<Self> {
		let mut parser = SpecParser {
			text,
			tokens: tokenize(text),
			current: None,
			lookahead: None,
			consumed: 0,
		};
		parser.lookahead = parser.pull()?;
		Ok(parser)
	}

	/// Next non-whitespace token from the lexer.
	fn pull(&mut self) -> crate::Result<Option<Token>> {
		loop {
			match self.tokens.next() {
				None => return Ok(None),
				Some(Err(e)) => return Err(e.into()),
				Some(Ok(t)) if t.kind == TokenKind::Ws => continue,
				Some(Ok(t)) => return Ok(Some(t)),
			}
		}
	}

	fn advance(&mut self) -> crate::Result<()> {
		self.current = self.lookahead.take();
		self.lookahead = self.pull()?;
		self.consumed += 1;
		Ok(())
	}

	/// Advances when the lookahead is of `kind`.
	fn accept(&mut self, kind: TokenKind) -> crate::Result<bool> {
		if self.lookahead.as_ref().map(|t| t.kind == kind).unwrap_or(false) {
			self.advance()?;
			Ok(true)
		} else {
			Ok(false)
		}
	}

	/// Like `accept` but the token is mandatory.
	fn expect(&mut self, kind: TokenKind, description: &str) -> crate::Result<Token> {
		if self.accept(kind)? {
			Ok(self.current_token().clone())
		} else {
			Err(self.unexpected(&format!("expected {}", description)).into())
		}
	}

	fn current_token(&self) -> &Token {
		self.current.as_ref().expect("no token has been consumed yet")
	}

	fn lookahead_kind(&self) -> Option<TokenKind> {
		self.lookahead.as_ref().map(|t| t.kind)
	}

	fn unexpected(&self, message: &str) -> SpecParsingError {
		let (start, end) = match &self.lookahead {
			Some(t) => (t.start, t.end),
			None => (self.text.len(), self.text.len() + 1),
		};
		SpecParsingError::UnexpectedToken {
			message: message.to_string(),
			text: self.text.to_string(),
			start,
			end,
		}
	}

	fn duplicate(&self, attribute: &str, token: &Token) -> SpecParsingError {
		SpecParsingError::DuplicateAttribute {
			attribute: attribute.to_string(),
			text: self.text.to_string(),
			start: token.start,
			end: token.end,
		}
	}

	pub fn parse_all(&mut self) -> crate::Result<Vec<SpecGraph>> {
		let mut specs = Vec::new();
		while self.lookahead.is_some() {
			let before = self.consumed;
			let graph = self.parse_spec()?;
			if self.consumed == before {
				/* The spec grammar made no progress; refuse to loop on the token. */
				return Err(self.unexpected("unexpected token in spec literal").into())
			}
			specs.push(graph);
		}
		Ok(specs)
	}

	fn parse_spec(&mut self) -> crate::Result<SpecGraph> {
		let mut graph = SpecGraph::new(Spec::default());
		let root = graph.root;
		self.parse_node(&mut graph, root)?;
		loop {
			if self.accept(TokenKind::Dependency)? {
				let sigil = self.current_token().clone();
				self.parse_dependency(&mut graph, DepEdge::default(), &sigil)?;
			} else if self.accept(TokenKind::StartEdgeProperties)? {
				let sigil = self.current_token().clone();
				let edge = self.parse_edge_properties()?;
				self.parse_dependency(&mut graph, edge, &sigil)?;
			} else {
				break
			}
		}
		Ok(graph)
	}

	/// Parses the node after a dependency sigil and attaches it to the root
	/// with `edge`, merging with an existing node of the same name.
	fn parse_dependency(&mut self, graph: &mut SpecGraph, edge: DepEdge, sigil: &Token) -> crate::Result<()> {
		let starts_node = matches!(
			self.lookahead_kind(),
			Some(TokenKind::UnqualifiedPackageName)
				| Some(TokenKind::FullyQualifiedPackageName)
				| Some(TokenKind::Filename)
				| Some(TokenKind::DagHash)
		);
		if !starts_node {
			return Err(SpecParsingError::DanglingDependency {
				text: self.text.to_string(),
				start: sigil.start,
				end: sigil.end,
			}.into())
		}

		if graph.node(graph.root).is_node_concrete() {
			return Err(SpecParsingError::RedundantDependency {
				name: graph.node(graph.root).name_str().to_string(),
				text: self.text.to_string(),
				start: sigil.start,
				end: sigil.end,
			}.into())
		}

		let node = graph.add_node(Spec::default());
		self.parse_node(graph, node)?;

		let mut target = node;
		if let Some(name) = graph.node(node).name.clone() {
			let existing = graph.traverse().into_iter()
				.find(|&i| i != node && graph.node(i).name.as_deref() == Some(&name));
			if let Some(existing) = existing {
				if graph.node(existing).is_node_concrete() || graph.node(node).is_node_concrete() {
					return Err(SpecParsingError::RedundantDependency {
						name,
						text: self.text.to_string(),
						start: sigil.start,
						end: self.current_token().end,
					}.into())
				}
				let parsed = graph.graph.remove_node(node).expect("freshly added node exists");
				graph.node_mut(existing).constrain(&parsed);
				target = existing;
			}
		}

		graph.add_edge(graph.root, target, edge)
	}

	/// Parses the inside of a `^[ ... ]` block.
	fn parse_edge_properties(&mut self) -> crate::Result<DepEdge> {
		let mut edge = DepEdge::default();
		loop {
			if self.accept(TokenKind::EndEdgeProperties)? {
				break
			}
			let pair = self.expect(TokenKind::KeyValuePair, "an edge property or ']'")?;
			let (key, value) = pair.text.split_once('=').expect("key value token contains '='");
			match key {
				"deptypes" => {
					for part in value.split(',') {
						let flag = DepFlags::from_name(part).ok_or_else(|| SpecParsingError::UnexpectedToken {
							message: format!("'{}' is not a dependency type", part),
							text: self.text.to_string(),
							start: pair.start,
							end: pair.end,
						})?;
						edge.depflags = edge.depflags.union(flag);
					}
				},
				"virtuals" => {
					for part in value.split(',') {
						if !edge.virtuals.iter().any(|v| v == part) {
							edge.virtuals.push(part.to_string());
						}
					}
				},
				_ => {
					return Err(SpecParsingError::UnrecognizedEdgeProperty {
						key: key.to_string(),
						text: self.text.to_string(),
						start: pair.start,
						end: pair.end,
					}.into())
				},
			}
		}
		Ok(edge)
	}

	/// Parses one node's leading name (or file reference) and attributes
	/// into `index`.
	fn parse_node(&mut self, graph: &mut SpecGraph, index: NodeIndex) -> crate::Result<()> {
		if self.accept(TokenKind::FullyQualifiedPackageName)? {
			let token = self.current_token().clone();
			let (namespace, name) = token.text.rsplit_once('.').expect("qualified name contains a dot");
			graph.node_mut(index).namespace = Some(namespace.to_string());
			graph.node_mut(index).name = Some(name.to_string());
		} else if self.accept(TokenKind::UnqualifiedPackageName)? {
			let name = self.current_token().text.clone();
			graph.node_mut(index).name = Some(name);
		} else if self.accept(TokenKind::Filename)? {
			/* The file's structured content replaces the node wholesale. */
			let path = self.current_token().text.clone();
			let records = RecordMap::from_path(std::path::Path::new(&path))?;
			let loaded = records.to_graph()?;
			graph.merge_graph_at(index, &loaded);
			return Ok(())
		}

		loop {
			if graph.node(index).dag_hash.is_some() && self.lookahead_is_attribute() {
				return Err(self.unexpected("cannot constrain a spec referenced by hash").into())
			}
			if self.accept(TokenKind::Version)? {
				self.apply_version(graph, index)?;
			} else if self.accept(TokenKind::GitVersion)? {
				self.apply_git_version(graph, index)?;
			} else if self.accept(TokenKind::VersionHashPair)? {
				self.apply_version_hash_pair(graph, index)?;
			} else if self.accept(TokenKind::CompilerAndVersion)? {
				self.apply_compiler(graph, index, true)?;
			} else if self.accept(TokenKind::Compiler)? {
				self.apply_compiler(graph, index, false)?;
			} else if self.accept(TokenKind::PropagatedBoolVariant)? {
				self.apply_bool_variant(graph, index, true)?;
			} else if self.accept(TokenKind::BoolVariant)? {
				self.apply_bool_variant(graph, index, false)?;
			} else if self.accept(TokenKind::PropagatedKeyValuePair)? {
				self.apply_key_value(graph, index, true)?;
			} else if self.accept(TokenKind::KeyValuePair)? {
				self.apply_key_value(graph, index, false)?;
			} else if self.accept(TokenKind::DagHash)? {
				self.apply_hash(graph, index)?;
			} else {
				break
			}
		}
		Ok(())
	}

	fn lookahead_is_attribute(&self) -> bool {
		matches!(
			self.lookahead_kind(),
			Some(TokenKind::Version)
				| Some(TokenKind::GitVersion)
				| Some(TokenKind::VersionHashPair)
				| Some(TokenKind::CompilerAndVersion)
				| Some(TokenKind::Compiler)
				| Some(TokenKind::PropagatedBoolVariant)
				| Some(TokenKind::BoolVariant)
				| Some(TokenKind::PropagatedKeyValuePair)
				| Some(TokenKind::KeyValuePair)
				| Some(TokenKind::DagHash)
		)
	}

	fn set_versions(&self, graph: &mut SpecGraph, index: NodeIndex, constraint: VersionConstraint, token: &Token) -> crate::Result<()> {
		let node = graph.node_mut(index);
		if !matches!(node.versions, VersionConstraint::Any) {
			return Err(self.duplicate("version", token).into())
		}
		node.versions = constraint;
		Ok(())
	}

	fn apply_version(&mut self, graph: &mut SpecGraph, index: NodeIndex) -> crate::Result<()> {
		let token = self.current_token().clone();
		let constraint: VersionConstraint = token.text[1..].parse().map_err(|_| SpecParsingError::UnexpectedToken {
			message: "malformed version list".to_string(),
			text: self.text.to_string(),
			start: token.start,
			end: token.end,
		})?;
		self.set_versions(graph, index, constraint, &token)
	}

	fn apply_git_version(&mut self, graph: &mut SpecGraph, index: NodeIndex) -> crate::Result<()> {
		let token = self.current_token().clone();
		let body = &token.text[1..].trim_start_matches("git.").to_string();
		let (reference, mapped) = match body.split_once('=') {
			Some((r, v)) => (r.to_string(), Some(Version::new(v))),
			None => (body.clone(), None),
		};
		let git = GitVersion { reference, commit: false, mapped };
		self.set_versions(graph, index, VersionConstraint::Git(git), &token)
	}

	fn apply_version_hash_pair(&mut self, graph: &mut SpecGraph, index: NodeIndex) -> crate::Result<()> {
		let token = self.current_token().clone();
		let (reference, version) = token.text[1..].split_once('=').expect("hash pair token contains '='");
		let git = GitVersion {
			reference: reference.to_string(),
			commit: true,
			mapped: Some(Version::new(version)),
		};
		self.set_versions(graph, index, VersionConstraint::Git(git), &token)
	}

	fn apply_compiler(&mut self, graph: &mut SpecGraph, index: NodeIndex, with_version: bool) -> crate::Result<()> {
		let token = self.current_token().clone();
		if graph.node(index).compiler.is_some() {
			return Err(self.duplicate("compiler", &token).into())
		}
		let body = token.text[1..].trim_start();
		let compiler = if with_version {
			let (name, versions) = body.split_once('@').expect("compiler version token contains '@'");
			let mut compiler = CompilerSpec::new(name);
			compiler.version = versions.parse().map_err(|_| SpecParsingError::UnexpectedToken {
				message: "malformed compiler version".to_string(),
				text: self.text.to_string(),
				start: token.start,
				end: token.end,
			})?;
			compiler
		} else {
			CompilerSpec::new(body)
		};
		graph.node_mut(index).compiler = Some(compiler);
		Ok(())
	}

	fn apply_bool_variant(&mut self, graph: &mut SpecGraph, index: NodeIndex, propagate: bool) -> crate::Result<()> {
		let token = self.current_token().clone();
		let sigil_len = if propagate { 2 } else { 1 };
		let name = token.text[sigil_len..].to_string();
		let value = token.text.starts_with('+');
		if graph.node(index).variants.contains_key(&name) {
			return Err(self.duplicate(&name, &token).into())
		}
		graph.node_mut(index).variants.insert(name, Variant {
			value: VariantValue::Bool(value),
			propagate,
		});
		Ok(())
	}

	fn apply_key_value(&mut self, graph: &mut SpecGraph, index: NodeIndex, propagate: bool) -> crate::Result<()> {
		let token = self.current_token().clone();
		let separator = if propagate { "==" } else { "=" };
		let (key, value) = token.text.split_once(separator).expect("key value token contains separator");
		if matches!(key, "platform" | "os" | "target" | "arch") {
			if propagate {
				return Err(SpecParsingError::UnexpectedToken {
					message: "architecture settings cannot propagate".to_string(),
					text: self.text.to_string(),
					start: token.start,
					end: token.end,
				}.into())
			}
			return self.apply_arch(graph, index, key, value, &token)
		}
		if graph.node(index).variants.contains_key(key) {
			return Err(self.duplicate(key, &token).into())
		}
		graph.node_mut(index).variants.insert(key.to_string(), Variant {
			value: VariantValue::String(value.to_string()),
			propagate,
		});
		Ok(())
	}

	fn apply_arch(&mut self, graph: &mut SpecGraph, index: NodeIndex, key: &str, value: &str, token: &Token) -> crate::Result<()> {
		let arch = graph.node_mut(index).arch.get_or_insert_with(ArchSpec::default);
		match key {
			"platform" => {
				if arch.platform.is_some() { return Err(self.duplicate("platform", token).into()) }
				arch.platform = Some(value.to_string());
			},
			"os" => {
				if arch.os.is_some() { return Err(self.duplicate("os", token).into()) }
				arch.os = Some(value.to_string());
			},
			"target" => {
				if arch.target.is_some() { return Err(self.duplicate("target", token).into()) }
				arch.target = Some(value.to_string());
			},
			_ => {
				if !arch.is_empty() { return Err(self.duplicate("arch", token).into()) }
				let parts: Vec<&str> = value.split('-').collect();
				if parts.len() != 3 {
					return Err(SpecParsingError::UnexpectedToken {
						message: "malformed arch triple, expected platform-os-target".to_string(),
						text: self.text.to_string(),
						start: token.start,
						end: token.end,
					}.into())
				}
				arch.platform = Some(parts[0].to_string());
				arch.os = Some(parts[1].to_string());
				arch.target = Some(parts[2].to_string());
			},
		}
		Ok(())
	}

	fn apply_hash(&mut self, graph: &mut SpecGraph, index: NodeIndex) -> crate::Result<()> {
		let token = self.current_token().clone();
		let node = graph.node_mut(index);
		if node.dag_hash.is_some() {
			return Err(self.duplicate("hash", &token).into())
		}
		let constrained = !matches!(node.versions, VersionConstraint::Any)
			|| node.compiler.is_some()
			|| !node.variants.is_empty()
			|| node.arch.is_some();
		if constrained {
			return Err(SpecParsingError::UnexpectedToken {
				message: "cannot combine a hash reference with other attributes".to_string(),
				text: self.text.to_string(),
				start: token.start,
				end: token.end,
			}.into())
		}
		node.dag_hash = Some(token.text[1..].to_string());
		Ok(())
	}
}
