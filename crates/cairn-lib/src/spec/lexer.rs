//! Tokenization of spec literals.
//!
//! Matching is longest-match alternation over an ordered pattern list; the
//! order breaks ties between patterns where one is a prefix of another
//! (a version-hash pair starts like a plain version, `^[` starts like `^`).
//! When nothing matches, the remainder is re-scanned with a separate set of
//! error patterns so the diagnostic can underline the whole offending run
//! rather than a single character.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
	StartEdgeProperties,
	EndEdgeProperties,
	Dependency,
	VersionHashPair,
	GitVersion,
	Version,
	PropagatedBoolVariant,
	BoolVariant,
	PropagatedKeyValuePair,
	KeyValuePair,
	CompilerAndVersion,
	Compiler,
	Filename,
	FullyQualifiedPackageName,
	UnqualifiedPackageName,
	DagHash,
	Ws,
}

/// One lexeme; produced once by the lexer, consumed once by the parser.
#[derive(Debug, Clone)]
pub struct Token {
	pub kind: TokenKind,
	pub text: String,
	pub start: usize,
	pub end: usize,
}

const NAME: &str = "[A-Za-z0-9_][A-Za-z0-9_-]*";
const VARIANT_NAME: &str = "[A-Za-z0-9_][A-Za-z0-9_.-]*";
const VALUE: &str = r"[A-Za-z0-9_+*.,:~/\\-]+";
const VERSION_LIST: &str = "[A-Za-z0-9_.:,-]+";

fn patterns() -> &'static Vec<(TokenKind, Regex)> {
	static PATTERNS: OnceLock<Vec<(TokenKind, Regex)>> = OnceLock::new();
	PATTERNS.get_or_init(|| {
		let table: Vec<(TokenKind, String)> = vec![
			(TokenKind::Ws, r"\s+".to_string()),
			(TokenKind::StartEdgeProperties, r"\^\[".to_string()),
			(TokenKind::Dependency, r"\^".to_string()),
			(TokenKind::EndEdgeProperties, r"\]".to_string()),
			(TokenKind::VersionHashPair, format!("@[0-9a-f]{{7,40}}={}", VARIANT_NAME)),
			(TokenKind::GitVersion, format!("@git\\.[A-Za-z0-9_./-]+(?:={})?", VARIANT_NAME)),
			(TokenKind::Version, format!("@{}", VERSION_LIST)),
			(TokenKind::PropagatedBoolVariant, format!(r"(?:\+\+|~~|--){}", VARIANT_NAME)),
			(TokenKind::BoolVariant, format!(r"[+~-]{}", VARIANT_NAME)),
			(TokenKind::PropagatedKeyValuePair, format!("{}=={}", VARIANT_NAME, VALUE)),
			(TokenKind::KeyValuePair, format!("{}={}", VARIANT_NAME, VALUE)),
			(TokenKind::CompilerAndVersion, format!("%\\s*{}@{}", NAME, VERSION_LIST)),
			(TokenKind::Compiler, format!("%\\s*{}", NAME)),
			(TokenKind::Filename, r"[A-Za-z0-9_.~/-]*\.(?:json|yaml)".to_string()),
			(TokenKind::FullyQualifiedPackageName, format!(r"{}(?:\.{})+", NAME, NAME)),
			(TokenKind::UnqualifiedPackageName, NAME.to_string()),
			(TokenKind::DagHash, "/[A-Za-z0-9]+".to_string()),
		];
		table.into_iter()
			.map(|(kind, pattern)| {
				let re = Regex::new(&format!("^(?:{})", pattern))
					.expect("token pattern failed to compile");
				(kind, re)
			})
			.collect()
	})
}

/// Patterns used only to shape the diagnostic once normal matching fails.
fn error_patterns() -> &'static Vec<(Regex, &'static str)> {
	static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
	PATTERNS.get_or_init(|| {
		vec![
			(Regex::new(r"^@\S*").expect("error pattern failed to compile"), "malformed version in spec literal"),
			(Regex::new(r"^%\S*").expect("error pattern failed to compile"), "malformed compiler in spec literal"),
			(Regex::new(r"^/\S*").expect("error pattern failed to compile"), "malformed hash reference in spec literal"),
			(Regex::new(r"^\S+").expect("error pattern failed to compile"), "unexpected characters in spec literal"),
		]
	})
}

/// Tokenization failure, pointing at the exact offending span.
#[derive(Debug, Clone)]
pub struct LexError {
	pub message: String,
	pub text: String,
	pub start: usize,
	pub end: usize,
}

impl LexError {
	fn diagnose(text: &str, pos: usize) -> Self {
		for (re, message) in error_patterns() {
			if let Some(m) = re.find(&text[pos..]) {
				return LexError {
					message: message.to_string(),
					text: text.to_string(),
					start: pos,
					end: pos + m.end(),
				}
			}
		}
		LexError {
			message: "unexpected characters in spec literal".to_string(),
			text: text.to_string(),
			start: pos,
			end: text.len().max(pos + 1),
		}
	}
}

impl std::fmt::Display for LexError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}\n{}", self.message, underline(&self.text, self.start, self.end))
	}
}

impl std::error::Error for LexError {}

/// Renders `text` with a caret underline covering `start..end`.
pub(crate) fn underline(text: &str, start: usize, end: usize) -> String {
	let width = end.saturating_sub(start).max(1);
	format!("    {}\n    {}{}", text, " ".repeat(start), "^".repeat(width))
}

/// A lazy, finite, non-restartable token sequence over one literal.
///
/// The first unmatched position ends the sequence with an error; nothing is
/// yielded after that.
pub struct Tokens<'t> {
	text: &'t str,
	pos: usize,
	failed: bool,
}

impl Iterator for Tokens<'_> {
	type Item = Result<Token, LexError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.failed || self.pos >= self.text.len() {
			return None
		}

		let rest = &self.text[self.pos..];
		let mut best: Option<(TokenKind, usize)> = None;
		for (kind, re) in patterns() {
			if let Some(m) = re.find(rest) {
				/* Strictly longer wins; equal length keeps the earlier pattern. */
				if best.map(|(_, len)| m.end() > len).unwrap_or(true) {
					best = Some((*kind, m.end()));
				}
			}
		}

		match best {
			Some((kind, len)) => {
				let start = self.pos;
				self.pos += len;
				Some(Ok(Token {
					kind,
					text: rest[..len].to_string(),
					start,
					end: self.pos,
				}))
			},
			None => {
				self.failed = true;
				Some(Err(LexError::diagnose(self.text, self.pos)))
			},
		}
	}
}

pub fn tokenize(text: &str) -> Tokens<'_> {
	Tokens { text, pos: 0, failed: false }
}
