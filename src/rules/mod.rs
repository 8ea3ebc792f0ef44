// src/rules/mod.rs

//! Rule registration and matching.
//!
//! A rule maps an output-name pattern to a pipeline, with a priority for
//! tie-breaking and templates for byproduct names produced by the same run.

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::errors::{BuildError, Result};
use crate::pipeline::Pipeline;

/// Source location of a rule or stage declaration in the host program.
///
/// Captured with `#[track_caller]` at each builder call site, so error
/// messages can point at the build script line that declared the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclSite(&'static Location<'static>);

impl DeclSite {
    #[track_caller]
    pub fn here() -> Self {
        DeclSite(Location::caller())
    }
}

impl fmt::Display for DeclSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.file(), self.0.line())
    }
}

/// A compiled output-name pattern.
///
/// Two forms: a wildcard string where `*` captures any run of characters
/// and `?` captures exactly one (anchored to the whole name), or an
/// explicit regular expression delimited by slashes (`/…/`, unanchored,
/// full regex syntax including named groups).
#[derive(Debug, Clone)]
pub struct RulePattern {
    raw: String,
    regex: Regex,
}

impl RulePattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let source = match explicit_regex(pattern) {
            Some(inner) => inner.to_string(),
            None => format!(
                "^{}$",
                regex::escape(pattern)
                    .replace(r"\*", "(.*)")
                    .replace(r"\?", "(.)")
            ),
        };

        let regex = Regex::new(&source).map_err(|source| BuildError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, name: &str) -> Option<NameMatch> {
        let caps = self.regex.captures(name)?;
        let groups = (0..caps.len())
            .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
            .collect();
        let named = self
            .regex
            .capture_names()
            .enumerate()
            .filter_map(|(i, n)| n.map(|n| (n.to_string(), i)))
            .collect();

        Some(NameMatch { groups, named })
    }
}

fn explicit_regex(pattern: &str) -> Option<&str> {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        Some(&pattern[1..pattern.len() - 1])
    } else {
        None
    }
}

/// The result of matching an output name against a rule pattern.
///
/// Owns its captures, so it can outlive the matched string and be carried
/// through the whole build. Group 0 is the matched text; for wildcard
/// patterns that is the entire requested name.
#[derive(Debug, Clone)]
pub struct NameMatch {
    groups: Vec<Option<String>>,
    named: Vec<(String, usize)>,
}

impl NameMatch {
    /// The matched text (capture group 0).
    pub fn text(&self) -> &str {
        self.groups
            .first()
            .and_then(|g| g.as_deref())
            .unwrap_or_default()
    }

    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Substitute capture references into a template.
    ///
    /// Recognized forms: `$1` (numbered group), `$name` (named group),
    /// `${1}` / `${name}` (braced), and `$$` for a literal dollar sign.
    /// Unmatched or unknown groups expand to the empty string; a `$` that
    /// starts no reference passes through unchanged.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            if let Some(after) = rest.strip_prefix('$') {
                out.push('$');
                rest = after;
                continue;
            }

            match take_reference(rest) {
                Some((reference, remainder)) => {
                    out.push_str(self.resolve_reference(reference));
                    rest = remainder;
                }
                None => out.push('$'),
            }
        }

        out.push_str(rest);
        out
    }

    pub(crate) fn resolve_reference(&self, reference: &str) -> &str {
        let index = if reference.bytes().all(|b| b.is_ascii_digit()) {
            reference.parse::<usize>().ok()
        } else {
            self.named
                .iter()
                .find(|(name, _)| name == reference)
                .map(|(_, i)| *i)
        };

        index
            .and_then(|i| self.groups.get(i))
            .and_then(|g| g.as_deref())
            .unwrap_or_default()
    }
}

/// Split a capture reference off the front of `rest`: either `{…}` up to
/// the closing brace, or the longest run of ASCII alphanumerics and
/// underscores. Returns `None` when no reference starts here.
pub(crate) fn take_reference(rest: &str) -> Option<(&str, &str)> {
    if let Some(inner) = rest.strip_prefix('{') {
        let end = inner.find('}')?;
        return Some((&inner[..end], &inner[end + 1..]));
    }

    let end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
        .map(|(i, _)| i)
        .unwrap_or(rest.len());

    if end == 0 {
        None
    } else {
        Some((&rest[..end], &rest[end..]))
    }
}

/// A registered pattern-to-pipeline mapping. Immutable once registered.
pub struct Rule {
    pattern: RulePattern,
    priority: i32,
    byproducts: Vec<String>,
    pipeline: Pipeline,
    decl_site: DeclSite,
}

impl Rule {
    pub(crate) fn new(
        pattern: RulePattern,
        priority: i32,
        byproducts: Vec<String>,
        pipeline: Pipeline,
        decl_site: DeclSite,
    ) -> Self {
        Self {
            pattern,
            priority,
            byproducts,
            pipeline,
            decl_site,
        }
    }

    pub fn pattern(&self) -> &RulePattern {
        &self.pattern
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Byproduct name templates, substituted against the match at build
    /// time to derive the extra output names this pipeline produces.
    pub fn byproducts(&self) -> &[String] {
        &self.byproducts
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn decl_site(&self) -> DeclSite {
        self.decl_site
    }

    pub fn matches(&self, name: &str) -> Option<NameMatch> {
        self.pattern.matches(name)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("pattern", &self.pattern.raw)
            .field("priority", &self.priority)
            .field("byproducts", &self.byproducts)
            .field("decl_site", &self.decl_site.to_string())
            .finish_non_exhaustive()
    }
}

/// The ordered store of registered rules.
///
/// Registration order matters: it is the deterministic tie-break when
/// several rules match at the same priority.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Arc<Rule>>,
}

impl RuleSet {
    pub fn register(&mut self, rule: Arc<Rule>) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the best rule for a requested name.
    ///
    /// All matching rules are grouped by priority and the lowest numeric
    /// priority wins. If that group holds more than one rule, an ambiguity
    /// warning names every candidate's declaration site and the first in
    /// registration order is chosen, stable across runs.
    pub fn best_match(&self, name: &str) -> Option<(Arc<Rule>, NameMatch)> {
        let matched: Vec<(&Arc<Rule>, NameMatch)> = self
            .rules
            .iter()
            .filter_map(|rule| rule.matches(name).map(|m| (rule, m)))
            .collect();

        let best_priority = matched.iter().map(|(rule, _)| rule.priority()).min()?;
        let mut group = matched
            .into_iter()
            .filter(|(rule, _)| rule.priority() == best_priority);

        let (rule, name_match) = group.next()?;
        let runners_up: Vec<String> = group.map(|(r, _)| r.decl_site().to_string()).collect();
        if !runners_up.is_empty() {
            warn!(
                asset = %name,
                chosen = %rule.decl_site(),
                also_matching = ?runners_up,
                "more than one rule with the same priority matches asset"
            );
        }

        Some((rule.clone(), name_match))
    }
}
