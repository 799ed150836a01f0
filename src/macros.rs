//! Plan macro expansion.
//!
//! Plans reference macros as `%(name)s`. Expansion is a two-stage function:
//! [`expand_macros`] layers an override map over the declared values and then
//! resolves every reference to a fixpoint, returning a fresh map. Nothing is
//! mutated in place; callers thread the resolved map explicitly.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{Error, Result};

/// Macro name to value.
pub type Macros = BTreeMap<String, String>;

/// Upper bound on nested references; deeper chains are treated as cycles.
const MAX_DEPTH: usize = 32;

const REFERENCE: &str = r"%\(([A-Za-z0-9_]+)\)s";

/// `overrides` layered over `declared`, still unexpanded.
pub fn layer(declared: &Macros, overrides: &Macros) -> Macros {
    let mut layered = declared.clone();
    for (name, value) in overrides {
        layered.insert(name.clone(), value.clone());
    }
    layered
}

/// Layers `overrides` over `declared` and resolves all references.
pub fn expand_macros(declared: &Macros, overrides: &Macros) -> Result<Macros> {
    let layered = layer(declared, overrides);
    let mut resolver = Resolver::new(&layered)?;
    for name in layered.keys() {
        resolver.value(name, name, 0)?;
    }
    Ok(resolver.resolved)
}

/// Substitutes every `%(name)s` in `text`. Only the macros `text` reaches are
/// resolved, so an unrelated broken macro in `macros` does not fail the call.
pub fn expand_str(text: &str, macros: &Macros) -> Result<String> {
    Resolver::new(macros)?.text(text, text, 0)
}

/// Resolved value of one macro, `None` when it is not declared. Like
/// [`expand_str`], only the references that value needs are resolved.
pub fn lookup(name: &str, macros: &Macros) -> Result<Option<String>> {
    if !macros.contains_key(name) {
        return Ok(None);
    }
    Resolver::new(macros)?.value(name, name, 0).map(Some)
}

/// Resolves references against an unexpanded map, each name at most once.
struct Resolver<'a> {
    pattern: Regex,
    raw: &'a Macros,
    resolved: Macros,
}

impl<'a> Resolver<'a> {
    fn new(raw: &'a Macros) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(REFERENCE)?,
            raw,
            resolved: Macros::new(),
        })
    }

    fn value(&mut self, name: &str, origin: &str, depth: usize) -> Result<String> {
        if let Some(value) = self.resolved.get(name) {
            return Ok(value.clone());
        }
        let raw: &'a Macros = self.raw;
        let declared = raw.get(name).ok_or_else(|| Error::Macro {
            name: name.to_string(),
            message: format!("undefined macro referenced from '{}'", origin),
        })?;
        let value = self.text(declared, name, depth + 1)?;
        self.resolved.insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn text(&mut self, text: &str, origin: &str, depth: usize) -> Result<String> {
        if depth > MAX_DEPTH {
            return Err(Error::Macro {
                name: origin.to_string(),
                message: "reference cycle or nesting too deep".to_string(),
            });
        }

        let references: Vec<_> = self
            .pattern
            .captures_iter(text)
            .map(|captures| {
                let whole = captures.get(0).map(|m| m.range()).unwrap_or(0..0);
                (whole, captures[1].to_string())
            })
            .collect();
        if references.is_empty() {
            return Ok(text.to_string());
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (whole, name) in references {
            out.push_str(&text[last..whole.start]);
            out.push_str(&self.value(&name, origin, depth)?);
            last = whole.end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}
