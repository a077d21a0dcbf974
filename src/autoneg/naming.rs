//! # Name Generator
//!
//! Deterministic backend service names derived from a Service's namespace,
//! name and port.
//!
//! A template is a hyphen-separated list of the tokens `{namespace}`, `{name}`,
//! `{port}` and `{hash}`. `{hash}` expands to the first eight hex characters of
//! `sha256("{namespace};{name};{port}")`, so two workloads whose other fields
//! collide after truncation still get distinct names.
//!
//! ```
//! use autoneg_controller::autoneg::naming::NameTemplate;
//!
//! let template = NameTemplate::parse("{name}-{port}").unwrap();
//! assert_eq!(template.generate("default", "web", "80"), "web-80");
//! ```

use crate::constants::{MAX_NAME_LENGTH, NAME_HASH_LENGTH};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Namespace,
    Name,
    Port,
    Hash,
}

impl Token {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "{namespace}" => Some(Self::Namespace),
            "{name}" => Some(Self::Name),
            "{port}" => Some(Self::Port),
            "{hash}" => Some(Self::Hash),
            _ => None,
        }
    }
}

/// Template rejected at parse time
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid service name template {template:?}: unknown token {token:?}")]
pub struct InvalidTemplate {
    pub template: String,
    pub token: String,
}

/// A parsed, validated naming template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    raw: String,
    tokens: Vec<Token>,
}

impl NameTemplate {
    /// Parse a template such as `{namespace}-{name}-{port}-{hash}`.
    ///
    /// # Errors
    /// Returns [`InvalidTemplate`] naming the first token that is not one of
    /// `{namespace}`, `{name}`, `{port}` or `{hash}`.
    pub fn parse(template: &str) -> Result<Self, InvalidTemplate> {
        let tokens = template
            .split('-')
            .map(|raw| {
                Token::parse(raw).ok_or_else(|| InvalidTemplate {
                    template: template.to_string(),
                    token: raw.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: template.to_string(),
            tokens,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Expand the template for one Service port.
    ///
    /// The result never exceeds [`MAX_NAME_LENGTH`] characters. Non-hash
    /// fields share the remaining budget and are truncated in proportion to
    /// their length.
    #[must_use]
    pub fn generate(&self, namespace: &str, name: &str, port: &str) -> String {
        let hash_count = self.tokens.iter().filter(|t| **t == Token::Hash).count();
        let separators = self.tokens.len().saturating_sub(1);
        let budget = MAX_NAME_LENGTH
            .saturating_sub(hash_count * NAME_HASH_LENGTH)
            .saturating_sub(separators);

        let fields: Vec<&str> = self
            .tokens
            .iter()
            .filter_map(|token| match token {
                Token::Namespace => Some(namespace),
                Token::Name => Some(name),
                Token::Port => Some(port),
                Token::Hash => None,
            })
            .collect();
        let mut trimmed = trim_fields_evenly(budget, &fields).into_iter();
        let hash = name_hash(namespace, name, port);

        let parts: Vec<String> = self
            .tokens
            .iter()
            .map(|token| match token {
                Token::Hash => hash.clone(),
                _ => trimmed.next().unwrap_or_default(),
            })
            .collect();

        let mut generated = parts.join("-");
        if generated.chars().count() > MAX_NAME_LENGTH {
            generated = generated.chars().take(MAX_NAME_LENGTH).collect();
        }
        generated
    }
}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Returns true when every hyphen-separated token of `template` is known.
#[must_use]
pub fn is_valid_template(template: &str) -> bool {
    NameTemplate::parse(template).is_ok()
}

/// Expand `template` for the given Service port.
#[must_use]
pub fn generate_name(namespace: &str, name: &str, port: &str, template: &NameTemplate) -> String {
    template.generate(namespace, name, port)
}

fn name_hash(namespace: &str, name: &str, port: &str) -> String {
    let digest = Sha256::digest(format!("{namespace};{name};{port}").as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(NAME_HASH_LENGTH);
    hex
}

/// Trim `fields` so their combined length is at most `max`.
///
/// Fields are shortened in proportion to their original length, so short
/// fields lose fewer characters than long ones. Characters lost to rounding
/// are handed back to the earliest fields. Nothing is trimmed when the
/// fields already fit.
#[must_use]
pub fn trim_fields_evenly(max: usize, fields: &[&str]) -> Vec<String> {
    let lengths: Vec<usize> = fields.iter().map(|f| f.chars().count()).collect();
    let total: usize = lengths.iter().sum();
    if total <= max {
        return fields.iter().map(|f| (*f).to_string()).collect();
    }
    if max == 0 {
        return vec![String::new(); fields.len()];
    }

    let excess = total - max;
    let mut remaining = max;
    let mut kept: Vec<usize> = lengths
        .iter()
        .map(|&len| {
            let keep = len.saturating_sub(len * excess / total).saturating_sub(1);
            remaining = remaining.saturating_sub(keep);
            keep
        })
        .collect();

    // Hand the rounding remainder back, earliest fields first.
    for (keep, &len) in kept.iter_mut().zip(&lengths) {
        if remaining == 0 {
            break;
        }
        if *keep < len {
            *keep += 1;
            remaining -= 1;
        }
    }

    fields
        .iter()
        .zip(kept)
        .map(|(field, keep)| field.chars().take(keep).collect())
        .collect()
}
