use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Which alternate identifier encodings the index generates per reference row.
///
/// The native, compact and 3-digit short forms are always generated. Stored
/// as JSON on disk, every field optional:
/// ```json
/// {
///   "strip_leading_zero": true,
///   "prefix_aliases": { "01F": ["03F", "3F"] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Also index `1F0293N` for a native `01F-029.3N`.
    pub strip_leading_zero: bool,
    /// Extra prefixes indexed in place of a row's own prefix.
    pub prefix_aliases: BTreeMap<String, Vec<String>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            strip_leading_zero: true,
            prefix_aliases: BTreeMap::new(),
        }
    }
}

impl RuleSet {
    /// Loads the rule set from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading rule set {}", path.display()))?;
        let rules = serde_json::from_str(&content)
            .with_context(|| format!("parsing rule set {}", path.display()))?;
        Ok(rules)
    }

    /// Alternate encodings of `native`, excluding `native` itself.
    ///
    /// Empty when the identifier is not in the hyphenated mileage form.
    pub fn alternates(&self, native: &str) -> Vec<String> {
        let Some(id) = NativeId::parse(native) else {
            return Vec::new();
        };

        let mut out = vec![id.compact(id.prefix)];
        let unpadded = id.prefix.strip_prefix('0').filter(|p| !p.is_empty());

        out.push(format!(
            "{}{}{}",
            unpadded.unwrap_or(id.prefix),
            &id.mileage[..3],
            id.direction
        ));
        if self.strip_leading_zero {
            if let Some(prefix) = unpadded {
                out.push(id.compact(prefix));
            }
        }
        if let Some(aliases) = self.prefix_aliases.get(id.prefix) {
            out.extend(aliases.iter().map(|alias| id.compact(alias)));
        }

        out.retain(|alt| alt != native);
        out.dedup();
        out
    }
}

/// A reference identifier such as `01F-029.3N`, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeId<'a> {
    pub prefix: &'a str,
    /// Kilometres padded to 3 digits plus the tenths digit: `29.3` is `0293`.
    pub mileage: String,
    pub direction: &'a str,
}

impl<'a> NativeId<'a> {
    pub fn parse(native: &'a str) -> Option<Self> {
        let (prefix, rest) = native.trim().split_once('-')?;
        let prefix = prefix.trim();
        let rest = rest.trim();
        if prefix.is_empty() {
            return None;
        }

        let number = rest.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        let direction = &rest[number.len()..];
        if direction.is_empty() {
            return None;
        }

        let (km, fraction) = number.split_once('.').unwrap_or((number, ""));
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if km.is_empty() || !all_digits(km) || !all_digits(fraction) {
            return None;
        }
        let tenths = fraction.chars().next().unwrap_or('0');

        Some(Self {
            prefix,
            mileage: format!("{km:0>3}{tenths}"),
            direction,
        })
    }

    fn compact(&self, prefix: &str) -> String {
        format!("{prefix}{}{}", self.mileage, self.direction)
    }
}
