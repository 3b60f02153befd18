//! Label-space construction.
//!
//! A metric's series are the ordered Cartesian product of its label
//! dimensions (profile dimensions merged with metric overrides), optionally
//! capped by `first_n` truncation or deterministic hash sampling. Everything
//! here runs once at startup; the result is immutable.

use crate::domain::errors::ConfigError;
use crate::domain::labels::{LabelSet, validate_label_name};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// How values for one label dimension are produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    #[serde(default)]
    pub values: Option<Vec<String>>,
    /// Inclusive `[start, end]`.
    #[serde(default)]
    pub range: Option<[i64; 2]>,
    /// Template for range values, e.g. `"i-{:02}"` or `"node-%03d"`.
    #[serde(default)]
    pub fmt: Option<String>,
}

impl LabelSpec {
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: Some(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn range(start: i64, end: i64, fmt: Option<&str>) -> Self {
        Self {
            values: None,
            range: Some([start, end]),
            fmt: fmt.map(str::to_string),
        }
    }

    /// Resolves to the ordered value list. Empty only when `values = []`.
    pub fn resolve(&self, label: &str) -> Result<Vec<String>, ConfigError> {
        let template = match &self.fmt {
            Some(raw) => Some(RangeTemplate::parse(raw).ok_or_else(|| {
                ConfigError::UnsupportedTemplate {
                    label: label.to_string(),
                    template: raw.clone(),
                }
            })?),
            None => None,
        };

        match (&self.values, &self.range) {
            (Some(values), None) => Ok(values.clone()),
            (None, Some([start, end])) => {
                if end < start {
                    return Err(ConfigError::MalformedRange {
                        label: label.to_string(),
                        start: *start,
                        end: *end,
                    });
                }
                let template = template.unwrap_or_default();
                Ok((*start..=*end).map(|i| template.render(i)).collect())
            }
            _ => Err(ConfigError::AmbiguousLabelSpec {
                label: label.to_string(),
            }),
        }
    }
}

/// Single-placeholder template. Accepts `{}`, `{:N}`, `{:0N}` and the
/// printf forms `%d`, `%Nd`, `%0Nd` (and `%i`).
#[derive(Debug, Clone, Default, PartialEq)]
struct RangeTemplate {
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl RangeTemplate {
    fn parse(raw: &str) -> Option<Self> {
        let (prefix, spec, suffix) = if let Some(open) = raw.find('{') {
            let close = open + raw[open..].find('}')?;
            let inner = &raw[open + 1..close];
            let spec = match inner {
                "" => "",
                _ => inner.strip_prefix(':')?,
            };
            let spec = spec.strip_suffix('d').unwrap_or(spec);
            (&raw[..open], spec, &raw[close + 1..])
        } else if let Some(pct) = raw.find('%') {
            let rest = &raw[pct + 1..];
            let end = rest.find(|c: char| !c.is_ascii_digit())?;
            if !matches!(rest.as_bytes()[end], b'd' | b'i') {
                return None;
            }
            (&raw[..pct], &rest[..end], &rest[end + 1..])
        } else {
            return None;
        };

        let reserved = |s: &str| s.contains(['{', '}', '%']);
        if reserved(prefix) || reserved(suffix) {
            return None;
        }
        if !spec.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let zero_pad = spec.len() > 1 && spec.starts_with('0');
        let width = if spec.is_empty() {
            0
        } else {
            spec.parse().ok()?
        };

        Some(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            width,
            zero_pad,
        })
    }

    fn render(&self, value: i64) -> String {
        let number = if self.zero_pad {
            format!("{:0width$}", value, width = self.width)
        } else {
            format!("{:>width$}", value, width = self.width)
        };
        format!("{}{}{}", self.prefix, number, self.suffix)
    }
}

/// Label dimensions in declaration order.
///
/// Deserializes from a TOML table, keeping document order, which fixes the
/// Cartesian product order and therefore `first_n` capping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelDimensions(Vec<(String, LabelSpec)>);

impl LabelDimensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, spec: LabelSpec) -> Self {
        self.insert(name.to_string(), spec);
        self
    }

    /// Replaces an existing dimension in place, or appends a new one.
    pub fn insert(&mut self, name: String, spec: LabelSpec) {
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = spec,
            None => self.0.push((name, spec)),
        }
    }

    /// Profile dimensions followed by overrides; overrides win on collision.
    pub fn merged_with(&self, overrides: &LabelDimensions) -> LabelDimensions {
        let mut merged = self.clone();
        for (name, spec) in &overrides.0 {
            merged.insert(name.clone(), spec.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LabelSpec)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for LabelDimensions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DimensionsVisitor;

        impl<'de> Visitor<'de> for DimensionsVisitor {
            type Value = LabelDimensions;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of label name to label spec")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut dims = LabelDimensions::new();
                while let Some((name, spec)) = map.next_entry::<String, LabelSpec>()? {
                    dims.insert(name, spec);
                }
                Ok(dims)
            }
        }

        deserializer.deserialize_map(DimensionsVisitor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    #[default]
    FirstN,
    Hash,
}

/// Named set of label dimensions plus an optional cap. Read-only after load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardinalityProfile {
    #[serde(default)]
    pub labels: LabelDimensions,
    #[serde(default)]
    pub series_cap: Option<usize>,
    #[serde(default)]
    pub sampling_strategy: SamplingStrategy,
}

/// The fixed set of series for one metric.
#[derive(Debug, Clone)]
pub struct LabelSpace {
    names: Vec<String>,
    combinations: Vec<Arc<LabelSet>>,
    uncapped_size: usize,
}

impl LabelSpace {
    pub fn label_names(&self) -> &[String] {
        &self.names
    }

    pub fn combinations(&self) -> &[Arc<LabelSet>] {
        &self.combinations
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    /// Size of the full product before any cap was applied.
    pub fn uncapped_size(&self) -> usize {
        self.uncapped_size
    }
}

/// Expands a profile (plus per-metric overrides) into a `LabelSpace`.
pub struct LabelSpaceBuilder<'a> {
    profile: &'a CardinalityProfile,
    overrides: Option<&'a LabelDimensions>,
}

impl<'a> LabelSpaceBuilder<'a> {
    pub fn new(profile: &'a CardinalityProfile) -> Self {
        Self {
            profile,
            overrides: None,
        }
    }

    pub fn with_overrides(mut self, overrides: Option<&'a LabelDimensions>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn build(&self) -> Result<LabelSpace, ConfigError> {
        let dims = match self.overrides {
            Some(overrides) => self.profile.labels.merged_with(overrides),
            None => self.profile.labels.clone(),
        };

        let mut names = Vec::with_capacity(dims.len());
        let mut value_lists = Vec::with_capacity(dims.len());
        for (name, spec) in dims.iter() {
            validate_label_name(name)?;
            names.push(name.to_string());
            value_lists.push(spec.resolve(name)?);
        }

        let uncapped_size = value_lists
            .iter()
            .fold(1usize, |acc, values| acc.saturating_mul(values.len()));

        let cap = self.profile.series_cap.filter(|cap| uncapped_size > *cap);
        let combinations = match (cap, self.profile.sampling_strategy) {
            (None, _) => cartesian_product(&names, &value_lists, uncapped_size),
            (Some(cap), SamplingStrategy::FirstN) => cartesian_product(&names, &value_lists, cap),
            (Some(cap), SamplingStrategy::Hash) => {
                let full = cartesian_product(&names, &value_lists, uncapped_size);
                sample_by_hash(full, cap)
            }
        };

        debug!(
            "LabelSpaceBuilder: {} dimensions, {} combinations ({} before cap)",
            names.len(),
            combinations.len(),
            uncapped_size
        );

        Ok(LabelSpace {
            names,
            combinations: combinations.into_iter().map(Arc::new).collect(),
            uncapped_size,
        })
    }
}

/// First `limit` combinations of the product, first dimension outermost.
fn cartesian_product(names: &[String], value_lists: &[Vec<String>], limit: usize) -> Vec<LabelSet> {
    if value_lists.iter().any(|values| values.is_empty()) {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(limit.min(1 << 16));
    let mut cursor = vec![0usize; value_lists.len()];
    while out.len() < limit {
        let pairs = names
            .iter()
            .zip(value_lists)
            .zip(&cursor)
            .map(|((name, values), &i)| (name.clone(), values[i].clone()))
            .collect();
        out.push(LabelSet::new(pairs));

        // Odometer advance, last dimension fastest.
        let mut dim = cursor.len();
        loop {
            if dim == 0 {
                return out;
            }
            dim -= 1;
            cursor[dim] += 1;
            if cursor[dim] < value_lists[dim].len() {
                break;
            }
            cursor[dim] = 0;
        }
    }
    out
}

fn sample_by_hash(combinations: Vec<LabelSet>, cap: usize) -> Vec<LabelSet> {
    let mut keyed: Vec<(u64, LabelSet)> = combinations
        .into_iter()
        .map(|set| (xxh3_64(set.sorted_pair_string().as_bytes()), set))
        .collect();
    keyed.sort_by_key(|(hash, _)| *hash);
    keyed.truncate(cap);
    keyed.into_iter().map(|(_, set)| set).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn profile(dims: LabelDimensions) -> CardinalityProfile {
        CardinalityProfile {
            labels: dims,
            ..CardinalityProfile::default()
        }
    }

    #[test]
    fn test_cartesian_product_covers_all_pairs() {
        let p = profile(
            LabelDimensions::new()
                .with("region", LabelSpec::values(["us", "eu"]))
                .with("az", LabelSpec::values(["a", "b"])),
        );
        let space = LabelSpaceBuilder::new(&p).build().unwrap();

        assert_eq!(space.len(), 4);
        let seen: HashSet<(String, String)> = space
            .combinations()
            .iter()
            .map(|set| {
                (
                    set.get("region").unwrap().to_string(),
                    set.get("az").unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(seen.len(), 4);
        // First dimension outermost.
        assert_eq!(space.combinations()[1].get("az"), Some("b"));
        assert_eq!(space.combinations()[1].get("region"), Some("us"));
    }

    #[test]
    fn test_zero_dimensions_yield_single_empty_set() {
        let p = profile(LabelDimensions::new());
        let space = LabelSpaceBuilder::new(&p).build().unwrap();
        assert_eq!(space.len(), 1);
        assert!(space.combinations()[0].is_empty());
    }

    #[test]
    fn test_explicitly_empty_values_yield_no_series() {
        let empty = LabelSpec::values(Vec::<String>::new());
        let p = profile(LabelDimensions::new().with("region", empty));
        let space = LabelSpaceBuilder::new(&p).build().unwrap();
        assert!(space.is_empty());
    }

    #[test]
    fn test_range_with_templates() {
        let braces = LabelSpec::range(1, 3, Some("i-{:02}")).resolve("instance").unwrap();
        assert_eq!(braces, vec!["i-01", "i-02", "i-03"]);

        let printf = LabelSpec::range(8, 10, Some("node-%03d")).resolve("node").unwrap();
        assert_eq!(printf, vec!["node-008", "node-009", "node-010"]);

        let plain = LabelSpec::range(0, 1, None).resolve("shard").unwrap();
        assert_eq!(plain, vec!["0", "1"]);
    }

    #[test]
    fn test_malformed_range_is_config_error() {
        let err = LabelSpec::range(5, 1, None).resolve("shard").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedRange { start: 5, end: 1, .. }));
    }

    #[test]
    fn test_unsupported_template_is_config_error() {
        for bad in ["no-placeholder", "{:x}", "%s", "{}-{}", "{name}"] {
            let err = LabelSpec::range(0, 1, Some(bad)).resolve("shard").unwrap_err();
            assert!(
                matches!(err, ConfigError::UnsupportedTemplate { .. }),
                "template {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_spec_needs_exactly_one_source() {
        assert!(LabelSpec::default().resolve("x").is_err());
        let both = LabelSpec {
            values: Some(vec!["a".into()]),
            range: Some([0, 1]),
            fmt: None,
        };
        assert!(matches!(
            both.resolve("x").unwrap_err(),
            ConfigError::AmbiguousLabelSpec { .. }
        ));
    }

    #[test]
    fn test_overrides_win_and_keep_position() {
        let p = profile(
            LabelDimensions::new()
                .with("region", LabelSpec::values(["us", "eu"]))
                .with("az", LabelSpec::values(["a", "b"])),
        );
        let overrides = LabelDimensions::new()
            .with("region", LabelSpec::values(["ap"]))
            .with("tier", LabelSpec::values(["gold"]));
        let space = LabelSpaceBuilder::new(&p)
            .with_overrides(Some(&overrides))
            .build()
            .unwrap();

        assert_eq!(space.label_names(), &["region", "az", "tier"]);
        assert_eq!(space.len(), 2);
        assert!(space.combinations().iter().all(|s| s.get("region") == Some("ap")));
    }

    #[test]
    fn test_invalid_label_name_rejected() {
        let p = profile(LabelDimensions::new().with("1region", LabelSpec::values(["us"])));
        let err = LabelSpaceBuilder::new(&p).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLabelName { .. }));
    }

    #[test]
    fn test_first_n_cap_keeps_declared_order() {
        let mut p = profile(LabelDimensions::new().with("id", LabelSpec::range(0, 99, None)));
        p.series_cap = Some(10);
        let space = LabelSpaceBuilder::new(&p).build().unwrap();

        assert_eq!(space.len(), 10);
        assert_eq!(space.uncapped_size(), 100);
        let ids: Vec<&str> = space.combinations().iter().map(|s| s.get("id").unwrap()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
    }

    #[test]
    fn test_hash_cap_is_deterministic() {
        let mut p = profile(LabelDimensions::new().with("id", LabelSpec::range(0, 99, None)));
        p.series_cap = Some(10);
        p.sampling_strategy = SamplingStrategy::Hash;

        let first = LabelSpaceBuilder::new(&p).build().unwrap();
        let second = LabelSpaceBuilder::new(&p).build().unwrap();

        assert_eq!(first.len(), 10);
        let a: Vec<_> = first.combinations().iter().map(|s| s.sorted_pair_string()).collect();
        let b: Vec<_> = second.combinations().iter().map(|s| s.sorted_pair_string()).collect();
        assert_eq!(a, b);
        let unique: HashSet<_> = a.iter().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_hash_cap_ignores_dimension_order() {
        let mut forward = profile(
            LabelDimensions::new()
                .with("region", LabelSpec::values(["us", "eu", "ap"]))
                .with("id", LabelSpec::range(0, 9, None)),
        );
        forward.series_cap = Some(5);
        forward.sampling_strategy = SamplingStrategy::Hash;

        let mut reversed = profile(
            LabelDimensions::new()
                .with("id", LabelSpec::range(0, 9, None))
                .with("region", LabelSpec::values(["us", "eu", "ap"])),
        );
        reversed.series_cap = Some(5);
        reversed.sampling_strategy = SamplingStrategy::Hash;

        let a: HashSet<String> = LabelSpaceBuilder::new(&forward)
            .build()
            .unwrap()
            .combinations()
            .iter()
            .map(|s| s.sorted_pair_string())
            .collect();
        let b: HashSet<String> = LabelSpaceBuilder::new(&reversed)
            .build()
            .unwrap()
            .combinations()
            .iter()
            .map(|s| s.sorted_pair_string())
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cap_not_applied_below_limit() {
        let mut p = profile(LabelDimensions::new().with("id", LabelSpec::range(0, 3, None)));
        p.series_cap = Some(10);
        p.sampling_strategy = SamplingStrategy::Hash;
        let space = LabelSpaceBuilder::new(&p).build().unwrap();
        let ids: Vec<&str> = space.combinations().iter().map(|s| s.get("id").unwrap()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn test_dimensions_deserialize_in_document_order() {
        let parsed: CardinalityProfile = toml::from_str(
            r#"
            series_cap = 3
            sampling_strategy = "hash"

            [labels.zone]
            values = ["z1"]

            [labels.app]
            range = [1, 2]
            fmt = "app-{}"
            "#,
        )
        .unwrap();

        let names: Vec<&str> = parsed.labels.names().collect();
        assert_eq!(names, vec!["zone", "app"]);
        assert_eq!(parsed.series_cap, Some(3));
        assert_eq!(parsed.sampling_strategy, SamplingStrategy::Hash);
    }
}
