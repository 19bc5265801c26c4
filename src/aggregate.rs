//! Reductions used when identifier groups are merged.

use biome_protocol::AggName;
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, sync::Arc};

type NumericFn = dyn Fn(&[f64]) -> f64 + Send + Sync;
type CategoricalFn = dyn Fn(&[String]) -> Option<String> + Send + Sync;

/// User supplied numeric reduction. Receives the non-missing values only.
#[derive(Clone)]
pub struct CustomAgg {
    name: String,
    func: Arc<NumericFn>,
}

impl CustomAgg {
    pub fn new(name: &str, func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)]
pub enum AggFunc {
    Named(AggName),
    Custom(CustomAgg),
}

impl AggFunc {
    pub const SUM: AggFunc = AggFunc::Named(AggName::Sum);
    pub const MEAN: AggFunc = AggFunc::Named(AggName::Mean);

    pub fn custom(name: &str, func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        AggFunc::Custom(CustomAgg::new(name, func))
    }

    /// Reduces `values`, skipping NaN. An empty input yields NaN, except for
    /// `count` which yields 0.
    pub fn reduce(&self, values: &[f64]) -> f64 {
        let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if let AggFunc::Named(AggName::Count) = self {
            return present.len() as f64;
        }
        if present.is_empty() {
            return f64::NAN;
        }
        match self {
            AggFunc::Named(name) => match name {
                AggName::Sum => present.iter().sum(),
                AggName::Mean => present.iter().sum::<f64>() / present.len() as f64,
                AggName::Median => {
                    let sorted: Vec<f64> = present.iter().copied().sorted_by(f64::total_cmp).collect();
                    let mid = sorted.len() / 2;
                    if sorted.len() % 2 == 0 {
                        (sorted[mid - 1] + sorted[mid]) / 2.0
                    } else {
                        sorted[mid]
                    }
                }
                AggName::Min => present.iter().copied().fold(f64::INFINITY, f64::min),
                AggName::Max => present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                AggName::First => present[0],
                AggName::Last => present[present.len() - 1],
                AggName::Count => present.len() as f64,
            },
            AggFunc::Custom(custom) => (custom.func)(&present),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AggFunc::Named(name) => name.to_string(),
            AggFunc::Custom(custom) => format!("custom:{}", custom.name),
        }
    }
}

impl Default for AggFunc {
    fn default() -> Self {
        AggFunc::MEAN
    }
}

impl From<AggName> for AggFunc {
    fn from(name: AggName) -> Self {
        AggFunc::Named(name)
    }
}

impl fmt::Debug for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AggFunc({})", self.describe())
    }
}

impl PartialEq for AggFunc {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AggFunc::Named(a), AggFunc::Named(b)) => a == b,
            (AggFunc::Custom(a), AggFunc::Custom(b)) => Arc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

impl Serialize for AggFunc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AggFunc::Named(name) => name.serialize(serializer),
            AggFunc::Custom(custom) => Err(serde::ser::Error::custom(format!(
                "custom aggregation '{}' cannot be serialized",
                custom.name
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for AggFunc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        AggName::deserialize(deserializer).map(AggFunc::Named)
    }
}

/// User supplied categorical reduction over the sorted distinct values.
#[derive(Clone)]
pub struct CustomCategorical(Arc<CategoricalFn>);

impl CustomCategorical {
    pub fn new(func: impl Fn(&[String]) -> Option<String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(func))
    }
}

impl fmt::Debug for CustomCategorical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomCategorical")
    }
}

/// How several categorical values collapse into one: a single shared value
/// is kept as is, distinct values are joined with `separator` in sorted
/// order unless `custom` overrides it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoricalPolicy {
    pub separator: String,
    #[serde(skip)]
    pub custom: Option<CustomCategorical>,
}

impl Default for CategoricalPolicy {
    fn default() -> Self {
        Self {
            separator: "|".to_string(),
            custom: None,
        }
    }
}

impl PartialEq for CategoricalPolicy {
    fn eq(&self, other: &Self) -> bool {
        let same_custom = match (&self.custom, &other.custom) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        };
        self.separator == other.separator && same_custom
    }
}

impl CategoricalPolicy {
    pub fn with_separator(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
            custom: None,
        }
    }

    pub fn reduce<'a, I>(&self, values: I) -> Option<String>
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let distinct: Vec<String> = values
            .into_iter()
            .flatten()
            .map(str::to_string)
            .sorted()
            .dedup()
            .collect();
        if let Some(custom) = &self.custom {
            return (custom.0)(&distinct);
        }
        match distinct.len() {
            0 => None,
            1 => distinct.into_iter().next(),
            _ => Some(distinct.join(&self.separator)),
        }
    }
}
