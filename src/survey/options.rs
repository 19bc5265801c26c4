use crate::{
    aggregate::{AggFunc, CategoricalPolicy},
    error::{BiomeError, BiomeResult},
};
use biome_protocol::{Axis, EssentialKind, GroupBy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reduction for one axis with optional per-kind overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindAgg {
    pub default: AggFunc,
    #[serde(default)]
    pub overrides: BTreeMap<EssentialKind, AggFunc>,
}

impl KindAgg {
    pub fn new(default: AggFunc) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, kind: EssentialKind, aggfunc: AggFunc) -> Self {
        self.overrides.insert(kind, aggfunc);
        self
    }

    pub fn resolve(&self, kind: EssentialKind) -> &AggFunc {
        self.overrides.get(&kind).unwrap_or(&self.default)
    }
}

/// Which reduction applies to which kind and axis.
///
/// In JSON this is either a single name (`"sum"`), a pair
/// (`{"feature": "sum", "sample": "mean"}`) or per-kind maps
/// (`{"feature": {"default": "sum", "overrides": {...}}, "sample": ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggSpec {
    Single(AggFunc),
    Pair { feature: AggFunc, sample: AggFunc },
    PerKind { feature: KindAgg, sample: KindAgg },
}

impl Default for AggSpec {
    fn default() -> Self {
        AggSpec::Single(AggFunc::MEAN)
    }
}

impl AggSpec {
    pub fn resolve(&self, kind: EssentialKind, axis: Axis) -> &AggFunc {
        match (self, axis) {
            (AggSpec::Single(func), _) => func,
            (AggSpec::Pair { feature, .. }, Axis::Feature) => feature,
            (AggSpec::Pair { sample, .. }, Axis::Sample) => sample,
            (AggSpec::PerKind { feature, .. }, Axis::Feature) => feature.resolve(kind),
            (AggSpec::PerKind { sample, .. }, Axis::Sample) => sample.resolve(kind),
        }
    }

    fn describe(&self) -> serde_json::Value {
        let name = |func: &AggFunc| serde_json::Value::String(func.describe());
        let per_kind = |agg: &KindAgg| {
            let mut map = serde_json::Map::new();
            map.insert("default".into(), name(&agg.default));
            for (kind, func) in &agg.overrides {
                map.insert(kind.name().into(), name(func));
            }
            serde_json::Value::Object(map)
        };
        match self {
            AggSpec::Single(func) => name(func),
            AggSpec::Pair { feature, sample } => {
                serde_json::json!({ "feature": name(feature), "sample": name(sample) })
            }
            AggSpec::PerKind { feature, sample } => {
                serde_json::json!({ "feature": per_kind(feature), "sample": per_kind(sample) })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingSpec {
    pub feature: GroupBy,
    pub sample: GroupBy,
}

impl GroupingSpec {
    pub fn both(groupby: GroupBy) -> Self {
        Self {
            feature: groupby,
            sample: groupby,
        }
    }

    pub fn validate(&self) -> BiomeResult<()> {
        if self.sample == GroupBy::Taxonomy {
            return Err(BiomeError::invalid_input(
                "Grouping by taxonomy is only available on the feature axis",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    pub groupby: GroupingSpec,
    pub aggfunc: AggSpec,
    pub categorical: CategoricalPolicy,
}

impl MergeOptions {
    pub fn load_from_path(path: &str) -> BiomeResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BiomeError::io(format!("Could not read merge options '{path}': {e}")))?;
        serde_json::from_str(&text).map_err(|e| {
            BiomeError::invalid_input(format!("Could not parse merge options JSON '{path}': {e}"))
        })
    }

    /// Record of the choices stored in survey metadata. Custom reductions
    /// appear by name.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "groupby": {
                "feature": self.groupby.feature.to_string(),
                "sample": self.groupby.sample.to_string(),
            },
            "aggfunc": self.aggfunc.describe(),
            "categorical_separator": self.categorical.separator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biome_protocol::AggName;

    #[test]
    fn test_resolve_per_axis_and_kind() {
        let aggspec = AggSpec::PerKind {
            feature: KindAgg::new(AggFunc::SUM),
            sample: KindAgg::new(AggFunc::MEAN)
                .with_override(EssentialKind::FrequencyTable, AggName::Max.into()),
        };
        assert_eq!(aggspec.resolve(EssentialKind::RepTaxonomy, Axis::Feature), &AggFunc::SUM);
        assert_eq!(
            aggspec.resolve(EssentialKind::FrequencyTable, Axis::Sample),
            &AggFunc::Named(AggName::Max)
        );
        assert_eq!(aggspec.resolve(EssentialKind::SampleMetadata, Axis::Sample), &AggFunc::MEAN);
    }

    #[test]
    fn test_json_variants() {
        let single: MergeOptions = serde_json::from_str(r#"{"aggfunc": "sum"}"#).unwrap();
        assert_eq!(single.aggfunc, AggSpec::Single(AggFunc::SUM));
        assert_eq!(single.groupby, GroupingSpec::default());
        assert_eq!(single.categorical.separator, "|");

        let pair: MergeOptions = serde_json::from_str(
            r#"{"groupby": {"feature": "taxonomy"}, "aggfunc": {"feature": "sum", "sample": "mean"}}"#,
        )
        .unwrap();
        assert_eq!(pair.groupby.feature, GroupBy::Taxonomy);
        assert_eq!(pair.groupby.sample, GroupBy::Label);
        assert_eq!(pair.aggfunc.resolve(EssentialKind::FrequencyTable, Axis::Feature), &AggFunc::SUM);

        let per_kind: AggSpec = serde_json::from_str(
            r#"{"feature": {"default": "sum"}, "sample": {"default": "mean", "overrides": {"FrequencyTable": "median"}}}"#,
        )
        .unwrap();
        assert_eq!(
            per_kind.resolve(EssentialKind::FrequencyTable, Axis::Sample),
            &AggFunc::Named(AggName::Median)
        );
    }

    #[test]
    fn test_taxonomy_grouping_is_feature_only() {
        assert!(GroupingSpec::both(GroupBy::Taxonomy).validate().is_err());
        assert!(GroupingSpec::both(GroupBy::Index).validate().is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merge.json");
        std::fs::write(&path, r#"{"categorical": {"separator": ";"}}"#).unwrap();
        let options = MergeOptions::load_from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(options.categorical.separator, ";");
        let err = MergeOptions::load_from_path("/nonexistent/merge.json").unwrap_err();
        assert_eq!(err.code, biome_protocol::ErrorCode::Io);
    }
}
