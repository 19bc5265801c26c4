//! Pools several assemblies into one set of merged essentials.
//!
//! Construction groups both identifier axes across all sources, runs one
//! aggregator per supported kind and mounts the results on a fresh
//! controller. Source assemblies are shared and never mutated.

mod grouping;
mod merge;
mod options;

pub use grouping::{GroupRow, GroupTable};
pub use options::{AggSpec, GroupingSpec, KindAgg, MergeOptions};

use crate::{
    assembly::{Assembly, AssemblyOptions},
    axis::Id,
    controller::EssentialsController,
    error::{BiomeError, BiomeResult},
    essentials::{Essential, FrequencyTable, RepTaxonomy, SampleMetadata},
};
use biome_protocol::GroupBy;
use merge::MergeContext;
use std::{collections::BTreeMap, rc::Rc};
use tracing::info;

#[derive(Debug)]
pub struct Survey {
    name: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    assemblies: Vec<Rc<Assembly>>,
    controller: EssentialsController,
    feature_groups: GroupTable,
    sample_groups: GroupTable,
    options: MergeOptions,
}

impl Survey {
    pub fn new(assemblies: Vec<Rc<Assembly>>, options: MergeOptions) -> BiomeResult<Self> {
        if assemblies.is_empty() {
            return Err(BiomeError::invalid_input("No assemblies were provided"));
        }
        options.groupby.validate()?;
        if options.groupby.feature == GroupBy::Taxonomy {
            if let Some(pos) = assemblies.iter().position(|a| a.taxonomy().is_none()) {
                return Err(BiomeError::missing_prerequisite(format!(
                    "Grouping features by taxonomy requires RepTaxonomy in every assembly; assembly {pos} has none"
                )));
            }
        }

        let feature_groups = match options.groupby.feature {
            GroupBy::Taxonomy => {
                let taxonomies: Vec<&RepTaxonomy> =
                    assemblies.iter().filter_map(|a| a.taxonomy()).collect();
                GroupTable::by_taxonomy(&taxonomies)?
            }
            GroupBy::Index | GroupBy::Label => {
                let axes: Vec<Option<&[Id]>> = assemblies.iter().map(|a| a.feature_ids()).collect();
                GroupTable::by_ids(&axes)
            }
        };
        let sample_axes: Vec<Option<&[Id]>> = assemblies.iter().map(|a| a.sample_ids()).collect();
        let sample_groups = GroupTable::by_ids(&sample_axes);

        let ctx = MergeContext {
            assemblies: &assemblies,
            features: &feature_groups,
            samples: &sample_groups,
            options: &options,
        };
        let mut merged: Vec<Essential> = vec![];
        if let Some(taxonomy) = merge::merge_taxonomy(&ctx)? {
            merged.push(taxonomy.into());
        }
        if let Some(frequency) = merge::merge_frequency(&ctx)? {
            merged.push(frequency.into());
        }
        if let Some(metadata) = merge::merge_sample_metadata(&ctx)? {
            merged.push(metadata.into());
        }
        if merged.is_empty() {
            return Err(BiomeError::missing_prerequisite(
                "Assemblies carry none of FrequencyTable, RepTaxonomy or SampleMetadata",
            ));
        }

        let mut controller = EssentialsController::new(false);
        for essential in merged {
            controller.insert(essential)?;
        }
        info!(
            "Survey of {} assemblies: {} features x {} samples grouped by {}/{}",
            assemblies.len(),
            feature_groups.len(),
            sample_groups.len(),
            options.groupby.feature,
            options.groupby.sample
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("merge".to_string(), options.describe());
        metadata.insert(
            "assemblies".to_string(),
            serde_json::Value::from(
                assemblies
                    .iter()
                    .enumerate()
                    .map(|(pos, a)| a.name().map(str::to_string).unwrap_or_else(|| pos.to_string()))
                    .collect::<Vec<_>>(),
            ),
        );
        Ok(Self {
            name: None,
            metadata,
            assemblies,
            controller,
            feature_groups,
            sample_groups,
            options,
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Same sources and group tables, independent merged essentials.
    pub fn copy(&self) -> BiomeResult<Survey> {
        let mut controller = EssentialsController::new(false);
        for essential in self.controller.essentials() {
            controller.insert(essential.copy())?;
        }
        Ok(Survey {
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            assemblies: self.assemblies.clone(),
            controller,
            feature_groups: self.feature_groups.clone(),
            sample_groups: self.sample_groups.clone(),
            options: self.options.clone(),
        })
    }

    /// Assembly holding copies of the merged essentials.
    pub fn to_assembly(&self) -> BiomeResult<Assembly> {
        let copies = self.controller.essentials().map(Essential::copy).collect();
        let mut assembly = Assembly::new(copies, AssemblyOptions::default())?;
        assembly.metadata = self.metadata.clone();
        Ok(match &self.name {
            Some(name) => assembly.with_name(name),
            None => assembly,
        })
    }

    pub fn essentials(&self) -> impl Iterator<Item = &Essential> {
        self.controller.essentials()
    }

    pub fn assemblies(&self) -> &[Rc<Assembly>] {
        &self.assemblies
    }

    pub fn controller(&self) -> &EssentialsController {
        &self.controller
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub fn feature_groups(&self) -> &GroupTable {
        &self.feature_groups
    }

    pub fn sample_groups(&self) -> &GroupTable {
        &self.sample_groups
    }

    pub fn feature_ids(&self) -> Option<&[Id]> {
        self.controller.feature_axis()
    }

    pub fn sample_ids(&self) -> Option<&[Id]> {
        self.controller.sample_axis()
    }

    pub fn frequency(&self) -> Option<&FrequencyTable> {
        self.controller.take_by_type().ok()
    }

    pub fn taxonomy(&self) -> Option<&RepTaxonomy> {
        self.controller.take_by_type().ok()
    }

    pub fn sample_metadata(&self) -> Option<&SampleMetadata> {
        self.controller.take_by_type().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::AggFunc,
        essentials::{EssentialData, FeatureIndexed, SampleIndexed},
    };
    use biome_protocol::ErrorCode;

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn frequency(samples: &[&str], rows: &[(&str, &[f64])]) -> FrequencyTable {
        FrequencyTable::from_rows(
            ids(samples),
            rows.iter().map(|(id, v)| (id.to_string(), v.to_vec())).collect(),
        )
        .unwrap()
    }

    fn taxonomy(entries: &[(&str, &str)]) -> RepTaxonomy {
        RepTaxonomy::from_lineages(
            entries
                .iter()
                .map(|(id, lineage)| (id.to_string(), lineage.to_string()))
                .collect(),
            None,
        )
        .unwrap()
    }

    fn metadata(samples: &[&str], site: &[Option<&str>]) -> SampleMetadata {
        SampleMetadata::new(
            ids(samples),
            vec!["site".into()],
            site.iter().map(|v| vec![v.map(str::to_string)]).collect(),
        )
        .unwrap()
    }

    fn assembly(essentials: Vec<Essential>) -> Rc<Assembly> {
        Rc::new(Assembly::new(essentials, AssemblyOptions::default()).unwrap())
    }

    fn index_options(feature: AggFunc, sample: AggFunc) -> MergeOptions {
        MergeOptions {
            groupby: GroupingSpec::both(GroupBy::Index),
            aggfunc: AggSpec::Pair { feature, sample },
            ..MergeOptions::default()
        }
    }

    #[test]
    fn test_disjoint_samples_keep_source_cells() {
        let a = assembly(vec![
            frequency(&["S1", "S2"], &[("F1", &[1.0, 2.0]), ("F2", &[3.0, 4.0]), ("F3", &[5.0, 6.0])])
                .into(),
        ]);
        let b = assembly(vec![
            frequency(&["S3", "S4"], &[("F1", &[7.0, 8.0]), ("F2", &[9.0, 10.0]), ("F3", &[11.0, 12.0])])
                .into(),
        ]);
        let survey = Survey::new(vec![a, b], index_options(AggFunc::SUM, AggFunc::MEAN)).unwrap();
        let merged = survey.frequency().unwrap();
        assert_eq!(merged.shape(), (3, 4));
        assert_eq!(merged.value("F1", "S1"), Some(1.0));
        assert_eq!(merged.value("F2", "S4"), Some(10.0));
        assert_eq!(merged.value("F3", "S3"), Some(11.0));
    }

    #[test]
    fn test_sample_axis_is_union_without_duplicates() {
        let a = assembly(vec![frequency(&["S1", "S2"], &[("F1", &[1.0, 2.0])]).into()]);
        let b = assembly(vec![frequency(&["S2", "S3"], &[("F2", &[3.0, 4.0])]).into()]);
        let survey = Survey::new(vec![a, b], index_options(AggFunc::SUM, AggFunc::SUM)).unwrap();
        assert_eq!(survey.sample_ids().unwrap(), ids(&["S1", "S2", "S3"]).as_slice());
        let merged = survey.frequency().unwrap();
        assert_eq!(merged.value("F1", "S2"), Some(2.0));
        assert_eq!(merged.value("F2", "S2"), Some(3.0));
        assert!(merged.value("F1", "S3").unwrap().is_nan());
    }

    #[test]
    fn test_shared_cells_are_reduced() {
        let a = assembly(vec![frequency(&["S1"], &[("F1", &[2.0])]).into()]);
        let b = assembly(vec![frequency(&["S1"], &[("F1", &[6.0])]).into()]);
        let survey = Survey::new(vec![a, b], index_options(AggFunc::MEAN, AggFunc::SUM)).unwrap();
        assert_eq!(survey.frequency().unwrap().value("F1", "S1"), Some(4.0));
    }

    #[test]
    fn test_index_merge_over_many_features() {
        let rows = |samples: usize| -> Vec<(Id, Vec<f64>)> {
            (0..2000)
                .map(|i| (format!("F{i}"), vec![i as f64; samples]))
                .collect()
        };
        let a = assembly(vec![FrequencyTable::from_rows(ids(&["S1", "S2"]), rows(2)).unwrap().into()]);
        let b = assembly(vec![FrequencyTable::from_rows(ids(&["S2", "S3"]), rows(2)).unwrap().into()]);
        let survey = Survey::new(vec![a, b], index_options(AggFunc::SUM, AggFunc::SUM)).unwrap();
        let merged = survey.frequency().unwrap();
        assert_eq!(merged.shape(), (2000, 3));
        assert_eq!(merged.value("F1999", "S1"), Some(1999.0));
        assert_eq!(merged.value("F1999", "S2"), Some(3998.0));
        assert_eq!(merged.value("F7", "S3"), Some(7.0));
    }

    #[test]
    fn test_taxonomy_grouping() {
        let a = assembly(vec![
            frequency(&["S1"], &[("A1", &[1.0]), ("A2", &[2.0])]).into(),
            taxonomy(&[
                ("A1", "k__Bacteria; p__Firmicutes; g__Bacillus"),
                ("A2", "k__Bacteria; p__Firmicutes; g__Listeria"),
            ])
            .into(),
        ]);
        let b = assembly(vec![
            frequency(&["S2"], &[("B1", &[5.0]), ("B2", &[7.0])]).into(),
            taxonomy(&[("B1", "k__Bacteria; p__Firmicutes"), ("B2", "k__Archaea")]).into(),
        ]);
        let options = MergeOptions {
            groupby: GroupingSpec {
                feature: GroupBy::Taxonomy,
                sample: GroupBy::Index,
            },
            aggfunc: AggSpec::Single(AggFunc::SUM),
            ..MergeOptions::default()
        };
        let survey = Survey::new(vec![a, b], options).unwrap();
        assert_eq!(survey.feature_ids().unwrap(), ids(&["0", "1"]).as_slice());
        let taxonomy = survey.taxonomy().unwrap();
        let lineages = taxonomy.get_lineage_by_id(None, None, false).unwrap();
        assert_eq!(lineages[0], ("0".to_string(), "k__Archaea".to_string()));
        assert_eq!(lineages[1], ("1".to_string(), "k__Bacteria; p__Firmicutes".to_string()));
        let merged = survey.frequency().unwrap();
        assert_eq!(merged.value("1", "S1"), Some(3.0));
        assert_eq!(merged.value("1", "S2"), Some(5.0));
        assert!(merged.value("0", "S1").unwrap().is_nan());
        assert_eq!(survey.feature_groups().rows()[1].members[1], ids(&["B1"]));
    }

    #[test]
    fn test_taxonomy_grouping_requires_taxonomy_first() {
        let a = assembly(vec![frequency(&["S1"], &[("F1", &[1.0])]).into()]);
        let options = MergeOptions {
            groupby: GroupingSpec {
                feature: GroupBy::Taxonomy,
                sample: GroupBy::Label,
            },
            ..MergeOptions::default()
        };
        let err = Survey::new(vec![a], options).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingPrerequisite);
    }

    #[test]
    fn test_taxonomy_grouping_accepts_featureless_assembly() {
        let a = assembly(vec![
            frequency(&["S1"], &[("A1", &[4.0])]).into(),
            taxonomy(&[("A1", "k__Bacteria; p__Firmicutes")]).into(),
        ]);
        let empty = assembly(vec![
            frequency(&["S2"], &[]).into(),
            RepTaxonomy::from_lineages(vec![], None).unwrap().into(),
        ]);
        let options = MergeOptions {
            groupby: GroupingSpec {
                feature: GroupBy::Taxonomy,
                sample: GroupBy::Index,
            },
            ..MergeOptions::default()
        };
        let survey = Survey::new(vec![a, empty], options).unwrap();
        assert_eq!(survey.feature_ids().unwrap(), ids(&["0"]).as_slice());
        assert_eq!(survey.sample_ids().unwrap(), ids(&["S1", "S2"]).as_slice());
        let merged = survey.frequency().unwrap();
        assert_eq!(merged.value("0", "S1"), Some(4.0));
        assert!(merged.value("0", "S2").unwrap().is_nan());
    }

    #[test]
    fn test_metadata_merge_fills_missing_rows() {
        let a = assembly(vec![
            frequency(&["S1", "S2"], &[("F1", &[1.0, 2.0])]).into(),
            metadata(&["S1", "S2"], &[Some("gut"), Some("skin")]).into(),
        ]);
        let b = assembly(vec![
            frequency(&["S2", "S3"], &[("F1", &[3.0, 4.0])]).into(),
            metadata(&["S2", "S3"], &[Some("oral"), None]).into(),
        ]);
        let c = assembly(vec![frequency(&["S4"], &[("F1", &[5.0])]).into()]);
        let survey = Survey::new(vec![a, b, c], MergeOptions::default()).unwrap();
        let merged = survey.sample_metadata().unwrap();
        assert_eq!(merged.sample_ids(), ids(&["S1", "S2", "S3", "S4"]).as_slice());
        assert_eq!(merged.value("S1", "site"), Some("gut"));
        assert_eq!(merged.value("S2", "site"), Some("oral|skin"));
        assert_eq!(merged.value("S3", "site"), None);
        assert_eq!(merged.value("S4", "site"), None);
    }

    #[test]
    fn test_index_grouping_carries_lineages() {
        let a = assembly(vec![
            taxonomy(&[("F1", "k__Bacteria; p__Firmicutes; g__Bacillus")]).into(),
        ]);
        let b = assembly(vec![taxonomy(&[("F2", "k__Bacteria; p__Firmicutes")]).into()]);
        let survey = Survey::new(vec![a, b], MergeOptions::default()).unwrap();
        let taxonomy = survey.taxonomy().unwrap();
        assert_eq!(taxonomy.feature_ids(), ids(&["F1", "F2"]).as_slice());
        let lineages = taxonomy.get_lineage_by_id(Some(&ids(&["F1"])), None, false).unwrap();
        assert_eq!(lineages[0].1, "k__Bacteria; p__Firmicutes");
    }

    #[test]
    fn test_sources_untouched_and_copies_independent() {
        let a = assembly(vec![frequency(&["S1"], &[("F1", &[1.0]), ("F2", &[2.0])]).into()]);
        let survey = Survey::new(vec![a.clone()], MergeOptions::default()).unwrap();
        let mut exported = survey.to_assembly().unwrap();
        exported.drop_features_by_id(&ids(&["F1"])).unwrap();
        assert_eq!(survey.feature_ids().unwrap().len(), 2);
        assert_eq!(a.feature_ids().unwrap().len(), 2);
        assert_eq!(a.frequency().unwrap().meta().revision(), 0);

        let copied = survey.copy().unwrap();
        assert_ne!(copied.controller().id(), survey.controller().id());
        assert_eq!(copied.frequency(), survey.frequency());
        assert_eq!(survey.metadata["merge"]["groupby"]["feature"], "label");
        assert_eq!(survey.metadata["assemblies"][0], "0");
    }
}
