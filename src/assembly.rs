//! A named bundle of essentials describing one sample collection.

use crate::{
    aggregate::{AggFunc, CategoricalPolicy},
    axis::{self, GroupMap, Id},
    controller::{EssentialsController, Reflection},
    error::{BiomeError, BiomeResult},
    essentials::{
        Essential, FrequencyTable, Mutation, RepPhylogeny, RepSequence, RepTaxonomy, SampleIndexed,
        SampleMetadata,
    },
};
use biome_protocol::{Axis, EssentialKind};
use csv::WriterBuilder;
use std::{
    collections::{BTreeMap, HashSet},
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// How inputs are restricted to a common identifier set before admission.
#[derive(Debug, Clone)]
pub enum Curb {
    /// Ids present in every input.
    Intersect,
    /// Ids of the reference that every input also carries.
    Reference(Essential),
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    pub curb: Option<Curb>,
    /// Insert independent copies instead of the given instances.
    pub copy: bool,
    /// Admit essentials that are already mounted elsewhere.
    pub remount: bool,
}

/// Frequency rows annotated with their lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct OtuTable {
    pub samples: Vec<Id>,
    pub rows: Vec<OtuRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OtuRow {
    pub feature: Id,
    pub counts: Vec<f64>,
    pub taxonomy: String,
}

impl OtuTable {
    pub fn to_csv_writer<W: Write>(&self, writer: W, sep: u8) -> BiomeResult<()> {
        let mut wtr = WriterBuilder::new().delimiter(sep).from_writer(writer);
        let mut header = vec!["#OTU ID".to_string()];
        header.extend(self.samples.iter().cloned());
        header.push("taxonomy".to_string());
        wtr.write_record(&header)?;
        for row in &self.rows {
            let mut record = vec![row.feature.clone()];
            record.extend(
                row.counts
                    .iter()
                    .map(|v| if v.is_nan() { String::new() } else { v.to_string() }),
            );
            record.push(row.taxonomy.clone());
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Assembly {
    name: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    controller: EssentialsController,
}

impl Assembly {
    pub fn new(essentials: Vec<Essential>, options: AssemblyOptions) -> BiomeResult<Self> {
        if essentials.is_empty() {
            return Err(BiomeError::invalid_input("No essentials were provided"));
        }
        let mut controller = EssentialsController::new(options.remount);
        let prepared = prepare(essentials, options.curb.as_ref(), options.copy, (None, None))?;
        check_admission(&controller, &prepared, (None, None))?;
        admit(&mut controller, prepared)?;
        debug!(
            "Assembly with {} essentials on {}",
            controller.count(),
            controller.id()
        );
        Ok(Self {
            name: None,
            metadata: BTreeMap::new(),
            controller,
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Admits more essentials. With [`Curb::Intersect`] the live axes take
    /// part in the intersection, and live members drop ids outside it.
    pub fn add_essentials(
        &mut self,
        essentials: Vec<Essential>,
        curb: Option<Curb>,
        copy: bool,
    ) -> BiomeResult<()> {
        if essentials.is_empty() {
            return Err(BiomeError::invalid_input("No essentials were provided"));
        }
        let prepared = prepare(
            essentials,
            curb.as_ref(),
            copy,
            (self.controller.feature_axis(), self.controller.sample_axis()),
        )?;
        let pending = if curb.is_some() {
            (
                shrunk_axis(self.controller.feature_axis(), &prepared, Essential::feature_ids),
                shrunk_axis(self.controller.sample_axis(), &prepared, Essential::sample_ids),
            )
        } else {
            (
                self.controller.feature_axis().map(<[Id]>::to_vec),
                self.controller.sample_axis().map(<[Id]>::to_vec),
            )
        };
        check_admission(&self.controller, &prepared, pending)?;
        if curb.is_some() {
            self.shrink_live_axes(&prepared)?;
        }
        admit(&mut self.controller, prepared)
    }

    fn shrink_live_axes(&mut self, prepared: &[Essential]) -> BiomeResult<()> {
        for which in [Axis::Feature, Axis::Sample] {
            let live = match which {
                Axis::Feature => self.controller.feature_axis(),
                Axis::Sample => self.controller.sample_axis(),
            };
            let Some(live) = live else { continue };
            let target = prepared.iter().find_map(|e| match which {
                Axis::Feature => e.feature_ids(),
                Axis::Sample => e.sample_ids(),
            });
            let Some(target) = target else { continue };
            let extra = axis::missing_ids(target, live);
            if extra.is_empty() {
                continue;
            }
            let mutation = match which {
                Axis::Feature => Mutation::RemoveFeatures { ids: extra },
                Axis::Sample => Mutation::RemoveSamples { ids: extra },
            };
            let source = self.source_for(which)?;
            self.controller.mutate(source, &mutation)?;
        }
        Ok(())
    }

    pub fn get_subset(&self, features: Option<&[Id]>, samples: Option<&[Id]>) -> BiomeResult<Assembly> {
        check_requested("feature", self.feature_ids(), features)?;
        check_requested("sample", self.sample_ids(), samples)?;
        let subsets = self
            .controller
            .essentials()
            .map(|e| e.get_subset(features, samples))
            .collect::<BiomeResult<Vec<_>>>()?;
        let mut subset = Assembly::new(subsets, AssemblyOptions::default())?;
        subset.name = self.name.clone();
        subset.metadata = self.metadata.clone();
        Ok(subset)
    }

    pub fn copy(&self) -> BiomeResult<Assembly> {
        let copies = self.controller.essentials().map(Essential::copy).collect();
        let mut copied = Assembly::new(copies, AssemblyOptions::default())?;
        copied.name = self.name.clone();
        copied.metadata = self.metadata.clone();
        Ok(copied)
    }

    pub fn to_otu_table(&self) -> BiomeResult<OtuTable> {
        let (Some(frequency), Some(taxonomy)) = (self.frequency(), self.taxonomy()) else {
            return Err(BiomeError::missing_prerequisite(
                "OTU table requires both FrequencyTable and RepTaxonomy",
            ));
        };
        let ranks = taxonomy.avail_ranks();
        let lineages: BTreeMap<Id, String> = taxonomy
            .get_lineage_by_id(None, Some(&ranks), true)?
            .into_iter()
            .collect();
        Ok(OtuTable {
            samples: frequency.sample_ids().to_vec(),
            rows: frequency
                .rows()
                .map(|(id, counts)| OtuRow {
                    feature: id.clone(),
                    counts: counts.to_vec(),
                    taxonomy: lineages.get(id).cloned().unwrap_or_default(),
                })
                .collect(),
        })
    }

    pub fn write_otu_table(&self, path: &Path, sep: u8) -> BiomeResult<()> {
        let table = self.to_otu_table()?;
        let file = File::create(path).map_err(|e| {
            BiomeError::io(format!("Could not write OTU table '{}': {e}", path.display()))
        })?;
        table.to_csv_writer(file, sep)
    }

    /// Writes one file per member into `dir` as `{prefix}{stem}.{ext}`.
    /// With `as_otu_table` frequency and taxonomy go into one OTU table.
    pub fn export(
        &self,
        dir: &Path,
        prefix: &str,
        as_otu_table: bool,
        sep: u8,
    ) -> BiomeResult<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|e| {
            BiomeError::io(format!("Could not create directory '{}': {e}", dir.display()))
        })?;
        let mut written = vec![];
        if as_otu_table {
            let path = dir.join(format!("{prefix}otu_table.csv"));
            self.write_otu_table(&path, sep)?;
            written.push(path);
        }
        for essential in self.controller.essentials() {
            let kind = essential.kind();
            if as_otu_table
                && matches!(kind, EssentialKind::FrequencyTable | EssentialKind::RepTaxonomy)
            {
                continue;
            }
            let path = dir.join(format!(
                "{prefix}{}.{}",
                kind.file_stem(),
                kind.export_extension()
            ));
            essential.write_to_path(&path, sep)?;
            written.push(path);
        }
        info!("Exported {} files to {}", written.len(), dir.display());
        Ok(written)
    }

    fn source_for(&self, which: Axis) -> BiomeResult<EssentialKind> {
        self.controller
            .kinds()
            .into_iter()
            .find(|kind| match which {
                Axis::Feature => kind.is_feature_indexed(),
                Axis::Sample => kind.is_sample_indexed(),
            })
            .ok_or_else(|| BiomeError::unsupported(format!("Assembly has no {which} axis")))
    }

    fn mutate_axis(&mut self, mutation: Mutation) -> BiomeResult<Reflection> {
        let source = self.source_for(mutation.axis())?;
        self.controller.mutate(source, &mutation)
    }

    pub fn drop_features_by_id(&mut self, ids: &[Id]) -> BiomeResult<Reflection> {
        self.mutate_axis(Mutation::RemoveFeatures { ids: ids.to_vec() })
    }

    pub fn drop_samples_by_id(&mut self, ids: &[Id]) -> BiomeResult<Reflection> {
        self.mutate_axis(Mutation::RemoveSamples { ids: ids.to_vec() })
    }

    pub fn merge_features_by_map(&mut self, groups: GroupMap, aggfunc: AggFunc) -> BiomeResult<Reflection> {
        self.mutate_axis(Mutation::MergeFeatures { groups, aggfunc })
    }

    /// `policy` reaches every sample indexed member, so metadata merged by
    /// reflection joins categorical values the same way.
    pub fn merge_samples_by_map(
        &mut self,
        groups: GroupMap,
        aggfunc: AggFunc,
        policy: CategoricalPolicy,
    ) -> BiomeResult<Reflection> {
        self.mutate_axis(Mutation::MergeSamples {
            groups,
            aggfunc,
            policy,
        })
    }

    pub fn rename_samples(&mut self, mapping: BTreeMap<Id, Id>) -> BiomeResult<Reflection> {
        self.mutate_axis(Mutation::RenameSamples { mapping })
    }

    pub fn drop_features_without_counts(&mut self) -> BiomeResult<Vec<Id>> {
        let empty = self
            .frequency()
            .ok_or_else(|| BiomeError::missing_prerequisite("FrequencyTable is required"))?
            .features_without_counts();
        if !empty.is_empty() {
            let mutation = Mutation::RemoveFeatures { ids: empty.clone() };
            self.controller.mutate(EssentialKind::FrequencyTable, &mutation)?;
        }
        Ok(empty)
    }

    pub fn drop_features_without_taxa(&mut self) -> BiomeResult<Vec<Id>> {
        let empty = self.require_taxonomy()?.find_features_without_taxa();
        if !empty.is_empty() {
            let mutation = Mutation::RemoveFeatures { ids: empty.clone() };
            self.controller.mutate(EssentialKind::RepTaxonomy, &mutation)?;
        }
        Ok(empty)
    }

    /// Features sharing a full lineage are merged; counts use `aggfunc`.
    pub fn merge_duplicated_features(&mut self, aggfunc: AggFunc) -> BiomeResult<GroupMap> {
        let groups = self.require_taxonomy()?.duplicates_group_map();
        let mutation = Mutation::MergeFeatures {
            groups: groups.clone(),
            aggfunc,
        };
        self.controller.mutate(EssentialKind::RepTaxonomy, &mutation)?;
        Ok(groups)
    }

    pub fn merge_features_by_rank(&mut self, rank: &str, aggfunc: AggFunc) -> BiomeResult<GroupMap> {
        let groups = self.require_taxonomy()?.rank_group_map(rank)?;
        let mutation = Mutation::MergeFeatures {
            groups: groups.clone(),
            aggfunc,
        };
        self.controller.mutate(EssentialKind::RepTaxonomy, &mutation)?;
        Ok(groups)
    }

    pub fn merge_samples_by_variable(
        &mut self,
        variable: &str,
        aggfunc: AggFunc,
        policy: CategoricalPolicy,
    ) -> BiomeResult<GroupMap> {
        let groups = self
            .sample_metadata()
            .ok_or_else(|| BiomeError::missing_prerequisite("SampleMetadata is required"))?
            .variable_group_map(variable)?;
        let mutation = Mutation::MergeSamples {
            groups: groups.clone(),
            aggfunc,
            policy,
        };
        self.controller.mutate(EssentialKind::SampleMetadata, &mutation)?;
        Ok(groups)
    }

    fn require_taxonomy(&self) -> BiomeResult<&RepTaxonomy> {
        self.taxonomy()
            .ok_or_else(|| BiomeError::missing_prerequisite("RepTaxonomy is required"))
    }

    pub fn controller(&self) -> &EssentialsController {
        &self.controller
    }

    pub fn essentials(&self) -> impl Iterator<Item = &Essential> {
        self.controller.essentials()
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

    pub fn sequences(&self) -> Option<&RepSequence> {
        self.controller.take_by_type().ok()
    }

    pub fn phylogeny(&self) -> Option<&RepPhylogeny> {
        self.controller.take_by_type().ok()
    }

    pub fn feature_ids(&self) -> Option<&[Id]> {
        self.controller.feature_axis()
    }

    pub fn sample_ids(&self) -> Option<&[Id]> {
        self.controller.sample_axis()
    }
}

fn check_requested(axis_name: &str, axis: Option<&[Id]>, requested: Option<&[Id]>) -> BiomeResult<()> {
    let Some(requested) = requested else {
        return Ok(());
    };
    let missing = match axis {
        Some(axis) => axis::missing_ids(axis, requested),
        None => requested.to_vec(),
    };
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BiomeError::invalid_input(format!(
            "Assembly: invalid {axis_name} ids are provided: {}",
            missing.join(", ")
        )))
    }
}

fn prepare(
    essentials: Vec<Essential>,
    curb: Option<&Curb>,
    copy: bool,
    live: (Option<&[Id]>, Option<&[Id]>),
) -> BiomeResult<Vec<Essential>> {
    let Some(curb) = curb else {
        return Ok(if copy {
            essentials.iter().map(Essential::copy).collect()
        } else {
            essentials
        });
    };
    let reference = match curb {
        Curb::Intersect => None,
        Curb::Reference(reference) => Some(reference),
    };
    let pools = || reference.into_iter().chain(essentials.iter());
    let features = axis::intersect_all(live.0.into_iter().chain(pools().filter_map(Essential::feature_ids)));
    let samples = axis::intersect_all(live.1.into_iter().chain(pools().filter_map(Essential::sample_ids)));
    debug!(
        "Curbing {} essentials to {:?} features and {:?} samples",
        essentials.len(),
        features.as_ref().map(Vec::len),
        samples.as_ref().map(Vec::len)
    );
    essentials
        .iter()
        .map(|e| e.get_subset(features.as_deref(), samples.as_deref()))
        .collect()
}

fn shrunk_axis(
    live: Option<&[Id]>,
    prepared: &[Essential],
    ids: fn(&Essential) -> Option<&[Id]>,
) -> Option<Vec<Id>> {
    let live = live?;
    match prepared.iter().find_map(ids) {
        Some(target) => Some(axis::retain_order(live, target)),
        None => Some(live.to_vec()),
    }
}

fn check_admission(
    controller: &EssentialsController,
    essentials: &[Essential],
    mut axes: (Option<Vec<Id>>, Option<Vec<Id>>),
) -> BiomeResult<()> {
    let mut seen = HashSet::new();
    for essential in essentials {
        let kind = essential.kind();
        let admissible = seen.insert(kind)
            && !controller.has_types(&[kind])
            && controller.verify_essential(essential, false, true)
            && fits_axis(&mut axes.0, essential.feature_ids())
            && fits_axis(&mut axes.1, essential.sample_ids());
        if !admissible {
            return Err(BiomeError::admission(format!(
                "{kind} cannot be admitted: duplicate kind, mismatched axis or foreign mount"
            )));
        }
    }
    Ok(())
}

fn fits_axis(canonical: &mut Option<Vec<Id>>, ids: Option<&[Id]>) -> bool {
    match (canonical.as_deref(), ids) {
        (Some(expected), Some(ids)) => axis::same_id_set(expected, ids),
        (None, Some(ids)) => {
            *canonical = Some(ids.to_vec());
            true
        }
        _ => true,
    }
}

fn admit(controller: &mut EssentialsController, essentials: Vec<Essential>) -> BiomeResult<()> {
    for essential in essentials {
        controller.insert(essential)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::essentials::{EssentialData, FeatureIndexed};
    use biome_protocol::ErrorCode;

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn frequency() -> FrequencyTable {
        FrequencyTable::new(
            ids(&["F1", "F2", "F3"]),
            ids(&["S1", "S2"]),
            vec![vec![1.0, 2.0], vec![0.0, 0.0], vec![5.0, 6.0]],
        )
        .unwrap()
    }

    fn taxonomy() -> RepTaxonomy {
        RepTaxonomy::from_lineages(
            vec![
                ("F1".into(), "k__Bacteria; p__Firmicutes; g__Bacillus".into()),
                ("F2".into(), "k__Bacteria; p__Firmicutes; g__Bacillus".into()),
                ("F3".into(), "k__Bacteria; p__Proteobacteria".into()),
                ("F4".into(), "k__Archaea".into()),
            ],
            None,
        )
        .unwrap()
    }

    fn metadata() -> SampleMetadata {
        SampleMetadata::new(
            ids(&["S1", "S2"]),
            vec!["site".into()],
            vec![vec![Some("gut".into())], vec![Some("gut".into())]],
        )
        .unwrap()
    }

    fn assembly() -> Assembly {
        Assembly::new(
            vec![frequency().into(), taxonomy().into(), metadata().into()],
            AssemblyOptions {
                curb: Some(Curb::Intersect),
                ..AssemblyOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_requires_essentials() {
        let err = Assembly::new(vec![], AssemblyOptions::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_mismatched_axes_rejected_without_curb() {
        let err = Assembly::new(
            vec![frequency().into(), taxonomy().into()],
            AssemblyOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Admission);
        assert!(err.message.contains("RepTaxonomy"));
    }

    #[test]
    fn test_intersect_curb() {
        let assembly = assembly();
        assert_eq!(assembly.feature_ids().unwrap(), ids(&["F1", "F2", "F3"]).as_slice());
        assert_eq!(assembly.taxonomy().unwrap().feature_ids().len(), 3);
    }

    #[test]
    fn test_reference_curb() {
        let reference: Essential = taxonomy().get_subset(Some(&ids(&["F1", "F4"]))).unwrap().into();
        let assembly = Assembly::new(
            vec![frequency().into(), taxonomy().into()],
            AssemblyOptions {
                curb: Some(Curb::Reference(reference)),
                ..AssemblyOptions::default()
            },
        )
        .unwrap();
        assert_eq!(assembly.feature_ids().unwrap(), ids(&["F1"]).as_slice());
    }

    #[test]
    fn test_copy_is_independent() {
        let original = assembly();
        let mut copied = original.copy().unwrap();
        assert_eq!(copied.frequency(), original.frequency());
        assert_eq!(copied.taxonomy(), original.taxonomy());
        copied.drop_features_by_id(&ids(&["F1"])).unwrap();
        assert_eq!(copied.feature_ids().unwrap().len(), 2);
        assert_eq!(original.feature_ids().unwrap().len(), 3);
        assert_eq!(original.frequency().unwrap().meta().revision(), 0);
    }

    #[test]
    fn test_get_subset() {
        let assembly = assembly();
        let subset = assembly
            .get_subset(Some(&ids(&["F1", "F3"])), Some(&ids(&["S2"])))
            .unwrap();
        assert_eq!(subset.frequency().unwrap().shape(), (2, 1));
        assert_eq!(subset.sample_metadata().unwrap().sample_ids(), ids(&["S2"]).as_slice());
        let err = assembly.get_subset(Some(&ids(&["F9"])), None).unwrap_err();
        assert!(err.message.contains("F9"));
    }

    #[test]
    fn test_otu_table_requires_taxonomy() {
        let without = Assembly::new(vec![frequency().into()], AssemblyOptions::default()).unwrap();
        assert_eq!(
            without.to_otu_table().unwrap_err().code,
            ErrorCode::MissingPrerequisite
        );
        let table = assembly().to_otu_table().unwrap();
        assert_eq!(table.rows[2].taxonomy, "k__Bacteria; p__Proteobacteria; g__");
        assert_eq!(table.rows[0].counts, vec![1.0, 2.0]);
    }

    #[test]
    fn test_export_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = assembly().export(dir.path(), "run1_", false, b',').unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("run1_frequency.csv").exists());
        assert!(dir.path().join("run1_sample_metadata.csv").exists());

        let otu = assembly().export(dir.path(), "run2_", true, b'\t').unwrap();
        assert_eq!(otu.len(), 2);
        let text = fs::read_to_string(dir.path().join("run2_otu_table.csv")).unwrap();
        assert!(text.starts_with("#OTU ID\tS1\tS2\ttaxonomy"));
    }

    #[test]
    fn test_cleanup_mutators_reflect() {
        let mut assembly = assembly();
        assert_eq!(assembly.drop_features_without_counts().unwrap(), ids(&["F2"]));
        assert!(!assembly.taxonomy().unwrap().feature_ids().contains(&"F2".to_string()));

        let groups = assembly.merge_features_by_rank("k", AggFunc::SUM).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(assembly.frequency().unwrap().row("F1").unwrap(), &[6.0, 8.0]);

        assembly
            .merge_samples_by_variable("site", AggFunc::SUM, CategoricalPolicy::default())
            .unwrap();
        assert_eq!(assembly.sample_ids().unwrap(), ids(&["gut"]).as_slice());
        assert_eq!(assembly.frequency().unwrap().value("F1", "gut"), Some(14.0));
    }

    #[test]
    fn test_add_essentials_shrinks_live_axes() {
        let mut assembly = Assembly::new(vec![frequency().into()], AssemblyOptions::default()).unwrap();
        let partial = taxonomy().get_subset(Some(&ids(&["F1", "F3", "F4"]))).unwrap();
        assembly
            .add_essentials(vec![partial.into()], Some(Curb::Intersect), false)
            .unwrap();
        assert_eq!(assembly.feature_ids().unwrap(), ids(&["F1", "F3"]).as_slice());
        assert_eq!(assembly.frequency().unwrap().feature_ids(), ids(&["F1", "F3"]).as_slice());
    }

    #[test]
    fn test_rejected_add_leaves_assembly_untouched() {
        let mut assembly = assembly();
        let second_taxonomy = taxonomy().get_subset(Some(&ids(&["F1", "F3"]))).unwrap();
        let err = assembly
            .add_essentials(vec![second_taxonomy.into()], Some(Curb::Intersect), false)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Admission);
        assert_eq!(assembly.feature_ids().unwrap(), ids(&["F1", "F2", "F3"]).as_slice());
        let frequency = assembly.frequency().unwrap();
        assert_eq!(frequency.feature_ids(), ids(&["F1", "F2", "F3"]).as_slice());
        assert_eq!(frequency.meta().revision(), 0);
    }

    #[test]
    fn test_reflected_sample_merge_uses_policy() {
        let metadata = SampleMetadata::new(
            ids(&["S1", "S2"]),
            vec!["site".into()],
            vec![vec![Some("gut".into())], vec![Some("skin".into())]],
        )
        .unwrap();
        let mut assembly = Assembly::new(
            vec![frequency().into(), metadata.into()],
            AssemblyOptions::default(),
        )
        .unwrap();
        let mut groups = GroupMap::new();
        groups.insert("ALL".into(), ids(&["S1", "S2"]));
        let reflection = assembly
            .merge_samples_by_map(groups, AggFunc::SUM, CategoricalPolicy::with_separator(";"))
            .unwrap();
        assert_eq!(reflection.len(), 2);
        assert_eq!(assembly.frequency().unwrap().value("F1", "ALL"), Some(3.0));
        assert_eq!(assembly.sample_metadata().unwrap().value("ALL", "site"), Some("gut;skin"));
    }
}
