use super::{Essential, EssentialData, EssentialMeta, FeatureIndexed, subset_axis};
use crate::{
    aggregate::AggFunc,
    axis::{self, GroupMap, Id},
    error::{BiomeError, BiomeResult},
    lineage::{self, RANK_COUNT, Taxa},
};
use biome_protocol::{EssentialKind, TaxonomyNotation, VALID_RANKS};
use csv::{ReaderBuilder, WriterBuilder};
use regex::RegexBuilder;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::{Read, Write},
    path::Path,
};

const KIND: EssentialKind = EssentialKind::RepTaxonomy;

/// Per-feature taxonomy, one optional taxon per rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RepTaxonomy {
    meta: EssentialMeta,
    features: Vec<Id>,
    taxa: Vec<Taxa>,
}

impl RepTaxonomy {
    pub fn from_taxa(features: Vec<Id>, taxa: Vec<Taxa>) -> BiomeResult<Self> {
        axis::ensure_unique(KIND, "feature", &features)?;
        if features.len() != taxa.len() {
            return Err(BiomeError::invalid_input(format!(
                "{KIND}: {} taxa given for {} features",
                taxa.len(),
                features.len()
            )));
        }
        Ok(Self {
            meta: EssentialMeta::default(),
            features,
            taxa,
        })
    }

    /// Parses `(feature id, lineage)` pairs. The notation is detected from
    /// the first non-empty lineage when not given.
    pub fn from_lineages(
        lineages: Vec<(Id, String)>,
        notation: Option<TaxonomyNotation>,
    ) -> BiomeResult<Self> {
        let (features, strings): (Vec<Id>, Vec<String>) = lineages.into_iter().unzip();
        let taxa = lineage::parse_lineages(&strings, notation)?;
        Self::from_taxa(features, taxa)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.meta.name = Some(name.to_string());
        self
    }

    pub fn from_csv_reader<R: Read>(
        reader: R,
        sep: u8,
        notation: Option<TaxonomyNotation>,
    ) -> BiomeResult<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(sep)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let mut lineages = vec![];
        for record in rdr.records() {
            let record = record?;
            let id = record.get(0).unwrap_or_default().trim().to_string();
            if id.is_empty() {
                continue;
            }
            let lineage = record.get(1).unwrap_or_default().to_string();
            lineages.push((id, lineage));
        }
        Self::from_lineages(lineages, notation)
    }

    pub fn from_csv_path(path: &str, sep: u8, notation: Option<TaxonomyNotation>) -> BiomeResult<Self> {
        let file = File::open(path)
            .map_err(|e| BiomeError::io(format!("Could not read taxonomy '{path}': {e}")))?;
        Self::from_csv_reader(file, sep, notation)
    }

    pub fn to_csv_writer<W: Write>(&self, writer: W, sep: u8) -> BiomeResult<()> {
        let mut wtr = WriterBuilder::new().delimiter(sep).from_writer(writer);
        wtr.write_record(["#ID", "Taxonomy"])?;
        let ranks = self.avail_rank_indices();
        for (id, taxa) in self.features.iter().zip(&self.taxa) {
            let text = lineage::format_lineage(taxa, &ranks, true);
            wtr.write_record([id.as_str(), text.as_str()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path, sep: u8) -> BiomeResult<()> {
        let file = File::create(path).map_err(|e| {
            BiomeError::io(format!("Could not write taxonomy '{}': {e}", path.display()))
        })?;
        self.to_csv_writer(file, sep)
    }

    pub fn taxa(&self, id: &str) -> Option<&Taxa> {
        let idx = self.features.iter().position(|f| f == id)?;
        Some(&self.taxa[idx])
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Id, &Taxa)> {
        self.features.iter().zip(self.taxa.iter())
    }

    pub fn get_taxonomy_by_id(&self, ids: Option<&[Id]>) -> BiomeResult<Vec<(Id, Taxa)>> {
        let selected = self.selected(ids)?;
        Ok(selected
            .into_iter()
            .map(|idx| (self.features[idx].clone(), self.taxa[idx].clone()))
            .collect())
    }

    pub(crate) fn avail_rank_indices(&self) -> Vec<usize> {
        (0..RANK_COUNT)
            .filter(|idx| self.taxa.iter().any(|t| t[*idx].is_some()))
            .collect()
    }

    pub fn avail_ranks(&self) -> Vec<String> {
        lineage::rank_names(&self.avail_rank_indices())
    }

    /// One lineage per requested id (all features when `ids` is `None`),
    /// restricted to `desired_ranks` (every valid rank when `None`).
    pub fn get_lineage_by_id(
        &self,
        ids: Option<&[Id]>,
        desired_ranks: Option<&[String]>,
        missing_rank: bool,
    ) -> BiomeResult<Vec<(Id, String)>> {
        let ranks = match desired_ranks {
            Some(ranks) => lineage::rank_indices(ranks)?,
            None => (0..RANK_COUNT).collect(),
        };
        let selected = self.selected(ids)?;
        Ok(selected
            .into_iter()
            .map(|idx| {
                (
                    self.features[idx].clone(),
                    lineage::format_lineage(&self.taxa[idx], &ranks, missing_rank),
                )
            })
            .collect())
    }

    fn selected(&self, ids: Option<&[Id]>) -> BiomeResult<Vec<usize>> {
        match ids {
            None => Ok((0..self.features.len()).collect()),
            Some(ids) => {
                axis::ensure_present(KIND, "feature", &self.features, ids)?;
                Ok(axis::positions(&self.features, ids))
            }
        }
    }

    /// Features whose lineage matches `pattern`, either as a substring or a
    /// regular expression.
    pub fn find_features_by_pattern(
        &self,
        pattern: &str,
        case_sensitive: bool,
        regex: bool,
    ) -> BiomeResult<Vec<Id>> {
        let escaped = if regex {
            pattern.to_string()
        } else {
            regex::escape(pattern)
        };
        let matcher = RegexBuilder::new(&escaped)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| BiomeError::invalid_input(format!("Invalid pattern '{pattern}': {e}")))?;
        let ranks: Vec<usize> = (0..RANK_COUNT).collect();
        Ok(self
            .entries()
            .filter(|(_, taxa)| matcher.is_match(&lineage::format_lineage(taxa, &ranks, false)))
            .map(|(id, _)| id.clone())
            .collect())
    }

    pub fn find_features_without_taxa(&self) -> Vec<Id> {
        self.entries()
            .filter(|(_, taxa)| !lineage::has_any_taxon(taxa))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn drop_features_without_taxa(&mut self) -> BiomeResult<Vec<Id>> {
        let empty = self.find_features_without_taxa();
        if !empty.is_empty() {
            self.remove_features_by_id(&empty)?;
        }
        Ok(empty)
    }

    /// Features lacking a taxon at any of `ranks` (`any`), or at all of them.
    pub fn find_features_without_ranks(&self, ranks: &[String], any: bool) -> BiomeResult<Vec<Id>> {
        let ranks = lineage::rank_indices(ranks)?;
        Ok(self
            .entries()
            .filter(|(_, taxa)| {
                let mut missing = ranks.iter().map(|r| taxa[*r].is_none());
                if any {
                    missing.any(|m| m)
                } else {
                    missing.all(|m| m)
                }
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    pub fn drop_features_without_ranks(&mut self, ranks: &[String], any: bool) -> BiomeResult<Vec<Id>> {
        let missing = self.find_features_without_ranks(ranks, any)?;
        if !missing.is_empty() {
            self.remove_features_by_id(&missing)?;
        }
        Ok(missing)
    }

    /// Groups of features sharing an identical lineage, only groups with
    /// more than one member.
    pub fn duplicated(&self) -> GroupMap {
        self.group_map_by_ranks(&(0..RANK_COUNT).collect::<Vec<_>>())
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .collect()
    }

    /// Every feature grouped with the features sharing its full lineage.
    pub fn duplicates_group_map(&self) -> GroupMap {
        self.group_map_by_ranks(&(0..RANK_COUNT).collect::<Vec<_>>())
    }

    /// Features grouped by their lineage down to `rank`. Missing ranks take
    /// part in the lineage, so features unresolved at `rank` group together.
    pub fn rank_group_map(&self, rank: &str) -> BiomeResult<GroupMap> {
        let depth = lineage::rank_index(rank).ok_or_else(|| {
            BiomeError::invalid_input(format!(
                "Invalid rank '{rank}', expected one of {}",
                VALID_RANKS.join(",")
            ))
        })?;
        Ok(self.group_map_by_ranks(&(0..=depth).collect::<Vec<_>>()))
    }

    pub fn merge_duplicated_features(&mut self) -> BiomeResult<GroupMap> {
        let groups = self.duplicates_group_map();
        self.merge_features_by_map(&groups, &AggFunc::default())?;
        Ok(groups)
    }

    pub fn merge_features_by_rank(&mut self, rank: &str) -> BiomeResult<GroupMap> {
        let groups = self.rank_group_map(rank)?;
        self.merge_features_by_map(&groups, &AggFunc::default())?;
        Ok(groups)
    }

    /// New ids are the smallest member id of each lineage group.
    fn group_map_by_ranks(&self, ranks: &[usize]) -> GroupMap {
        let mut by_lineage: BTreeMap<String, Vec<Id>> = BTreeMap::new();
        for (id, taxa) in self.entries() {
            by_lineage
                .entry(lineage::format_lineage(taxa, ranks, true).to_lowercase())
                .or_default()
                .push(id.clone());
        }
        by_lineage
            .into_values()
            .filter_map(|mut members| {
                members.sort();
                members.first().cloned().map(|new_id| (new_id, members))
            })
            .collect()
    }

    pub fn get_subset(&self, features: Option<&[Id]>) -> BiomeResult<RepTaxonomy> {
        let kept = subset_axis(KIND, "feature", &self.features, features)?;
        let rows = axis::positions(&self.features, &kept);
        Ok(RepTaxonomy {
            meta: self.meta.detached(),
            taxa: rows.iter().map(|r| self.taxa[*r].clone()).collect(),
            features: kept,
        })
    }
}

impl FeatureIndexed for RepTaxonomy {
    fn feature_ids(&self) -> &[Id] {
        &self.features
    }

    fn remove_features_by_id(&mut self, ids: &[Id]) -> BiomeResult<()> {
        axis::ensure_present(KIND, "feature", &self.features, ids)?;
        let drop: HashSet<&Id> = ids.iter().collect();
        let (features, taxa) = self
            .features
            .drain(..)
            .zip(self.taxa.drain(..))
            .filter(|(id, _)| !drop.contains(id))
            .unzip();
        self.features = features;
        self.taxa = taxa;
        self.meta.touch();
        Ok(())
    }

    /// The new lineage of each group is the consensus of its members.
    /// `aggfunc` has no meaning for taxa.
    fn merge_features_by_map(&mut self, groups: &GroupMap, _aggfunc: &AggFunc) -> BiomeResult<()> {
        axis::validate_group_map(KIND, "feature", &self.features, groups)?;
        let index: HashMap<&str, usize> = self
            .features
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let taxa = groups
            .values()
            .map(|members| lineage::consensus(members.iter().map(|m| &self.taxa[index[m.as_str()]])))
            .collect();
        self.features = groups.keys().cloned().collect();
        self.taxa = taxa;
        self.meta.touch();
        Ok(())
    }
}

impl EssentialData for RepTaxonomy {
    fn kind(&self) -> EssentialKind {
        KIND
    }

    fn meta(&self) -> &EssentialMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EssentialMeta {
        &mut self.meta
    }

    fn feature_axis(&self) -> Option<&[Id]> {
        Some(&self.features)
    }

    fn as_feature_indexed_mut(&mut self) -> Option<&mut dyn FeatureIndexed> {
        Some(self)
    }

    fn subset(&self, features: Option<&[Id]>, _samples: Option<&[Id]>) -> BiomeResult<Essential> {
        self.get_subset(features).map(Essential::from)
    }

    fn write_to_path(&self, path: &Path, sep: u8) -> BiomeResult<()> {
        self.write_csv(path, sep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> RepTaxonomy {
        RepTaxonomy::from_lineages(
            vec![
                ("F1".into(), "k__Bacteria; p__Firmicutes; g__Bacillus".into()),
                ("F2".into(), "k__Bacteria; p__Firmicutes; g__Bacillus".into()),
                ("F3".into(), "k__Bacteria; p__Firmicutes; g__Listeria".into()),
                ("F4".into(), "".into()),
            ],
            None,
        )
        .unwrap()
    }

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_avail_ranks_and_lineages() {
        let tax = taxonomy();
        assert_eq!(tax.avail_ranks(), vec!["k", "p", "g"]);
        let lineages = tax
            .get_lineage_by_id(
                Some(&ids(&["F3"])),
                Some(&["k".to_string(), "c".to_string(), "g".to_string()]),
                true,
            )
            .unwrap();
        assert_eq!(lineages[0].1, "k__Bacteria; c__; g__Listeria");
        assert!(tax.get_lineage_by_id(Some(&ids(&["F99"])), None, false).is_err());
    }

    #[test]
    fn test_find_features() {
        let tax = taxonomy();
        assert_eq!(tax.find_features_without_taxa(), ids(&["F4"]));
        assert_eq!(
            tax.find_features_by_pattern("listeria", false, false).unwrap(),
            ids(&["F3"])
        );
        assert_eq!(
            tax.find_features_by_pattern("g__B.*us$", true, true).unwrap(),
            ids(&["F1", "F2"])
        );
        let missing = tax
            .find_features_without_ranks(&["g".to_string()], true)
            .unwrap();
        assert_eq!(missing, ids(&["F4"]));
    }

    #[test]
    fn test_merge_duplicated_features() {
        let mut tax = taxonomy();
        assert_eq!(tax.duplicated().len(), 1);
        tax.merge_duplicated_features().unwrap();
        assert_eq!(tax.feature_ids(), ids(&["F1", "F3", "F4"]).as_slice());
    }

    #[test]
    fn test_merge_by_rank_keeps_consensus() {
        let mut tax = taxonomy();
        tax.drop_features_without_taxa().unwrap();
        let groups = tax.merge_features_by_rank("p").unwrap();
        assert_eq!(groups["F1"], ids(&["F1", "F2", "F3"]));
        let merged = tax.taxa("F1").unwrap();
        assert_eq!(merged[2].as_deref(), Some("Firmicutes"));
        assert_eq!(merged[6], None);
    }

    #[test]
    fn test_csv_roundtrip_keeps_available_ranks() {
        let mut out = vec![];
        taxonomy().to_csv_writer(&mut out, b'\t').unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("F3\tk__Bacteria; p__Firmicutes; g__Listeria"));
        let back = RepTaxonomy::from_csv_reader(text.as_bytes(), b'\t', None).unwrap();
        assert_eq!(back.taxa("F1"), taxonomy().taxa("F1"));
    }
}
