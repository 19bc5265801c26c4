use super::{Essential, EssentialData, EssentialMeta, FeatureIndexed, SampleIndexed, subset_axis};
use crate::{
    aggregate::AggFunc,
    axis::{self, GroupMap, Id},
    error::{BiomeError, BiomeResult},
};
use biome_protocol::EssentialKind;
use csv::{ReaderBuilder, WriterBuilder};
use std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::{Read, Write},
    path::Path,
};

const KIND: EssentialKind = EssentialKind::FrequencyTable;

/// Feature by sample abundance matrix. `NaN` marks a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable {
    meta: EssentialMeta,
    features: Vec<Id>,
    samples: Vec<Id>,
    /// Row-major, one row per feature.
    values: Vec<Vec<f64>>,
}

impl FrequencyTable {
    pub fn new(features: Vec<Id>, samples: Vec<Id>, values: Vec<Vec<f64>>) -> BiomeResult<Self> {
        axis::ensure_unique(KIND, "feature", &features)?;
        axis::ensure_unique(KIND, "sample", &samples)?;
        if values.len() != features.len() {
            return Err(BiomeError::invalid_input(format!(
                "{KIND}: {} rows given for {} features",
                values.len(),
                features.len()
            )));
        }
        if let Some((row, _)) = values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != samples.len())
        {
            return Err(BiomeError::invalid_input(format!(
                "{KIND}: row of feature '{}' does not have {} values",
                features[row],
                samples.len()
            )));
        }
        Ok(Self {
            meta: EssentialMeta::default(),
            features,
            samples,
            values,
        })
    }

    pub fn from_rows(samples: Vec<Id>, rows: Vec<(Id, Vec<f64>)>) -> BiomeResult<Self> {
        let (features, values) = rows.into_iter().unzip();
        Self::new(features, samples, values)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.meta.name = Some(name.to_string());
        self
    }

    /// First column holds feature ids, the header row holds sample ids.
    /// Cells that are empty or not numeric are rejected unless `allow_nan`,
    /// in which case they are read as missing.
    pub fn from_csv_reader<R: Read>(reader: R, sep: u8, allow_nan: bool) -> BiomeResult<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(sep)
            .has_headers(true)
            .from_reader(reader);
        let samples: Vec<Id> = rdr.headers()?.iter().skip(1).map(str::to_string).collect();
        let mut rows = vec![];
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let mut fields = record.iter();
            let feature = fields.next().unwrap_or_default().trim().to_string();
            let mut row = Vec::with_capacity(samples.len());
            for cell in fields {
                let cell = cell.trim();
                match cell.parse::<f64>() {
                    Ok(v) if !v.is_nan() => row.push(v),
                    _ if allow_nan => row.push(f64::NAN),
                    _ => {
                        return Err(BiomeError::invalid_input(format!(
                            "{KIND}: non-numeric value '{cell}' for feature '{feature}' on data line {}",
                            line + 1
                        )));
                    }
                }
            }
            rows.push((feature, row));
        }
        Self::from_rows(samples, rows)
    }

    pub fn from_csv_path(path: &str, sep: u8, allow_nan: bool) -> BiomeResult<Self> {
        let file = File::open(path)
            .map_err(|e| BiomeError::io(format!("Could not read frequency table '{path}': {e}")))?;
        Self::from_csv_reader(file, sep, allow_nan)
    }

    /// Writes rows ordered by descending total count when `sort_by_counts`,
    /// otherwise in axis order. Missing cells are written empty.
    pub fn to_csv_writer<W: Write>(&self, writer: W, sep: u8, sort_by_counts: bool) -> BiomeResult<()> {
        let mut wtr = WriterBuilder::new().delimiter(sep).from_writer(writer);
        let mut header = vec!["#ID".to_string()];
        header.extend(self.samples.iter().cloned());
        wtr.write_record(&header)?;
        let mut order: Vec<usize> = (0..self.features.len()).collect();
        if sort_by_counts {
            let totals: Vec<f64> = self.values.iter().map(|row| row_total(row)).collect();
            order.sort_by(|a, b| totals[*b].total_cmp(&totals[*a]));
        }
        for idx in order {
            let mut record = vec![self.features[idx].clone()];
            record.extend(self.values[idx].iter().map(|v| format_cell(*v)));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path, sep: u8, sort_by_counts: bool) -> BiomeResult<()> {
        let file = File::create(path).map_err(|e| {
            BiomeError::io(format!("Could not write frequency table '{}': {e}", path.display()))
        })?;
        self.to_csv_writer(file, sep, sort_by_counts)
    }

    /// (features, samples)
    pub fn shape(&self) -> (usize, usize) {
        (self.features.len(), self.samples.len())
    }

    pub fn value(&self, feature: &str, sample: &str) -> Option<f64> {
        let row = self.features.iter().position(|f| f == feature)?;
        let col = self.samples.iter().position(|s| s == sample)?;
        Some(self.values[row][col])
    }

    pub fn row(&self, feature: &str) -> Option<&[f64]> {
        let row = self.features.iter().position(|f| f == feature)?;
        Some(&self.values[row])
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Id, &[f64])> {
        self.features.iter().zip(self.values.iter().map(Vec::as_slice))
    }

    pub fn features_without_counts(&self) -> Vec<Id> {
        self.rows()
            .filter(|(_, row)| row_total(row) == 0.0)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Removes features whose counts are all zero or missing; returns them.
    pub fn drop_features_without_counts(&mut self) -> BiomeResult<Vec<Id>> {
        let empty = self.features_without_counts();
        if !empty.is_empty() {
            self.remove_features_by_id(&empty)?;
        }
        Ok(empty)
    }

    /// Every sample column scaled to sum to one. Samples without counts yield zeros.
    pub fn relative_abundance(&self) -> FrequencyTable {
        let totals: Vec<f64> = (0..self.samples.len())
            .map(|col| row_total(&self.values.iter().map(|row| row[col]).collect::<Vec<_>>()))
            .collect();
        let values = self
            .values
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&totals)
                    .map(|(v, total)| if *total == 0.0 { 0.0 } else { v / total })
                    .collect()
            })
            .collect();
        FrequencyTable {
            meta: self.meta.detached(),
            features: self.features.clone(),
            samples: self.samples.clone(),
            values,
        }
    }

    pub fn replace_nan_with(&mut self, value: f64) {
        self.values
            .iter_mut()
            .flatten()
            .filter(|v| v.is_nan())
            .for_each(|v| *v = value);
    }

    pub fn any_nan(&self) -> bool {
        self.values.iter().flatten().any(|v| v.is_nan())
    }

    pub fn get_subset(
        &self,
        features: Option<&[Id]>,
        samples: Option<&[Id]>,
    ) -> BiomeResult<FrequencyTable> {
        let kept_features = subset_axis(KIND, "feature", &self.features, features)?;
        let kept_samples = subset_axis(KIND, "sample", &self.samples, samples)?;
        let rows = axis::positions(&self.features, &kept_features);
        let cols = axis::positions(&self.samples, &kept_samples);
        let values = rows
            .iter()
            .map(|r| cols.iter().map(|c| self.values[*r][*c]).collect())
            .collect();
        Ok(FrequencyTable {
            meta: self.meta.detached(),
            features: kept_features,
            samples: kept_samples,
            values,
        })
    }
}

fn row_total(row: &[f64]) -> f64 {
    row.iter().filter(|v| !v.is_nan()).sum()
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

impl FeatureIndexed for FrequencyTable {
    fn feature_ids(&self) -> &[Id] {
        &self.features
    }

    fn remove_features_by_id(&mut self, ids: &[Id]) -> BiomeResult<()> {
        axis::ensure_present(KIND, "feature", &self.features, ids)?;
        let drop: HashSet<&Id> = ids.iter().collect();
        let (features, values) = self
            .features
            .drain(..)
            .zip(self.values.drain(..))
            .filter(|(id, _)| !drop.contains(id))
            .unzip();
        self.features = features;
        self.values = values;
        self.meta.touch();
        Ok(())
    }

    fn merge_features_by_map(&mut self, groups: &GroupMap, aggfunc: &AggFunc) -> BiomeResult<()> {
        axis::validate_group_map(KIND, "feature", &self.features, groups)?;
        let index = axis::index_of(&self.features);
        let values = groups
            .values()
            .map(|members| {
                let rows: Vec<usize> = members.iter().map(|m| index[m.as_str()]).collect();
                (0..self.samples.len())
                    .map(|col| aggfunc.reduce(&rows.iter().map(|r| self.values[*r][col]).collect::<Vec<_>>()))
                    .collect()
            })
            .collect();
        self.features = groups.keys().cloned().collect();
        self.values = values;
        self.meta.touch();
        Ok(())
    }
}

impl SampleIndexed for FrequencyTable {
    fn sample_ids(&self) -> &[Id] {
        &self.samples
    }

    fn remove_samples_by_id(&mut self, ids: &[Id]) -> BiomeResult<()> {
        axis::ensure_present(KIND, "sample", &self.samples, ids)?;
        let drop: HashSet<&Id> = ids.iter().collect();
        let keep: Vec<usize> = (0..self.samples.len())
            .filter(|c| !drop.contains(&self.samples[*c]))
            .collect();
        self.samples = keep.iter().map(|c| self.samples[*c].clone()).collect();
        for row in self.values.iter_mut() {
            *row = keep.iter().map(|c| row[*c]).collect();
        }
        self.meta.touch();
        Ok(())
    }

    fn merge_samples_by_map(&mut self, groups: &GroupMap, aggfunc: &AggFunc) -> BiomeResult<()> {
        axis::validate_group_map(KIND, "sample", &self.samples, groups)?;
        let index = axis::index_of(&self.samples);
        let columns: Vec<Vec<usize>> = groups
            .values()
            .map(|members| members.iter().map(|m| index[m.as_str()]).collect())
            .collect();
        for row in self.values.iter_mut() {
            *row = columns
                .iter()
                .map(|cols| aggfunc.reduce(&cols.iter().map(|c| row[*c]).collect::<Vec<_>>()))
                .collect();
        }
        self.samples = groups.keys().cloned().collect();
        self.meta.touch();
        Ok(())
    }

    fn rename_samples(&mut self, mapping: &BTreeMap<Id, Id>) -> BiomeResult<()> {
        axis::validate_rename(KIND, "sample", &self.samples, mapping)?;
        self.samples = self
            .samples
            .iter()
            .map(|id| axis::renamed_id(mapping, id))
            .collect();
        self.meta.touch();
        Ok(())
    }
}

impl EssentialData for FrequencyTable {
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

    fn sample_axis(&self) -> Option<&[Id]> {
        Some(&self.samples)
    }

    fn as_feature_indexed_mut(&mut self) -> Option<&mut dyn FeatureIndexed> {
        Some(self)
    }

    fn as_sample_indexed_mut(&mut self) -> Option<&mut dyn SampleIndexed> {
        Some(self)
    }

    fn subset(&self, features: Option<&[Id]>, samples: Option<&[Id]>) -> BiomeResult<Essential> {
        self.get_subset(features, samples).map(Essential::from)
    }

    fn write_to_path(&self, path: &Path, sep: u8) -> BiomeResult<()> {
        self.write_csv(path, sep, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biome_protocol::AggName;

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> FrequencyTable {
        FrequencyTable::new(
            ids(&["F1", "F2", "F3"]),
            ids(&["S1", "S2"]),
            vec![vec![1.0, 2.0], vec![0.0, 0.0], vec![5.0, 6.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = FrequencyTable::new(ids(&["F1"]), ids(&["S1", "S2"]), vec![vec![1.0]]).unwrap_err();
        assert!(err.message.contains("F1"));
    }

    #[test]
    fn test_csv_parsing_and_nan_policy() {
        let text = "id,S1,S2\nF1,1,2\nF2,,4\n";
        assert!(FrequencyTable::from_csv_reader(text.as_bytes(), b',', false).is_err());
        let table = FrequencyTable::from_csv_reader(text.as_bytes(), b',', true).unwrap();
        assert_eq!(table.shape(), (2, 2));
        assert!(table.value("F2", "S1").unwrap().is_nan());
        assert!(table.any_nan());
    }

    #[test]
    fn test_merge_features_by_map_sums_columns() {
        let mut table = table();
        let mut groups = GroupMap::new();
        groups.insert("G1".into(), ids(&["F1", "F3"]));
        table
            .merge_features_by_map(&groups, &AggFunc::SUM)
            .unwrap();
        assert_eq!(table.feature_ids(), ids(&["G1"]).as_slice());
        assert_eq!(table.row("G1").unwrap(), &[6.0, 8.0]);
    }

    #[test]
    fn test_merge_samples_by_map_reduces_rows() {
        let mut table = table();
        let mut groups = GroupMap::new();
        groups.insert("ALL".into(), ids(&["S1", "S2"]));
        table
            .merge_samples_by_map(&groups, &AggFunc::Named(AggName::Max))
            .unwrap();
        assert_eq!(table.value("F3", "ALL"), Some(6.0));
        assert_eq!(table.meta().revision(), 1);
    }

    #[test]
    fn test_drop_features_without_counts() {
        let mut table = table();
        assert_eq!(table.drop_features_without_counts().unwrap(), ids(&["F2"]));
        assert_eq!(table.shape(), (2, 2));
    }

    #[test]
    fn test_relative_abundance() {
        let rel = table().relative_abundance();
        assert_eq!(rel.value("F1", "S1"), Some(1.0 / 6.0));
        assert_eq!(rel.value("F3", "S2"), Some(0.75));
    }

    #[test]
    fn test_subset_validates_ids() {
        let table = table();
        let sub = table.get_subset(Some(&ids(&["F3", "F1"])), None).unwrap();
        assert_eq!(sub.feature_ids(), ids(&["F1", "F3"]).as_slice());
        assert!(table.get_subset(None, Some(&ids(&["S9"]))).is_err());
    }

    #[test]
    fn test_csv_writer_sorts_by_counts() {
        let mut out = vec![];
        table().to_csv_writer(&mut out, b',', true).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#ID,S1,S2");
        assert_eq!(lines[1], "F3,5,6");
        assert_eq!(lines[3], "F2,0,0");
    }
}
