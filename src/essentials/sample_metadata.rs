use super::{Essential, EssentialData, EssentialMeta, SampleIndexed, subset_axis};
use crate::{
    aggregate::{AggFunc, CategoricalPolicy},
    axis::{self, GroupMap, Id},
    error::{BiomeError, BiomeResult},
};
use biome_protocol::EssentialKind;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::{Read, Write},
    path::Path,
};

const KIND: EssentialKind = EssentialKind::SampleMetadata;

/// Sample by variable table of optional text values.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMetadata {
    meta: EssentialMeta,
    samples: Vec<Id>,
    variables: Vec<String>,
    /// One row per sample, one cell per variable.
    values: Vec<Vec<Option<String>>>,
}

impl SampleMetadata {
    pub fn new(
        samples: Vec<Id>,
        variables: Vec<String>,
        values: Vec<Vec<Option<String>>>,
    ) -> BiomeResult<Self> {
        axis::ensure_unique(KIND, "sample", &samples)?;
        axis::ensure_unique(KIND, "variable", &variables)?;
        if values.len() != samples.len() || values.iter().any(|row| row.len() != variables.len()) {
            return Err(BiomeError::invalid_input(format!(
                "{KIND}: expected {} rows of {} values",
                samples.len(),
                variables.len()
            )));
        }
        Ok(Self {
            meta: EssentialMeta::default(),
            samples,
            variables,
            values,
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.meta.name = Some(name.to_string());
        self
    }

    /// Table with a header row. With `samples_as_rows` the first column holds
    /// sample ids and the header names the variables; otherwise the layout is
    /// transposed. Empty cells are missing.
    pub fn from_csv_reader<R: Read>(reader: R, sep: u8, samples_as_rows: bool) -> BiomeResult<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(sep)
            .has_headers(true)
            .from_reader(reader);
        let header: Vec<String> = rdr.headers()?.iter().skip(1).map(str::to_string).collect();
        let mut index = vec![];
        let mut cells = vec![];
        for record in rdr.records() {
            let record: StringRecord = record?;
            let mut fields = record.iter();
            index.push(fields.next().unwrap_or_default().trim().to_string());
            cells.push(fields.map(parse_cell).collect::<Vec<_>>());
        }
        if samples_as_rows {
            Self::new(index, header, cells)
        } else {
            let values = (0..header.len())
                .map(|col| cells.iter().map(|row| row[col].clone()).collect())
                .collect();
            Self::new(header, index, values)
        }
    }

    pub fn from_csv_path(path: &str, sep: u8, samples_as_rows: bool) -> BiomeResult<Self> {
        let file = File::open(path)
            .map_err(|e| BiomeError::io(format!("Could not read sample metadata '{path}': {e}")))?;
        Self::from_csv_reader(file, sep, samples_as_rows)
    }

    pub fn to_csv_writer<W: Write>(&self, writer: W, sep: u8) -> BiomeResult<()> {
        let mut wtr = WriterBuilder::new().delimiter(sep).from_writer(writer);
        let mut header = vec!["#SampleID".to_string()];
        header.extend(self.variables.iter().cloned());
        wtr.write_record(&header)?;
        for (sample, row) in self.samples.iter().zip(&self.values) {
            let mut record = vec![sample.clone()];
            record.extend(row.iter().map(|cell| cell.clone().unwrap_or_default()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path, sep: u8) -> BiomeResult<()> {
        let file = File::create(path).map_err(|e| {
            BiomeError::io(format!("Could not write sample metadata '{}': {e}", path.display()))
        })?;
        self.to_csv_writer(file, sep)
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn value(&self, sample: &str, variable: &str) -> Option<&str> {
        let row = self.samples.iter().position(|s| s == sample)?;
        let col = self.variables.iter().position(|v| v == variable)?;
        self.values[row][col].as_deref()
    }

    pub fn row(&self, sample: &str) -> Option<&[Option<String>]> {
        let row = self.samples.iter().position(|s| s == sample)?;
        Some(&self.values[row])
    }

    /// Copy restricted to the given variables, all samples kept.
    pub fn get_variables_by_id(&self, variables: &[String]) -> BiomeResult<SampleMetadata> {
        let missing = axis::missing_ids(&self.variables, variables);
        if !missing.is_empty() {
            return Err(BiomeError::unknown_ids(KIND, "variable", &missing));
        }
        let cols = axis::positions(&self.variables, variables);
        Ok(SampleMetadata {
            meta: self.meta.detached(),
            samples: self.samples.clone(),
            variables: variables.to_vec(),
            values: self
                .values
                .iter()
                .map(|row| cols.iter().map(|c| row[*c].clone()).collect())
                .collect(),
        })
    }

    /// Samples grouped by their value of `variable`; the value becomes the
    /// new sample id. Samples without a value are left out.
    pub fn variable_group_map(&self, variable: &str) -> BiomeResult<GroupMap> {
        let col = self
            .variables
            .iter()
            .position(|v| v == variable)
            .ok_or_else(|| BiomeError::unknown_ids(KIND, "variable", &[variable.to_string()]))?;
        let mut groups = GroupMap::new();
        for (sample, row) in self.samples.iter().zip(&self.values) {
            if let Some(value) = &row[col] {
                groups.entry(value.clone()).or_default().push(sample.clone());
            }
        }
        if groups.is_empty() {
            return Err(BiomeError::invalid_input(format!(
                "{KIND}: variable '{variable}' has no values"
            )));
        }
        Ok(groups)
    }

    pub fn merge_samples_by_variable(
        &mut self,
        variable: &str,
        aggfunc: &AggFunc,
    ) -> BiomeResult<GroupMap> {
        let groups = self.variable_group_map(variable)?;
        self.merge_samples_by_map(&groups, aggfunc)?;
        Ok(groups)
    }

    fn is_numeric_column(&self, col: usize) -> bool {
        let mut present = self.values.iter().filter_map(|row| row[col].as_deref()).peekable();
        present.peek().is_some() && present.all(|v| v.trim().parse::<f64>().is_ok())
    }

    pub fn get_subset(&self, samples: Option<&[Id]>) -> BiomeResult<SampleMetadata> {
        let kept = subset_axis(KIND, "sample", &self.samples, samples)?;
        let rows = axis::positions(&self.samples, &kept);
        Ok(SampleMetadata {
            meta: self.meta.detached(),
            values: rows.iter().map(|r| self.values[*r].clone()).collect(),
            samples: kept,
            variables: self.variables.clone(),
        })
    }
}

fn parse_cell(cell: &str) -> Option<String> {
    let cell = cell.trim();
    (!cell.is_empty()).then(|| cell.to_string())
}

impl SampleIndexed for SampleMetadata {
    fn sample_ids(&self) -> &[Id] {
        &self.samples
    }

    fn remove_samples_by_id(&mut self, ids: &[Id]) -> BiomeResult<()> {
        axis::ensure_present(KIND, "sample", &self.samples, ids)?;
        let drop: HashSet<&Id> = ids.iter().collect();
        let (samples, values) = self
            .samples
            .drain(..)
            .zip(self.values.drain(..))
            .filter(|(id, _)| !drop.contains(id))
            .unzip();
        self.samples = samples;
        self.values = values;
        self.meta.touch();
        Ok(())
    }

    fn merge_samples_by_map(&mut self, groups: &GroupMap, aggfunc: &AggFunc) -> BiomeResult<()> {
        self.merge_samples_with_policy(groups, aggfunc, &CategoricalPolicy::default())
    }

    /// Numeric variables are reduced with `aggfunc`, all others with `policy`.
    fn merge_samples_with_policy(
        &mut self,
        groups: &GroupMap,
        aggfunc: &AggFunc,
        policy: &CategoricalPolicy,
    ) -> BiomeResult<()> {
        axis::validate_group_map(KIND, "sample", &self.samples, groups)?;
        let index = axis::index_of(&self.samples);
        let numeric: Vec<bool> = (0..self.variables.len())
            .map(|col| self.is_numeric_column(col))
            .collect();
        let values = groups
            .values()
            .map(|members| {
                let rows: Vec<usize> = members.iter().map(|m| index[m.as_str()]).collect();
                (0..self.variables.len())
                    .map(|col| {
                        let cells = rows.iter().map(|r| self.values[*r][col].as_deref());
                        if numeric[col] {
                            let numbers: Vec<f64> = cells
                                .map(|c| c.and_then(|v| v.trim().parse().ok()).unwrap_or(f64::NAN))
                                .collect();
                            let reduced = aggfunc.reduce(&numbers);
                            (!reduced.is_nan()).then(|| reduced.to_string())
                        } else {
                            policy.reduce(cells)
                        }
                    })
                    .collect()
            })
            .collect();
        self.samples = groups.keys().cloned().collect();
        self.values = values;
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

impl EssentialData for SampleMetadata {
    fn kind(&self) -> EssentialKind {
        KIND
    }

    fn meta(&self) -> &EssentialMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EssentialMeta {
        &mut self.meta
    }

    fn sample_axis(&self) -> Option<&[Id]> {
        Some(&self.samples)
    }

    fn as_sample_indexed_mut(&mut self) -> Option<&mut dyn SampleIndexed> {
        Some(self)
    }

    fn subset(&self, _features: Option<&[Id]>, samples: Option<&[Id]>) -> BiomeResult<Essential> {
        self.get_subset(samples).map(Essential::from)
    }

    fn write_to_path(&self, path: &Path, sep: u8) -> BiomeResult<()> {
        self.write_csv(path, sep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "sample,site,depth\nS1,gut,10\nS2,soil,20\nS3,gut,\n";

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_csv_layouts() {
        let rows = SampleMetadata::from_csv_reader(TEXT.as_bytes(), b',', true).unwrap();
        assert_eq!(rows.sample_ids(), ids(&["S1", "S2", "S3"]).as_slice());
        assert_eq!(rows.value("S3", "depth"), None);

        let transposed = "variable,S1,S2\nsite,gut,soil\n";
        let cols = SampleMetadata::from_csv_reader(transposed.as_bytes(), b',', false).unwrap();
        assert_eq!(cols.variables(), ["site".to_string()].as_slice());
        assert_eq!(cols.value("S2", "site"), Some("soil"));
    }

    #[test]
    fn test_merge_by_variable_mixes_numeric_and_categorical() {
        let mut meta = SampleMetadata::from_csv_reader(TEXT.as_bytes(), b',', true).unwrap();
        let groups = meta.merge_samples_by_variable("site", &AggFunc::SUM).unwrap();
        assert_eq!(groups["gut"], ids(&["S1", "S3"]));
        assert_eq!(meta.sample_ids(), ids(&["gut", "soil"]).as_slice());
        assert_eq!(meta.value("gut", "depth"), Some("10"));
        assert_eq!(meta.value("gut", "site"), Some("gut"));
    }

    #[test]
    fn test_categorical_join_on_merge() {
        let mut meta = SampleMetadata::from_csv_reader(TEXT.as_bytes(), b',', true).unwrap();
        let mut groups = GroupMap::new();
        groups.insert("ALL".into(), ids(&["S1", "S2"]));
        meta.merge_samples_by_map(&groups, &AggFunc::MEAN).unwrap();
        assert_eq!(meta.value("ALL", "site"), Some("gut|soil"));
        assert_eq!(meta.value("ALL", "depth"), Some("15"));
    }

    #[test]
    fn test_get_variables_by_id() {
        let meta = SampleMetadata::from_csv_reader(TEXT.as_bytes(), b',', true).unwrap();
        let only = meta.get_variables_by_id(&["depth".to_string()]).unwrap();
        assert_eq!(only.variables().len(), 1);
        assert!(meta.get_variables_by_id(&["ph".to_string()]).is_err());
    }
}
