//! JSON description of assemblies on disk and how to merge them.

use crate::{
    assembly::{Assembly, AssemblyOptions, Curb},
    error::{BiomeError, BiomeResult},
    essentials::{Essential, FrequencyTable, RepPhylogeny, RepSequence, RepTaxonomy, SampleMetadata},
    survey::MergeOptions,
};
use biome_protocol::TaxonomyNotation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurbMode {
    #[default]
    None,
    Intersect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyEntry {
    pub name: Option<String>,
    pub frequency: Option<String>,
    pub taxonomy: Option<String>,
    pub sample_metadata: Option<String>,
    pub sequences: Option<String>,
    pub phylogeny: Option<String>,
    /// Overrides the manifest separator for this entry's tables.
    pub sep: Option<String>,
    pub curb: CurbMode,
    pub allow_nan: bool,
    pub notation: Option<TaxonomyNotation>,
    pub samples_as_rows: bool,
}

impl Default for AssemblyEntry {
    fn default() -> Self {
        Self {
            name: None,
            frequency: None,
            taxonomy: None,
            sample_metadata: None,
            sequences: None,
            phylogeny: None,
            sep: None,
            curb: CurbMode::None,
            allow_nan: false,
            notation: None,
            samples_as_rows: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub sep: String,
    pub assemblies: Vec<AssemblyEntry>,
    pub merge: MergeOptions,
    /// Relative paths resolve against this directory.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            sep: ",".to_string(),
            assemblies: vec![],
            merge: MergeOptions::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Manifest {
    pub fn load_from_path(path: &str) -> BiomeResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BiomeError::io(format!("Could not read manifest '{path}': {e}")))?;
        let mut manifest: Manifest = serde_json::from_str(&text).map_err(|e| {
            BiomeError::invalid_input(format!("Could not parse manifest JSON '{path}': {e}"))
        })?;
        manifest.base_dir = Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    fn resolve(&self, file: &str) -> String {
        let path = Path::new(file);
        if path.is_absolute() {
            file.to_string()
        } else {
            self.base_dir.join(path).to_string_lossy().into_owned()
        }
    }

    pub fn load_assemblies(&self) -> BiomeResult<Vec<Assembly>> {
        if self.assemblies.is_empty() {
            return Err(BiomeError::invalid_input("Manifest lists no assemblies"));
        }
        self.assemblies
            .iter()
            .enumerate()
            .map(|(pos, entry)| self.load_assembly(pos, entry))
            .collect()
    }

    fn load_assembly(&self, pos: usize, entry: &AssemblyEntry) -> BiomeResult<Assembly> {
        let sep = parse_sep(entry.sep.as_deref().unwrap_or(&self.sep))?;
        let mut essentials: Vec<Essential> = vec![];
        if let Some(file) = &entry.frequency {
            essentials.push(FrequencyTable::from_csv_path(&self.resolve(file), sep, entry.allow_nan)?.into());
        }
        if let Some(file) = &entry.taxonomy {
            essentials.push(RepTaxonomy::from_csv_path(&self.resolve(file), sep, entry.notation)?.into());
        }
        if let Some(file) = &entry.sample_metadata {
            essentials.push(
                SampleMetadata::from_csv_path(&self.resolve(file), sep, entry.samples_as_rows)?.into(),
            );
        }
        if let Some(file) = &entry.sequences {
            essentials.push(RepSequence::from_fasta_path(&self.resolve(file))?.into());
        }
        if let Some(file) = &entry.phylogeny {
            essentials.push(RepPhylogeny::from_newick_path(&self.resolve(file))?.into());
        }
        if essentials.is_empty() {
            return Err(BiomeError::invalid_input(format!(
                "Manifest assembly {pos} lists no files"
            )));
        }
        debug!("Loaded {} essentials for manifest assembly {pos}", essentials.len());
        let options = AssemblyOptions {
            curb: match entry.curb {
                CurbMode::None => None,
                CurbMode::Intersect => Some(Curb::Intersect),
            },
            ..AssemblyOptions::default()
        };
        let assembly = Assembly::new(essentials, options)?;
        Ok(match &entry.name {
            Some(name) => assembly.with_name(name),
            None => assembly,
        })
    }
}

/// Table separators are single bytes; `\t` and `tab` name the tab.
pub fn parse_sep(sep: &str) -> BiomeResult<u8> {
    match sep {
        "\\t" | "tab" => Ok(b'\t'),
        _ if sep.len() == 1 => Ok(sep.as_bytes()[0]),
        _ => Err(BiomeError::invalid_input(format!(
            "Separator '{sep}' must be a single character"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biome_protocol::GroupBy;
    use std::fs;

    #[test]
    fn test_parse_sep() {
        assert_eq!(parse_sep(",").unwrap(), b',');
        assert_eq!(parse_sep("\t").unwrap(), b'\t');
        assert_eq!(parse_sep("tab").unwrap(), b'\t');
        assert!(parse_sep(";;").is_err());
    }

    #[test]
    fn test_defaults() {
        let manifest: Manifest = serde_json::from_str(r#"{"assemblies": [{"frequency": "f.csv"}]}"#).unwrap();
        assert_eq!(manifest.sep, ",");
        assert!(manifest.assemblies[0].samples_as_rows);
        assert_eq!(manifest.assemblies[0].curb, CurbMode::None);
        assert_eq!(manifest.merge.groupby.feature, GroupBy::Label);
    }

    #[test]
    fn test_load_assemblies_from_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("freq.csv"), "#ID,S1,S2\nF1,1,2\nF2,3,4\nF3,0,1\n").unwrap();
        fs::write(
            dir.path().join("tax.csv"),
            "#ID,Taxonomy\nF1,k__Bacteria; p__Firmicutes\nF2,k__Bacteria\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("manifest.json"),
            r#"{
                "assemblies": [
                    {"name": "gut", "frequency": "freq.csv", "taxonomy": "tax.csv", "curb": "intersect"}
                ],
                "merge": {"groupby": {"feature": "taxonomy", "sample": "index"}, "aggfunc": "sum"}
            }"#,
        )
        .unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest::load_from_path(path.to_str().unwrap()).unwrap();
        let assemblies = manifest.load_assemblies().unwrap();
        assert_eq!(assemblies.len(), 1);
        assert_eq!(assemblies[0].name(), Some("gut"));
        assert_eq!(assemblies[0].feature_ids().unwrap().len(), 2);
        assert_eq!(manifest.merge.groupby.feature, GroupBy::Taxonomy);
    }

    #[test]
    fn test_entry_without_files_is_rejected() {
        let manifest: Manifest = serde_json::from_str(r#"{"assemblies": [{"name": "empty"}]}"#).unwrap();
        let err = manifest.load_assemblies().unwrap_err();
        assert!(err.message.contains("lists no files"));
    }
}
