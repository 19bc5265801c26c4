//! Shared, serializable contracts used by the biome engine, its manifest
//! files and the command line front end.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Taxonomic ranks in canonical order: domain, kingdom, phylum, class,
/// order, family, genus, species.
pub const VALID_RANKS: [&str; 8] = ["d", "k", "p", "c", "o", "f", "g", "s"];

/// Separator used between ranks in generated lineages.
pub const LINEAGE_SEPARATOR: &str = "; ";

/// One dataset kind. A controller holds at most one member per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EssentialKind {
    FrequencyTable,
    RepTaxonomy,
    RepSequence,
    RepPhylogeny,
    SampleMetadata,
}

impl EssentialKind {
    pub const ALL: [EssentialKind; 5] = [
        EssentialKind::FrequencyTable,
        EssentialKind::RepTaxonomy,
        EssentialKind::RepSequence,
        EssentialKind::RepPhylogeny,
        EssentialKind::SampleMetadata,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EssentialKind::FrequencyTable => "FrequencyTable",
            EssentialKind::RepTaxonomy => "RepTaxonomy",
            EssentialKind::RepSequence => "RepSequence",
            EssentialKind::RepPhylogeny => "RepPhylogeny",
            EssentialKind::SampleMetadata => "SampleMetadata",
        }
    }

    pub fn is_feature_indexed(&self) -> bool {
        !matches!(self, EssentialKind::SampleMetadata)
    }

    pub fn is_sample_indexed(&self) -> bool {
        matches!(
            self,
            EssentialKind::FrequencyTable | EssentialKind::SampleMetadata
        )
    }

    /// File name stem used when exporting this kind.
    pub fn file_stem(&self) -> &'static str {
        match self {
            EssentialKind::FrequencyTable => "frequency",
            EssentialKind::RepTaxonomy => "taxonomy",
            EssentialKind::RepSequence => "sequences",
            EssentialKind::RepPhylogeny => "phylogeny",
            EssentialKind::SampleMetadata => "sample_metadata",
        }
    }

    /// File extension used when exporting this kind.
    pub fn export_extension(&self) -> &'static str {
        match self {
            EssentialKind::RepSequence => "fasta",
            EssentialKind::RepPhylogeny => "tre",
            _ => "csv",
        }
    }
}

impl fmt::Display for EssentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Feature,
    Sample,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Feature => write!(f, "feature"),
            Axis::Sample => write!(f, "sample"),
        }
    }
}

/// Grouping strategy for one axis of a survey merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Index,
    #[default]
    Label,
    Taxonomy,
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "index" => Ok(GroupBy::Index),
            "label" => Ok(GroupBy::Label),
            "taxonomy" => Ok(GroupBy::Taxonomy),
            other => Err(format!("Unknown grouping '{other}'")),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Index => write!(f, "index"),
            GroupBy::Label => write!(f, "label"),
            GroupBy::Taxonomy => write!(f, "taxonomy"),
        }
    }
}

/// Named numeric reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggName {
    Sum,
    #[default]
    Mean,
    Median,
    Min,
    Max,
    First,
    Last,
    Count,
}

impl FromStr for AggName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggName::Sum),
            "mean" => Ok(AggName::Mean),
            "median" => Ok(AggName::Median),
            "min" => Ok(AggName::Min),
            "max" => Ok(AggName::Max),
            "first" => Ok(AggName::First),
            "last" => Ok(AggName::Last),
            "count" => Ok(AggName::Count),
            other => Err(format!("Unknown aggregation function '{other}'")),
        }
    }
}

impl fmt::Display for AggName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggName::Sum => "sum",
            AggName::Mean => "mean",
            AggName::Median => "median",
            AggName::Min => "min",
            AggName::Max => "max",
            AggName::First => "first",
            AggName::Last => "last",
            AggName::Count => "count",
        };
        write!(f, "{name}")
    }
}

/// Lineage notations understood by the taxonomy parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomyNotation {
    /// `k__Bacteria; p__Firmicutes`
    Greengenes,
    /// `D_0__Bacteria;D_1__Firmicutes`
    Qiime,
    /// `Bacteria;Firmicutes`, ranks assigned by position
    Silva,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Admission,
    Consistency,
    NotInitialized,
    MissingPrerequisite,
    Unsupported,
    Io,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_know_their_axes() {
        assert!(EssentialKind::FrequencyTable.is_feature_indexed());
        assert!(EssentialKind::FrequencyTable.is_sample_indexed());
        assert!(!EssentialKind::SampleMetadata.is_feature_indexed());
        assert!(!EssentialKind::RepPhylogeny.is_sample_indexed());
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("Taxonomy".parse::<GroupBy>().unwrap(), GroupBy::Taxonomy);
        assert_eq!(" SUM ".parse::<AggName>().unwrap(), AggName::Sum);
        assert!("average".parse::<AggName>().is_err());
    }

    #[test]
    fn config_names_are_lowercase_in_json() {
        let text = serde_json::to_string(&GroupBy::Index).unwrap();
        assert_eq!(text, "\"index\"");
        let agg: AggName = serde_json::from_str("\"median\"").unwrap();
        assert_eq!(agg, AggName::Median);
    }
}
