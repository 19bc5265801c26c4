use super::{Essential, EssentialData, EssentialMeta, FeatureIndexed, subset_axis};
use crate::{
    aggregate::AggFunc,
    axis::{self, GroupMap, Id},
    error::{BiomeError, BiomeResult},
};
use anyhow::Result;
use bio::io::fasta;
use biome_protocol::EssentialKind;
use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::{Read, Write},
    path::Path,
};

const KIND: EssentialKind = EssentialKind::RepSequence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub description: Option<String>,
    pub seq: Vec<u8>,
}

impl SequenceRecord {
    pub fn new(seq: &[u8]) -> Self {
        Self {
            description: None,
            seq: seq.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    fn from_fasta_record(record: &fasta::Record) -> (Id, Self) {
        (
            record.id().to_string(),
            Self {
                description: record.desc().map(str::to_string),
                seq: record.seq().to_vec(),
            },
        )
    }
}

/// Representative sequences, one per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct RepSequence {
    meta: EssentialMeta,
    features: Vec<Id>,
    records: Vec<SequenceRecord>,
}

impl RepSequence {
    pub fn new(records: Vec<(Id, SequenceRecord)>) -> BiomeResult<Self> {
        let (features, records): (Vec<Id>, Vec<SequenceRecord>) = records.into_iter().unzip();
        axis::ensure_unique(KIND, "feature", &features)?;
        Ok(Self {
            meta: EssentialMeta::default(),
            features,
            records,
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.meta.name = Some(name.to_string());
        self
    }

    fn read_fasta<R: Read>(reader: R) -> Result<Vec<(Id, SequenceRecord)>> {
        let mut out = vec![];
        for record in fasta::Reader::new(reader).records() {
            out.push(SequenceRecord::from_fasta_record(&record?));
        }
        Ok(out)
    }

    pub fn from_fasta_reader<R: Read>(reader: R) -> BiomeResult<Self> {
        Self::new(Self::read_fasta(reader)?)
    }

    pub fn from_fasta_path(path: &str) -> BiomeResult<Self> {
        let file = File::open(path)
            .map_err(|e| BiomeError::io(format!("Could not read sequences '{path}': {e}")))?;
        Self::from_fasta_reader(file)
    }

    pub fn to_fasta_writer<W: Write>(&self, writer: W) -> BiomeResult<()> {
        let mut wtr = fasta::Writer::new(writer);
        for (id, record) in self.entries() {
            wtr.write(id, record.description.as_deref(), &record.seq)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_fasta(&self, path: &Path) -> BiomeResult<()> {
        let file = File::create(path).map_err(|e| {
            BiomeError::io(format!("Could not write sequences '{}': {e}", path.display()))
        })?;
        self.to_fasta_writer(file)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Id, &SequenceRecord)> {
        self.features.iter().zip(self.records.iter())
    }

    pub fn sequence(&self, id: &str) -> Option<&SequenceRecord> {
        let idx = self.features.iter().position(|f| f == id)?;
        Some(&self.records[idx])
    }

    pub fn lengths(&self) -> Vec<(Id, usize)> {
        self.entries().map(|(id, r)| (id.clone(), r.len())).collect()
    }

    pub fn get_subset(&self, features: Option<&[Id]>) -> BiomeResult<RepSequence> {
        let kept = subset_axis(KIND, "feature", &self.features, features)?;
        let rows = axis::positions(&self.features, &kept);
        Ok(RepSequence {
            meta: self.meta.detached(),
            records: rows.iter().map(|r| self.records[*r].clone()).collect(),
            features: kept,
        })
    }
}

/// Column-wise majority when every member has the same length, otherwise
/// the first longest member. Ties go to the residue seen first.
fn representative(members: &[&SequenceRecord]) -> SequenceRecord {
    let Some(first) = members.first() else {
        return SequenceRecord::new(b"");
    };
    if members.len() == 1 {
        return SequenceRecord::new(&first.seq);
    }
    let len = first.len();
    if members.iter().all(|m| m.len() == len) {
        let seq = (0..len)
            .map(|pos| {
                let mut counts: Vec<(u8, usize)> = vec![];
                for member in members {
                    let residue = member.seq[pos];
                    match counts.iter_mut().find(|(r, _)| *r == residue) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((residue, 1)),
                    }
                }
                let best = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
                counts
                    .iter()
                    .find(|(_, n)| *n == best)
                    .map(|(r, _)| *r)
                    .unwrap_or(b'N')
            })
            .collect::<Vec<u8>>();
        SequenceRecord::new(&seq)
    } else {
        let longest = members.iter().map(|m| m.len()).max().unwrap_or(0);
        members
            .iter()
            .find(|m| m.len() == longest)
            .map(|m| SequenceRecord::new(&m.seq))
            .unwrap_or_else(|| SequenceRecord::new(b""))
    }
}

impl FeatureIndexed for RepSequence {
    fn feature_ids(&self) -> &[Id] {
        &self.features
    }

    fn remove_features_by_id(&mut self, ids: &[Id]) -> BiomeResult<()> {
        axis::ensure_present(KIND, "feature", &self.features, ids)?;
        let drop: HashSet<&Id> = ids.iter().collect();
        let (features, records) = self
            .features
            .drain(..)
            .zip(self.records.drain(..))
            .filter(|(id, _)| !drop.contains(id))
            .unzip();
        self.features = features;
        self.records = records;
        self.meta.touch();
        Ok(())
    }

    fn merge_features_by_map(&mut self, groups: &GroupMap, _aggfunc: &AggFunc) -> BiomeResult<()> {
        axis::validate_group_map(KIND, "feature", &self.features, groups)?;
        let index: HashMap<&str, usize> = self
            .features
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let records = groups
            .values()
            .map(|members| {
                let members: Vec<&SequenceRecord> =
                    members.iter().map(|m| &self.records[index[m.as_str()]]).collect();
                representative(&members)
            })
            .collect();
        self.features = groups.keys().cloned().collect();
        self.records = records;
        self.meta.touch();
        Ok(())
    }
}

impl EssentialData for RepSequence {
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

    fn write_to_path(&self, path: &Path, _sep: u8) -> BiomeResult<()> {
        self.write_fasta(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FASTA: &str = ">F1 first\nACGT\n>F2\nACGA\n>F3\nACCA\n>F4\nACGTTT\n";

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fasta_reader() {
        let seqs = RepSequence::from_fasta_reader(FASTA.as_bytes()).unwrap();
        assert_eq!(seqs.feature_ids(), ids(&["F1", "F2", "F3", "F4"]).as_slice());
        let f1 = seqs.sequence("F1").unwrap();
        assert_eq!(f1.description.as_deref(), Some("first"));
        assert_eq!(f1.seq, b"ACGT".to_vec());
    }

    #[test]
    fn test_merge_builds_majority_consensus() {
        let mut seqs = RepSequence::from_fasta_reader(FASTA.as_bytes()).unwrap();
        let mut groups = GroupMap::new();
        groups.insert("A".into(), ids(&["F1", "F2", "F3"]));
        groups.insert("B".into(), ids(&["F4"]));
        seqs.merge_features_by_map(&groups, &AggFunc::default()).unwrap();
        assert_eq!(seqs.sequence("A").unwrap().seq, b"ACGA".to_vec());
        assert_eq!(seqs.sequence("B").unwrap().seq, b"ACGTTT".to_vec());
    }

    #[test]
    fn test_unequal_lengths_take_longest() {
        let a = SequenceRecord::new(b"ACG");
        let b = SequenceRecord::new(b"ACGTA");
        assert_eq!(representative(&[&a, &b]).seq, b"ACGTA".to_vec());
    }

    #[test]
    fn test_fasta_writer() {
        let seqs = RepSequence::from_fasta_reader(FASTA.as_bytes()).unwrap();
        let sub = seqs.get_subset(Some(&ids(&["F2"]))).unwrap();
        let mut out = vec![];
        sub.to_fasta_writer(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">F2\nACGA\n");
    }
}
