//! Group tables: one row per new identifier, one column per source
//! assembly, each cell holding the original ids mapped onto that row.

use crate::{
    axis::{GroupMap, Id},
    error::{BiomeError, BiomeResult},
    essentials::{FeatureIndexed, RepTaxonomy},
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRow {
    pub id: Id,
    /// Value the row was grouped on: the id itself or a lowercased lineage.
    pub key: String,
    pub members: Vec<Vec<Id>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct GroupTable {
    rows: Vec<GroupRow>,
    sources: usize,
}

impl GroupTable {
    pub fn by_ids(axes: &[Option<&[Id]>]) -> Self {
        let all: BTreeSet<&Id> = axes.iter().flatten().flat_map(|ids| ids.iter()).collect();
        let present: Vec<BTreeSet<&Id>> = axes
            .iter()
            .map(|ids| ids.map(|ids| ids.iter().collect()).unwrap_or_default())
            .collect();
        let rows = all
            .into_iter()
            .map(|id| GroupRow {
                id: id.clone(),
                key: id.clone(),
                members: present
                    .iter()
                    .map(|set| if set.contains(id) { vec![id.clone()] } else { vec![] })
                    .collect(),
            })
            .collect();
        Self {
            rows,
            sources: axes.len(),
        }
    }

    /// Features sharing a lineage over the ranks every taxonomy carries are
    /// one row. Row ids are positions in lineage order.
    pub fn by_taxonomy(taxonomies: &[&RepTaxonomy]) -> BiomeResult<Self> {
        let shared = shared_ranks(taxonomies);
        let populated = taxonomies.iter().any(|t| !t.feature_ids().is_empty());
        if shared.is_empty() && populated {
            return Err(BiomeError::invalid_input(
                "Taxonomies share no ranks to group features on",
            ));
        }
        let mut groups: BTreeMap<String, Vec<Vec<Id>>> = BTreeMap::new();
        for (pos, taxonomy) in taxonomies.iter().enumerate() {
            for (id, lineage) in taxonomy.get_lineage_by_id(None, Some(&shared), true)? {
                let cells = groups
                    .entry(lineage.to_lowercase())
                    .or_insert_with(|| vec![vec![]; taxonomies.len()]);
                cells[pos].push(id);
            }
        }
        let rows = groups
            .into_iter()
            .enumerate()
            .map(|(idx, (key, members))| GroupRow {
                id: idx.to_string(),
                key,
                members,
            })
            .collect();
        Ok(Self {
            rows,
            sources: taxonomies.len(),
        })
    }

    pub fn rows(&self) -> &[GroupRow] {
        &self.rows
    }

    pub fn ids(&self) -> Vec<Id> {
        self.rows.iter().map(|row| row.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn sources(&self) -> usize {
        self.sources
    }

    /// Rows that `source` contributes to, as a merge argument for its own
    /// essentials.
    pub fn group_map(&self, source: usize) -> GroupMap {
        self.rows
            .iter()
            .filter_map(|row| {
                let members = row.members.get(source)?;
                (!members.is_empty()).then(|| (row.id.clone(), members.clone()))
            })
            .collect()
    }
}

pub(crate) fn shared_ranks(taxonomies: &[&RepTaxonomy]) -> Vec<String> {
    let mut iter = taxonomies
        .iter()
        .filter(|t| !t.feature_ids().is_empty())
        .map(|t| t.avail_ranks());
    let Some(first) = iter.next() else {
        return vec![];
    };
    iter.fold(first, |acc, ranks| {
        acc.into_iter().filter(|r| ranks.contains(r)).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
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

    #[test]
    fn test_by_ids_covers_union() {
        let a = ids(&["S1", "S2"]);
        let b = ids(&["S2", "S3"]);
        let table = GroupTable::by_ids(&[Some(&a), Some(&b), None]);
        assert_eq!(table.ids(), ids(&["S1", "S2", "S3"]));
        assert_eq!(table.rows()[1].members, vec![ids(&["S2"]), ids(&["S2"]), vec![]]);
        assert_eq!(table.group_map(1).keys().cloned().collect::<Vec<_>>(), ids(&["S2", "S3"]));
        assert!(table.group_map(2).is_empty());
    }

    #[test]
    fn test_by_taxonomy_uses_shared_ranks() {
        let a = taxonomy(&[
            ("A1", "k__Bacteria; p__Firmicutes; g__Bacillus"),
            ("A2", "k__Bacteria; p__Proteobacteria; g__Vibrio"),
        ]);
        let b = taxonomy(&[
            ("B1", "k__Bacteria; p__FIRMICUTES"),
            ("B2", "k__Bacteria; p__Firmicutes"),
        ]);
        assert_eq!(shared_ranks(&[&a, &b]), ids(&["k", "p"]));

        let table = GroupTable::by_taxonomy(&[&a, &b]).unwrap();
        assert_eq!(table.len(), 2);
        let first = &table.rows()[0];
        assert_eq!(first.id, "0");
        assert_eq!(first.key, "k__bacteria; p__firmicutes");
        assert_eq!(first.members, vec![ids(&["A1"]), ids(&["B1", "B2"])]);
        assert_eq!(table.rows()[1].members[1], Vec::<Id>::new());
    }

    #[test]
    fn test_empty_taxonomy_does_not_restrict_ranks() {
        let a = taxonomy(&[("A1", "k__Bacteria; p__Firmicutes")]);
        let empty = RepTaxonomy::from_lineages(vec![], None).unwrap();
        assert_eq!(shared_ranks(&[&a, &empty]), ids(&["k", "p"]));
        let table = GroupTable::by_taxonomy(&[&a, &empty]).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.group_map(1), GroupMap::new());
        assert!(GroupTable::by_taxonomy(&[&empty]).unwrap().is_empty());
    }
}
