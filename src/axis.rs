//! Identifier axis helpers shared by every essential kind.

use crate::error::{BiomeError, BiomeResult};
use biome_protocol::EssentialKind;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub type Id = String;

/// New identifier -> original identifiers it replaces.
pub type GroupMap = BTreeMap<Id, Vec<Id>>;

pub fn sorted_ids(ids: &[Id]) -> Vec<Id> {
    ids.iter().cloned().sorted().collect()
}

pub fn same_id_set(a: &[Id], b: &[Id]) -> bool {
    a.len() == b.len() && sorted_ids(a) == sorted_ids(b)
}

pub fn ensure_unique(kind: EssentialKind, axis: &str, ids: &[Id]) -> BiomeResult<()> {
    let duplicated: Vec<Id> = ids.iter().duplicates().cloned().collect();
    if duplicated.is_empty() {
        Ok(())
    } else {
        Err(BiomeError::invalid_input(format!(
            "{kind}: {axis} ids must be unique, duplicated: {}",
            duplicated.join(", ")
        )))
    }
}

/// Requested ids that are not on `axis`, in request order.
pub fn missing_ids(axis: &[Id], requested: &[Id]) -> Vec<Id> {
    let present: HashSet<&Id> = axis.iter().collect();
    requested
        .iter()
        .filter(|id| !present.contains(id))
        .unique()
        .cloned()
        .collect()
}

pub fn ensure_present(
    kind: EssentialKind,
    axis_name: &str,
    axis: &[Id],
    requested: &[Id],
) -> BiomeResult<()> {
    let missing = missing_ids(axis, requested);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BiomeError::unknown_ids(kind, axis_name, &missing))
    }
}

/// Sorted intersection of several id lists. `None` when no list is given.
pub fn intersect_all<'a, I>(lists: I) -> Option<Vec<Id>>
where
    I: IntoIterator<Item = &'a [Id]>,
{
    let mut acc: Option<BTreeSet<Id>> = None;
    for list in lists {
        let set: BTreeSet<Id> = list.iter().cloned().collect();
        acc = Some(match acc {
            None => set,
            Some(prev) => prev.intersection(&set).cloned().collect(),
        });
    }
    acc.map(|set| set.into_iter().collect())
}

pub fn index_of(axis: &[Id]) -> HashMap<&str, usize> {
    axis.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect()
}

/// Positions of `ids` within `axis`, in the order of `ids`. Callers validate first.
pub fn positions(axis: &[Id], ids: &[Id]) -> Vec<usize> {
    let index = index_of(axis);
    ids.iter().filter_map(|id| index.get(id.as_str()).copied()).collect()
}

/// Every member must exist, no original id may be claimed by two groups and
/// groups may not be empty.
pub fn validate_group_map(
    kind: EssentialKind,
    axis_name: &str,
    axis: &[Id],
    groups: &GroupMap,
) -> BiomeResult<()> {
    if groups.is_empty() {
        return Err(BiomeError::invalid_input(format!(
            "{kind}: {axis_name} group map is empty"
        )));
    }
    if let Some((new_id, _)) = groups.iter().find(|(_, members)| members.is_empty()) {
        return Err(BiomeError::invalid_input(format!(
            "{kind}: {axis_name} group '{new_id}' has no members"
        )));
    }
    let members: Vec<Id> = groups.values().flatten().cloned().collect();
    ensure_present(kind, axis_name, axis, &members)?;
    let claimed_twice: Vec<Id> = members.iter().duplicates().cloned().collect();
    if !claimed_twice.is_empty() {
        return Err(BiomeError::invalid_input(format!(
            "{kind}: {axis_name} ids are mapped to more than one group: {}",
            claimed_twice.join(", ")
        )));
    }
    Ok(())
}

/// Keys must exist on `axis` and the renamed axis must stay unique.
pub fn validate_rename(
    kind: EssentialKind,
    axis_name: &str,
    axis: &[Id],
    mapping: &BTreeMap<Id, Id>,
) -> BiomeResult<()> {
    let keys: Vec<Id> = mapping.keys().cloned().collect();
    ensure_present(kind, axis_name, axis, &keys)?;
    let renamed: Vec<Id> = axis.iter().map(|id| renamed_id(mapping, id)).collect();
    ensure_unique(kind, axis_name, &renamed)
}

pub fn renamed_id(mapping: &BTreeMap<Id, Id>, id: &Id) -> Id {
    mapping.get(id).unwrap_or(id).clone()
}

/// Keeps the ids of `axis` that are listed in `keep`, in axis order.
pub fn retain_order(axis: &[Id], keep: &[Id]) -> Vec<Id> {
    let keep: HashSet<&Id> = keep.iter().collect();
    axis.iter().filter(|id| keep.contains(id)).cloned().collect()
}
