use super::{Essential, EssentialData, EssentialMeta, FeatureIndexed, subset_axis};
use crate::{
    aggregate::AggFunc,
    axis::{self, GroupMap, Id},
    error::{BiomeError, BiomeResult},
};
use bio::io::newick;
use bio::bio_types::phylogeny::Tree;
use biome_protocol::EssentialKind;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
};

const KIND: EssentialKind = EssentialKind::RepPhylogeny;
const NEWICK_RESERVED: &[u8] = b"(),:;[]'";
// bio names unlabeled nodes this way.
const UNNAMED: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
struct Node {
    label: Option<String>,
    length: Option<f64>,
    children: Vec<usize>,
}

/// Rooted tree stored as an arena of nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl PhyloTree {
    /// Reads through `bio::io::newick`. Branch lengths keep the `f32`
    /// precision of that reader.
    pub fn from_newick(text: &str) -> BiomeResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == ";" {
            return Ok(Self::default());
        }
        let tree = newick::from_string(trimmed)
            .map_err(|e| BiomeError::invalid_input(format!("Invalid Newick: {e}")))?;
        Ok(Self::from_bio_tree(&tree))
    }

    pub fn from_newick_path(path: &str) -> BiomeResult<Self> {
        let tree = newick::from_file(path).map_err(|e| match e {
            newick::Error::OpenFile { .. } | newick::Error::Read(_) => {
                BiomeError::io(format!("Could not read tree '{path}': {e}"))
            }
            _ => BiomeError::invalid_input(format!("Invalid Newick in '{path}': {e}")),
        })?;
        Ok(Self::from_bio_tree(&tree))
    }

    fn from_bio_tree(tree: &Tree) -> Self {
        let mut nodes: Vec<Node> = tree
            .g
            .raw_nodes()
            .iter()
            .map(|node| Node {
                label: (node.weight != UNNAMED).then(|| node.weight.clone()),
                length: None,
                children: vec![],
            })
            .collect();
        // Sibling edges are stored in text order.
        for edge in tree.g.raw_edges() {
            let (parent, child) = (edge.source().index(), edge.target().index());
            nodes[parent].children.push(child);
            nodes[child].length = branch_length(edge.weight);
        }
        let root = (!nodes.is_empty()).then_some(0);
        Self { nodes, root }
    }

    /// Newick text. Tip labels are replaced by `annotations` when given, and
    /// then always quoted.
    pub fn to_newick(&self, annotations: Option<&BTreeMap<Id, String>>) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.write_node(root, annotations, &mut out);
        }
        out.push(';');
        out
    }

    fn write_node(&self, idx: usize, annotations: Option<&BTreeMap<Id, String>>, out: &mut String) {
        let node = &self.nodes[idx];
        if !node.children.is_empty() {
            out.push('(');
            for (i, child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_node(*child, annotations, out);
            }
            out.push(')');
        }
        if let Some(label) = &node.label {
            match annotations {
                Some(map) if node.children.is_empty() => {
                    out.push_str(&quote_label(map.get(label).unwrap_or(label)))
                }
                _ if needs_quotes(label) => out.push_str(&quote_label(label)),
                _ => out.push_str(label),
            }
        }
        if let Some(length) = node.length {
            out.push_str(&format!(":{length}"));
        }
    }

    fn tip_nodes(&self) -> Vec<usize> {
        let mut tips = vec![];
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.children.is_empty() {
                tips.push(idx);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        tips
    }

    pub fn tip_labels(&self) -> Vec<&str> {
        self.tip_nodes()
            .into_iter()
            .filter_map(|idx| self.nodes[idx].label.as_deref())
            .collect()
    }

    pub fn tip_count(&self) -> usize {
        self.tip_nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn tip_index(&self) -> HashMap<String, usize> {
        self.tip_nodes()
            .into_iter()
            .filter_map(|idx| self.nodes[idx].label.clone().map(|label| (label, idx)))
            .collect()
    }

    fn parents(&self) -> Vec<Option<usize>> {
        let mut parents = vec![None; self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            for child in &node.children {
                parents[*child] = Some(idx);
            }
        }
        parents
    }

    fn mrca(&self, members: &[usize]) -> Option<usize> {
        let parents = self.parents();
        let lineage = |mut idx: usize| {
            let mut path = vec![idx];
            while let Some(parent) = parents[idx] {
                path.push(parent);
                idx = parent;
            }
            path
        };
        let (first, rest) = members.split_first()?;
        let others: Vec<HashSet<usize>> = rest
            .iter()
            .map(|m| lineage(*m).into_iter().collect())
            .collect();
        lineage(*first)
            .into_iter()
            .find(|candidate| others.iter().all(|set| set.contains(candidate)))
    }

    fn add_child(&mut self, parent: usize, label: &str, length: Option<f64>) -> usize {
        self.nodes.push(Node {
            label: Some(label.to_string()),
            length,
            children: vec![],
        });
        let idx = self.nodes.len() - 1;
        self.nodes[parent].children.push(idx);
        idx
    }

    /// Keeps only the tips in `keep`. Internal nodes left with one child are
    /// suppressed and their branch length is added to the child.
    fn prune_to(&self, keep: &HashSet<usize>) -> PhyloTree {
        let mut nodes = vec![];
        let root = self.root.and_then(|root| self.rebuild(root, keep, &mut nodes));
        PhyloTree { nodes, root }
    }

    fn rebuild(&self, idx: usize, keep: &HashSet<usize>, out: &mut Vec<Node>) -> Option<usize> {
        let node = &self.nodes[idx];
        if node.children.is_empty() {
            if !keep.contains(&idx) {
                return None;
            }
            out.push(node.clone());
            return Some(out.len() - 1);
        }
        let kept: Vec<usize> = node
            .children
            .iter()
            .filter_map(|child| self.rebuild(*child, keep, out))
            .collect();
        match kept.as_slice() {
            [] => None,
            [only] => {
                out[*only].length = add_lengths(out[*only].length, node.length);
                Some(*only)
            }
            _ => {
                out.push(Node {
                    label: node.label.clone(),
                    length: node.length,
                    children: kept,
                });
                Some(out.len() - 1)
            }
        }
    }
}

fn add_lengths(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        _ => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

fn branch_length(weight: f32) -> Option<f64> {
    if weight.is_nan() {
        return None;
    }
    weight.to_string().parse().ok()
}

fn needs_quotes(label: &str) -> bool {
    label
        .bytes()
        .any(|b| b.is_ascii_whitespace() || NEWICK_RESERVED.contains(&b))
}

fn quote_label(label: &str) -> String {
    format!("'{}'", label.replace('\'', "''"))
}

/// Phylogeny whose tips are the features.
#[derive(Debug, Clone, PartialEq)]
pub struct RepPhylogeny {
    meta: EssentialMeta,
    tree: PhyloTree,
    features: Vec<Id>,
    annotations: BTreeMap<Id, String>,
}

impl RepPhylogeny {
    /// With `feature_ids` the tree is pruned to those tips.
    pub fn new(tree: PhyloTree, feature_ids: Option<&[Id]>) -> BiomeResult<Self> {
        let unlabeled = tree.tip_count() - tree.tip_labels().len();
        if unlabeled > 0 {
            return Err(BiomeError::invalid_input(format!(
                "{KIND}: tree has {unlabeled} unlabeled tips"
            )));
        }
        let tips: Vec<Id> = tree.tip_labels().into_iter().map(str::to_string).collect();
        axis::ensure_unique(KIND, "feature", &tips)?;
        let mut phylogeny = Self {
            meta: EssentialMeta::default(),
            tree,
            features: tips,
            annotations: BTreeMap::new(),
        };
        if let Some(ids) = feature_ids {
            phylogeny = phylogeny.get_subset(Some(ids))?;
        }
        Ok(phylogeny)
    }

    pub fn from_newick(text: &str) -> BiomeResult<Self> {
        Self::new(PhyloTree::from_newick(text)?, None)
    }

    pub fn from_newick_path(path: &str) -> BiomeResult<Self> {
        Self::new(PhyloTree::from_newick_path(path)?, None)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.meta.name = Some(name.to_string());
        self
    }

    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    pub fn annotations(&self) -> &BTreeMap<Id, String> {
        &self.annotations
    }

    pub fn annotate_tips(&mut self, annotations: BTreeMap<Id, String>) -> BiomeResult<()> {
        let ids: Vec<Id> = annotations.keys().cloned().collect();
        axis::ensure_present(KIND, "feature", &self.features, &ids)?;
        self.annotations = annotations;
        Ok(())
    }

    pub fn to_newick(&self, annotated: bool) -> BiomeResult<String> {
        if !annotated {
            return Ok(self.tree.to_newick(None));
        }
        if self.annotations.is_empty() {
            return Err(BiomeError::invalid_input(format!(
                "{KIND}: annotations are not present"
            )));
        }
        Ok(self.tree.to_newick(Some(&self.annotations)))
    }

    pub fn write_newick(&self, path: &Path, annotated: bool) -> BiomeResult<()> {
        fs::write(path, self.to_newick(annotated)?).map_err(|e| {
            BiomeError::io(format!("Could not write tree '{}': {e}", path.display()))
        })
    }

    pub fn get_subset(&self, features: Option<&[Id]>) -> BiomeResult<RepPhylogeny> {
        let kept = subset_axis(KIND, "feature", &self.features, features)?;
        let wanted: HashSet<&str> = kept.iter().map(String::as_str).collect();
        let keep: HashSet<usize> = self
            .tree
            .tip_index()
            .into_iter()
            .filter(|(label, _)| wanted.contains(label.as_str()))
            .map(|(_, idx)| idx)
            .collect();
        Ok(RepPhylogeny {
            meta: self.meta.detached(),
            tree: self.tree.prune_to(&keep),
            annotations: self
                .annotations
                .iter()
                .filter(|(id, _)| wanted.contains(id.as_str()))
                .map(|(id, a)| (id.clone(), a.clone()))
                .collect(),
            features: kept,
        })
    }
}

impl FeatureIndexed for RepPhylogeny {
    fn feature_ids(&self) -> &[Id] {
        &self.features
    }

    fn remove_features_by_id(&mut self, ids: &[Id]) -> BiomeResult<()> {
        axis::ensure_present(KIND, "feature", &self.features, ids)?;
        let drop: HashSet<&Id> = ids.iter().collect();
        let keep: HashSet<usize> = self
            .tree
            .tip_index()
            .into_iter()
            .filter(|(label, _)| !drop.contains(label))
            .map(|(_, idx)| idx)
            .collect();
        self.tree = self.tree.prune_to(&keep);
        self.features.retain(|id| !drop.contains(id));
        self.annotations.retain(|id, _| !drop.contains(id));
        self.meta.touch();
        Ok(())
    }

    /// Each group's members are replaced by one new tip attached to their
    /// most recent common ancestor, with the mean member branch length.
    /// Singleton groups only rename their tip.
    fn merge_features_by_map(&mut self, groups: &GroupMap, _aggfunc: &AggFunc) -> BiomeResult<()> {
        axis::validate_group_map(KIND, "feature", &self.features, groups)?;
        let tip_index = self.tree.tip_index();
        let mut tree = self.tree.clone();
        let mut keep = HashSet::new();
        let mut annotations = BTreeMap::new();
        for (new_id, members) in groups {
            let nodes: Vec<usize> = members.iter().map(|m| tip_index[m]).collect();
            if let [only] = nodes.as_slice() {
                tree.nodes[*only].label = Some(new_id.clone());
                keep.insert(*only);
                if let Some(annotation) = self.annotations.get(&members[0]) {
                    annotations.insert(new_id.clone(), annotation.clone());
                }
                continue;
            }
            let mrca = tree.mrca(&nodes).ok_or_else(|| {
                BiomeError::new(
                    biome_protocol::ErrorCode::Internal,
                    format!("{KIND}: no common ancestor for group '{new_id}'"),
                )
            })?;
            let lengths: Vec<f64> = nodes.iter().filter_map(|n| tree.nodes[*n].length).collect();
            let mean = (!lengths.is_empty()).then(|| lengths.iter().sum::<f64>() / lengths.len() as f64);
            keep.insert(tree.add_child(mrca, new_id, mean));
        }
        self.tree = tree.prune_to(&keep);
        self.features = groups.keys().cloned().collect();
        self.annotations = annotations;
        self.meta.touch();
        Ok(())
    }
}

impl EssentialData for RepPhylogeny {
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
        self.write_newick(path, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWICK: &str = "((A:1,B:2)ab:0.5,(C:1,D:1):1);";

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_newick_roundtrip_text() {
        let tree = PhyloTree::from_newick(NEWICK).unwrap();
        assert_eq!(tree.tip_labels(), vec!["A", "B", "C", "D"]);
        assert_eq!(tree.to_newick(None), NEWICK);
    }

    #[test]
    fn test_unnamed_nodes_and_short_lengths() {
        let tree = PhyloTree::from_newick("((A:0.1,B:0.25),C:1e-3)root;").unwrap();
        assert_eq!(tree.tip_labels(), vec!["A", "B", "C"]);
        assert_eq!(tree.to_newick(None), "((A:0.1,B:0.25),C:0.001)root;");
        assert!(PhyloTree::from_newick("(A,B").is_err());
        assert!(PhyloTree::from_newick(";").unwrap().is_empty());
    }

    #[test]
    fn test_read_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.nwk");
        fs::write(&path, NEWICK).unwrap();
        let phylo = RepPhylogeny::from_newick_path(path.to_str().unwrap()).unwrap();
        assert_eq!(phylo.feature_ids(), ids(&["A", "B", "C", "D"]).as_slice());
        let err = RepPhylogeny::from_newick_path("/nonexistent/tree.nwk").unwrap_err();
        assert_eq!(err.code, biome_protocol::ErrorCode::Io);
    }

    #[test]
    fn test_remove_suppresses_unary_nodes() {
        let mut phylo = RepPhylogeny::from_newick(NEWICK).unwrap();
        phylo.remove_features_by_id(&ids(&["B"])).unwrap();
        assert_eq!(phylo.to_newick(false).unwrap(), "(A:1.5,(C:1,D:1):1);");
        assert_eq!(phylo.feature_ids(), ids(&["A", "C", "D"]).as_slice());
    }

    #[test]
    fn test_merge_collapses_group_to_one_tip() {
        let mut phylo = RepPhylogeny::from_newick(NEWICK).unwrap();
        let mut groups = GroupMap::new();
        groups.insert("AB".into(), ids(&["A", "B"]));
        groups.insert("C".into(), ids(&["C"]));
        groups.insert("D2".into(), ids(&["D"]));
        phylo.merge_features_by_map(&groups, &AggFunc::default()).unwrap();
        assert_eq!(phylo.to_newick(false).unwrap(), "(AB:2,(C:1,D2:1):1);");
    }

    #[test]
    fn test_annotated_export() {
        let mut phylo = RepPhylogeny::from_newick(NEWICK).unwrap();
        assert!(phylo.to_newick(true).is_err());
        let mut annotations = BTreeMap::new();
        annotations.insert("A".to_string(), "g__Bacillus".to_string());
        phylo.annotate_tips(annotations).unwrap();
        let text = phylo.to_newick(true).unwrap();
        assert!(text.starts_with("(('g__Bacillus':1,'B':2)ab:0.5"));
    }

    #[test]
    fn test_subset_prunes_tree() {
        let phylo = RepPhylogeny::from_newick(NEWICK).unwrap();
        let sub = phylo.get_subset(Some(&ids(&["C", "D"]))).unwrap();
        assert_eq!(sub.to_newick(false).unwrap(), "(C:1,D:1):1;");
    }
}
