//! Datasets that can be mounted on an
//! [`EssentialsController`](crate::controller::EssentialsController).
//!
//! Every kind exposes a feature axis, a sample axis or both. Structural
//! changes are described by [`Mutation`] values so the controller can replay
//! the same change on every sibling that shares the affected axis.

mod frequency;
mod phylogeny;
mod sample_metadata;
mod sequence;
mod taxonomy;

pub use frequency::FrequencyTable;
pub use phylogeny::{PhyloTree, RepPhylogeny};
pub use sample_metadata::SampleMetadata;
pub use sequence::{RepSequence, SequenceRecord};
pub use taxonomy::RepTaxonomy;

use crate::{
    aggregate::{AggFunc, CategoricalPolicy},
    axis::{self, GroupMap, Id},
    error::{BiomeError, BiomeResult},
};
use biome_protocol::{Axis, EssentialKind};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ControllerId(u64);

impl ControllerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller#{}", self.0)
    }
}

/// Name, free-form metadata and mount bookkeeping carried by every essential.
#[derive(Debug, Clone, Default)]
pub struct EssentialMeta {
    pub name: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    mount: Option<ControllerId>,
    revision: u64,
}

impl EssentialMeta {
    pub fn mount(&self) -> Option<ControllerId> {
        self.mount
    }

    /// Number of structural mutations applied to this instance.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn set_mount(&mut self, controller: ControllerId) {
        self.mount = Some(controller);
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
    }

    /// Same name and metadata, unmounted, revision restarted.
    pub(crate) fn detached(&self) -> Self {
        Self {
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            mount: None,
            revision: 0,
        }
    }
}

// Mount state and revision are bookkeeping, not content.
impl PartialEq for EssentialMeta {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.metadata == other.metadata
    }
}

/// A structural change to one identifier axis.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    RemoveFeatures { ids: Vec<Id> },
    RemoveSamples { ids: Vec<Id> },
    /// Ids not listed in any group are dropped.
    MergeFeatures { groups: GroupMap, aggfunc: AggFunc },
    /// `policy` collapses categorical values of sample metadata.
    MergeSamples {
        groups: GroupMap,
        aggfunc: AggFunc,
        policy: CategoricalPolicy,
    },
    RenameSamples { mapping: BTreeMap<Id, Id> },
}

impl Mutation {
    pub fn axis(&self) -> Axis {
        match self {
            Mutation::RemoveFeatures { .. } | Mutation::MergeFeatures { .. } => Axis::Feature,
            Mutation::RemoveSamples { .. }
            | Mutation::MergeSamples { .. }
            | Mutation::RenameSamples { .. } => Axis::Sample,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mutation::RemoveFeatures { .. } => "remove_features_by_id",
            Mutation::RemoveSamples { .. } => "remove_samples_by_id",
            Mutation::MergeFeatures { .. } => "merge_features_by_map",
            Mutation::MergeSamples { .. } => "merge_samples_by_map",
            Mutation::RenameSamples { .. } => "rename_samples",
        }
    }
}

/// Shape of one essential after a mutation was applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationOutcome {
    pub kind: EssentialKind,
    pub features: Option<usize>,
    pub samples: Option<usize>,
    pub revision: u64,
}

pub trait FeatureIndexed {
    fn feature_ids(&self) -> &[Id];
    fn remove_features_by_id(&mut self, ids: &[Id]) -> BiomeResult<()>;
    fn merge_features_by_map(&mut self, groups: &GroupMap, aggfunc: &AggFunc) -> BiomeResult<()>;
}

pub trait SampleIndexed {
    fn sample_ids(&self) -> &[Id];
    fn remove_samples_by_id(&mut self, ids: &[Id]) -> BiomeResult<()>;
    fn merge_samples_by_map(&mut self, groups: &GroupMap, aggfunc: &AggFunc) -> BiomeResult<()>;

    fn merge_samples_with_policy(
        &mut self,
        groups: &GroupMap,
        aggfunc: &AggFunc,
        _policy: &CategoricalPolicy,
    ) -> BiomeResult<()> {
        self.merge_samples_by_map(groups, aggfunc)
    }

    fn rename_samples(&mut self, mapping: &BTreeMap<Id, Id>) -> BiomeResult<()>;
}

/// Object safe view shared by the concrete kinds.
pub trait EssentialData: fmt::Debug {
    fn kind(&self) -> EssentialKind;
    fn meta(&self) -> &EssentialMeta;
    fn meta_mut(&mut self) -> &mut EssentialMeta;

    fn feature_axis(&self) -> Option<&[Id]> {
        None
    }

    fn sample_axis(&self) -> Option<&[Id]> {
        None
    }

    fn as_feature_indexed_mut(&mut self) -> Option<&mut dyn FeatureIndexed> {
        None
    }

    fn as_sample_indexed_mut(&mut self) -> Option<&mut dyn SampleIndexed> {
        None
    }

    /// Restricted, unmounted copy. Kinds without an axis ignore that argument.
    fn subset(&self, features: Option<&[Id]>, samples: Option<&[Id]>) -> BiomeResult<Essential>;

    fn write_to_path(&self, path: &Path, sep: u8) -> BiomeResult<()>;
}

/// Statically typed access to one kind stored inside an [`Essential`].
pub trait EssentialType: EssentialData + Clone + Sized {
    const KIND: EssentialKind;
    fn from_essential(essential: &Essential) -> Option<&Self>;
    fn from_essential_owned(essential: Essential) -> Result<Self, Essential>;
    fn into_essential(self) -> Essential;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Essential {
    FrequencyTable(FrequencyTable),
    RepTaxonomy(RepTaxonomy),
    RepSequence(RepSequence),
    RepPhylogeny(RepPhylogeny),
    SampleMetadata(SampleMetadata),
}

macro_rules! essential_type {
    ($ty:ident) => {
        impl EssentialType for $ty {
            const KIND: EssentialKind = EssentialKind::$ty;

            fn from_essential(essential: &Essential) -> Option<&Self> {
                match essential {
                    Essential::$ty(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_essential_owned(essential: Essential) -> Result<Self, Essential> {
                match essential {
                    Essential::$ty(inner) => Ok(inner),
                    other => Err(other),
                }
            }

            fn into_essential(self) -> Essential {
                Essential::$ty(self)
            }
        }

        impl From<$ty> for Essential {
            fn from(inner: $ty) -> Self {
                Essential::$ty(inner)
            }
        }
    };
}

essential_type!(FrequencyTable);
essential_type!(RepTaxonomy);
essential_type!(RepSequence);
essential_type!(RepPhylogeny);
essential_type!(SampleMetadata);

impl Essential {
    pub fn data(&self) -> &dyn EssentialData {
        match self {
            Essential::FrequencyTable(e) => e,
            Essential::RepTaxonomy(e) => e,
            Essential::RepSequence(e) => e,
            Essential::RepPhylogeny(e) => e,
            Essential::SampleMetadata(e) => e,
        }
    }

    fn data_mut(&mut self) -> &mut dyn EssentialData {
        match self {
            Essential::FrequencyTable(e) => e,
            Essential::RepTaxonomy(e) => e,
            Essential::RepSequence(e) => e,
            Essential::RepPhylogeny(e) => e,
            Essential::SampleMetadata(e) => e,
        }
    }

    pub fn kind(&self) -> EssentialKind {
        self.data().kind()
    }

    pub fn meta(&self) -> &EssentialMeta {
        self.data().meta()
    }

    pub fn name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }

    pub fn feature_ids(&self) -> Option<&[Id]> {
        self.data().feature_axis()
    }

    pub fn sample_ids(&self) -> Option<&[Id]> {
        self.data().sample_axis()
    }

    pub fn is_mounted(&self) -> bool {
        self.meta().mount().is_some()
    }

    pub fn revision(&self) -> u64 {
        self.meta().revision()
    }

    pub(crate) fn set_mount(&mut self, controller: ControllerId) {
        self.data_mut().meta_mut().set_mount(controller);
    }

    /// Independent, unmounted instance with the same content.
    pub fn copy(&self) -> Essential {
        let mut copied = self.clone();
        let detached = self.meta().detached();
        *copied.data_mut().meta_mut() = detached;
        copied
    }

    pub fn get_subset(
        &self,
        features: Option<&[Id]>,
        samples: Option<&[Id]>,
    ) -> BiomeResult<Essential> {
        self.data().subset(features, samples)
    }

    pub fn as_type<T: EssentialType>(&self) -> Option<&T> {
        T::from_essential(self)
    }

    pub fn into_type<T: EssentialType>(self) -> Result<T, Essential> {
        T::from_essential_owned(self)
    }

    /// Whether this kind carries the axis `mutation` changes.
    pub fn supports(&self, mutation: &Mutation) -> bool {
        match mutation.axis() {
            Axis::Feature => self.kind().is_feature_indexed(),
            Axis::Sample => self.kind().is_sample_indexed(),
        }
    }

    /// Validates `mutation` against the current axes without changing anything.
    pub fn check(&self, mutation: &Mutation) -> BiomeResult<()> {
        check_mutation(self.kind(), self.feature_ids(), self.sample_ids(), mutation)
    }

    pub fn apply(&mut self, mutation: &Mutation) -> BiomeResult<MutationOutcome> {
        match mutation {
            Mutation::RemoveFeatures { ids } => self.feature_indexed_mut()?.remove_features_by_id(ids)?,
            Mutation::MergeFeatures { groups, aggfunc } => self
                .feature_indexed_mut()?
                .merge_features_by_map(groups, aggfunc)?,
            Mutation::RemoveSamples { ids } => self.sample_indexed_mut()?.remove_samples_by_id(ids)?,
            Mutation::MergeSamples {
                groups,
                aggfunc,
                policy,
            } => self
                .sample_indexed_mut()?
                .merge_samples_with_policy(groups, aggfunc, policy)?,
            Mutation::RenameSamples { mapping } => self.sample_indexed_mut()?.rename_samples(mapping)?,
        }
        Ok(self.outcome())
    }

    pub fn outcome(&self) -> MutationOutcome {
        MutationOutcome {
            kind: self.kind(),
            features: self.feature_ids().map(<[Id]>::len),
            samples: self.sample_ids().map(<[Id]>::len),
            revision: self.revision(),
        }
    }

    pub fn write_to_path(&self, path: &Path, sep: u8) -> BiomeResult<()> {
        self.data().write_to_path(path, sep)
    }

    fn feature_indexed_mut(&mut self) -> BiomeResult<&mut dyn FeatureIndexed> {
        let kind = self.kind();
        self.data_mut()
            .as_feature_indexed_mut()
            .ok_or_else(|| BiomeError::unsupported(format!("{kind} has no feature axis")))
    }

    fn sample_indexed_mut(&mut self) -> BiomeResult<&mut dyn SampleIndexed> {
        let kind = self.kind();
        self.data_mut()
            .as_sample_indexed_mut()
            .ok_or_else(|| BiomeError::unsupported(format!("{kind} has no sample axis")))
    }
}

fn require_axis<'a>(kind: EssentialKind, axis: Option<&'a [Id]>, which: Axis) -> BiomeResult<&'a [Id]> {
    axis.ok_or_else(|| BiomeError::unsupported(format!("{kind} has no {which} axis")))
}

pub(crate) fn check_mutation(
    kind: EssentialKind,
    features: Option<&[Id]>,
    samples: Option<&[Id]>,
    mutation: &Mutation,
) -> BiomeResult<()> {
    match mutation {
        Mutation::RemoveFeatures { ids } => {
            axis::ensure_present(kind, "feature", require_axis(kind, features, Axis::Feature)?, ids)
        }
        Mutation::RemoveSamples { ids } => {
            axis::ensure_present(kind, "sample", require_axis(kind, samples, Axis::Sample)?, ids)
        }
        Mutation::MergeFeatures { groups, .. } => axis::validate_group_map(
            kind,
            "feature",
            require_axis(kind, features, Axis::Feature)?,
            groups,
        ),
        Mutation::MergeSamples { groups, .. } => axis::validate_group_map(
            kind,
            "sample",
            require_axis(kind, samples, Axis::Sample)?,
            groups,
        ),
        Mutation::RenameSamples { mapping } => axis::validate_rename(
            kind,
            "sample",
            require_axis(kind, samples, Axis::Sample)?,
            mapping,
        ),
    }
}

/// Restricts `axis` to `requested` after checking every requested id exists.
pub(crate) fn subset_axis(
    kind: EssentialKind,
    axis_name: &str,
    axis: &[Id],
    requested: Option<&[Id]>,
) -> BiomeResult<Vec<Id>> {
    match requested {
        None => Ok(axis.to_vec()),
        Some(ids) => {
            axis::ensure_present(kind, axis_name, axis, ids)?;
            Ok(axis::retain_order(axis, ids))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<Id> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> Essential {
        FrequencyTable::new(
            ids(&["F1", "F2"]),
            ids(&["S1", "S2"]),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        )
        .unwrap()
        .into()
    }

    #[test]
    fn test_copy_is_unmounted_and_equal() {
        let mut original = table();
        original.set_mount(ControllerId::next());
        let copied = original.copy();
        assert!(original.is_mounted());
        assert!(!copied.is_mounted());
        assert_eq!(original, copied);
    }

    #[test]
    fn test_apply_bumps_revision() {
        let mut essential = table();
        let outcome = essential
            .apply(&Mutation::RemoveFeatures { ids: ids(&["F1"]) })
            .unwrap();
        assert_eq!(outcome.features, Some(1));
        assert_eq!(outcome.samples, Some(2));
        assert_eq!(outcome.revision, 1);
    }

    #[test]
    fn test_check_leaves_content_untouched() {
        let essential = table();
        let err = essential
            .check(&Mutation::RemoveFeatures { ids: ids(&["F99"]) })
            .unwrap_err();
        assert!(err.message.contains("F99"));
        assert_eq!(essential.feature_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_sample_mutation_unsupported_on_feature_kind() {
        let mut taxonomy: Essential = RepTaxonomy::from_lineages(
            vec![("F1".to_string(), "k__Bacteria".to_string())],
            None,
        )
        .unwrap()
        .into();
        let mutation = Mutation::RemoveSamples { ids: ids(&["S1"]) };
        assert!(!taxonomy.supports(&mutation));
        let err = taxonomy.apply(&mutation).unwrap_err();
        assert_eq!(err.code, biome_protocol::ErrorCode::Unsupported);
    }

    #[test]
    fn test_typed_access() {
        let essential = table();
        assert!(essential.as_type::<FrequencyTable>().is_some());
        assert!(essential.as_type::<RepTaxonomy>().is_none());
        let back: FrequencyTable = essential.into_type().unwrap();
        assert_eq!(back.shape(), (2, 2));
    }
}
