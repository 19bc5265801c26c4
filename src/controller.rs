//! Keeps co-mounted essentials on identical identifier axes and replays a
//! structural mutation of one member on every sibling sharing the axis.

use crate::{
    axis::{self, Id},
    error::{BiomeError, BiomeResult},
    essentials::{ControllerId, Essential, EssentialType, Mutation, MutationOutcome},
};
use biome_protocol::{Axis, EssentialKind, ErrorCode};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-member result of a mutation: the source and every reflected sibling.
pub type Reflection = BTreeMap<EssentialKind, MutationOutcome>;

#[derive(Debug)]
struct Slot {
    essential: Essential,
    buckled: bool,
}

#[derive(Debug)]
pub struct EssentialsController {
    id: ControllerId,
    members: BTreeMap<EssentialKind, Slot>,
    feature_axis: Option<Vec<Id>>,
    sample_axis: Option<Vec<Id>>,
    remount: bool,
}

impl Default for EssentialsController {
    fn default() -> Self {
        Self::new(false)
    }
}

impl EssentialsController {
    pub fn new(remount: bool) -> Self {
        Self {
            id: ControllerId::next(),
            members: BTreeMap::new(),
            feature_axis: None,
            sample_axis: None,
            remount,
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Admission predicate. Never changes state.
    pub fn verify_essential(&self, essential: &Essential, check_axis: bool, check_mount: bool) -> bool {
        if check_mount && essential.is_mounted() && !self.remount {
            return false;
        }
        if check_axis {
            if self.members.contains_key(&essential.kind()) {
                return false;
            }
            let agrees = |canonical: &Option<Vec<Id>>, ids: Option<&[Id]>| match (canonical, ids) {
                (Some(canonical), Some(ids)) => axis::same_id_set(canonical, ids),
                _ => true,
            };
            if !agrees(&self.feature_axis, essential.feature_ids())
                || !agrees(&self.sample_axis, essential.sample_ids())
            {
                return false;
            }
        }
        true
    }

    /// Mounts `essential`. A kind that is already present or a foreign mount
    /// is an admission error; an axis disagreeing with the members is a
    /// consistency error. In both cases nothing is recorded.
    pub fn insert(&mut self, mut essential: Essential) -> BiomeResult<()> {
        let kind = essential.kind();
        if !self.verify_essential(&essential, false, true) {
            return Err(BiomeError::admission(format!(
                "{kind} is already mounted and remounting is not permitted"
            )));
        }
        if self.members.contains_key(&kind) {
            return Err(BiomeError::admission(format!(
                "{kind} is already a member of {}",
                self.id
            )));
        }
        let (features, samples) = canonical_axes(
            self.members
                .values()
                .map(|slot| &slot.essential)
                .chain(std::iter::once(&essential)),
        )?;
        essential.set_mount(self.id);
        self.members.insert(
            kind,
            Slot {
                essential,
                buckled: true,
            },
        );
        self.feature_axis = features;
        self.sample_axis = samples;
        debug!("{}: mounted {kind}, {} members", self.id, self.members.len());
        Ok(())
    }

    /// Applies `mutation` to every member except `source` that carries the
    /// affected axis, then checks the axes again. Members are unbuckled for
    /// the duration and buckled again afterwards, also on failure.
    pub fn reflect_action(&mut self, source: EssentialKind, mutation: &Mutation) -> BiomeResult<Reflection> {
        if self.members.is_empty() {
            return Err(BiomeError::new(
                ErrorCode::NotInitialized,
                format!("{} has no members to reflect on", self.id),
            ));
        }
        self.set_buckled(false);
        let result = self.drive_siblings(source, mutation);
        self.set_buckled(true);
        result
    }

    fn drive_siblings(&mut self, source: EssentialKind, mutation: &Mutation) -> BiomeResult<Reflection> {
        let mut reflection = Reflection::new();
        for (kind, slot) in self.members.iter_mut() {
            if *kind == source || !slot.essential.supports(mutation) {
                continue;
            }
            let outcome = slot.essential.apply(mutation)?;
            debug!("{}: reflected {} from {source} to {kind}", self.id, mutation.name());
            reflection.insert(*kind, outcome);
        }
        self.refresh_axes()?;
        Ok(reflection)
    }

    /// Ratified entry point for structural changes of a mounted member.
    /// The mutation is validated on the source and every sibling it would
    /// reach before anything changes.
    pub fn mutate(&mut self, kind: EssentialKind, mutation: &Mutation) -> BiomeResult<Reflection> {
        let source = self.slot(kind)?;
        if !source.essential.supports(mutation) {
            return Err(BiomeError::unsupported(format!(
                "{kind} does not support {}",
                mutation.name()
            )));
        }
        for slot in self.members.values() {
            if slot.essential.supports(mutation) {
                slot.essential.check(mutation)?;
            }
        }
        let slot = self.slot_mut(kind)?;
        let outcome = slot.essential.apply(mutation)?;
        let buckled = slot.buckled;
        let mut reflection = if buckled {
            self.reflect_action(kind, mutation)?
        } else {
            Reflection::new()
        };
        reflection.insert(kind, outcome);
        Ok(reflection)
    }

    pub fn has_types(&self, kinds: &[EssentialKind]) -> bool {
        kinds.iter().all(|kind| self.members.contains_key(kind))
    }

    pub fn take_by_kind(&self, kind: EssentialKind) -> BiomeResult<&Essential> {
        self.slot(kind).map(|slot| &slot.essential)
    }

    pub fn take_by_type<T: EssentialType>(&self) -> BiomeResult<&T> {
        self.take_by_kind(T::KIND)?
            .as_type::<T>()
            .ok_or_else(|| BiomeError::new(ErrorCode::Internal, format!("{} slot holds another kind", T::KIND)))
    }

    pub fn essentials(&self) -> impl Iterator<Item = &Essential> {
        self.members.values().map(|slot| &slot.essential)
    }

    pub fn kinds(&self) -> Vec<EssentialKind> {
        self.members.keys().copied().collect()
    }

    /// Sorted canonical feature ids, `None` while no member has features.
    pub fn feature_axis(&self) -> Option<&[Id]> {
        self.feature_axis.as_deref()
    }

    pub fn sample_axis(&self) -> Option<&[Id]> {
        self.sample_axis.as_deref()
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn is_active(&self) -> bool {
        !self.members.is_empty()
    }

    pub fn is_buckled(&self, kind: EssentialKind) -> Option<bool> {
        self.members.get(&kind).map(|slot| slot.buckled)
    }

    pub fn into_essentials(self) -> Vec<Essential> {
        self.members.into_values().map(|slot| slot.essential).collect()
    }

    fn slot(&self, kind: EssentialKind) -> BiomeResult<&Slot> {
        self.members
            .get(&kind)
            .ok_or_else(|| BiomeError::not_found(format!("Essential with kind {kind} was not found")))
    }

    fn slot_mut(&mut self, kind: EssentialKind) -> BiomeResult<&mut Slot> {
        self.members
            .get_mut(&kind)
            .ok_or_else(|| BiomeError::not_found(format!("Essential with kind {kind} was not found")))
    }

    fn set_buckled(&mut self, buckled: bool) {
        for slot in self.members.values_mut() {
            slot.buckled = buckled;
        }
    }

    fn refresh_axes(&mut self) -> BiomeResult<()> {
        let (features, samples) = canonical_axes(self.members.values().map(|slot| &slot.essential))?;
        self.feature_axis = features;
        self.sample_axis = samples;
        Ok(())
    }
}

fn canonical_axes<'a, I>(members: I) -> BiomeResult<(Option<Vec<Id>>, Option<Vec<Id>>)>
where
    I: IntoIterator<Item = &'a Essential> + Clone,
{
    let features = shared_axis(members.clone(), Axis::Feature)?;
    let samples = shared_axis(members, Axis::Sample)?;
    Ok((features, samples))
}

fn shared_axis<'a, I>(members: I, which: Axis) -> BiomeResult<Option<Vec<Id>>>
where
    I: IntoIterator<Item = &'a Essential>,
{
    let mut canonical: Option<(EssentialKind, Vec<Id>)> = None;
    for essential in members {
        let ids = match which {
            Axis::Feature => essential.feature_ids(),
            Axis::Sample => essential.sample_ids(),
        };
        let Some(ids) = ids else { continue };
        let sorted = axis::sorted_ids(ids);
        match &canonical {
            None => canonical = Some((essential.kind(), sorted)),
            Some((first, expected)) if *expected != sorted => {
                return Err(BiomeError::consistency(format!(
                    "{which} axis of {} disagrees with {first} ({} vs {} ids)",
                    essential.kind(),
                    sorted.len(),
                    expected.len()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(canonical.map(|(_, ids)| ids))
}
