//! Per-kind aggregators producing merged essentials on the reconciled axes.

use super::{grouping::GroupTable, options::MergeOptions};
use crate::{
    assembly::Assembly,
    axis,
    error::BiomeResult,
    essentials::{FeatureIndexed, FrequencyTable, RepTaxonomy, SampleIndexed, SampleMetadata},
    lineage::{self, Taxa},
};
use biome_protocol::{Axis, EssentialKind, GroupBy, TaxonomyNotation};
use std::{
    collections::{BTreeMap, HashMap},
    rc::Rc,
};
use tracing::debug;

pub(crate) struct MergeContext<'a> {
    pub assemblies: &'a [Rc<Assembly>],
    pub features: &'a GroupTable,
    pub samples: &'a GroupTable,
    pub options: &'a MergeOptions,
}

impl MergeContext<'_> {
    fn sources<T, F>(&self, pick: F) -> Vec<(usize, &T)>
    where
        F: Fn(&Assembly) -> Option<&T>,
    {
        self.assemblies
            .iter()
            .enumerate()
            .filter_map(|(pos, assembly)| pick(assembly.as_ref()).map(|e| (pos, e)))
            .collect()
    }
}

/// Grouped by taxonomy the lineage is the group key. Otherwise each new
/// feature takes the lineage of the first contributing id of each source
/// in turn, restricted to the ranks all contributing taxonomies carry.
pub(crate) fn merge_taxonomy(ctx: &MergeContext<'_>) -> BiomeResult<Option<RepTaxonomy>> {
    let sources = ctx.sources(Assembly::taxonomy);
    if sources.is_empty() {
        return Ok(None);
    }
    let merged = if ctx.options.groupby.feature == GroupBy::Taxonomy {
        let lineages = ctx
            .features
            .rows()
            .iter()
            .map(|row| (row.id.clone(), row.key.clone()))
            .collect();
        RepTaxonomy::from_lineages(lineages, Some(TaxonomyNotation::Greengenes))?
    } else {
        let taxonomies: Vec<&RepTaxonomy> = sources.iter().map(|(_, t)| *t).collect();
        let ranks = lineage::rank_indices(&super::grouping::shared_ranks(&taxonomies))?;
        let mut assigned: HashMap<&str, Taxa> = HashMap::new();
        for (pos, taxonomy) in &sources {
            let lookup: HashMap<&str, &Taxa> =
                taxonomy.entries().map(|(id, taxa)| (id.as_str(), taxa)).collect();
            for row in ctx.features.rows() {
                let Some(first) = row.members[*pos].first() else {
                    continue;
                };
                if let Some(taxa) = lookup.get(first.as_str()) {
                    assigned.insert(row.id.as_str(), restrict(taxa, &ranks));
                }
            }
        }
        let taxa = ctx
            .features
            .rows()
            .iter()
            .map(|row| assigned.remove(row.id.as_str()).unwrap_or_else(lineage::empty_taxa))
            .collect();
        RepTaxonomy::from_taxa(ctx.features.ids(), taxa)?
    };
    debug!("Merged taxonomy of {} sources", sources.len());
    Ok(Some(merged.with_name("RepTaxonomy")))
}

fn restrict(taxa: &Taxa, ranks: &[usize]) -> Taxa {
    let mut out = lineage::empty_taxa();
    for &idx in ranks {
        out[idx] = taxa[idx].clone();
    }
    out
}

pub(crate) fn merge_frequency(ctx: &MergeContext<'_>) -> BiomeResult<Option<FrequencyTable>> {
    let sources = ctx.sources(Assembly::frequency);
    if sources.is_empty() {
        return Ok(None);
    }
    let feature_func = ctx
        .options
        .aggfunc
        .resolve(EssentialKind::FrequencyTable, Axis::Feature);
    let sample_func = ctx
        .options
        .aggfunc
        .resolve(EssentialKind::FrequencyTable, Axis::Sample);
    let feature_ids = ctx.features.ids();
    let sample_ids = ctx.samples.ids();

    let values = if ctx.options.groupby.feature == GroupBy::Taxonomy {
        // Each source is reduced on its own, then duplicate samples across
        // sources are reduced with the sample function.
        let mut reduced = vec![];
        for (pos, frequency) in &sources {
            let (features, samples) = (ctx.features.group_map(*pos), ctx.samples.group_map(*pos));
            // A source without features or samples only widens the axes.
            if features.is_empty() || samples.is_empty() {
                continue;
            }
            let mut table = (*frequency).clone();
            table.merge_features_by_map(&features, feature_func)?;
            table.merge_samples_by_map(&samples, sample_func)?;
            reduced.push(table);
        }
        let mut cells: HashMap<(&str, &str), Vec<f64>> = HashMap::new();
        for table in &reduced {
            let samples = table.sample_ids();
            for (feature, row) in table.rows() {
                for (sample, value) in samples.iter().zip(row) {
                    cells
                        .entry((feature.as_str(), sample.as_str()))
                        .or_default()
                        .push(*value);
                }
            }
        }
        feature_ids
            .iter()
            .map(|f| {
                sample_ids
                    .iter()
                    .map(|s| match cells.get(&(f.as_str(), s.as_str())) {
                        Some(values) => sample_func.reduce(values),
                        None => f64::NAN,
                    })
                    .collect()
            })
            .collect()
    } else {
        // Cell by cell: the stacked sub-blocks of every source are reduced
        // along features per original sample, then across those samples.
        let lookups: Vec<(usize, HashMap<&str, &[f64]>, HashMap<&str, usize>)> = sources
            .iter()
            .map(|(pos, frequency)| {
                let rows = frequency.rows().map(|(id, row)| (id.as_str(), row)).collect();
                (*pos, rows, axis::index_of(frequency.sample_ids()))
            })
            .collect();
        ctx.features
            .rows()
            .iter()
            .map(|feature_row| {
                ctx.samples
                    .rows()
                    .iter()
                    .map(|sample_row| {
                        let mut columns: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
                        for (pos, rows, cols) in &lookups {
                            let rids = &feature_row.members[*pos];
                            for sid in &sample_row.members[*pos] {
                                let Some(col) = cols.get(sid.as_str()) else {
                                    continue;
                                };
                                for rid in rids {
                                    if let Some(row) = rows.get(rid.as_str()) {
                                        columns.entry(sid.as_str()).or_default().push(row[*col]);
                                    }
                                }
                            }
                        }
                        if columns.is_empty() {
                            return f64::NAN;
                        }
                        let per_sample: Vec<f64> =
                            columns.values().map(|v| feature_func.reduce(v)).collect();
                        sample_func.reduce(&per_sample)
                    })
                    .collect()
            })
            .collect()
    };
    debug!(
        "Merged frequency of {} sources into {}x{}",
        sources.len(),
        feature_ids.len(),
        sample_ids.len()
    );
    Ok(Some(
        FrequencyTable::new(feature_ids, sample_ids, values)?.with_name("FrequencyTable"),
    ))
}

pub(crate) fn merge_sample_metadata(ctx: &MergeContext<'_>) -> BiomeResult<Option<SampleMetadata>> {
    let sources = ctx.sources(Assembly::sample_metadata);
    if sources.is_empty() {
        return Ok(None);
    }
    let mut variables: Vec<String> = vec![];
    for (_, metadata) in &sources {
        for variable in metadata.variables() {
            if !variables.contains(variable) {
                variables.push(variable.clone());
            }
        }
    }
    let policy = &ctx.options.categorical;
    let values = ctx
        .samples
        .rows()
        .iter()
        .map(|row| {
            variables
                .iter()
                .map(|variable| {
                    let observed = sources.iter().flat_map(|(pos, metadata)| {
                        row.members[*pos]
                            .iter()
                            .map(move |sid| metadata.value(sid, variable))
                    });
                    policy.reduce(observed)
                })
                .collect()
        })
        .collect();
    Ok(Some(
        SampleMetadata::new(ctx.samples.ids(), variables, values)?.with_name("SampleMetadata"),
    ))
}
