//! Taxonomic lineage parsing and formatting.
//!
//! Taxa are stored per rank of [`VALID_RANKS`]. Generated lineages follow the
//! greengenes convention `k__Bacteria; p__Firmicutes`.

use crate::error::{BiomeError, BiomeResult};
use biome_protocol::{LINEAGE_SEPARATOR, TaxonomyNotation, VALID_RANKS};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

pub const RANK_COUNT: usize = VALID_RANKS.len();

/// One optional taxon per rank, in [`VALID_RANKS`] order.
pub type Taxa = [Option<String>; RANK_COUNT];

lazy_static! {
    static ref GREENGENES_TOKEN: Regex =
        Regex::new(r"^\s*([dkpcofgs])__(.*?)\s*$").expect("greengenes token pattern");
    static ref QIIME_TOKEN: Regex =
        Regex::new(r"^\s*([^\s;]+?)__(.+?)\s*$").expect("qiime token pattern");
}

pub fn empty_taxa() -> Taxa {
    Default::default()
}

pub fn rank_index(rank: &str) -> Option<usize> {
    let rank = rank.trim().to_ascii_lowercase();
    VALID_RANKS.iter().position(|r| *r == rank)
}

pub fn rank_indices<S: AsRef<str>>(ranks: &[S]) -> BiomeResult<Vec<usize>> {
    let mut out = BTreeSet::new();
    for rank in ranks {
        let idx = rank_index(rank.as_ref()).ok_or_else(|| {
            BiomeError::invalid_input(format!(
                "Invalid rank '{}', expected one of {}",
                rank.as_ref(),
                VALID_RANKS.join(",")
            ))
        })?;
        out.insert(idx);
    }
    Ok(out.into_iter().collect())
}

pub fn rank_names(indices: &[usize]) -> Vec<String> {
    indices.iter().map(|i| VALID_RANKS[*i].to_string()).collect()
}

/// Trims, drops enclosing brackets and capitalizes. Empty names are missing.
pub fn fix_taxon_name(raw: &str) -> Option<String> {
    let mut trimmed = raw.trim().to_lowercase();
    if trimmed.starts_with('[') {
        trimmed.remove(0);
    }
    if trimmed.ends_with(']') {
        trimmed.pop();
    }
    let trimmed = trimmed.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

pub fn detect_notation(lineage: &str) -> TaxonomyNotation {
    let tokens: Vec<&str> = lineage.split(';').filter(|t| !t.trim().is_empty()).collect();
    if !tokens.is_empty() && tokens.iter().all(|t| GREENGENES_TOKEN.is_match(t)) {
        TaxonomyNotation::Greengenes
    } else if !tokens.is_empty() && tokens.iter().all(|t| QIIME_TOKEN.is_match(t)) {
        TaxonomyNotation::Qiime
    } else {
        TaxonomyNotation::Silva
    }
}

fn parse_greengenes(lineage: &str) -> Taxa {
    let mut taxa = empty_taxa();
    for token in lineage.split(';') {
        if let Some(caps) = GREENGENES_TOKEN.captures(token) {
            if let Some(idx) = rank_index(&caps[1]) {
                taxa[idx] = fix_taxon_name(&caps[2]);
            }
        }
    }
    taxa
}

/// Parses many lineages at once. Qiime and silva notations assign ranks by
/// level, aligned to the deepest ranks of [`VALID_RANKS`] as in the source
/// databases, so the level count is taken over the whole input.
pub fn parse_lineages(
    lineages: &[String],
    notation: Option<TaxonomyNotation>,
) -> BiomeResult<Vec<Taxa>> {
    let notation = match notation {
        Some(n) => n,
        None => lineages
            .iter()
            .find(|l| !l.trim().is_empty())
            .map(|l| detect_notation(l))
            .unwrap_or(TaxonomyNotation::Greengenes),
    };
    match notation {
        TaxonomyNotation::Greengenes => Ok(lineages.iter().map(|l| parse_greengenes(l)).collect()),
        TaxonomyNotation::Qiime => {
            let parsed: Vec<Vec<(String, String)>> = lineages
                .iter()
                .map(|l| {
                    l.split(';')
                        .filter_map(|t| QIIME_TOKEN.captures(t))
                        .map(|c| (c[1].to_string(), c[2].to_string()))
                        .sorted_by(|a, b| a.0.cmp(&b.0))
                        .collect()
                })
                .collect();
            let levels: Vec<String> = parsed
                .iter()
                .flatten()
                .map(|(level, _)| level.clone())
                .sorted()
                .dedup()
                .collect();
            let offset = level_offset(levels.len())?;
            Ok(parsed
                .into_iter()
                .map(|tokens| {
                    let mut taxa = empty_taxa();
                    for (level, taxon) in tokens {
                        if let Some(pos) = levels.iter().position(|l| *l == level) {
                            taxa[offset + pos] = fix_taxon_name(&taxon);
                        }
                    }
                    taxa
                })
                .collect())
        }
        TaxonomyNotation::Silva => {
            let parsed: Vec<Vec<&str>> = lineages
                .iter()
                .map(|l| l.split(';').map(str::trim).collect())
                .collect();
            let depth = parsed.iter().map(Vec::len).max().unwrap_or(0);
            let offset = level_offset(depth)?;
            Ok(parsed
                .into_iter()
                .map(|tokens| {
                    let mut taxa = empty_taxa();
                    for (pos, taxon) in tokens.into_iter().enumerate() {
                        taxa[offset + pos] = fix_taxon_name(taxon);
                    }
                    taxa
                })
                .collect())
        }
    }
}

fn level_offset(depth: usize) -> BiomeResult<usize> {
    if depth > RANK_COUNT {
        return Err(BiomeError::invalid_input(format!(
            "Lineages have {depth} levels, at most {RANK_COUNT} ranks are supported"
        )));
    }
    Ok(RANK_COUNT - depth)
}

/// Lineage restricted to `ranks` (canonical positions). Missing ranks are
/// written as bare prefixes (`g__`) when `missing_rank` is set and skipped
/// otherwise.
pub fn format_lineage(taxa: &Taxa, ranks: &[usize], missing_rank: bool) -> String {
    ranks
        .iter()
        .sorted()
        .filter_map(|&idx| match &taxa[idx] {
            Some(taxon) => Some(format!("{}__{}", VALID_RANKS[idx], taxon)),
            None if missing_rank => Some(format!("{}__", VALID_RANKS[idx])),
            None => None,
        })
        .join(LINEAGE_SEPARATOR)
}

/// Rank-wise agreement of all members, cut at the first disagreeing rank.
pub fn consensus<'a, I>(members: I) -> Taxa
where
    I: IntoIterator<Item = &'a Taxa>,
{
    let members: Vec<&Taxa> = members.into_iter().collect();
    let mut out = empty_taxa();
    let Some(first) = members.first() else {
        return out;
    };
    for idx in 0..RANK_COUNT {
        if members.iter().all(|t| t[idx] == first[idx]) {
            out[idx] = first[idx].clone();
        } else {
            break;
        }
    }
    out
}

pub fn has_any_taxon(taxa: &Taxa) -> bool {
    taxa.iter().any(Option::is_some)
}
