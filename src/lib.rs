//! Consistency-controlled bundles of microbiome datasets.
//!
//! Essentials (frequency tables, taxonomies, representative sequences,
//! phylogenies and sample metadata) are mounted on an
//! [`EssentialsController`] which keeps their identifier axes identical.
//! An [`Assembly`] wraps one controller; a [`Survey`] merges several
//! assemblies into one.

pub mod aggregate;
pub mod assembly;
pub mod axis;
pub mod controller;
pub mod error;
pub mod essentials;
pub mod lineage;
pub mod manifest;
pub mod survey;

pub use aggregate::{AggFunc, CategoricalPolicy};
pub use assembly::{Assembly, AssemblyOptions, Curb};
pub use controller::EssentialsController;
pub use error::{BiomeError, BiomeResult};
pub use essentials::{Essential, Mutation};
pub use survey::{MergeOptions, Survey};
