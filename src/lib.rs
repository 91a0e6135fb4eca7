// pipeline stages (each a barrier): split -> qc -> reproducibility -> summary
//
// metadata
// - samples, pairs, bins
// - chromosome normalization, resolution
//
// layout
// - the output tree is the only state shared between stages
//
// partition
// - per-chromosome node/edge shards
// - genome-wide QuASAR inputs
//
// scripts
// - WorkUnit = (method, stage, key)
// - one generated shell script per unit, external tools behind it
//
// backend
// - Immediate (blocking), SGE / Slurm (fire-and-forget)
//
// stages
// - fan-out per stage, per-unit failure collection
//
// summary
// - score files -> per-chromosome and genome-wide tables

pub mod args;
pub mod backend;
pub mod layout;
pub mod metadata;
pub mod methods;
pub mod partition;
pub mod scripts;
pub mod stages;
pub mod summary;
