//! Read paths
//!
//! Independent of the write path: neighbor expansion reads the graph store,
//! co-occurrence and statistics read the relational aggregates. Graph answers
//! may lag behind documents still in `GRAPH_PENDING`.

pub mod neighbors;
pub mod stats;

pub use neighbors::{GraphQueryService, NeighborGraph, DEFAULT_NEIGHBOR_LIMIT};
pub use stats::{EntityProfile, StatisticsService, DEFAULT_RELATED_LIMIT, DEFAULT_TOP_ENTITIES};
