//! Probe data analysis.
//!
//! Per day, points are binned per zone, turned into link-weighted FCD
//! estimates and segmented into trips. Across the run window the trips feed
//! the origin/destination matrix and the FCD records feed the fundamental
//! diagram fit. Artifacts can then be published to S3.

pub mod dense_zones;
pub mod diagram;
pub mod fcd;
pub mod od_matrix;
pub mod pipeline;
pub mod trips;
pub mod types;
pub mod utility;
pub mod writetos3;
pub mod zone_bins;
