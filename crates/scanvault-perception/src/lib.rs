//! `scanvault-perception` – reconstruction and segmentation.
//!
//! Turns stored polar scans into colored 3-D point clouds and splits them
//! into ground, objects and clusters.
//!
//! # Modules
//!
//! - [`octree`] – [`Point3`][octree::Point3], [`Aabb`][octree::Aabb] and the
//!   [`Octree`][octree::Octree] spatial index used for radius queries.
//! - [`cloud`] – [`PointSet`][cloud::PointSet]: parallel points/colors.
//! - [`colormap`] – viridis shading.
//! - [`reconstruct`] – polar readings → Cartesian points.
//! - [`outlier`] – statistical outlier removal.
//! - [`ground`] – RANSAC ground-plane segmentation.
//! - [`cluster`] – DBSCAN clustering.
//! - [`dimensions`] – per-cluster bounding geometry.
//! - [`scene`] – serialisable [`SceneDescription`][scene::SceneDescription].
//! - [`pipeline`] – the [`Stage`][pipeline::Stage] pipeline and
//!   [`ScanAnalyzer`][pipeline::ScanAnalyzer].
//! - [`export`] – [`PointCloudWriter`][export::PointCloudWriter] and the
//!   ASCII [`PlyWriter`][export::PlyWriter].

use scanvault_store::StoreError;
use scanvault_types::ScanError;
use thiserror::Error;

pub mod cloud;
pub mod cluster;
pub mod colormap;
pub mod dimensions;
pub mod export;
pub mod ground;
pub mod octree;
pub mod outlier;
pub mod pipeline;
pub mod reconstruct;
pub mod scene;

/// Errors that can arise from perception operations.
#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Insufficient data for {stage}: need at least {needed}, have {got}")]
    InsufficientData {
        stage: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PerceptionError>;

impl From<PerceptionError> for ScanError {
    fn from(err: PerceptionError) -> Self {
        match err {
            PerceptionError::InsufficientData { stage, needed, got } => {
                ScanError::InsufficientData { stage, needed, got }
            }
            PerceptionError::Store(e) => e.into(),
            PerceptionError::Io(e) => ScanError::Persistence(e.to_string()),
        }
    }
}
