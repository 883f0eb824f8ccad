//! Pipeline Orchestrator.
//!
//! Runs the analysis stages over one reconstructed scan:
//!
//! ```text
//! reconstruct ─▶ [outlier filter] ─▶ [ground segmentation] ─▶ [clustering] ─▶ dimensions
//! ```
//!
//! Each bracketed stage is a [`Stage`] trait object working on a shared
//! [`Frame`] and may be switched off in [`PipelineConfig`]. A stage whose
//! precondition is not met leaves the frame as it found it, so a run always
//! produces a [`PipelineResult`].
//!
//! A [`Pipeline`] holds no per-run state; share it behind an `Arc` across
//! threads. [`ScanAnalyzer`] pairs one with a [`ScanStore`] for convenience.
//!
//! # Example
//!
//! ```rust
//! use scanvault_perception::pipeline::{Pipeline, PipelineConfig};
//! use scanvault_types::{Reading, Scan};
//!
//! let scan = Scan {
//!     id: None, timestamp: 1.0, receive_time: 1.0, message_id: 1,
//!     device_id: "lidar".into(), latency_ms: None,
//!     readings: vec![Reading::new("angle_0", 100.0), Reading::new("angle_90", 50.0)],
//! };
//! let result = Pipeline::from_config(&PipelineConfig::default()).run(&scan);
//! assert_eq!(result.summary.original_points, 2);
//! ```

use std::sync::Arc;

use scanvault_store::ScanStore;
use scanvault_types::Scan;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Result;
use crate::cloud::PointSet;
use crate::cluster::dbscan;
use crate::dimensions::{Dimensions, dimensions};
use crate::ground::{GroundSegmentor, Plane};
use crate::outlier::remove_outliers;
use crate::reconstruct::to_points;
use crate::scene::SceneDescription;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Stage toggles and parameters; the `[pipeline]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub filter_outliers: bool,
    #[serde(default = "default_outlier_neighbors")]
    pub outlier_neighbors: usize,
    #[serde(default = "default_outlier_std_ratio")]
    pub outlier_std_ratio: f64,

    #[serde(default = "default_true")]
    pub segment_ground: bool,
    #[serde(default = "default_ground_distance_threshold")]
    pub ground_distance_threshold: f64,
    #[serde(default = "default_ground_sample_size")]
    pub ground_sample_size: usize,
    #[serde(default = "default_ground_iterations")]
    pub ground_iterations: usize,
    /// Fixed RANSAC seed for reproducible runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_seed: Option<u64>,

    #[serde(default = "default_true")]
    pub cluster_objects: bool,
    #[serde(default = "default_cluster_eps")]
    pub cluster_eps: f64,
    #[serde(default = "default_cluster_min_points")]
    pub cluster_min_points: usize,
}

fn default_true() -> bool {
    true
}

fn default_outlier_neighbors() -> usize {
    20
}

fn default_outlier_std_ratio() -> f64 {
    2.0
}

fn default_ground_distance_threshold() -> f64 {
    10.0
}

fn default_ground_sample_size() -> usize {
    3
}

fn default_ground_iterations() -> usize {
    100
}

fn default_cluster_eps() -> f64 {
    30.0
}

fn default_cluster_min_points() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter_outliers: true,
            outlier_neighbors: default_outlier_neighbors(),
            outlier_std_ratio: default_outlier_std_ratio(),
            segment_ground: true,
            ground_distance_threshold: default_ground_distance_threshold(),
            ground_sample_size: default_ground_sample_size(),
            ground_iterations: default_ground_iterations(),
            ground_seed: None,
            cluster_objects: true,
            cluster_eps: default_cluster_eps(),
            cluster_min_points: default_cluster_min_points(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame & Stage
// ─────────────────────────────────────────────────────────────────────────────

/// Working state shared by the stages of one run.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Reconstructed cloud, never modified by stages.
    pub original: PointSet,
    /// Points surviving the outlier filter.
    pub filtered: PointSet,
    pub ground: PointSet,
    /// Non-ground points; every filtered point until ground segmentation runs.
    pub objects: PointSet,
    pub ground_plane: Option<Plane>,
    /// Object points per cluster, in cluster-id order.
    pub clusters: Vec<PointSet>,
}

impl Frame {
    pub fn new(original: PointSet) -> Self {
        Self {
            filtered: original.clone(),
            objects: original.clone(),
            original,
            ..Self::default()
        }
    }
}

/// One step of the analysis pipeline.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform `frame` in place; leave it untouched when the stage cannot run.
    fn apply(&self, frame: &mut Frame);
}

/// Statistical outlier removal over [`Frame::filtered`].
#[derive(Debug, Clone)]
pub struct OutlierStage {
    pub neighbors: usize,
    pub std_ratio: f64,
}

impl Stage for OutlierStage {
    fn name(&self) -> &'static str {
        "outlier_filter"
    }

    fn apply(&self, frame: &mut Frame) {
        let kept = remove_outliers(&frame.filtered.points, self.neighbors, self.std_ratio);
        if kept.indices.len() != frame.filtered.len() {
            info!(
                removed = frame.filtered.len() - kept.indices.len(),
                "filtered outlier points"
            );
        }
        frame.filtered = frame.filtered.select(&kept.indices);
        frame.objects = frame.filtered.clone();
    }
}

/// RANSAC ground/non-ground split of [`Frame::filtered`].
#[derive(Debug, Clone)]
pub struct GroundStage {
    pub segmentor: GroundSegmentor,
}

impl Stage for GroundStage {
    fn name(&self) -> &'static str {
        "ground_segmentation"
    }

    fn apply(&self, frame: &mut Frame) {
        let split = self.segmentor.segment(&frame.filtered.points);
        if split.plane.is_none() {
            return;
        }
        frame.ground = frame.filtered.select(&split.inliers);
        frame.objects = frame.filtered.select(&split.outliers);
        frame.ground_plane = split.plane;
    }
}

/// DBSCAN over [`Frame::objects`].
#[derive(Debug, Clone)]
pub struct ClusterStage {
    pub eps: f64,
    pub min_points: usize,
}

impl Stage for ClusterStage {
    fn name(&self) -> &'static str {
        "clustering"
    }

    fn apply(&self, frame: &mut Frame) {
        let clustering = dbscan(&frame.objects.points, self.eps, self.min_points);
        frame.clusters = clustering
            .clusters
            .iter()
            .map(|members| frame.objects.select(members))
            .collect();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Geometry of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Zero-based cluster id.
    pub cluster_id: usize,
    pub point_count: usize,
    /// `None` when the cluster could not be measured; see `error`.
    #[serde(flatten)]
    pub dimensions: Option<Dimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts and per-cluster geometry of one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub original_points: usize,
    pub filtered_points: usize,
    pub ground_points: usize,
    pub object_points: usize,
    pub cluster_count: usize,
    pub clusters: Vec<ClusterSummary>,
}

/// Everything one run produces; owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub timestamp: f64,
    pub device_id: String,
    /// The reconstructed cloud before any stage ran.
    pub cloud: PointSet,
    pub summary: Summary,
    pub scene: SceneDescription,
    pub ground_plane: Option<Plane>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable, shareable sequence of stages.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Pipeline with an explicit stage list.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Build the standard filter → ground → cluster pipeline, omitting
    /// disabled stages.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        if config.filter_outliers {
            stages.push(Box::new(OutlierStage {
                neighbors: config.outlier_neighbors,
                std_ratio: config.outlier_std_ratio,
            }));
        }
        if config.segment_ground {
            let mut segmentor = GroundSegmentor::new()
                .with_distance_threshold(config.ground_distance_threshold)
                .with_sample_size(config.ground_sample_size)
                .with_iterations(config.ground_iterations);
            segmentor.seed = config.ground_seed;
            stages.push(Box::new(GroundStage { segmentor }));
        }
        if config.cluster_objects {
            stages.push(Box::new(ClusterStage {
                eps: config.cluster_eps,
                min_points: config.cluster_min_points,
            }));
        }
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Reconstruct and analyse `scan`.
    pub fn run(&self, scan: &Scan) -> PipelineResult {
        let mut frame = Frame::new(to_points(scan));
        for stage in &self.stages {
            stage.apply(&mut frame);
            debug!(
                stage = stage.name(),
                filtered = frame.filtered.len(),
                ground = frame.ground.len(),
                objects = frame.objects.len(),
                clusters = frame.clusters.len(),
                "stage applied"
            );
        }

        let clusters: Vec<ClusterSummary> = frame
            .clusters
            .iter()
            .enumerate()
            .map(|(cluster_id, members)| match dimensions(&members.points) {
                Ok(dims) => ClusterSummary {
                    cluster_id,
                    point_count: members.len(),
                    dimensions: Some(dims),
                    error: None,
                },
                Err(e) => {
                    warn!(cluster_id, points = members.len(), error = %e, "cluster not measured");
                    ClusterSummary {
                        cluster_id,
                        point_count: members.len(),
                        dimensions: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        let summary = Summary {
            original_points: frame.original.len(),
            filtered_points: frame.filtered.len(),
            ground_points: frame.ground.len(),
            object_points: frame.objects.len(),
            cluster_count: frame.clusters.len(),
            clusters,
        };

        let cluster_points: Vec<_> = frame.clusters.iter().map(|c| c.points.clone()).collect();
        let scene = SceneDescription::build(
            scan.timestamp,
            &frame.original,
            &frame.ground,
            &frame.objects,
            &cluster_points,
        );

        info!(
            timestamp = scan.timestamp,
            original = summary.original_points,
            ground = summary.ground_points,
            objects = summary.object_points,
            clusters = summary.cluster_count,
            "scan analysed"
        );

        PipelineResult {
            timestamp: scan.timestamp,
            device_id: scan.device_id.clone(),
            cloud: frame.original,
            summary,
            scene,
            ground_plane: frame.ground_plane,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScanAnalyzer
// ─────────────────────────────────────────────────────────────────────────────

/// A [`ScanStore`] paired with a shared [`Pipeline`].
pub struct ScanAnalyzer {
    store: ScanStore,
    pipeline: Arc<Pipeline>,
}

impl ScanAnalyzer {
    pub fn new(store: ScanStore, pipeline: Arc<Pipeline>) -> Self {
        Self { store, pipeline }
    }

    pub fn store(&self) -> &ScanStore {
        &self.store
    }

    /// Load the scan at `timestamp`, or the latest one when `None`.
    pub fn load(&self, timestamp: Option<f64>) -> Result<Option<Scan>> {
        let scan = match timestamp {
            Some(ts) => self.store.scan_at(ts)?,
            None => self.store.latest_scan()?,
        };
        Ok(scan)
    }

    /// Analyse the most recent scan; `None` for an empty store.
    pub fn analyze_latest(&self) -> Result<Option<PipelineResult>> {
        self.analyze(None)
    }

    /// Analyse the scan at `timestamp`; `None` when no scan matches.
    pub fn analyze_at(&self, timestamp: f64) -> Result<Option<PipelineResult>> {
        self.analyze(Some(timestamp))
    }

    fn analyze(&self, timestamp: Option<f64>) -> Result<Option<PipelineResult>> {
        Ok(self.load(timestamp)?.map(|scan| self.pipeline.run(&scan)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
