//! Multi-view registration and triangulation of tracked anatomical landmarks.
//!
//! A fixed set of K landmarks is observed simultaneously by N calibrated,
//! time-synchronized cameras. This crate turns per-camera calibration results
//! into one projection matrix per camera, all in a single world frame
//! anchored at a reference camera, and then triangulates every landmark of
//! every frame from whichever cameras actually saw it.
//!
//! ## Core Types
//!
//! - [`ProjectionMatrix`]: the 3×4 map `P = K·[R|t]` for one camera
//! - [`CameraRig`]: the reference-anchored set of projection matrices
//! - [`Triangulator`]: the DLT solver, tolerant of occlusion
//! - [`aggregate::PoseSequenceAggregator`]: the per-frame driver loop
//! - [`Observation2D`], [`Point3D`], [`PoseFrame`]: per-frame inputs and outputs
//!
//! Occlusion is an ordinary runtime condition. A landmark seen by fewer than
//! two cameras is reported as [`Point3D::Unresolved`], never as an error.
//! Errors ([`LandmarkMvgError`]) are reserved for broken preconditions such as
//! malformed parameter files or mismatched dimensions.
//!
//! ## Example
//!
//! Project a known point into two cameras and triangulate it back.
//!
//! ```rust
//! use landmark_mvg::{CameraCalibration, CameraExtrinsics, CameraIntrinsics, CameraRig,
//!     Observation2D, Triangulator};
//! use nalgebra::{Matrix3, Point3, Vector3};
//!
//! let k = Matrix3::new(1000.0, 0.0, 320.0, 0.0, 1000.0, 240.0, 0.0, 0.0, 1.0);
//! let cam1 = CameraCalibration::new(
//!     CameraIntrinsics::from_k(k),
//!     CameraExtrinsics::new(Matrix3::identity(), Vector3::new(-1.0, 0.0, 0.0)),
//! );
//! let rig = CameraRig::compose(CameraIntrinsics::from_k(k), vec![cam1]);
//!
//! let original = Point3::new(0.0, 0.0, 5.0);
//! let views: Vec<_> = rig
//!     .projection_matrices()
//!     .iter()
//!     .map(|pmat| (pmat, Observation2D::from(pmat.project(&original).unwrap())))
//!     .collect();
//!
//! let mut triangulator = Triangulator::new(rig.len());
//! let found = triangulator.triangulate(views.iter().map(|(p, o)| (*p, o)));
//! let coords = found.coords().expect("two views resolve a point");
//! assert!((coords - original).norm() < 1e-6);
//! ```
#![deny(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
use thiserror::Error;

use nalgebra::geometry::{Point2, Point3};
use nalgebra::RealField;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

#[derive(Error, Debug)]
pub enum LandmarkMvgError {
    #[error("{file}, line {line}: expected marker `{expected}`, found `{found}`")]
    MissingMarker {
        file: String,
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[error("{file}: `{field}` has {found} rows, expected {expected}")]
    MissingRows {
        file: String,
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{file}, line {line}: `{field}` row has {found} values, expected {expected}")]
    WrongRowLength {
        file: String,
        line: usize,
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{file}, line {line}: `{field}` value `{token}` is not a number")]
    InvalidFloat {
        file: String,
        line: usize,
        field: &'static str,
        token: String,
    },
    #[error("{file}, line {line}: unexpected trailing content")]
    TrailingContent { file: String, line: usize },
    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("invalid landmark set: {0}")]
    InvalidLandmarkSet(String),
    #[error("minimum view count {requested} is below {required}")]
    InvalidMinViews { requested: usize, required: usize },
    #[error("no cameras")]
    NoCameras,
    #[error("distortion coefficient {0} is nonzero but only the 5 parameter model is supported")]
    UnsupportedDistortion(usize),
    #[error("{file}: {source}")]
    FileIo {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<M> = std::result::Result<M, LandmarkMvgError>;

mod camera;
pub use crate::camera::{
    undistort_pixel, CameraCalibration, CameraExtrinsics, CameraIntrinsics,
};

mod projection;
pub use crate::projection::ProjectionMatrix;

mod rig;
pub use crate::rig::CameraRig;

mod triangulate;
pub use crate::triangulate::{
    mean_reprojection_distance, reprojection_distances, triangulate, CoefficientBuffer,
    Triangulator, DEFAULT_MIN_VIEWS, DEFAULT_SCALE_EPSILON,
};

pub mod aggregate;

pub mod keypoints;

pub mod param_files;

/// Position of a landmark within a frame, `0..K`.
///
/// The same index names the same anatomical point in every camera and every
/// frame. That is a contract with the detector and is not checked here.
pub type LandmarkIndex = usize;

/// One camera's view of one landmark in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Observation2D<R: RealField + Copy> {
    Observed(Point2<R>),
    NotObserved,
}

impl<R: RealField + Copy> Observation2D<R> {
    /// An observation at pixel `(x, y)`.
    ///
    /// Non-finite coordinates cannot take part in triangulation and yield
    /// [`Observation2D::NotObserved`].
    pub fn new(x: R, y: R) -> Self {
        if x.is_finite() && y.is_finite() {
            Observation2D::Observed(Point2::new(x, y))
        } else {
            Observation2D::NotObserved
        }
    }

    pub fn pixel(&self) -> Option<&Point2<R>> {
        match self {
            Observation2D::Observed(px) => Some(px),
            Observation2D::NotObserved => None,
        }
    }

    #[inline]
    pub fn is_observed(&self) -> bool {
        matches!(self, Observation2D::Observed(_))
    }
}

impl<R: RealField + Copy> From<Point2<R>> for Observation2D<R> {
    fn from(orig: Point2<R>) -> Self {
        Observation2D::new(orig.x, orig.y)
    }
}

impl<R: RealField + Copy> From<Option<Point2<R>>> for Observation2D<R> {
    fn from(orig: Option<Point2<R>>) -> Self {
        match orig {
            Some(px) => px.into(),
            None => Observation2D::NotObserved,
        }
    }
}

/// Why a landmark could not be placed in 3D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum UnresolvedReason {
    /// Fewer cameras than the minimum observed the landmark.
    TooFewViews { observed: usize, required: usize },
    /// The homogeneous solution has (numerically) zero scale.
    DegenerateScale,
    /// The singular value decomposition did not converge.
    SvdFailed,
    /// Read back from a keypoint file, which does not keep the reason.
    NotRecorded,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::TooFewViews { observed, required } => {
                write!(f, "observed in {observed} views, need {required}")
            }
            UnresolvedReason::DegenerateScale => write!(f, "degenerate homogeneous scale"),
            UnresolvedReason::SvdFailed => write!(f, "SVD failed"),
            UnresolvedReason::NotRecorded => write!(f, "unresolved in source file"),
        }
    }
}

/// Triangulation result for one landmark in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Point3D<R: RealField + Copy> {
    Resolved(Point3<R>),
    Unresolved(UnresolvedReason),
}

impl<R: RealField + Copy> Point3D<R> {
    #[inline]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Point3D::Resolved(_))
    }

    pub fn coords(&self) -> Option<&Point3<R>> {
        match self {
            Point3D::Resolved(pt) => Some(pt),
            Point3D::Unresolved(_) => None,
        }
    }
}

/// All K landmarks of one time step, ordered by [`LandmarkIndex`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PoseFrame<R: RealField + Copy> {
    points: Vec<Point3D<R>>,
}

impl<R: RealField + Copy> PoseFrame<R> {
    pub fn new(points: Vec<Point3D<R>>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point3D<R>] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, idx: LandmarkIndex) -> Option<&Point3D<R>> {
        self.points.get(idx)
    }

    /// Number of landmarks with a 3D position in this frame.
    pub fn num_resolved(&self) -> usize {
        self.points.iter().filter(|p| p.is_resolved()).count()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point3D<R>> {
        self.points.iter()
    }

    pub fn into_points(self) -> Vec<Point3D<R>> {
        self.points
    }
}
