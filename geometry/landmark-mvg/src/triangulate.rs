use nalgebra as na;
use nalgebra::geometry::{Point2, Point3};
use nalgebra::{Dyn, Matrix4, OMatrix, RealField, U4};

use tracing::debug;

use crate::{LandmarkMvgError, Observation2D, Point3D, ProjectionMatrix, Result, UnresolvedReason};

/// Minimum number of observing cameras. Also the lowest accepted setting.
pub const DEFAULT_MIN_VIEWS: usize = 2;

/// Homogeneous scale at or below which a solution is treated as a point at
/// infinity.
pub const DEFAULT_SCALE_EPSILON: f64 = 1e-10;

const SVD_MAX_ITERATIONS: usize = 1_000_000;

/// Rows of the DLT system for the views used in one triangulation.
///
/// Storage is sized for `2 × max_views` rows up front and reused between
/// calls; only the first [`used_rows`](Self::used_rows) rows are meaningful.
#[derive(Debug, Clone)]
pub struct CoefficientBuffer<R: RealField + Copy> {
    a: OMatrix<R, Dyn, U4>,
    used_rows: usize,
}

impl<R: RealField + Copy> CoefficientBuffer<R> {
    pub fn with_view_capacity(max_views: usize) -> Self {
        Self {
            a: OMatrix::<R, Dyn, U4>::zeros(2 * max_views),
            used_rows: 0,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.used_rows = 0;
    }

    #[inline]
    pub fn used_rows(&self) -> usize {
        self.used_rows
    }

    #[inline]
    pub fn num_views(&self) -> usize {
        self.used_rows / 2
    }

    /// Number of views that fit without reallocating.
    #[inline]
    pub fn view_capacity(&self) -> usize {
        self.a.nrows() / 2
    }

    /// Append the two constraints contributed by pixel `px` seen through `pmat`.
    pub fn push_view(&mut self, pmat: &ProjectionMatrix<R>, px: &Point2<R>) {
        if self.used_rows + 2 > self.a.nrows() {
            let grown = (2 * self.a.nrows()).max(self.used_rows + 2);
            self.a.resize_vertically_mut(grown, R::zero());
        }
        let row0 = pmat.row(0);
        let row1 = pmat.row(1);
        let row2 = pmat.row(2);
        self.a
            .row_mut(self.used_rows)
            .copy_from(&(row2 * px.y - row1));
        self.a
            .row_mut(self.used_rows + 1)
            .copy_from(&(row0 - row2 * px.x));
        self.used_rows += 2;
    }

    /// The 4×4 normal matrix `AᵀA` over the used rows.
    pub fn normal_matrix(&self) -> Matrix4<R> {
        let used = self.a.rows(0, self.used_rows);
        used.tr_mul(&used)
    }
}

/// Direct linear transform triangulation tolerant of occlusion.
///
/// Holds a [`CoefficientBuffer`] so repeated calls (one per landmark per
/// frame) do not allocate. Views whose observation is
/// [`Observation2D::NotObserved`] are skipped. Fewer than
/// [`min_views`](Self::min_views) remaining views, or a homogeneous solution
/// with zero scale, give [`Point3D::Unresolved`].
#[derive(Debug, Clone)]
pub struct Triangulator<R: RealField + Copy> {
    min_views: usize,
    scale_epsilon: R,
    buffer: CoefficientBuffer<R>,
}

impl<R: RealField + Copy> Triangulator<R> {
    /// Create a triangulator expecting at most `max_views` views per call.
    ///
    /// More views are accepted but cause the buffer to grow.
    pub fn new(max_views: usize) -> Self {
        Self {
            min_views: DEFAULT_MIN_VIEWS,
            scale_epsilon: na::convert(DEFAULT_SCALE_EPSILON),
            buffer: CoefficientBuffer::with_view_capacity(max_views),
        }
    }

    /// Require at least `min_views` observing cameras. Must be 2 or more.
    pub fn with_min_views(mut self, min_views: usize) -> Result<Self> {
        if min_views < DEFAULT_MIN_VIEWS {
            return Err(LandmarkMvgError::InvalidMinViews {
                requested: min_views,
                required: DEFAULT_MIN_VIEWS,
            });
        }
        self.min_views = min_views;
        Ok(self)
    }

    pub fn with_scale_epsilon(mut self, scale_epsilon: R) -> Self {
        self.scale_epsilon = scale_epsilon;
        self
    }

    #[inline]
    pub fn min_views(&self) -> usize {
        self.min_views
    }

    #[inline]
    pub fn scale_epsilon(&self) -> R {
        self.scale_epsilon
    }

    /// Triangulate one landmark from `(projection matrix, observation)` pairs.
    pub fn triangulate<'a, I>(&mut self, views: I) -> Point3D<R>
    where
        I: IntoIterator<Item = (&'a ProjectionMatrix<R>, &'a Observation2D<R>)>,
        R: 'a,
    {
        self.buffer.clear();
        for (pmat, obs) in views {
            if let Observation2D::Observed(px) = obs {
                self.buffer.push_view(pmat, px);
            }
        }

        let observed = self.buffer.num_views();
        if observed < self.min_views {
            return Point3D::Unresolved(UnresolvedReason::TooFewViews {
                observed,
                required: self.min_views,
            });
        }

        let b = self.buffer.normal_matrix();
        let svd = match na::linalg::SVD::try_new(
            b,
            false,
            true,
            R::default_epsilon(),
            SVD_MAX_ITERATIONS,
        ) {
            Some(svd) => svd,
            None => {
                debug!("SVD of normal matrix did not converge ({observed} views)");
                return Point3D::Unresolved(UnresolvedReason::SvdFailed);
            }
        };
        let v_t = match svd.v_t {
            Some(v_t) => v_t,
            None => return Point3D::Unresolved(UnresolvedReason::SvdFailed),
        };

        // singular values are not assumed to be sorted
        let mut smallest = 0;
        for i in 1..svd.singular_values.len() {
            if svd.singular_values[i] < svd.singular_values[smallest] {
                smallest = i;
            }
        }
        let x_h = v_t.row(smallest);

        let w = x_h[3];
        if !w.is_finite() {
            return Point3D::Unresolved(UnresolvedReason::SvdFailed);
        }
        if w.abs() <= self.scale_epsilon {
            return Point3D::Unresolved(UnresolvedReason::DegenerateScale);
        }
        Point3D::Resolved(Point3::new(x_h[0] / w, x_h[1] / w, x_h[2] / w))
    }
}

/// Triangulate a single landmark with default settings.
pub fn triangulate<R: RealField + Copy>(
    views: &[(ProjectionMatrix<R>, Observation2D<R>)],
) -> Point3D<R> {
    Triangulator::new(views.len()).triangulate(views.iter().map(|(p, o)| (p, o)))
}

/// Distance between each observed pixel and the reprojection of `point`.
///
/// Views that are not observed, or for which `point` lies on the camera's
/// principal plane, contribute nothing.
pub fn reprojection_distances<'a, R, I>(point: &Point3<R>, views: I) -> Vec<R>
where
    R: RealField + Copy,
    I: IntoIterator<Item = (&'a ProjectionMatrix<R>, &'a Observation2D<R>)>,
{
    views
        .into_iter()
        .filter_map(|(pmat, obs)| {
            let px = obs.pixel()?;
            let reprojected = pmat.project(point)?;
            Some(na::distance(&reprojected, px))
        })
        .collect()
}

/// Mean of [`reprojection_distances`], `None` if no view contributes.
pub fn mean_reprojection_distance<'a, R, I>(point: &Point3<R>, views: I) -> Option<R>
where
    R: RealField + Copy,
    I: IntoIterator<Item = (&'a ProjectionMatrix<R>, &'a Observation2D<R>)>,
{
    let dists = reprojection_distances(point, views);
    if dists.is_empty() {
        return None;
    }
    let sum = dists.iter().fold(R::zero(), |acc, d| acc + *d);
    let n: R = na::convert(dists.len() as f64);
    Some(sum / n)
}
