use nalgebra::geometry::{Point2, Point3};
use nalgebra::{Matrix3, OMatrix, RealField, RowVector4, Vector3, U3, U4};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{CameraCalibration, LandmarkMvgError, Result};

/// The 3×4 linear map from homogeneous world points to homogeneous pixels.
///
/// Computed once per session and shared read-only by every triangulation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ProjectionMatrix<R: RealField + Copy> {
    m: OMatrix<R, U3, U4>,
}

impl<R: RealField + Copy> ProjectionMatrix<R> {
    /// Build `P = K·[R|t]`.
    ///
    /// `rotation` is used as given. A non-orthonormal rotation yields a
    /// malformed projection matrix without any error.
    pub fn build(k: &Matrix3<R>, rotation: &Matrix3<R>, translation: &Vector3<R>) -> Self {
        let mut rt = OMatrix::<R, U3, U4>::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        rt.set_column(3, translation);
        Self { m: k * rt }
    }

    pub fn from_calibration(cal: &CameraCalibration<R>) -> Self {
        Self::build(
            cal.intrinsics.k(),
            cal.extrinsics.rotation(),
            cal.extrinsics.translation(),
        )
    }

    pub fn from_matrix(m: OMatrix<R, U3, U4>) -> Self {
        Self { m }
    }

    /// Build from 12 values in row-major order.
    pub fn from_row_slice(values: &[R]) -> Result<Self> {
        if values.len() != 12 {
            return Err(LandmarkMvgError::DimensionMismatch {
                what: "projection matrix",
                expected: 12,
                found: values.len(),
            });
        }
        Ok(Self::from_matrix(OMatrix::<R, U3, U4>::from_row_slice(
            values,
        )))
    }

    #[inline]
    pub fn as_matrix(&self) -> &OMatrix<R, U3, U4> {
        &self.m
    }

    /// Row `i` (0, 1 or 2).
    #[inline]
    pub fn row(&self, i: usize) -> RowVector4<R> {
        self.m.row(i).into_owned()
    }

    /// Project a world point to pixel coordinates.
    ///
    /// Returns `None` for points on the camera's principal plane.
    pub fn project(&self, pt: &Point3<R>) -> Option<Point2<R>> {
        let h = self.m * pt.to_homogeneous();
        if h[2] == R::zero() {
            return None;
        }
        Some(Point2::new(h[0] / h[2], h[1] / h[2]))
    }

    /// Camera centre in world coordinates, the right null vector of `P`.
    ///
    /// Returns `None` if the left 3×3 block is singular.
    #[allow(clippy::many_single_char_names)]
    pub fn camera_center(&self) -> Option<Point3<R>> {
        let p = self.m;
        let x = p.remove_column(0).determinant();
        let y = -p.remove_column(1).determinant();
        let z = p.remove_column(2).determinant();
        let w = -p.remove_column(3).determinant();
        if w == R::zero() {
            return None;
        }
        Some(Point3::new(x / w, y / w, z / w))
    }
}
