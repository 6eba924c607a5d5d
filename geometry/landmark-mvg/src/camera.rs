use nalgebra::geometry::{Point2, Point3};
use nalgebra::{Matrix3, OMatrix, RealField, Vector3, Vector5, U1, U2};

use opencv_ros_camera::{Distortion, RosOpenCvIntrinsics};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{LandmarkMvgError, Result};

/// Camera matrix and lens distortion of a single camera.
///
/// The camera matrix is assumed to have zero skew. Distortion coefficients
/// are stored in OpenCV order (`k1 k2 p1 p2 k3 ...`) and may be empty.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics<R: RealField + Copy> {
    k: Matrix3<R>,
    distortion: Vec<R>,
}

impl<R: RealField + Copy> CameraIntrinsics<R> {
    pub fn new(k: Matrix3<R>, distortion: Vec<R>) -> Self {
        Self { k, distortion }
    }

    /// Intrinsics without lens distortion.
    pub fn from_k(k: Matrix3<R>) -> Self {
        Self::new(k, Vec::new())
    }

    #[inline]
    pub fn k(&self) -> &Matrix3<R> {
        &self.k
    }

    #[inline]
    pub fn distortion(&self) -> &[R] {
        &self.distortion
    }

    /// Convert to the OpenCV/ROS pinhole model used for undistortion.
    ///
    /// Up to five coefficients are used. Longer vectors are accepted only if
    /// every coefficient past the fifth is zero, otherwise the higher-order
    /// terms would be silently dropped.
    pub fn to_ros_intrinsics(&self) -> Result<RosOpenCvIntrinsics<R>> {
        let mut d = Vector5::<R>::zeros();
        for (i, value) in self.distortion.iter().enumerate() {
            if i < 5 {
                d[i] = *value;
            } else if *value != R::zero() {
                return Err(LandmarkMvgError::UnsupportedDistortion(i));
            }
        }
        let k = &self.k;
        Ok(RosOpenCvIntrinsics::from_params_with_distortion(
            k[(0, 0)],
            k[(0, 1)],
            k[(1, 1)],
            k[(0, 2)],
            k[(1, 2)],
            Distortion::from_opencv_vec(d),
        ))
    }
}

/// Remove lens distortion from a single detector pixel.
pub fn undistort_pixel<R: RealField + Copy>(
    intrinsics: &RosOpenCvIntrinsics<R>,
    distorted: &Point2<R>,
) -> Point2<R> {
    let pixels = cam_geom::Pixels {
        data: OMatrix::<R, U1, U2>::new(distorted.x, distorted.y),
    };
    let undistorted = intrinsics.undistort(&pixels);
    Point2::new(undistorted.data[(0, 0)], undistorted.data[(0, 1)])
}

/// Pose of a camera relative to the reference camera.
///
/// A world point `X` (in the reference frame) maps to `R·X + t` in this
/// camera's frame. Orthonormality of `R` is not checked.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraExtrinsics<R: RealField + Copy> {
    rotation: Matrix3<R>,
    translation: Vector3<R>,
}

impl<R: RealField + Copy> CameraExtrinsics<R> {
    pub fn new(rotation: Matrix3<R>, translation: Vector3<R>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The reference camera's pose.
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// Build from a rotation and the camera centre in world coordinates.
    pub fn from_rotation_and_camcenter(rotation: Matrix3<R>, camcenter: &Point3<R>) -> Self {
        let translation = -(rotation * camcenter.coords);
        Self::new(rotation, translation)
    }

    #[inline]
    pub fn rotation(&self) -> &Matrix3<R> {
        &self.rotation
    }

    #[inline]
    pub fn translation(&self) -> &Vector3<R> {
        &self.translation
    }

    /// True if this is the identity pose within `eps` (Frobenius norm).
    pub fn is_identity(&self, eps: R) -> bool {
        (self.rotation - Matrix3::identity()).norm() <= eps && self.translation.norm() <= eps
    }
}

impl<R: RealField + Copy> Default for CameraExtrinsics<R> {
    fn default() -> Self {
        Self::identity()
    }
}

/// Intrinsics and reference-relative extrinsics of one camera.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraCalibration<R: RealField + Copy> {
    pub intrinsics: CameraIntrinsics<R>,
    pub extrinsics: CameraExtrinsics<R>,
}

impl<R: RealField + Copy> CameraCalibration<R> {
    pub fn new(intrinsics: CameraIntrinsics<R>, extrinsics: CameraExtrinsics<R>) -> Self {
        Self {
            intrinsics,
            extrinsics,
        }
    }

    /// The reference camera: identity pose.
    pub fn reference(intrinsics: CameraIntrinsics<R>) -> Self {
        Self::new(intrinsics, CameraExtrinsics::identity())
    }

    /// Camera centre in world coordinates, `-Rᵀ·t`.
    pub fn camcenter(&self) -> Point3<R> {
        let r = self.extrinsics.rotation();
        Point3::from(-(r.transpose() * self.extrinsics.translation()))
    }
}

#[cfg(test)]
pub(crate) fn default_k<R: RealField + Copy>() -> Matrix3<R> {
    let fx: R = nalgebra::convert(1000.0);
    let cx: R = nalgebra::convert(320.0);
    let cy: R = nalgebra::convert(240.0);
    Matrix3::new(
        fx,
        R::zero(),
        cx,
        R::zero(),
        fx,
        cy,
        R::zero(),
        R::zero(),
        R::one(),
    )
}
