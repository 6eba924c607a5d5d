use nalgebra::RealField;

use opencv_ros_camera::RosOpenCvIntrinsics;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{CameraCalibration, CameraIntrinsics, ProjectionMatrix, Result};

/// All cameras of a session, anchored at camera 0.
///
/// Every non-reference camera's pose was calibrated pairwise against the
/// reference, so composing the rig is direct substitution. There is no
/// chaining through intermediate cameras.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraRig<R: RealField + Copy> {
    calibrations: Vec<CameraCalibration<R>>,
    pmats: Vec<ProjectionMatrix<R>>,
}

impl<R: RealField + Copy> CameraRig<R> {
    /// Compose the rig from the reference camera's intrinsics and the other
    /// cameras' calibrations, in camera order `1..N`.
    ///
    /// The reference camera gets the identity pose. The extrinsics of each
    /// entry of `others` must be relative to the reference camera.
    pub fn compose(reference: CameraIntrinsics<R>, others: Vec<CameraCalibration<R>>) -> Self {
        let mut calibrations = Vec::with_capacity(others.len() + 1);
        calibrations.push(CameraCalibration::reference(reference));
        calibrations.extend(others);
        let pmats = calibrations
            .iter()
            .map(ProjectionMatrix::from_calibration)
            .collect();
        Self {
            calibrations,
            pmats,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pmats.len()
    }

    /// Always false: a rig has at least the reference camera.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pmats.is_empty()
    }

    /// Projection matrices indexed by camera.
    pub fn projection_matrices(&self) -> &[ProjectionMatrix<R>] {
        &self.pmats
    }

    pub fn projection_matrix(&self, cam_idx: usize) -> Option<&ProjectionMatrix<R>> {
        self.pmats.get(cam_idx)
    }

    pub fn calibrations(&self) -> &[CameraCalibration<R>] {
        &self.calibrations
    }

    /// Undistortion models for every camera, in camera order.
    pub fn undistorters(&self) -> Result<Vec<RosOpenCvIntrinsics<R>>> {
        self.calibrations
            .iter()
            .map(|cal| cal.intrinsics.to_ros_intrinsics())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::default_k;
    use crate::CameraExtrinsics;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Point3, Vector3};

    fn three_camera_rig() -> CameraRig<f64> {
        let k = default_k();
        let others = vec![
            CameraCalibration::new(
                CameraIntrinsics::from_k(k),
                CameraExtrinsics::from_rotation_and_camcenter(
                    Matrix3::identity(),
                    &Point3::new(1.0, 0.0, 0.0),
                ),
            ),
            CameraCalibration::new(
                CameraIntrinsics::new(k, vec![0.01, 0.0, 0.0, 0.0, 0.0]),
                CameraExtrinsics::from_rotation_and_camcenter(
                    *nalgebra::Rotation3::from_euler_angles(0.0, 0.2, 0.0).matrix(),
                    &Point3::new(-1.0, 0.5, 0.0),
                ),
            ),
        ];
        CameraRig::compose(CameraIntrinsics::from_k(k), others)
    }

    #[test]
    fn reference_camera_is_anchored() {
        let rig = three_camera_rig();
        assert_eq!(rig.len(), 3);
        assert!(!rig.is_empty());

        let k = default_k::<f64>();
        let expected = ProjectionMatrix::build(&k, &Matrix3::identity(), &Vector3::zeros());
        assert_eq!(rig.projection_matrix(0), Some(&expected));
        assert!(rig.calibrations()[0].extrinsics.is_identity(0.0));
        assert!(rig.projection_matrix(3).is_none());
    }

    #[test]
    fn every_camera_shares_the_reference_frame() {
        let rig = three_camera_rig();
        let centers = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.5, 0.0),
        ];
        for (pmat, center) in rig.projection_matrices().iter().zip(centers.iter()) {
            assert_relative_eq!(pmat.camera_center().unwrap(), *center, epsilon = 1e-9);
        }
        assert_eq!(rig.undistorters().unwrap().len(), 3);
    }
}
