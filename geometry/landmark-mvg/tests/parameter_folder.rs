use approx::assert_relative_eq;
use eyre::Result;
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};

use landmark_mvg::param_files::{
    extrinsics_file_name, intrinsics_file_name, read_parameter_folder, write_extrinsics_path,
    write_parameter_folder,
};
use landmark_mvg::{
    CameraCalibration, CameraExtrinsics, CameraIntrinsics, CameraRig, LandmarkMvgError,
    ProjectionMatrix,
};
use test_log::test;

fn rig() -> CameraRig<f64> {
    let k = Matrix3::new(1000.0, 0.0, 320.0, 0.0, 1000.0, 240.0, 0.0, 0.0, 1.0);
    let k2 = Matrix3::new(950.5, 0.0, 331.25, 0.0, 951.0, 244.75, 0.0, 0.0, 1.0);
    CameraRig::compose(
        CameraIntrinsics::new(k, vec![-0.12, 0.03, 0.001, -0.0005, 0.0]),
        vec![
            CameraCalibration::new(
                CameraIntrinsics::new(k2, vec![-0.1, 0.02, 0.0, 0.0, 0.0]),
                CameraExtrinsics::from_rotation_and_camcenter(
                    *Rotation3::from_euler_angles(0.01, -0.2, 0.03).matrix(),
                    &Point3::new(0.8, 0.05, 0.1),
                ),
            ),
            CameraCalibration::new(
                CameraIntrinsics::from_k(k),
                CameraExtrinsics::new(Matrix3::identity(), Vector3::new(-1.0, 0.0, 0.0)),
            ),
        ],
    )
}

#[test]
fn parameter_folder_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let rig = rig();
    write_parameter_folder(dir.path(), &rig)?;

    for cam_idx in 0..3 {
        assert!(dir.path().join(intrinsics_file_name(cam_idx)).exists());
        assert!(dir.path().join(extrinsics_file_name(cam_idx)).exists());
    }

    let loaded = read_parameter_folder(dir.path(), 3)?;
    assert_eq!(loaded.len(), 3);
    for (a, b) in loaded.calibrations().iter().zip(rig.calibrations().iter()) {
        assert_eq!(a.intrinsics.distortion(), b.intrinsics.distortion());
        assert_relative_eq!(*a.intrinsics.k(), *b.intrinsics.k());
        assert_relative_eq!(*a.extrinsics.rotation(), *b.extrinsics.rotation());
        assert_relative_eq!(*a.extrinsics.translation(), *b.extrinsics.translation());
    }

    // reference camera is K [I | 0]
    let k_ref = *rig.calibrations()[0].intrinsics.k();
    let expected = ProjectionMatrix::build(&k_ref, &Matrix3::identity(), &Vector3::zeros());
    assert_relative_eq!(
        *loaded.projection_matrix(0).unwrap().as_matrix(),
        *expected.as_matrix()
    );
    Ok(())
}

#[test]
fn reference_extrinsics_are_optional_and_ignored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_parameter_folder(dir.path(), &rig())?;

    std::fs::remove_file(dir.path().join(extrinsics_file_name(0)))?;
    let without = read_parameter_folder(dir.path(), 3)?;

    // a non-identity reference pose only produces a warning
    write_extrinsics_path(
        dir.path().join(extrinsics_file_name(0)),
        &CameraExtrinsics::new(Matrix3::identity(), Vector3::new(0.5, 0.0, 0.0)),
    )?;
    let with = read_parameter_folder(dir.path(), 3)?;

    assert_eq!(without, with);
    assert!(with.calibrations()[0].extrinsics.is_identity(0.0));
    Ok(())
}

#[test]
fn missing_intrinsic_row_names_the_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_parameter_folder(dir.path(), &rig())?;

    let path = dir.path().join(intrinsics_file_name(2));
    std::fs::write(
        &path,
        "intrinsic:\n1000.0 0.0 320.0 \n0.0 1000.0 240.0 \ndistortion:\n0.0 0.0 0.0 0.0 0.0 \n",
    )?;

    match read_parameter_folder(dir.path(), 3) {
        Err(err @ LandmarkMvgError::MissingRows { .. }) => {
            let msg = err.to_string();
            assert!(msg.contains("cam_2_intrinsics.dat"), "{msg}");
            assert!(msg.contains("intrinsic"), "{msg}");
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[test]
fn missing_files_are_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_parameter_folder(dir.path(), &rig())?;
    std::fs::remove_file(dir.path().join(extrinsics_file_name(1)))?;

    match read_parameter_folder(dir.path(), 3) {
        Err(LandmarkMvgError::FileIo { file, .. }) => {
            assert!(file.ends_with("cam_1_extrinsics.dat"));
        }
        other => panic!("unexpected {other:?}"),
    }

    assert!(matches!(
        read_parameter_folder(dir.path(), 0),
        Err(LandmarkMvgError::NoCameras)
    ));
    Ok(())
}
