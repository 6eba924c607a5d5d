//! Run one triangulation session from a [SessionConfig].
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::{info, warn};

use landmark_mvg::aggregate::{
    CancelToken, PoseSequenceAggregator, SynchronizedStreams, Termination,
};
use landmark_mvg::keypoints::{write_pose_frames_path, ObservationReader};
use landmark_mvg::param_files::read_parameter_folder;
use landmark_mvg::CameraRig;

use crate::config::SessionConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames_written: usize,
    pub num_landmarks: usize,
    /// Landmark positions resolved over all frames.
    pub resolved_points: usize,
    pub termination: Termination,
    pub output: PathBuf,
}

/// Load the calibration in `parameter_folder` as a reference-anchored rig.
pub fn load_rig<P: AsRef<Path>>(parameter_folder: P, num_cams: usize) -> Result<CameraRig<f64>> {
    let parameter_folder = parameter_folder.as_ref();
    read_parameter_folder(parameter_folder, num_cams).with_context(|| {
        format!(
            "while reading calibration in {}",
            parameter_folder.display()
        )
    })
}

/// Print each camera's projection matrix and center.
pub fn write_rig_summary<W: Write>(wtr: &mut W, rig: &CameraRig<f64>) -> std::io::Result<()> {
    for (cam_idx, pmat) in rig.projection_matrices().iter().enumerate() {
        writeln!(wtr, "camera {cam_idx}:")?;
        write!(wtr, "{}", pmat.as_matrix())?;
        match pmat.camera_center() {
            Some(c) => writeln!(wtr, "center: [{}, {}, {}]", c.x, c.y, c.z)?,
            None => writeln!(wtr, "center: at infinity")?,
        }
    }
    Ok(())
}

/// Triangulate every frame of the session and write the 3D keypoint file.
///
/// The output file is written even when reading the keypoints fails part way
/// through, so the frames completed before the failure are not lost.
pub fn run_session(cfg: &SessionConfig, cancel: Option<CancelToken>) -> Result<SessionSummary> {
    let rig = load_rig(&cfg.parameter_folder, cfg.num_cams)?;
    let landmarks = cfg.landmark_set()?;
    let num_landmarks = landmarks.len();

    let streams = cfg
        .keypoint_files
        .iter()
        .map(|path| ObservationReader::from_path(path, num_landmarks))
        .collect::<landmark_mvg::Result<Vec<_>>>()
        .context("while opening keypoint files")?;
    let source = SynchronizedStreams::new(streams);

    let mut aggregator = PoseSequenceAggregator::from_rig(&rig, landmarks)?
        .with_min_views(cfg.min_views)?
        .with_scale_epsilon(cfg.scale_epsilon);
    if cfg.undistort {
        aggregator = aggregator.with_undistortion(rig.undistorters()?)?;
    }
    if let Some(token) = cancel {
        aggregator = aggregator.with_cancel_token(token);
    }

    info!(
        "triangulating {num_landmarks} landmarks from {} cameras",
        rig.len()
    );
    let mut frames = Vec::new();
    let result = aggregator.run_into(source, &mut frames);

    write_pose_frames_path(&cfg.output, &frames)
        .with_context(|| format!("while writing {}", cfg.output.display()))?;
    info!(
        "wrote {} frames to {}",
        frames.len(),
        cfg.output.display()
    );

    let termination = result.context("while triangulating keypoints")?;
    if termination == Termination::Cancelled {
        warn!("session cancelled, output is incomplete");
    }

    Ok(SessionSummary {
        frames_written: frames.len(),
        num_landmarks,
        resolved_points: frames.iter().map(|f| f.num_resolved()).sum(),
        termination,
        output: cfg.output.clone(),
    })
}
