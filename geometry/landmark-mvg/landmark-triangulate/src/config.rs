//! YAML session configuration.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use landmark_mvg::aggregate::{LandmarkSet, MEDIAPIPE_BODY_12};
use landmark_mvg::{DEFAULT_MIN_VIEWS, DEFAULT_SCALE_EPSILON};

use crate::{Error, Result};

/// The default value for [SessionConfig::output].
pub const DEFAULT_OUTPUT: &str = "kpts_3d.dat";

fn default_output() -> PathBuf {
    DEFAULT_OUTPUT.into()
}

fn default_landmarks() -> Vec<u32> {
    MEDIAPIPE_BODY_12.to_vec()
}

fn default_min_views() -> usize {
    DEFAULT_MIN_VIEWS
}

fn default_scale_epsilon() -> f64 {
    DEFAULT_SCALE_EPSILON
}

/// If `path` is relative, make it relative to `dirname`.
///
/// `path` must be utf-8 encoded and can start with a tilde or contain
/// environment variables, which are expanded.
fn fixup_relative_path(path: &mut PathBuf, dirname: &Path) -> Result<()> {
    let pathstr = path
        .as_os_str()
        .to_str()
        .ok_or_else(|| Error::NonUtf8Path(path.clone()))?;
    let expanded = shellexpand::full(pathstr)?;
    *path = PathBuf::from(expanded.to_string());

    if path.is_relative() {
        *path = dirname.join(&path);
    }
    Ok(())
}

/// One triangulation session: where the calibration and keypoints are, and
/// how to triangulate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Number of cameras. Camera 0 is the reference camera.
    pub num_cams: usize,
    /// Folder with `cam_{i}_intrinsics.dat` and `cam_{i}_extrinsics.dat`.
    ///
    /// Can contain shell variables such as `~`, `$A`, or `${B}`.
    pub parameter_folder: PathBuf,
    /// One 2D keypoint file per camera, in camera order.
    pub keypoint_files: Vec<PathBuf>,
    /// Where the 3D keypoints are written. Defaults to [DEFAULT_OUTPUT].
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Detector ids of the tracked landmarks, in landmark index order.
    #[serde(default = "default_landmarks")]
    pub landmarks: Vec<u32>,
    /// Minimum number of cameras that must observe a landmark.
    #[serde(default = "default_min_views")]
    pub min_views: usize,
    /// Undistort observations before triangulating.
    #[serde(default)]
    pub undistort: bool,
    #[serde(default = "default_scale_epsilon")]
    pub scale_epsilon: f64,
}

impl SessionConfig {
    /// Read and validate a config file, resolving relative paths against the
    /// directory containing it.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            file: path.to_path_buf(),
            source,
        })?;
        let base_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::from_yaml_str(&buf, &base_dir)
    }

    /// Parse and validate a config, resolving relative paths against
    /// `base_dir`.
    pub fn from_yaml_str(buf: &str, base_dir: &Path) -> Result<Self> {
        let mut cfg: SessionConfig = serde_yaml::from_str(buf)?;
        fixup_relative_path(&mut cfg.parameter_folder, base_dir)?;
        for path in cfg.keypoint_files.iter_mut() {
            fixup_relative_path(path, base_dir)?;
        }
        fixup_relative_path(&mut cfg.output, base_dir)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_cams < 2 {
            return Err(Error::Invalid(format!(
                "num_cams is {}, at least 2 cameras are needed",
                self.num_cams
            )));
        }
        if self.keypoint_files.len() != self.num_cams {
            return Err(Error::Invalid(format!(
                "{} keypoint files given for {} cameras",
                self.keypoint_files.len(),
                self.num_cams
            )));
        }
        if self.min_views < DEFAULT_MIN_VIEWS {
            return Err(Error::Invalid(format!(
                "min_views is {}, must be at least {DEFAULT_MIN_VIEWS}",
                self.min_views
            )));
        }
        if !(self.scale_epsilon.is_finite() && self.scale_epsilon >= 0.0) {
            return Err(Error::Invalid(format!(
                "scale_epsilon {} must be a non-negative number",
                self.scale_epsilon
            )));
        }
        self.landmark_set()?;
        Ok(())
    }

    pub fn landmark_set(&self) -> Result<LandmarkSet> {
        Ok(LandmarkSet::new(self.landmarks.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "num_cams: 2
parameter_folder: params
keypoint_files:
  - cam0.dat
  - /data/cam1.dat
";

    #[test]
    fn defaults_and_relative_paths() {
        let cfg = SessionConfig::from_yaml_str(MINIMAL, Path::new("/sessions/a")).unwrap();
        assert_eq!(cfg.parameter_folder, PathBuf::from("/sessions/a/params"));
        assert_eq!(
            cfg.keypoint_files,
            vec![
                PathBuf::from("/sessions/a/cam0.dat"),
                PathBuf::from("/data/cam1.dat")
            ]
        );
        assert_eq!(cfg.output, PathBuf::from("/sessions/a/kpts_3d.dat"));
        assert_eq!(cfg.landmarks, MEDIAPIPE_BODY_12.to_vec());
        assert_eq!(cfg.min_views, 2);
        assert!(!cfg.undistort);
        assert_eq!(cfg.scale_epsilon, DEFAULT_SCALE_EPSILON);
    }

    #[test]
    fn explicit_values() {
        let buf = format!("{MINIMAL}output: out.dat\nlandmarks: [0, 5, 9]\nmin_views: 3\nundistort: true\nscale_epsilon: 1.0e-6\n");
        let cfg = SessionConfig::from_yaml_str(&buf, Path::new("base")).unwrap();
        assert_eq!(cfg.output, PathBuf::from("base/out.dat"));
        assert_eq!(cfg.landmark_set().unwrap().ids(), &[0, 5, 9]);
        assert_eq!(cfg.min_views, 3);
        assert!(cfg.undistort);
        assert_eq!(cfg.scale_epsilon, 1.0e-6);
    }

    #[test]
    fn invalid_configs() {
        let base = Path::new(".");
        let bad = [
            // one camera
            "num_cams: 1\nparameter_folder: p\nkeypoint_files: [a]\n".to_string(),
            // file count mismatch
            "num_cams: 3\nparameter_folder: p\nkeypoint_files: [a, b]\n".to_string(),
            format!("{MINIMAL}min_views: 1\n"),
            format!("{MINIMAL}landmarks: []\n"),
            format!("{MINIMAL}landmarks: [1, 2, 1]\n"),
        ];
        for buf in bad.iter() {
            assert!(SessionConfig::from_yaml_str(buf, base).is_err(), "{buf}");
        }

        match SessionConfig::from_yaml_str(&format!("{MINIMAL}colour: red\n"), base) {
            Err(Error::Yaml { .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn from_path_uses_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let cfg = SessionConfig::from_path(&path).unwrap();
        assert_eq!(cfg.parameter_folder, dir.path().join("params"));

        match SessionConfig::from_path(dir.path().join("missing.yaml")) {
            Err(Error::ConfigRead { file, .. }) => assert!(file.ends_with("missing.yaml")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
