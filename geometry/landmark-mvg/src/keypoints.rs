//! Keypoint sequence files.
//!
//! One line per frame. Each line holds, per landmark in index order, either 2
//! values (pixel coordinates) or 3 values (world coordinates), each followed
//! by a space. There is no header; the reader must be told K. Blank lines at
//! the end of a file are ignored; anywhere else they are malformed frames.
//! Values use the same text form as the parameter files.
//!
//! A landmark that is not observed is written as `-1 -1` and one that could
//! not be triangulated as `-1 -1 -1`. These markers exist only in the files;
//! in memory they become [`Observation2D::NotObserved`] and
//! [`Point3D::Unresolved`].
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use nalgebra::geometry::Point3;

use crate::param_files::{parse_floats, TextFloat};
use crate::{LandmarkMvgError, Observation2D, Point3D, PoseFrame, Result, UnresolvedReason};

/// Value written for every coordinate of a missing landmark.
pub const MISSING_VALUE: f64 = -1.0;

const FIELD: &str = "keypoints";

pub fn write_pose_frame<W: Write>(wtr: &mut W, frame: &PoseFrame<f64>) -> Result<()> {
    for pt in frame.iter() {
        match pt.coords() {
            Some(c) => write!(
                wtr,
                "{} {} {} ",
                TextFloat(c.x),
                TextFloat(c.y),
                TextFloat(c.z)
            )?,
            None => write!(wtr, "{m} {m} {m} ", m = TextFloat(MISSING_VALUE))?,
        }
    }
    writeln!(wtr)?;
    Ok(())
}

pub fn write_pose_frames<W: Write>(wtr: &mut W, frames: &[PoseFrame<f64>]) -> Result<()> {
    for frame in frames.iter() {
        write_pose_frame(wtr, frame)?;
    }
    Ok(())
}

pub fn write_observation_frame<W: Write>(
    wtr: &mut W,
    observations: &[Observation2D<f64>],
) -> Result<()> {
    for obs in observations.iter() {
        match obs.pixel() {
            Some(px) => write!(wtr, "{} {} ", TextFloat(px.x), TextFloat(px.y))?,
            None => write!(wtr, "{m} {m} ", m = TextFloat(MISSING_VALUE))?,
        }
    }
    writeln!(wtr)?;
    Ok(())
}

pub fn write_observation_frames<W: Write>(
    wtr: &mut W,
    frames: &[Vec<Observation2D<f64>>],
) -> Result<()> {
    for frame in frames.iter() {
        write_observation_frame(wtr, frame)?;
    }
    Ok(())
}

/// Create `path` and write all `frames` into it.
pub fn write_pose_frames_path<P: AsRef<Path>>(path: P, frames: &[PoseFrame<f64>]) -> Result<()> {
    let path = path.as_ref();
    let file_err = |source: std::io::Error| LandmarkMvgError::FileIo {
        file: path.display().to_string(),
        source,
    };
    let fd = std::fs::File::create(path).map_err(file_err)?;
    let mut wtr = std::io::BufWriter::new(fd);
    write_pose_frames(&mut wtr, frames).map_err(|e| match e {
        LandmarkMvgError::Io { source } => file_err(source),
        other => other,
    })?;
    wtr.flush().map_err(file_err)?;
    Ok(())
}

fn parse_line(
    file: &str,
    line_no: usize,
    arity: usize,
    n_landmarks: usize,
    line: &str,
) -> Result<Vec<f64>> {
    let values = parse_floats(file, line_no, FIELD, line)?;
    if values.len() != arity * n_landmarks {
        return Err(LandmarkMvgError::WrongRowLength {
            file: file.to_string(),
            line: line_no,
            field: FIELD,
            expected: arity * n_landmarks,
            found: values.len(),
        });
    }
    Ok(values)
}

fn parse_observation_line(
    file: &str,
    line_no: usize,
    n_landmarks: usize,
    line: &str,
) -> Result<Vec<Observation2D<f64>>> {
    let values = parse_line(file, line_no, 2, n_landmarks, line)?;
    Ok(values
        .chunks_exact(2)
        .map(|xy| {
            if xy[0] == MISSING_VALUE && xy[1] == MISSING_VALUE {
                Observation2D::NotObserved
            } else {
                Observation2D::new(xy[0], xy[1])
            }
        })
        .collect())
}

/// Read a whole 3D keypoint file.
pub fn read_pose_frames<Rd: BufRead>(
    rdr: Rd,
    n_landmarks: usize,
    file: &str,
) -> Result<Vec<PoseFrame<f64>>> {
    let mut lines = rdr
        .lines()
        .collect::<std::io::Result<Vec<String>>>()
        .map_err(|source| LandmarkMvgError::FileIo {
            file: file.to_string(),
            source,
        })?;
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    let mut frames = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let values = parse_line(file, idx + 1, 3, n_landmarks, line)?;
        let points = values
            .chunks_exact(3)
            .map(|xyz| {
                if xyz.iter().all(|v| *v == MISSING_VALUE) {
                    Point3D::Unresolved(UnresolvedReason::NotRecorded)
                } else {
                    Point3D::Resolved(Point3::new(xyz[0], xyz[1], xyz[2]))
                }
            })
            .collect();
        frames.push(PoseFrame::new(points));
    }
    Ok(frames)
}

pub fn read_pose_frames_path<P: AsRef<Path>>(
    path: P,
    n_landmarks: usize,
) -> Result<Vec<PoseFrame<f64>>> {
    let path = path.as_ref();
    let file = path.display().to_string();
    let fd = std::fs::File::open(path).map_err(|source| LandmarkMvgError::FileIo {
        file: file.clone(),
        source,
    })?;
    read_pose_frames(BufReader::new(fd), n_landmarks, &file)
}

/// Streams one camera's 2D keypoint file, one frame per item.
///
/// Nothing is read ahead, so a malformed line is reported when its frame is
/// reached.
pub struct ObservationReader<Rd> {
    lines: std::io::Lines<Rd>,
    n_landmarks: usize,
    file: String,
    line_no: usize,
    /// A non-blank line read while looking past blank ones.
    pending: Option<(usize, String)>,
}

impl<Rd: BufRead> ObservationReader<Rd> {
    pub fn new(rdr: Rd, n_landmarks: usize, file: impl Into<String>) -> Self {
        Self {
            lines: rdr.lines(),
            n_landmarks,
            file: file.into(),
            line_no: 0,
            pending: None,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }
}

impl ObservationReader<BufReader<std::fs::File>> {
    pub fn from_path<P: AsRef<Path>>(path: P, n_landmarks: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let fd = std::fs::File::open(path).map_err(|source| LandmarkMvgError::FileIo {
            file: file.clone(),
            source,
        })?;
        Ok(Self::new(BufReader::new(fd), n_landmarks, file))
    }
}

impl<Rd: BufRead> Iterator for ObservationReader<Rd> {
    type Item = Result<Vec<Observation2D<f64>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((line_no, line)) = self.pending.take() {
            return Some(parse_observation_line(
                &self.file,
                line_no,
                self.n_landmarks,
                &line,
            ));
        }
        let mut first_blank = None;
        loop {
            let line = match self.lines.next() {
                // end of file, trailing blank lines included
                None => return None,
                Some(Ok(line)) => line,
                Some(Err(source)) => {
                    return Some(Err(LandmarkMvgError::FileIo {
                        file: self.file.clone(),
                        source,
                    }))
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                first_blank.get_or_insert(self.line_no);
                continue;
            }
            return Some(match first_blank {
                Some(blank_no) => {
                    self.pending = Some((self.line_no, line));
                    parse_observation_line(&self.file, blank_no, self.n_landmarks, "")
                }
                None => parse_observation_line(&self.file, self.line_no, self.n_landmarks, &line),
            });
        }
    }
}
