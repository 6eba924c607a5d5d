//! Per-camera calibration parameter files.
//!
//! Intrinsics, `cam_{i}_intrinsics.dat`:
//!
//! ```text
//! intrinsic:
//! 1000.0 0.0 320.0
//! 0.0 1000.0 240.0
//! 0.0 0.0 1.0
//! distortion:
//! -0.1 0.01 0.0 0.0 0.0
//! ```
//!
//! Extrinsics relative to camera 0, `cam_{i}_extrinsics.dat`:
//!
//! ```text
//! R:
//! 1.0 0.0 0.0
//! 0.0 1.0 0.0
//! 0.0 0.0 1.0
//! T:
//! -1.0
//! 0.0
//! 0.0
//! ```
//!
//! Values are whitespace separated. The writers follow every value with a
//! single space and end every row with a newline. Each value is written in
//! its shortest exact form, switching to exponent notation below `1e-4` and
//! from `1e16` with a signed, at least two digit exponent (`1e-05`,
//! `2.5e+16`). The readers are strict:
//! a missing or short row, an unparsable value or trailing content is an
//! error naming the file, the line and the field.
use std::io::Write;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use tracing::{debug, warn};

use crate::{
    CameraCalibration, CameraExtrinsics, CameraIntrinsics, CameraRig, LandmarkMvgError, Result,
};

pub const INTRINSIC_MARKER: &str = "intrinsic:";
pub const DISTORTION_MARKER: &str = "distortion:";
pub const ROTATION_MARKER: &str = "R:";
pub const TRANSLATION_MARKER: &str = "T:";

const MARKERS: [&str; 4] = [
    INTRINSIC_MARKER,
    DISTORTION_MARKER,
    ROTATION_MARKER,
    TRANSLATION_MARKER,
];

pub fn intrinsics_file_name(cam_idx: usize) -> String {
    format!("cam_{cam_idx}_intrinsics.dat")
}

pub fn extrinsics_file_name(cam_idx: usize) -> String {
    format!("cam_{cam_idx}_extrinsics.dat")
}

/// Parse whitespace separated floats from one line.
pub(crate) fn parse_floats(
    file: &str,
    line_no: usize,
    field: &'static str,
    text: &str,
) -> Result<Vec<f64>> {
    text.split_ascii_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| LandmarkMvgError::InvalidFloat {
                    file: file.to_string(),
                    line: line_no,
                    field,
                    token: token.to_string(),
                })
        })
        .collect()
}

fn is_marker(line: &str) -> bool {
    MARKERS.contains(&line.trim())
}

/// Walks the lines of one parameter file. Line numbers are 1-based.
struct LineCursor<'a> {
    file: &'a str,
    lines: std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>,
}

impl<'a> LineCursor<'a> {
    fn new(buf: &'a str, file: &'a str) -> Self {
        Self {
            file,
            lines: buf.lines().enumerate().peekable(),
        }
    }

    fn skip_blank(&mut self) {
        while let Some((_, line)) = self.lines.peek() {
            if !line.trim().is_empty() {
                break;
            }
            self.lines.next();
        }
    }

    fn expect_marker(&mut self, marker: &'static str) -> Result<()> {
        self.skip_blank();
        match self.lines.next() {
            Some((_, line)) if line.trim() == marker => Ok(()),
            Some((idx, line)) => Err(LandmarkMvgError::MissingMarker {
                file: self.file.to_string(),
                line: idx + 1,
                expected: marker,
                found: line.trim().to_string(),
            }),
            None => Err(LandmarkMvgError::MissingMarker {
                file: self.file.to_string(),
                line: 0,
                expected: marker,
                found: "end of file".to_string(),
            }),
        }
    }

    /// Read `n_rows` rows of exactly `n_cols` values each.
    ///
    /// A marker, a blank line or the end of file before all rows are read
    /// means rows are missing.
    fn matrix_rows(
        &mut self,
        field: &'static str,
        n_rows: usize,
        n_cols: usize,
    ) -> Result<Vec<Vec<f64>>> {
        let mut rows = Vec::with_capacity(n_rows);
        while rows.len() < n_rows {
            let (idx, line) = match self.lines.peek() {
                Some(&(idx, line)) if !line.trim().is_empty() && !is_marker(line) => (idx, line),
                _ => {
                    return Err(LandmarkMvgError::MissingRows {
                        file: self.file.to_string(),
                        field,
                        expected: n_rows,
                        found: rows.len(),
                    })
                }
            };
            self.lines.next();
            let row = parse_floats(self.file, idx + 1, field, line)?;
            if row.len() != n_cols {
                return Err(LandmarkMvgError::WrongRowLength {
                    file: self.file.to_string(),
                    line: idx + 1,
                    field,
                    expected: n_cols,
                    found: row.len(),
                });
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Read one row of any length. A blank line is an empty row.
    fn free_row(&mut self, field: &'static str) -> Result<Vec<f64>> {
        match self.lines.peek() {
            Some(&(idx, line)) if !is_marker(line) => {
                self.lines.next();
                parse_floats(self.file, idx + 1, field, line)
            }
            _ => Err(LandmarkMvgError::MissingRows {
                file: self.file.to_string(),
                field,
                expected: 1,
                found: 0,
            }),
        }
    }

    fn finish(mut self) -> Result<()> {
        self.skip_blank();
        match self.lines.next() {
            None => Ok(()),
            Some((idx, _)) => Err(LandmarkMvgError::TrailingContent {
                file: self.file.to_string(),
                line: idx + 1,
            }),
        }
    }
}

fn matrix3_from_rows(rows: &[Vec<f64>]) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| rows[r][c])
}

/// Parse the contents of an intrinsics file. `file` is used in errors.
pub fn parse_intrinsics(buf: &str, file: &str) -> Result<CameraIntrinsics<f64>> {
    let mut cursor = LineCursor::new(buf, file);
    cursor.expect_marker(INTRINSIC_MARKER)?;
    let k = matrix3_from_rows(&cursor.matrix_rows("intrinsic", 3, 3)?);
    cursor.expect_marker(DISTORTION_MARKER)?;
    let distortion = cursor.free_row("distortion")?;
    cursor.finish()?;
    Ok(CameraIntrinsics::new(k, distortion))
}

/// Parse the contents of an extrinsics file. `file` is used in errors.
pub fn parse_extrinsics(buf: &str, file: &str) -> Result<CameraExtrinsics<f64>> {
    let mut cursor = LineCursor::new(buf, file);
    cursor.expect_marker(ROTATION_MARKER)?;
    let rotation = matrix3_from_rows(&cursor.matrix_rows("R", 3, 3)?);
    cursor.expect_marker(TRANSLATION_MARKER)?;
    let t = cursor.matrix_rows("T", 3, 1)?;
    cursor.finish()?;
    Ok(CameraExtrinsics::new(
        rotation,
        Vector3::new(t[0][0], t[1][0], t[2][0]),
    ))
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| LandmarkMvgError::FileIo {
        file: path.display().to_string(),
        source,
    })
}

pub fn read_intrinsics<P: AsRef<Path>>(path: P) -> Result<CameraIntrinsics<f64>> {
    let path = path.as_ref();
    parse_intrinsics(&read_to_string(path)?, &path.display().to_string())
}

pub fn read_extrinsics<P: AsRef<Path>>(path: P) -> Result<CameraExtrinsics<f64>> {
    let path = path.as_ref();
    parse_extrinsics(&read_to_string(path)?, &path.display().to_string())
}

/// Text form of a value in parameter and keypoint files.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TextFloat(pub(crate) f64);

impl std::fmt::Display for TextFloat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_nan() {
            return f.write_str("nan");
        }
        let shortest = format!("{:?}", self.0);
        match shortest.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exp),
                };
                write!(f, "{mantissa}e{sign}{digits:0>2}")
            }
            None => f.write_str(&shortest),
        }
    }
}

fn write_row<W: Write>(wtr: &mut W, values: impl IntoIterator<Item = f64>) -> Result<()> {
    for v in values {
        write!(wtr, "{} ", TextFloat(v))?;
    }
    writeln!(wtr)?;
    Ok(())
}

pub fn write_intrinsics<W: Write>(wtr: &mut W, intrinsics: &CameraIntrinsics<f64>) -> Result<()> {
    writeln!(wtr, "{INTRINSIC_MARKER}")?;
    for row in intrinsics.k().row_iter() {
        write_row(wtr, row.iter().copied())?;
    }
    writeln!(wtr, "{DISTORTION_MARKER}")?;
    write_row(wtr, intrinsics.distortion().iter().copied())?;
    Ok(())
}

pub fn write_extrinsics<W: Write>(wtr: &mut W, extrinsics: &CameraExtrinsics<f64>) -> Result<()> {
    writeln!(wtr, "{ROTATION_MARKER}")?;
    for row in extrinsics.rotation().row_iter() {
        write_row(wtr, row.iter().copied())?;
    }
    writeln!(wtr, "{TRANSLATION_MARKER}")?;
    for v in extrinsics.translation().iter() {
        write_row(wtr, [*v])?;
    }
    Ok(())
}

fn write_file<F>(path: &Path, f: F) -> Result<()>
where
    F: FnOnce(&mut std::io::BufWriter<std::fs::File>) -> Result<()>,
{
    let file_err = |source: std::io::Error| LandmarkMvgError::FileIo {
        file: path.display().to_string(),
        source,
    };
    let fd = std::fs::File::create(path).map_err(file_err)?;
    let mut wtr = std::io::BufWriter::new(fd);
    f(&mut wtr).map_err(|e| match e {
        LandmarkMvgError::Io { source } => file_err(source),
        other => other,
    })?;
    wtr.flush().map_err(file_err)?;
    Ok(())
}

pub fn write_intrinsics_path<P: AsRef<Path>>(
    path: P,
    intrinsics: &CameraIntrinsics<f64>,
) -> Result<()> {
    write_file(path.as_ref(), |wtr| write_intrinsics(wtr, intrinsics))
}

pub fn write_extrinsics_path<P: AsRef<Path>>(
    path: P,
    extrinsics: &CameraExtrinsics<f64>,
) -> Result<()> {
    write_file(path.as_ref(), |wtr| write_extrinsics(wtr, extrinsics))
}

/// Load a calibrated rig from a parameter folder.
///
/// Every camera needs an intrinsics file and every camera other than 0 an
/// extrinsics file relative to camera 0. Camera 0 always gets the identity
/// pose; a non-identity `cam_0_extrinsics.dat` is ignored with a warning.
pub fn read_parameter_folder<P: AsRef<Path>>(dir: P, num_cams: usize) -> Result<CameraRig<f64>> {
    let dir = dir.as_ref();
    if num_cams == 0 {
        return Err(LandmarkMvgError::NoCameras);
    }

    let reference = read_intrinsics(dir.join(intrinsics_file_name(0)))?;
    let reference_extrinsics_path = dir.join(extrinsics_file_name(0));
    if reference_extrinsics_path.exists() {
        let ext = read_extrinsics(&reference_extrinsics_path)?;
        if !ext.is_identity(1e-9) {
            warn!(
                "{} is not the identity pose; camera 0 is the reference and its extrinsics are ignored",
                reference_extrinsics_path.display()
            );
        }
    }

    let mut others = Vec::with_capacity(num_cams - 1);
    for cam_idx in 1..num_cams {
        let intrinsics = read_intrinsics(dir.join(intrinsics_file_name(cam_idx)))?;
        let extrinsics = read_extrinsics(dir.join(extrinsics_file_name(cam_idx)))?;
        others.push(CameraCalibration::new(intrinsics, extrinsics));
    }
    debug!("loaded {num_cams} camera calibrations from {}", dir.display());
    Ok(CameraRig::compose(reference, others))
}

/// Write every camera of `rig` into `dir`, including camera 0's identity
/// extrinsics.
pub fn write_parameter_folder<P: AsRef<Path>>(dir: P, rig: &CameraRig<f64>) -> Result<()> {
    let dir = dir.as_ref();
    for (cam_idx, cal) in rig.calibrations().iter().enumerate() {
        write_intrinsics_path(dir.join(intrinsics_file_name(cam_idx)), &cal.intrinsics)?;
        write_extrinsics_path(dir.join(extrinsics_file_name(cam_idx)), &cal.extrinsics)?;
    }
    Ok(())
}
