//! Frame-by-frame triangulation of a fixed landmark set.
//!
//! [`PoseSequenceAggregator`] pulls one synchronized batch of per-camera
//! observations at a time from a [`FrameSource`], triangulates each landmark
//! independently and appends one [`PoseFrame`] per batch. Frames are
//! processed strictly in arrival order. The loop ends when the source is
//! exhausted, when cameras fall out of step, or when a [`CancelToken`] is
//! triggered between frames.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::RealField;
use opencv_ros_camera::RosOpenCvIntrinsics;
use tracing::{debug, info, trace, warn, Level};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{
    mean_reprojection_distance, undistort_pixel, CameraRig, LandmarkIndex, LandmarkMvgError,
    Observation2D, Point3D, PoseFrame, ProjectionMatrix, Result, Triangulator,
};

/// MediaPipe body landmarks for the shoulders, arms, hips and legs.
pub const MEDIAPIPE_BODY_12: [u32; 12] = [16, 14, 12, 11, 13, 15, 24, 23, 25, 26, 27, 28];

/// The ordered detector ids of the K tracked landmarks.
///
/// Position in this list is the [`LandmarkIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct LandmarkSet {
    ids: Vec<u32>,
}

impl LandmarkSet {
    pub fn new(ids: Vec<u32>) -> Result<Self> {
        if ids.is_empty() {
            return Err(LandmarkMvgError::InvalidLandmarkSet(
                "no landmarks given".into(),
            ));
        }
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(LandmarkMvgError::InvalidLandmarkSet(format!(
                    "detector id {id} listed more than once"
                )));
            }
        }
        Ok(Self { ids })
    }

    pub fn mediapipe_body_12() -> Self {
        Self {
            ids: MEDIAPIPE_BODY_12.to_vec(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false for a validated set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn id(&self, idx: LandmarkIndex) -> Option<u32> {
        self.ids.get(idx).copied()
    }

    pub fn index_of(&self, id: u32) -> Option<LandmarkIndex> {
        self.ids.iter().position(|x| *x == id)
    }
}

impl Default for LandmarkSet {
    fn default() -> Self {
        Self::mediapipe_body_12()
    }
}

/// Cooperative cancellation flag, checked between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observations for one time step, indexed `[camera][landmark]`.
pub type ObservationBatch<R> = Vec<Vec<Observation2D<R>>>;

/// Why a frame source stopped producing batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Every camera ran out at the same time.
    Exhausted,
    /// Only some cameras ran out.
    Desynchronized { exhausted_cameras: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pull<R: RealField + Copy> {
    Batch(ObservationBatch<R>),
    End(StreamEnd),
}

/// Produces synchronized observation batches, one per call.
///
/// Blocking, if any, happens inside `pull`.
pub trait FrameSource<R: RealField + Copy> {
    fn pull(&mut self) -> Result<Pull<R>>;
}

impl<R, S> FrameSource<R> for &mut S
where
    R: RealField + Copy,
    S: FrameSource<R> + ?Sized,
{
    fn pull(&mut self) -> Result<Pull<R>> {
        (**self).pull()
    }
}

/// A [`FrameSource`] over an iterator of ready-made batches.
#[derive(Debug, Clone)]
pub struct FromBatches<I> {
    inner: I,
}

pub fn from_batches<I: IntoIterator>(batches: I) -> FromBatches<I::IntoIter> {
    FromBatches {
        inner: batches.into_iter(),
    }
}

impl<R, I> FrameSource<R> for FromBatches<I>
where
    R: RealField + Copy,
    I: Iterator<Item = Result<ObservationBatch<R>>>,
{
    fn pull(&mut self) -> Result<Pull<R>> {
        match self.inner.next() {
            Some(batch) => Ok(Pull::Batch(batch?)),
            None => Ok(Pull::End(StreamEnd::Exhausted)),
        }
    }
}

/// Zips independent per-camera streams into synchronized batches.
///
/// Stream `i` belongs to camera `i`. Each stream yields one landmark list per
/// frame.
#[derive(Debug)]
pub struct SynchronizedStreams<S> {
    streams: Vec<S>,
}

impl<S> SynchronizedStreams<S> {
    pub fn new(streams: Vec<S>) -> Self {
        Self { streams }
    }

    pub fn num_cameras(&self) -> usize {
        self.streams.len()
    }
}

impl<R, S> FrameSource<R> for SynchronizedStreams<S>
where
    R: RealField + Copy,
    S: Iterator<Item = Result<Vec<Observation2D<R>>>>,
{
    fn pull(&mut self) -> Result<Pull<R>> {
        if self.streams.is_empty() {
            return Ok(Pull::End(StreamEnd::Exhausted));
        }
        let mut batch = Vec::with_capacity(self.streams.len());
        let mut exhausted_cameras = Vec::new();
        for (cam_idx, stream) in self.streams.iter_mut().enumerate() {
            match stream.next() {
                Some(observations) => batch.push(observations?),
                None => exhausted_cameras.push(cam_idx),
            }
        }
        if exhausted_cameras.is_empty() {
            Ok(Pull::Batch(batch))
        } else if exhausted_cameras.len() == self.streams.len() {
            Ok(Pull::End(StreamEnd::Exhausted))
        } else {
            Ok(Pull::End(StreamEnd::Desynchronized { exhausted_cameras }))
        }
    }
}

/// How a run of the aggregator ended. None of these are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Termination {
    EndOfStream,
    /// Some cameras ran out before others. Frames up to that point are kept.
    Desynchronized { exhausted_cameras: Vec<usize> },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoseSequence<R: RealField + Copy> {
    pub frames: Vec<PoseFrame<R>>,
    pub termination: Termination,
}

/// Drives triangulation of every landmark in every frame.
///
/// The projection matrices are fixed at construction; their number is the
/// camera count N that every batch must match.
#[derive(Debug)]
pub struct PoseSequenceAggregator<R: RealField + Copy> {
    pmats: Vec<ProjectionMatrix<R>>,
    landmarks: LandmarkSet,
    triangulator: Triangulator<R>,
    undistorters: Option<Vec<RosOpenCvIntrinsics<R>>>,
    cancel: Option<CancelToken>,
    views: Vec<Observation2D<R>>,
}

impl<R: RealField + Copy> PoseSequenceAggregator<R> {
    pub fn new(pmats: Vec<ProjectionMatrix<R>>, landmarks: LandmarkSet) -> Result<Self> {
        if pmats.is_empty() {
            return Err(LandmarkMvgError::NoCameras);
        }
        let n_cams = pmats.len();
        Ok(Self {
            pmats,
            landmarks,
            triangulator: Triangulator::new(n_cams),
            undistorters: None,
            cancel: None,
            views: Vec::with_capacity(n_cams),
        })
    }

    pub fn from_rig(rig: &CameraRig<R>, landmarks: LandmarkSet) -> Result<Self> {
        Self::new(rig.projection_matrices().to_vec(), landmarks)
    }

    /// Occlusion policy: minimum number of observing cameras per landmark.
    pub fn with_min_views(mut self, min_views: usize) -> Result<Self> {
        self.triangulator = self.triangulator.with_min_views(min_views)?;
        Ok(self)
    }

    pub fn with_scale_epsilon(mut self, scale_epsilon: R) -> Self {
        self.triangulator = self.triangulator.with_scale_epsilon(scale_epsilon);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Undistort every observed pixel with its camera's model before
    /// triangulating. One model per camera, in camera order.
    pub fn with_undistortion(mut self, undistorters: Vec<RosOpenCvIntrinsics<R>>) -> Result<Self> {
        if undistorters.len() != self.pmats.len() {
            return Err(LandmarkMvgError::DimensionMismatch {
                what: "undistortion models",
                expected: self.pmats.len(),
                found: undistorters.len(),
            });
        }
        self.undistorters = Some(undistorters);
        Ok(self)
    }

    #[inline]
    pub fn num_cameras(&self) -> usize {
        self.pmats.len()
    }

    #[inline]
    pub fn num_landmarks(&self) -> usize {
        self.landmarks.len()
    }

    pub fn landmarks(&self) -> &LandmarkSet {
        &self.landmarks
    }

    pub fn projection_matrices(&self) -> &[ProjectionMatrix<R>] {
        &self.pmats
    }

    pub fn min_views(&self) -> usize {
        self.triangulator.min_views()
    }

    /// Triangulate all K landmarks of one batch.
    ///
    /// The batch must hold N camera lists of K observations each.
    pub fn triangulate_batch(&mut self, batch: &[Vec<Observation2D<R>>]) -> Result<PoseFrame<R>> {
        if batch.len() != self.pmats.len() {
            return Err(LandmarkMvgError::DimensionMismatch {
                what: "cameras in observation batch",
                expected: self.pmats.len(),
                found: batch.len(),
            });
        }
        let n_landmarks = self.landmarks.len();
        for cam_obs in batch.iter() {
            if cam_obs.len() != n_landmarks {
                return Err(LandmarkMvgError::DimensionMismatch {
                    what: "landmarks per camera",
                    expected: n_landmarks,
                    found: cam_obs.len(),
                });
            }
        }

        let want_reproj = tracing::enabled!(Level::DEBUG);
        let mut reproj_sum = R::zero();
        let mut reproj_count = 0usize;

        let mut points = Vec::with_capacity(n_landmarks);
        for lm_idx in 0..n_landmarks {
            self.views.clear();
            for (cam_idx, cam_obs) in batch.iter().enumerate() {
                let obs = match (&self.undistorters, &cam_obs[lm_idx]) {
                    (Some(undistorters), Observation2D::Observed(px)) => {
                        Observation2D::from(undistort_pixel(&undistorters[cam_idx], px))
                    }
                    (_, obs) => *obs,
                };
                self.views.push(obs);
            }

            let pt = self
                .triangulator
                .triangulate(self.pmats.iter().zip(self.views.iter()));
            match &pt {
                Point3D::Resolved(coords) => {
                    if want_reproj {
                        if let Some(d) = mean_reprojection_distance(
                            coords,
                            self.pmats.iter().zip(self.views.iter()),
                        ) {
                            reproj_sum += d;
                            reproj_count += 1;
                        }
                    }
                }
                Point3D::Unresolved(reason) => {
                    trace!(
                        landmark = lm_idx,
                        detector_id = self.landmarks.id(lm_idx),
                        "unresolved: {reason}"
                    );
                }
            }
            points.push(pt);
        }

        let frame = PoseFrame::new(points);
        if want_reproj {
            let n: R = nalgebra::convert(reproj_count as f64);
            let mean_reproj = (reproj_count > 0).then(|| reproj_sum / n);
            debug!(
                resolved = frame.num_resolved(),
                landmarks = n_landmarks,
                mean_reprojection = ?mean_reproj,
                "frame triangulated"
            );
        }
        Ok(frame)
    }

    /// Run until the source ends or the run is cancelled.
    pub fn run<S: FrameSource<R>>(&mut self, source: S) -> Result<PoseSequence<R>> {
        let mut frames = Vec::new();
        let termination = self.run_into(source, &mut frames)?;
        Ok(PoseSequence {
            frames,
            termination,
        })
    }

    /// Like [`run`](Self::run), but appends to `frames`.
    ///
    /// If the source or a batch fails, the error is returned and `frames`
    /// keeps every frame completed before the failure.
    pub fn run_into<S: FrameSource<R>>(
        &mut self,
        mut source: S,
        frames: &mut Vec<PoseFrame<R>>,
    ) -> Result<Termination> {
        let start = frames.len();
        loop {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    info!("cancelled after {} frames", frames.len() - start);
                    return Ok(Termination::Cancelled);
                }
            }
            match source.pull()? {
                Pull::Batch(batch) => {
                    let frame_idx = frames.len() - start;
                    let frame = {
                        let _span = tracing::debug_span!("frame", idx = frame_idx).entered();
                        self.triangulate_batch(&batch)?
                    };
                    frames.push(frame);
                }
                Pull::End(StreamEnd::Exhausted) => {
                    debug!("end of stream after {} frames", frames.len() - start);
                    return Ok(Termination::EndOfStream);
                }
                Pull::End(StreamEnd::Desynchronized { exhausted_cameras }) => {
                    warn!(
                        "camera(s) {exhausted_cameras:?} ran out of frames; \
                        stopping after {} synchronized frames",
                        frames.len() - start
                    );
                    return Ok(Termination::Desynchronized { exhausted_cameras });
                }
            }
        }
    }
}
