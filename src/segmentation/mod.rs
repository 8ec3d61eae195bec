//! Optional label-volume correspondence.
//!
//! A [`LabelVolume`] is the stack of per-frame label images that accompanies
//! a tracking graph. Nodes reference regions through their `seg_id`
//! attribute; painting or erasing a region triggers recomputation of the
//! node's derived attributes (centroid position, area), never an independent
//! reposition.

use crate::graph::{Position, TimePoint};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegError {
    #[error("time {0} is outside the volume")]
    TimeOutOfRange(TimePoint),
    #[error("pixel index {index} is outside the frame (size {size})")]
    PixelOutOfRange { index: usize, size: usize },
}

/// A set of pixels within one frame, addressed by flat row-major indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegMask {
    pub time: TimePoint,
    pub indices: Vec<usize>,
}

impl SegMask {
    pub fn new(time: TimePoint, indices: Vec<usize>) -> Self {
        Self { time, indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// A label image per time frame, ([z,] y, x) axis order, flat row-major
/// storage. Label 0 is background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelVolume {
    frame_shape: SmallVec<[usize; 3]>,
    frames: Vec<Vec<u64>>,
}

impl LabelVolume {
    /// An all-background volume of `num_frames` frames.
    pub fn new(num_frames: usize, frame_shape: &[usize]) -> Self {
        let size: usize = frame_shape.iter().product();
        Self {
            frame_shape: SmallVec::from_slice(frame_shape),
            frames: vec![vec![0; size]; num_frames],
        }
    }

    /// Number of spatial dimensions (2 or 3).
    pub fn ndim(&self) -> usize {
        self.frame_shape.len()
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_shape(&self) -> &[usize] {
        &self.frame_shape
    }

    pub fn frame(&self, time: TimePoint) -> Result<&[u64], SegError> {
        self.frames
            .get(time as usize)
            .map(Vec::as_slice)
            .ok_or(SegError::TimeOutOfRange(time))
    }

    /// Sets every pixel of `mask` to `label` (0 erases).
    pub fn set_pixels(&mut self, mask: &SegMask, label: u64) -> Result<(), SegError> {
        let frame = self
            .frames
            .get_mut(mask.time as usize)
            .ok_or(SegError::TimeOutOfRange(mask.time))?;
        let size = frame.len();
        // Validate before writing so a bad mask never half-applies.
        for &index in &mask.indices {
            if index >= size {
                return Err(SegError::PixelOutOfRange { index, size });
            }
        }
        for &index in &mask.indices {
            frame[index] = label;
        }
        Ok(())
    }

    /// All pixels carrying `label` at `time`.
    pub fn mask_of(&self, time: TimePoint, label: u64) -> Result<SegMask, SegError> {
        let frame = self.frame(time)?;
        let indices = frame
            .iter()
            .enumerate()
            .filter(|(_, &value)| value == label)
            .map(|(index, _)| index)
            .collect();
        Ok(SegMask::new(time, indices))
    }

    /// Replaces every `old` pixel in the frame at `time` with `new`.
    pub fn relabel(&mut self, time: TimePoint, old: u64, new: u64) -> Result<(), SegError> {
        let frame = self
            .frames
            .get_mut(time as usize)
            .ok_or(SegError::TimeOutOfRange(time))?;
        for value in frame.iter_mut() {
            if *value == old {
                *value = new;
            }
        }
        Ok(())
    }

    /// Mean pixel coordinate of the mask, in ([z,] y, x) order.
    pub fn centroid(&self, mask: &SegMask) -> Position {
        let ndim = self.ndim();
        let mut sums: SmallVec<[f64; 3]> = SmallVec::from_elem(0.0, ndim);
        for &index in &mask.indices {
            let mut rem = index;
            // Unravel the flat index, last axis fastest.
            for axis in (0..ndim).rev() {
                let extent = self.frame_shape[axis];
                sums[axis] += (rem % extent) as f64;
                rem /= extent;
            }
        }
        let count = mask.len().max(1) as f64;
        sums.iter().map(|sum| sum / count).collect()
    }

    /// Pixel count of the mask (area in 2D, volume in 3D).
    pub fn area(mask: &SegMask) -> f64 {
        mask.len() as f64
    }
}
