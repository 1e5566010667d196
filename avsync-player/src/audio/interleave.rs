//! Planar → interleaved conversion scratch

use crate::error::Result;
use crate::media::AudioData;
use tracing::trace;

/// Per-channel scratch planes sized to one decoded unit
///
/// Planes are reallocated only when the channel count or frame length changes.
#[derive(Debug, Default)]
pub struct InterleaveScratch {
    planes: Vec<Vec<f32>>,
    frames: usize,
}

impl InterleaveScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize for `channels` × `frames`; returns true if storage was reallocated
    pub fn prepare(&mut self, channels: usize, frames: usize) -> bool {
        if self.planes.len() == channels && self.frames == frames {
            return false;
        }
        trace!("Reallocating interleave scratch: {} channels x {} frames", channels, frames);
        self.planes = vec![vec![0.0; frames]; channels];
        self.frames = frames;
        true
    }

    /// Copy every channel plane of `unit` into scratch
    pub fn load<A: AudioData>(&mut self, unit: &A) -> Result<()> {
        self.prepare(unit.number_of_channels() as usize, unit.number_of_frames());
        for (channel, plane) in self.planes.iter_mut().enumerate() {
            unit.copy_plane_to(channel, plane)?;
        }
        Ok(())
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Total interleaved samples held
    pub fn interleaved_len(&self) -> usize {
        self.planes.len() * self.frames
    }

    /// Interleave into two consecutive spans (ring buffer before/after wrap)
    ///
    /// Fills `first` then `second`; stops early if the spans are shorter than
    /// `interleaved_len()`.
    pub fn write_interleaved(&self, first: &mut [f32], second: &mut [f32]) {
        let channels = self.planes.len();
        if channels == 0 {
            return;
        }
        for (k, slot) in first
            .iter_mut()
            .chain(second.iter_mut())
            .take(self.interleaved_len())
            .enumerate()
        {
            *slot = self.planes[k % channels][k / channels];
        }
    }
}
