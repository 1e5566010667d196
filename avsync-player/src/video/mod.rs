//! Video path: lookahead queue, frame selection and painting

pub mod renderer;

pub use renderer::{VideoBufferSettings, VideoRenderer, VideoRendererStats};

/// Receives the frame chosen for each render tick
pub trait FramePainter<F>: Send {
    fn paint(&mut self, frame: &F);
}

impl<F, P> FramePainter<F> for P
where
    P: FnMut(&F) + Send,
{
    fn paint(&mut self, frame: &F) {
        self(frame)
    }
}
