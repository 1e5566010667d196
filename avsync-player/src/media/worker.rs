//! Ordered background decode task
//!
//! Every concrete decoder runs its codec through one of these:
//!
//! - Chunks are queued on an unbounded channel and decoded one at a time, so
//!   outputs leave in submission order
//! - `queue_size` counts chunks submitted but not yet decoded. Renderers do
//!   their own in-flight accounting on top, since decoded units can still be
//!   sitting in the sink channel.
//! - The first decode error is forwarded to the sink and ends the worker.
//!   Later submits fail; the renderer picks the real error up from the sink.

use super::{DecoderSink, EncodedChunk};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Handle to a running decode task
pub struct DecodeWorker {
    name: &'static str,
    jobs: Option<mpsc::UnboundedSender<EncodedChunk>>,
    queue_size: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    /// Spawn a worker on the current tokio runtime
    ///
    /// # Arguments
    /// * `name` - Codec name for log messages
    /// * `sink` - Where outputs and errors are delivered
    /// * `decode_fn` - Decodes one chunk into zero or more units
    pub fn spawn<T, F>(name: &'static str, sink: DecoderSink<T>, mut decode_fn: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(EncodedChunk) -> Result<Vec<T>> + Send + 'static,
    {
        let (jobs, mut rx) = mpsc::unbounded_channel::<EncodedChunk>();
        let queue_size = Arc::new(AtomicUsize::new(0));
        let pending = Arc::clone(&queue_size);

        let handle = tokio::spawn(async move {
            debug!("{} decode worker started", name);
            while let Some(chunk) = rx.recv().await {
                let timestamp_us = chunk.timestamp_us;
                let result = decode_fn(chunk);
                pending.fetch_sub(1, Ordering::AcqRel);

                match result {
                    Ok(units) => {
                        trace!("{} decoded chunk @{}us into {} unit(s)", name, timestamp_us, units.len());
                        for unit in units {
                            if !sink.output(unit) {
                                debug!("{} decode worker: receiver gone, stopping", name);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("{} decode failed @{}us: {}", name, timestamp_us, e);
                        sink.error(e);
                        return;
                    }
                }

                // Let the renderer handle what was just delivered
                tokio::task::yield_now().await;
            }
            debug!("{} decode worker stopped", name);
        });

        Self {
            name,
            jobs: Some(jobs),
            queue_size,
            handle: Some(handle),
        }
    }

    /// Queue a chunk for decoding
    pub fn submit(&self, chunk: EncodedChunk) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("{} decoder is closed", self.name)))?;

        self.queue_size.fetch_add(1, Ordering::AcqRel);
        if jobs.send(chunk).is_err() {
            self.queue_size.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::InvalidState(format!(
                "{} decode worker has stopped",
                self.name
            )));
        }
        Ok(())
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::Acquire)
    }

    /// Stop the worker, dropping queued chunks
    pub fn close(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("{} decode worker closed", self.name);
        }
        self.queue_size.store(0, Ordering::Release);
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.close();
    }
}
