//! Audio device output using cpal
//!
//! The cpal stream is not `Send` on every platform, so it lives on its own
//! thread for its whole life. `start` waits until that thread has either
//! started the stream or failed, and `stop` tells it to drop the stream.
//!
//! Output latency is measured on every callback as the gap between the
//! callback instant and the instant its first sample will be played.

use super::output::{AudioBackend, OutputPump};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// cpal-backed output on the default host
pub struct DeviceOutput {
    device_name: Option<String>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceOutput {
    /// Output on the named device, or the default device when `None`
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stop_tx: None,
            thread: None,
        }
    }

    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

fn open_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Using requested audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

/// f32 config matching the stream's rate and channel count exactly
fn matching_config(device: &Device, sample_rate: u32, channels: u16) -> Result<StreamConfig> {
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

    supported
        .find(|config| {
            config.channels() == channels
                && config.min_sample_rate().0 <= sample_rate
                && config.max_sample_rate().0 >= sample_rate
                && config.sample_format() == SampleFormat::F32
        })
        .map(|config| config.with_sample_rate(cpal::SampleRate(sample_rate)).config())
        .ok_or_else(|| {
            Error::AudioOutput(format!(
                "device has no f32 output at {} Hz x{}",
                sample_rate, channels
            ))
        })
}

fn run_stream(
    device_name: Option<String>,
    mut pump: OutputPump,
    ready_tx: mpsc::Sender<Result<()>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let started = (|| -> Result<cpal::Stream> {
        let device = open_device(device_name.as_deref())?;
        let config = matching_config(&device, pump.clock().sample_rate(), pump.channels())?;
        debug!(
            "Audio config: sample_rate={}, channels={}, buffer_size={:?}",
            config.sample_rate.0, config.channels, config.buffer_size
        );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                    let timestamp = info.timestamp();
                    if let Some(latency) = timestamp.playback.duration_since(&timestamp.callback) {
                        pump.clock().set_output_latency(latency);
                    }
                    pump.render(data);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        Ok(stream)
    })();

    match started {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            // Blocks until stop() sends or drops the sender
            let _ = stop_rx.recv();
            drop(stream);
            debug!("Audio device stream closed");
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

impl AudioBackend for DeviceOutput {
    fn name(&self) -> &str {
        "device"
    }

    fn start(&mut self, pump: OutputPump) -> Result<()> {
        if self.thread.is_some() {
            return Err(Error::AudioOutput("device output already started".to_string()));
        }

        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let device_name = self.device_name.clone();
        let thread = std::thread::Builder::new()
            .name("avsync-device-output".to_string())
            .spawn(move || run_stream(device_name, pump, ready_tx, stop_rx))
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio stream started successfully");
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::AudioOutput(
                    "output thread exited before starting".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Device output thread panicked");
            }
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
