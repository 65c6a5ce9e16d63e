//! Real-time audio output using cpal
//! Works with JACK, ALSA, OpenSL ES (Android/Termux), etc.

use crate::engine::Engine;
use crate::error::EngineError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Owns the output stream and pumps the shared engine block by block.
///
/// The engine must be built at the device's sample rate; probe it with
/// [`AudioOutput::probe_sample_rate`] first. Control edits go through the
/// same `Arc<Mutex<Engine>>` between callbacks.
pub struct AudioOutput {
    sample_rate: u32,
    _stream: cpal::Stream,
}

impl AudioOutput {
    /// Default output device's sample rate, for building the engine.
    pub fn probe_sample_rate() -> Result<u32, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::NoAudioDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::AudioBackend(e.to_string()))?;
        Ok(config.sample_rate().0)
    }

    pub fn start(engine: Arc<Mutex<Engine>>) -> Result<Self, EngineError> {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or(EngineError::NoAudioDevice)?;
        info!(
            "Audio device: {}",
            device
                .name()
                .map_err(|e| EngineError::AudioBackend(e.to_string()))?
        );

        let config = device
            .default_output_config()
            .map_err(|e| EngineError::AudioBackend(e.to_string()))?;
        info!("Audio config: {:?}", config);

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), engine, channels)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), engine, channels)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), engine, channels)
            }
            other => {
                return Err(EngineError::AudioBackend(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| EngineError::AudioBackend(e.to_string()))?;
        info!("Audio stream started at {} Hz", sample_rate);

        Ok(Self {
            sample_rate,
            _stream: stream,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        engine: Arc<Mutex<Engine>>,
        channels: usize,
    ) -> Result<cpal::Stream, EngineError>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        // Device callbacks rarely align with the engine block size, so
        // rendered frames queue up between callbacks.
        let mut carry: VecDeque<(f32, f32)> = VecDeque::new();
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    if let Ok(mut engine) = engine.lock() {
                        while carry.len() < frames {
                            if let Err(e) = engine.render_block() {
                                error!("Render error: {}", e);
                                break;
                            }
                            let left = engine.master_left();
                            let right = engine.master_right();
                            for i in 0..left.len() {
                                carry.push_back((left[i], right[i]));
                            }
                        }
                    }
                    for frame in data.chunks_mut(channels) {
                        let (l, r) = carry.pop_front().unwrap_or((0.0, 0.0));
                        frame[0] = T::from_sample(l);
                        if channels > 1 {
                            frame[1] = T::from_sample(r);
                        }
                        for sample in frame.iter_mut().skip(2) {
                            *sample = T::from_sample(0.0);
                        }
                    }
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| EngineError::AudioBackend(e.to_string()))?;

        Ok(stream)
    }
}
