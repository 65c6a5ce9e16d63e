//! Modrack CLI - render a project (or the built-in demo patch) to WAV,
//! or play it live through the default audio device.

use clap::{Parser, Subcommand};
use modrack::audio::AudioOutput;
use modrack::engine::{Engine, EngineConfig};
use modrack::patch::{PatchSource, PatchTarget};
use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Parser)]
#[command(name = "render_demo")]
#[command(about = "Modrack modular synthesizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render to a stereo WAV file
    Render {
        /// Output WAV file path
        output: PathBuf,

        /// Project file to load (built-in demo patch when omitted)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Duration in seconds (default: 8.0)
        #[arg(short, long, default_value = "8.0")]
        duration: f32,

        /// Sample rate in Hz (default: 44100)
        #[arg(short, long, default_value = "44100")]
        sample_rate: u32,

        /// Master tempo in BPM
        #[arg(short, long)]
        bpm: Option<f64>,
    },

    /// Play live on the default audio device
    Play {
        /// Project file to load (built-in demo patch when omitted)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Seconds to keep playing (default: 30.0)
        #[arg(short, long, default_value = "30.0")]
        duration: f32,
    },
}

/// Demo patch: a sequenced pluck through a filter next to a slow PWM pad.
fn build_demo(engine: &mut Engine) -> Result<(), Box<dyn Error>> {
    let (row, pluck) = engine.add_source_row("pluck", "string")?;
    let lpf = engine.add_effect(row, "lpf")?;
    engine.set_param(lpf, "frequency", 1800.0)?;

    let seq = engine.add_modulator(row, "seq8")?;
    for (step, pitch) in [(0, 30.0), (2, 45.0), (4, 30.0), (6, 52.0)] {
        engine.set_step_pitch(seq, step, pitch)?;
        engine.set_step_gate(seq, step, true)?;
    }
    engine.connect(
        PatchSource::Module {
            row,
            slot: seq,
            output: "pitch".into(),
        },
        PatchTarget::Param {
            row,
            slot: pluck,
            param: "frequency".into(),
        },
    )?;
    engine.connect(
        PatchSource::Module {
            row,
            slot: seq,
            output: "gate".into(),
        },
        PatchTarget::Trigger { row, slot: pluck },
    )?;
    engine.connect(PatchSource::MasterClock, PatchTarget::Sync { row, slot: seq })?;

    let (pad_row, pad) = engine.add_source_row("pwm", "pad")?;
    engine.set_param(pad, "frequency", 0.55)?;
    engine.set_param(pad, "gain", 0.15)?;
    let pad_lpf = engine.add_effect(pad_row, "lpf")?;
    engine.set_param(pad_lpf, "frequency", 600.0)?;
    let lfo = engine.add_modulator(pad_row, "lfo")?;
    engine.set_param(lfo, "rate", 0.3)?;
    engine.set_param(lfo, "depth", 0.6)?;
    engine.connect(
        PatchSource::Module {
            row: pad_row,
            slot: lfo,
            output: "out".into(),
        },
        PatchTarget::RowPan { row: pad_row },
    )?;
    engine.set_row_pan(row, -0.3)?;
    Ok(())
}

fn prepare(
    sample_rate: u32,
    project: &Option<PathBuf>,
    bpm: Option<f64>,
) -> Result<Engine, Box<dyn Error>> {
    let mut engine = Engine::new(EngineConfig {
        sample_rate: sample_rate as f32,
        ..EngineConfig::default()
    })?;
    match project {
        Some(path) => engine.load_project(path)?,
        None => build_demo(&mut engine)?,
    }
    if let Some(bpm) = bpm {
        engine.set_master_bpm(bpm);
    }
    Ok(engine)
}

fn write_wav(path: &PathBuf, sample_rate: u32, left: &[f32], right: &[f32]) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for (&l, &r) in left.iter().zip(right.iter()) {
        for sample in [l, r] {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * 32767.0) as i16)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            output,
            project,
            duration,
            sample_rate,
            bpm,
        } => {
            let mut engine = prepare(sample_rate, &project, bpm)?;
            let samples = (duration * sample_rate as f32) as usize;
            let (left, right) = engine.render(samples)?;
            write_wav(&output, sample_rate, &left, &right)?;
            info!(
                "Rendered {:.1}s to {} at {} Hz",
                duration,
                output.display(),
                sample_rate
            );
        }
        Commands::Play { project, duration } => {
            let sample_rate = AudioOutput::probe_sample_rate()?;
            let engine = Arc::new(Mutex::new(prepare(sample_rate, &project, None)?));
            let _output = AudioOutput::start(Arc::clone(&engine))?;
            std::thread::sleep(std::time::Duration::from_secs_f32(duration));
        }
    }
    Ok(())
}
