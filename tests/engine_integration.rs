//! End-to-end engine tests: multiple rows, patch cables across rows, the
//! shared master clock, and project files on disk.

use modrack::engine::{Engine, EngineConfig};
use modrack::error::EngineError;
use modrack::patch::{PatchSource, PatchTarget};

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

fn rms(buf: &[f32]) -> f32 {
    (buf.iter().map(|x| x * x).sum::<f32>() / buf.len() as f32).sqrt()
}

#[test]
fn two_synced_sequencers_share_the_master_clock() {
    let mut engine = engine();
    let (row_a, _) = engine.add_source_row("pwm", "a").unwrap();
    let seq16 = engine.add_modulator(row_a, "seq16").unwrap();
    let (row_b, _) = engine.add_source_row("pwm", "b").unwrap();
    let seq8 = engine.add_modulator(row_b, "seq8").unwrap();

    engine
        .connect(
            PatchSource::MasterClock,
            PatchTarget::Sync {
                row: row_a,
                slot: seq16,
            },
        )
        .unwrap();
    engine
        .connect(
            PatchSource::MasterClock,
            PatchTarget::Sync {
                row: row_b,
                slot: seq8,
            },
        )
        .unwrap();

    // One second at 120 BPM crosses 8 sixteenth ticks
    engine.render(44_100).unwrap();
    let tick = engine.master_tick();
    assert_eq!(tick, 8);
    assert_eq!(
        engine.sequencer(seq16).unwrap().current_step(),
        (tick % 16) as usize
    );
    assert_eq!(
        engine.sequencer(seq8).unwrap().current_step(),
        (tick % 8) as usize
    );
}

#[test]
fn master_tempo_change_realigns_synced_rows() {
    let mut engine = engine();
    let (row, _) = engine.add_source_row("pwm", "a").unwrap();
    let seq = engine.add_modulator(row, "seq8").unwrap();
    engine
        .connect(PatchSource::MasterClock, PatchTarget::Sync { row, slot: seq })
        .unwrap();

    engine.render(44_100).unwrap();
    assert!(engine.master_tick() > 0);

    engine.set_master_bpm(240.0);
    assert_eq!(engine.master_tick(), 0);
    // 240 BPM -> 62.5 ms per tick; half a second crosses 8 ticks
    engine.render(22_050).unwrap();
    assert_eq!(engine.master_tick(), 8);
    assert_eq!(engine.sequencer(seq).unwrap().current_step(), 0);
}

#[test]
fn modulation_crosses_rows() {
    let mut engine = engine();
    let (row_a, _) = engine.add_source_row("noise", "mod row").unwrap();
    let lfo = engine.add_modulator(row_a, "lfo").unwrap();
    engine.set_param(lfo, "rate", 5.0).unwrap();
    engine.set_param(lfo, "depth", 1.0).unwrap();

    let (row_b, _) = engine.add_source_row("noise", "carrier").unwrap();
    let lpf = engine.add_effect(row_b, "lpf").unwrap();
    engine.set_param(lpf, "frequency", 500.0).unwrap();

    let patched = engine
        .connect(
            PatchSource::Module {
                row: row_a,
                slot: lfo,
                output: "out".into(),
            },
            PatchTarget::Param {
                row: row_b,
                slot: lpf,
                param: "frequency".into(),
            },
        )
        .unwrap();
    assert!(patched);

    let (left, _) = engine.render(8192).unwrap();
    assert!(rms(&left) > 0.01);
}

#[test]
fn muted_row_goes_silent() {
    let mut engine = engine();
    let (row, _) = engine.add_source_row("noise", "wash").unwrap();

    engine.render(8192).unwrap();
    let (audible, _) = engine.render(8192).unwrap();
    assert!(rms(&audible) > 0.05);

    engine.set_row_mute(row, true).unwrap();
    // First batch covers the gain ramp, second is settled
    engine.render(8192).unwrap();
    let (silent, _) = engine.render(8192).unwrap();
    assert!(rms(&silent) < 1e-3);
}

#[test]
fn solo_silences_the_other_row() {
    let mut engine = engine();
    let (noise_row, _) = engine.add_source_row("noise", "wash").unwrap();
    let (pwm_row, pwm) = engine.add_source_row("pwm", "lead").unwrap();
    engine.set_param(pwm, "gain", 0.0).unwrap();

    engine.set_row_solo(pwm_row, true).unwrap();
    engine.render(8192).unwrap();
    let (out, _) = engine.render(8192).unwrap();
    // The soloed row is silent by its own gain, the noise row is cut by
    // the solo, so the bus carries nothing
    assert!(rms(&out) < 1e-3);

    engine.set_row_solo(pwm_row, false).unwrap();
    engine.render(8192).unwrap();
    let (out, _) = engine.render(8192).unwrap();
    assert!(rms(&out) > 0.05, "noise row returns when solo clears");
    let _ = noise_row;
}

#[test]
fn pan_modulation_moves_the_image_at_audio_rate() {
    let mut engine = engine();
    let (row, _) = engine.add_source_row("noise", "wash").unwrap();
    let lfo = engine.add_modulator(row, "lfo").unwrap();
    // Half a cycle per second: the image sits right in the first half of
    // the render and left in the second
    engine.set_param(lfo, "rate", 0.5).unwrap();
    engine.set_param(lfo, "depth", 1.0).unwrap();

    engine
        .connect(
            PatchSource::Module {
                row,
                slot: lfo,
                output: "out".into(),
            },
            PatchTarget::RowPan { row },
        )
        .unwrap();

    let (left, right) = engine.render(44_100).unwrap();
    let mid = left.len() / 2;
    let l_first = rms(&left[..mid]);
    let l_second = rms(&left[mid..]);
    let r_first = rms(&right[..mid]);
    let r_second = rms(&right[mid..]);
    assert!(
        (l_first - l_second).abs() > 0.01 || (r_first - r_second).abs() > 0.01,
        "pan should move over time: L {l_first:.3}/{l_second:.3} R {r_first:.3}/{r_second:.3}"
    );
}

#[test]
fn manual_trigger_excites_the_pluck() {
    let mut engine = engine();
    let (_, pluck) = engine.add_source_row("pluck", "string").unwrap();

    engine.render_block().unwrap();
    let quiet = rms(engine.master_left());
    assert!(quiet < 1e-6, "untriggered string is silent");

    assert!(engine.trigger(pluck).unwrap());
    engine.render_block().unwrap();
    let plucked = rms(engine.master_left());
    assert!(plucked > 0.01, "trigger lands at the next block start");
}

#[test]
fn removing_a_row_mid_session_keeps_rendering() {
    let mut engine = engine();
    let (row_a, _) = engine.add_source_row("noise", "a").unwrap();
    let (row_b, _) = engine.add_source_row("pwm", "b").unwrap();
    let lfo = engine.add_modulator(row_a, "lfo").unwrap();
    engine
        .connect(
            PatchSource::Module {
                row: row_a,
                slot: lfo,
                output: "out".into(),
            },
            PatchTarget::RowPan { row: row_b },
        )
        .unwrap();

    engine.render(4096).unwrap();
    engine.remove_row(row_a).unwrap();
    assert_eq!(engine.connection_count(), 0, "cables die with their source");

    let (left, _) = engine.render(8192).unwrap();
    assert!(rms(&left) > 0.01, "remaining row still renders");
}

#[test]
fn project_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let mut engine = engine();
    let (row, pluck) = engine.add_source_row("pluck", "string").unwrap();
    let lpf = engine.add_effect(row, "lpf").unwrap();
    engine.set_param(lpf, "frequency", 900.0).unwrap();
    let seq = engine.add_modulator(row, "seq16").unwrap();
    engine.set_step_pitch(seq, 3, 70.0).unwrap();
    engine.set_step_gate(seq, 3, true).unwrap();
    engine.set_row_pan(row, -0.25).unwrap();
    engine.set_master_bpm(96.0);
    engine
        .connect(
            PatchSource::Module {
                row,
                slot: seq,
                output: "gate".into(),
            },
            PatchTarget::Trigger { row, slot: pluck },
        )
        .unwrap();
    engine
        .connect(PatchSource::MasterClock, PatchTarget::Sync { row, slot: seq })
        .unwrap();
    engine.save_project(&path).unwrap();

    let mut restored = Engine::new(EngineConfig::default()).unwrap();
    restored.load_project(&path).unwrap();

    assert_eq!(restored.master_bpm(), 96.0);
    assert_eq!(restored.rows().len(), 1);
    assert_eq!(restored.connection_count(), 2);
    let restored_row = &restored.rows()[0];
    assert_eq!(restored_row.pan, -0.25);
    let restored_seq = restored_row.chain[1].instance_id;
    assert!(restored.sequencer(restored_seq).unwrap().is_sync_connected());
    assert_eq!(restored.sequencer(restored_seq).unwrap().pitches()[3], 70.0);

    assert_eq!(
        serde_json::to_value(engine.snapshot()).unwrap(),
        serde_json::to_value(restored.snapshot()).unwrap()
    );
}

#[test]
fn loading_a_corrupt_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{\"version\": 99}").unwrap();

    let mut engine = engine();
    engine.add_source_row("pwm", "keep me").unwrap();
    assert!(matches!(
        engine.load_project(&path),
        Err(EngineError::InvalidProject(_))
    ));
    assert_eq!(engine.rows().len(), 1, "failed load leaves the rack alone");
}
