// Offline demonstration of pattern continuation, no MIDI hardware needed
// Run with: cargo run --bin offline_demo

use std::sync::Arc;
use tumbler::{
    BackendOutput, Clock, EngineConfig, ManualCycles, MemoryBackend, MidiBackend, MidiMessage,
    NoteEvent, TumbleEngine, telemetry,
};

const PHRASE: [(i64, u8); 5] = [(0, 60), (400, 64), (800, 62), (1200, 65), (1600, 64)];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing("warn");

    println!("Tumbler - Offline Pattern Demo");
    println!("==============================");

    let backend = MemoryBackend::with_ports(&[], &["demo out"]);
    let port = backend
        .enumerate_outputs()
        .into_iter()
        .next()
        .ok_or("demo output port missing")?;
    let mut out = BackendOutput::open(backend.clone(), &port)?;

    let cycles = ManualCycles::micros();
    let config = EngineConfig {
        rng_seed: Some(1),
        ..EngineConfig::default()
    };
    let mut engine = TumbleEngine::new(config, Clock::new(Arc::new(cycles.clone())))?;

    println!("\nPlaying phrase:");
    for (time, pitch) in PHRASE {
        println!("   {:>5} ms  note {}", time, pitch);
        if let Some(slot) = engine.handle_event(&NoteEvent::note_on(pitch, 96, time), time) {
            println!("   -> pattern started in slot {}", slot);
        }
    }

    let mut now = PHRASE[PHRASE.len() - 1].0;
    while !engine.scheduler().is_empty() && now < 60_000 {
        now += 5;
        cycles.set(now * 1000);
        engine.poll(now, &mut out);
    }

    println!("\nContinuation:");
    let mut played = 0;
    for bytes in backend.written("demo out") {
        if let Some(MidiMessage::NoteOn { note, velocity, .. }) = MidiMessage::from_bytes(&bytes) {
            println!("   note {:>3}  velocity {:>3}", note, velocity);
            played += 1;
        }
    }

    engine.shutdown(&mut out);
    out.close();
    println!("\n{} notes played before the pattern left the keyboard", played);
    Ok(())
}
