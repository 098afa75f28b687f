//! Sound cues played on message-state transitions.
//!
//! The audio resource is owned explicitly: an [`AudioOutput`] starts inert and
//! opens its device once, on the first user interaction ([`AudioOutput::activate`]).
//! Cues played before that are dropped.

use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    /// The local user submitted a message.
    Sent,
    /// A message from another participant arrived.
    Received,
    /// An assistant message arrived.
    Ai,
    /// The local user entered a room.
    RoomEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
}

/// One oscillator of a cue: an exponential frequency sweep with a decaying gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub waveform: Waveform,
    pub start_hz: f32,
    pub end_hz: f32,
    pub gain: f32,
    pub delay_ms: u32,
    pub duration_ms: u32,
}

const SENT: [Tone; 1] = [Tone { waveform: Waveform::Sine, start_hz: 900.0, end_hz: 450.0, gain: 0.25, delay_ms: 0, duration_ms: 150 }];
const RECEIVED: [Tone; 1] = [Tone { waveform: Waveform::Sine, start_hz: 700.0, end_hz: 1000.0, gain: 0.15, delay_ms: 0, duration_ms: 120 }];
const AI: [Tone; 1] = [Tone { waveform: Waveform::Sine, start_hz: 400.0, end_hz: 800.0, gain: 0.15, delay_ms: 0, duration_ms: 200 }];
const ROOM_ENTRY: [Tone; 2] = [
    Tone { waveform: Waveform::Sine, start_hz: 300.0, end_hz: 600.0, gain: 0.2, delay_ms: 0, duration_ms: 400 },
    Tone { waveform: Waveform::Triangle, start_hz: 600.0, end_hz: 900.0, gain: 0.2, delay_ms: 100, duration_ms: 300 },
];

impl Cue {
    pub fn tones(self) -> &'static [Tone] {
        match self {
            Cue::Sent => &SENT,
            Cue::Received => &RECEIVED,
            Cue::Ai => &AI,
            Cue::RoomEntry => &ROOM_ENTRY,
        }
    }

    /// Total length of the cue including delayed oscillators.
    pub fn duration_ms(self) -> u32 {
        self.tones()
            .iter()
            .map(|t| t.delay_ms + t.duration_ms)
            .max()
            .unwrap_or(0)
    }
}

/// Receiver of cues. Playback failures are the sink's problem, never the caller's.
pub trait CueSink: Send + Sync {
    fn play(&self, cue: Cue);
}

type DeviceFactory = Box<dyn Fn() -> Box<dyn Write + Send> + Send + Sync>;

/// Terminal audio: each cue rings the bell on the device once it is active.
pub struct AudioOutput {
    open: DeviceFactory,
    device: OnceLock<Mutex<Box<dyn Write + Send>>>,
}

impl AudioOutput {
    /// Output that rings the bell on stderr once activated.
    pub fn terminal() -> Self {
        Self::with_device(|| Box::new(std::io::stderr()))
    }

    pub fn with_device<F>(open: F) -> Self
    where
        F: Fn() -> Box<dyn Write + Send> + Send + Sync + 'static,
    {
        Self {
            open: Box::new(open),
            device: OnceLock::new(),
        }
    }

    /// Open the device. Called on first user interaction; later calls are no-ops.
    pub fn activate(&self) {
        self.device.get_or_init(|| Mutex::new((self.open)()));
    }

    pub fn is_active(&self) -> bool {
        self.device.get().is_some()
    }
}

impl CueSink for AudioOutput {
    fn play(&self, cue: Cue) {
        let Some(device) = self.device.get() else {
            debug!(?cue, "audio inactive, cue dropped");
            return;
        };
        let mut out = device.lock().unwrap_or_else(|p| p.into_inner());
        let bells = "\x07".repeat(cue.tones().len());
        let written = out.write_all(bells.as_bytes());
        if let Err(e) = written.and_then(|_| out.flush()) {
            debug!(?cue, error = %e, "cue playback failed");
        }
    }
}

/// Cue sink for an interactive chat. Starting the chat is the user's first
/// interaction, so the output is activated before any cue (the room-entry
/// cue included) can be played. `mute` never opens the device.
pub fn chat_sink(audio: AudioOutput, mute: bool) -> Arc<dyn CueSink> {
    if mute {
        return Arc::new(Silent);
    }
    audio.activate();
    Arc::new(audio)
}

/// Sink that does nothing (`--mute`).
pub struct Silent;

impl CueSink for Silent {
    fn play(&self, _cue: Cue) {}
}

/// Sink that remembers every cue, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingSink {
    played: Mutex<Vec<Cue>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<Cue> {
        self.played.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn count(&self, cue: Cue) -> usize {
        self.played().iter().filter(|c| **c == cue).count()
    }
}

impl CueSink for RecordingSink {
    fn play(&self, cue: Cue) {
        self.played.lock().unwrap_or_else(|p| p.into_inner()).push(cue);
    }
}
