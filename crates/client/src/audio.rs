//! Audible notification cues.
//!
//! Playback is best-effort: a cue that cannot be played is silently skipped.

use std::io::Write;

/// Something that can play the short "new activity" cue.
pub trait AudioCue: Send + Sync {
    fn play(&self);
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl AudioCue for TerminalBell {
    fn play(&self) {
        let mut stderr = std::io::stderr();
        // A closed or redirected stderr just means no sound.
        let _ = stderr.write_all(b"\x07").and_then(|_| stderr.flush());
    }
}

/// No sound at all, for headless hosts and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl AudioCue for Silent {
    fn play(&self) {}
}
