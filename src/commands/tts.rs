use crate::state::{AppState, PlaybackSnapshot};

/// Speak `text`, replacing anything already playing.
///
/// Errors only when the call was a no-op because audio output is down.
pub fn speak_text(state: &mut AppState, text: &str) -> Result<(), String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    match state.player.speak(text) {
        Some(_) => Ok(()),
        None => Err(state
            .player
            .error()
            .unwrap_or("Audio playback is unavailable.")
            .to_string()),
    }
}

pub fn stop_speaking(state: &mut AppState) {
    state.player.stop();
}

/// Read the story aloud, or stop if already reading.
pub fn toggle_read_aloud(state: &mut AppState, story: &str) -> Result<(), String> {
    if state.player.is_speaking() {
        state.player.stop();
        Ok(())
    } else {
        speak_text(state, story)
    }
}

pub fn get_status(state: &mut AppState) -> PlaybackSnapshot {
    state.player.drain_events();
    state.player.snapshot()
}
