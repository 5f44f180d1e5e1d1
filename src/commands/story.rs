use crate::state::AppState;

/// Ask the backend for a story about `prompt`.
///
/// Blank prompts are ignored. Any speech in progress is stopped first.
pub async fn create_story(state: &mut AppState, prompt: &str) -> Result<Option<String>, String> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Ok(None);
    }

    state.player.stop();

    match state.backend.generate_story(prompt).await {
        Ok(story) => Ok(Some(story)),
        Err(e) => Err(e.user_message()),
    }
}
