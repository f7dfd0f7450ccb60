//! Context-window accounting.
//!
//! Maps a model name to its context window and derives how much room a
//! session has left. Unknown models report null `maxTokens`/`percentLeft`.

use crate::events::ContextInfo;

/// Context window for a known model family.
pub fn max_tokens_for(model: &str) -> Option<u64> {
    if model.starts_with("gpt-4o") {
        Some(128_000)
    } else if model == "o3" || model == "o4-mini" || model.starts_with("gpt-5.2") {
        Some(200_000)
    } else {
        None
    }
}

/// Derive context accounting from the model and total tokens used so far.
pub fn context_info(model: Option<&str>, used_tokens: u64) -> ContextInfo {
    let max_tokens = model.and_then(max_tokens_for);
    let percent_left = max_tokens.map(|max| {
        if used_tokens >= max {
            0.0
        } else {
            (max - used_tokens) as f64 / max as f64
        }
    });

    ContextInfo {
        max_tokens,
        used_tokens,
        percent_left,
    }
}
