// src/chat/prompt.rs

/// System prompt for a generation turn
pub fn system_prompt(model: &str) -> String {
    let base = "You are a friendly assistant! Keep your responses concise and helpful. \
When tools are available, use them to answer questions about the user's connected \
services instead of guessing.";

    // Reasoning models do their own deliberation; skip the brevity nudge
    if model.starts_with("gpt-5") {
        "You are a friendly assistant! Keep your responses helpful. When tools are \
available, use them to answer questions about the user's connected services instead \
of guessing."
            .to_string()
    } else {
        base.to_string()
    }
}

/// System prompt for the title collaborator
pub fn title_prompt() -> &'static str {
    "You will generate a short title based on the first message a user begins a \
conversation with. Ensure it is not more than 80 characters long. The title should \
be a summary of the user's message. Do not use quotes or colons."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_varies_by_model_family() {
        assert_ne!(system_prompt("gpt-5-mini"), system_prompt("claude-sonnet-4-0"));
        assert!(system_prompt("gpt-4o-mini").contains("concise"));
    }
}
