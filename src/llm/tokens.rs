//! Token estimation for calls whose provider does not report usage
//! (streamed completions, some gateways).

use tiktoken_rs::cl100k_base_singleton;

/// Estimate tokens for a string using `cl100k_base`.
///
/// The encoder is built once per process and shared.
pub fn estimate(content: &str) -> u64 {
    cl100k_base_singleton()
        .encode_with_special_tokens(content)
        .len() as u64
}

/// Estimate prompt tokens including a system message, with the per-message
/// overhead of the chat format.
pub fn estimate_prompt(system: Option<&str>, prompt: &str) -> u64 {
    // <|start|>{role}\n{content}<|end|>\n per message, plus the reply primer.
    let mut total = 3 + estimate(prompt) + 3;
    if let Some(system) = system {
        total += 3 + estimate(system);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_nonzero_for_text() {
        assert!(estimate("The sea remembers every ship it has carried.") > 5);
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn test_repeated_estimates_agree() {
        let text = "Leyla answers in the voice of water.";
        let first = estimate(text);
        assert!((0..32).all(|_| estimate(text) == first));
    }

    #[test]
    fn test_system_message_adds_tokens() {
        let bare = estimate_prompt(None, "hello");
        let with_system = estimate_prompt(Some("You are Leyla."), "hello");
        assert!(with_system > bare);
    }
}
