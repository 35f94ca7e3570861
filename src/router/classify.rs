//! Keyword heuristics over the prompt text.
//!
//! Task classes are tested in a fixed order and the first match wins.
//! Matching is case-insensitive on whole words.

use std::fmt;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskClass {
    Code,
    Creative,
    Multimodal,
    Image,
    Video,
    Audio,
}

impl TaskClass {
    /// Evaluation order.
    pub const ORDER: [Self; 6] = [
        Self::Code,
        Self::Creative,
        Self::Multimodal,
        Self::Image,
        Self::Video,
        Self::Audio,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Creative => "creative",
            Self::Multimodal => "multimodal",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Code => &[
                "code",
                "function",
                "debug",
                "program",
                "algorithm",
                "api",
                "script",
                "typescript",
                "javascript",
                "python",
                "rust",
                "compile",
                "refactor",
            ],
            Self::Creative => &[
                "story",
                "poem",
                "creative",
                "write",
                "narrative",
                "character",
                "fiction",
                "lyrics",
                "novel",
                "plot",
            ],
            Self::Multimodal => &[
                "analyze image",
                "describe this image",
                "screenshot",
                "diagram",
                "photo",
            ],
            Self::Image => &[
                "generate image",
                "draw",
                "drawing",
                "picture",
                "illustration",
                "painting",
                "render",
                "visualize",
            ],
            Self::Video => &["video", "animation", "clip", "footage", "film"],
            Self::Audio => &["audio", "music", "song", "voice", "narrate", "speech", "sound"],
        }
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "analyze",
    "explain",
    "compare",
    "design",
    "architecture",
    "optimize",
    "comprehensive",
    "detailed",
    "evaluate",
    "strategy",
];

/// Hits needed for each bucket.
const COMPLEX_THRESHOLD: usize = 3;
const MEDIUM_THRESHOLD: usize = 1;

fn word_pattern(words: &[&str]) -> Result<Regex, regex::Error> {
    let alternation = words
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
}

/// Compiled keyword patterns.
#[derive(Debug, Clone)]
pub struct PromptClassifier {
    classes: Vec<(TaskClass, Regex)>,
    complexity: Regex,
}

impl PromptClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        let classes = TaskClass::ORDER
            .iter()
            .map(|class| Ok((*class, word_pattern(class.keywords())?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            classes,
            complexity: word_pattern(COMPLEXITY_KEYWORDS)?,
        })
    }

    /// First task class whose keywords occur in the prompt.
    #[must_use]
    pub fn classify(&self, prompt: &str) -> Option<TaskClass> {
        let lowered = prompt.to_lowercase();
        self.classes
            .iter()
            .find(|(_, re)| re.is_match(&lowered))
            .map(|(class, _)| *class)
    }

    #[must_use]
    pub fn complexity(&self, prompt: &str) -> Complexity {
        let hits = self.complexity.find_iter(&prompt.to_lowercase()).count();
        if hits >= COMPLEX_THRESHOLD {
            Complexity::Complex
        } else if hits >= MEDIUM_THRESHOLD {
            Complexity::Medium
        } else {
            Complexity::Simple
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PromptClassifier {
        PromptClassifier::new().unwrap()
    }

    #[test]
    fn test_classification_order() {
        let c = classifier();
        assert_eq!(c.classify("Write a Python function"), Some(TaskClass::Code));
        assert_eq!(c.classify("write a poem about the sea"), Some(TaskClass::Creative));
        assert_eq!(c.classify("Describe this image for me"), Some(TaskClass::Multimodal));
        assert_eq!(c.classify("draw a dragon"), Some(TaskClass::Image));
        assert_eq!(c.classify("a short film of waves"), Some(TaskClass::Video));
        assert_eq!(c.classify("compose a song"), Some(TaskClass::Audio));
        assert_eq!(c.classify("hello there"), None);
    }

    #[test]
    fn test_whole_words_only() {
        let c = classifier();
        // "capital" contains "api", "codex" contains "code".
        assert_eq!(c.classify("what is the capital of codexia"), None);
    }

    #[test]
    fn test_complexity_buckets() {
        let c = classifier();
        assert_eq!(c.complexity("hi"), Complexity::Simple);
        assert_eq!(c.complexity("explain tides"), Complexity::Medium);
        assert_eq!(
            c.complexity("Compare and evaluate a detailed strategy"),
            Complexity::Complex
        );
    }
}
