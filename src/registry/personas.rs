//! The five Guardian personas.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Fire,
    Water,
    Earth,
    Air,
    Void,
}

impl Element {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Water => "water",
            Self::Earth => "earth",
            Self::Air => "air",
            Self::Void => "void",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    pub id: String,
    pub display_name: String,
    pub element: Element,
    /// Flavor metadata; never used for routing.
    pub frequency_hz: u32,
    pub traits: Vec<String>,
    pub expertise_tags: BTreeSet<String>,
    pub system_prompt_template: String,
    pub preferred_provider_id: String,
}

struct Entry {
    id: &'static str,
    display_name: &'static str,
    element: Element,
    frequency_hz: u32,
    traits: &'static [&'static str],
    expertise: &'static [&'static str],
    template: &'static str,
    provider: &'static str,
}

const DEFAULTS: &[Entry] = &[
    Entry {
        id: "lyssandria",
        display_name: "Lyssandria",
        element: Element::Earth,
        frequency_hz: 174,
        traits: &["grounded", "patient", "structural"],
        expertise: &["worldbuilding", "structure", "research"],
        template: "You are Lyssandria, Guardian of Foundations. You help writers build \
                   stable worlds: geography, history, systems and the rules that hold them together.",
        provider: "gemini-1-5-pro",
    },
    Entry {
        id: "leyla",
        display_name: "Leyla",
        element: Element::Water,
        frequency_hz: 417,
        traits: &["empathetic", "fluid", "intuitive"],
        expertise: &["emotion", "poetry", "character"],
        template: "You are Leyla, Guardian of Flow. You help writers find the emotional \
                   current of a scene and let language move like water.",
        provider: "claude-3-5-sonnet",
    },
    Entry {
        id: "draconia",
        display_name: "Draconia",
        element: Element::Fire,
        frequency_hz: 528,
        traits: &["bold", "transformative", "direct"],
        expertise: &["conflict", "action", "revision"],
        template: "You are Draconia, Guardian of Transformation. You push drafts toward \
                   higher stakes, sharper conflict and decisive revision.",
        provider: "gpt-4o",
    },
    Entry {
        id: "maylinn",
        display_name: "Maylinn",
        element: Element::Air,
        frequency_hz: 639,
        traits: &["curious", "light", "connective"],
        expertise: &["dialogue", "brainstorming", "voice"],
        template: "You are Maylinn, Guardian of Connection. You help writers open up ideas, \
                   voices and conversations between characters.",
        provider: "gpt-4o-mini",
    },
    Entry {
        id: "shinkami",
        display_name: "Shinkami",
        element: Element::Void,
        frequency_hz: 963,
        traits: &["contemplative", "vast", "synthesizing"],
        expertise: &["theme", "meaning", "myth"],
        template: "You are Shinkami, Guardian of the Source. You help writers see the \
                   deeper theme beneath a story and the myth it is reaching for.",
        provider: "gpt-4o",
    },
];

/// Read-only lookup from persona id to [`PersonaConfig`].
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, PersonaConfig>,
}

impl PersonaRegistry {
    pub fn new(personas: impl IntoIterator<Item = PersonaConfig>) -> Self {
        Self {
            personas: personas.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let strings = |xs: &'static [&'static str]| xs.iter().map(|s| (*s).to_string());
        Self::new(DEFAULTS.iter().map(|e| PersonaConfig {
            id: e.id.to_string(),
            display_name: e.display_name.to_string(),
            element: e.element,
            frequency_hz: e.frequency_hz,
            traits: strings(e.traits).collect(),
            expertise_tags: strings(e.expertise).collect(),
            system_prompt_template: e.template.to_string(),
            preferred_provider_id: e.provider.to_string(),
        }))
    }

    pub fn get(&self, id: &str) -> Result<&PersonaConfig> {
        self.personas
            .get(id)
            .ok_or_else(|| GatewayError::persona_not_found(id))
    }

    pub fn all(&self) -> impl Iterator<Item = &PersonaConfig> {
        self.personas.values()
    }

    /// System message for a persona: its template plus a fixed suffix
    /// naming element, frequency and traits.
    #[must_use]
    pub fn resolve_system_message(persona: &PersonaConfig) -> String {
        format!(
            "{}\n\nElement: {}. Frequency: {} Hz. Traits: {}. Stay in character and answer as {}.",
            persona.system_prompt_template,
            persona.element,
            persona.frequency_hz,
            persona.traits.join(", "),
            persona.display_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leyla_system_message() {
        let registry = PersonaRegistry::with_defaults();
        let leyla = registry.get("leyla").unwrap();
        let message = PersonaRegistry::resolve_system_message(leyla);
        assert!(message.starts_with(&leyla.system_prompt_template));
        assert!(message.contains("water"));
        assert!(message.contains("417"));
        assert_eq!(message, PersonaRegistry::resolve_system_message(leyla));
    }

    #[test]
    fn test_unknown_persona() {
        let err = PersonaRegistry::with_defaults().get("morgana").unwrap_err();
        assert!(matches!(err, GatewayError::ConfigNotFound { kind: "persona", .. }));
    }

    #[test]
    fn test_preferred_providers_exist() {
        let providers = crate::registry::ProviderRegistry::with_defaults();
        for persona in PersonaRegistry::with_defaults().all() {
            assert!(providers.contains(&persona.preferred_provider_id), "{}", persona.id);
        }
    }
}
