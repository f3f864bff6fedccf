//! Prompt supply for rounds: a bank of prompts drawn without repetition per session.

use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Prompt players answer with a song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Prompt {
    /// Stable identifier used to avoid repeats within a session.
    pub id: String,
    /// Text shown to players (e.g. "A song for a road trip").
    pub text: String,
    /// Loose grouping of prompts (e.g. "mood", "memories").
    pub category: String,
}

impl Prompt {
    /// Build a prompt chosen explicitly by the host.
    ///
    /// The identifier is derived from the text so the same custom prompt is recognised as a
    /// repeat later in the session.
    pub fn custom(text: &str, category: Option<&str>) -> Self {
        let text = text.trim().to_owned();
        let id = format!(
            "custom:{}",
            text.to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        );
        Self {
            id,
            text,
            category: category.unwrap_or("custom").trim().to_owned(),
        }
    }
}

/// Supplier of prompts for new rounds.
pub trait PromptSource: Send + Sync {
    /// Return a prompt whose id is not listed in `used`.
    ///
    /// Once every prompt has been used, any prompt may be returned.
    fn draw_unused(&self, used: &[String]) -> Prompt;
}

/// In-memory prompt bank loaded from configuration.
#[derive(Debug, Clone)]
pub struct PromptBank {
    prompts: Vec<Prompt>,
}

impl PromptBank {
    /// Create a bank from the provided prompts, falling back to the built-in set when empty.
    pub fn new(prompts: Vec<Prompt>) -> Self {
        if prompts.is_empty() {
            Self::default()
        } else {
            Self { prompts }
        }
    }

    /// Number of prompts in the bank.
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Whether the bank holds no prompts.
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

impl PromptSource for PromptBank {
    fn draw_unused(&self, used: &[String]) -> Prompt {
        let unused = self
            .prompts
            .iter()
            .filter(|prompt| !used.contains(&prompt.id))
            .collect::<Vec<_>>();

        let mut rng = rand::rng();
        if unused.is_empty() {
            let index = rng.random_range(0..self.prompts.len());
            self.prompts[index].clone()
        } else {
            let index = rng.random_range(0..unused.len());
            unused[index].clone()
        }
    }
}

impl Default for PromptBank {
    fn default() -> Self {
        let prompts = [
            ("road-trip", "A song for a long road trip", "mood"),
            ("guilty-pleasure", "Your guiltiest musical pleasure", "confessions"),
            ("first-dance", "The perfect first dance at a wedding", "moments"),
            ("villain-entrance", "Theme music for a villain's entrance", "movies"),
            ("rainy-sunday", "The soundtrack of a rainy Sunday", "mood"),
            ("karaoke", "Your go-to karaoke song", "party"),
            ("workout", "A song that gets you through a workout", "energy"),
            ("teenage-years", "A song that takes you back to your teenage years", "memories"),
            ("breakup", "The ultimate breakup anthem", "feelings"),
            ("summer", "The song of the summer", "seasons"),
            ("cooking", "Music to cook dinner to", "everyday"),
            ("one-hit", "The best one-hit wonder", "trivia"),
        ];

        Self {
            prompts: prompts
                .into_iter()
                .map(|(id, text, category)| Prompt {
                    id: id.to_owned(),
                    text: text.to_owned(),
                    category: category.to_owned(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(ids: &[&str]) -> PromptBank {
        PromptBank::new(
            ids.iter()
                .map(|id| Prompt {
                    id: (*id).to_owned(),
                    text: format!("prompt {id}"),
                    category: "test".into(),
                })
                .collect(),
        )
    }

    #[test]
    fn never_repeats_until_exhausted() {
        let bank = bank(&["a", "b", "c"]);
        let mut used = Vec::new();
        for _ in 0..3 {
            let prompt = bank.draw_unused(&used);
            assert!(!used.contains(&prompt.id));
            used.push(prompt.id);
        }

        // Exhausted: any prompt is allowed again.
        let prompt = bank.draw_unused(&used);
        assert!(used.contains(&prompt.id));
    }

    #[test]
    fn empty_bank_falls_back_to_defaults() {
        let bank = PromptBank::new(Vec::new());
        assert!(!bank.is_empty());
        assert_eq!(bank.len(), PromptBank::default().len());
    }

    #[test]
    fn custom_prompt_ids_ignore_case_and_punctuation() {
        let first = Prompt::custom("A song for Mondays!", None);
        let second = Prompt::custom("  a song for mondays ", Some("week"));
        assert_eq!(first.id, second.id);
        assert_eq!(first.category, "custom");
        assert_eq!(second.category, "week");
    }
}
