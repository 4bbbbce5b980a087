use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Represents an LLM vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI Chat Completions API
    OpenAI,
    /// Google Generative Language API
    Google,
}

impl Provider {
    /// Returns the lowercase identifier used in serialized state and price tables
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::Provider;
    ///
    /// assert_eq!(Provider::OpenAI.as_str(), "openai");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
            Provider::Google => "google",
        }
    }

    /// Returns the provider's expected environment variable name for API key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Google => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Provider::Anthropic),
            "openai" => Ok(Provider::OpenAI),
            "google" | "gemini" => Ok(Provider::Google),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// What a model can do, as far as the adapters need to know
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Context window size in tokens
    pub context_window: usize,
    /// Maximum number of output tokens
    pub max_output_tokens: usize,
    /// Extended reasoning ("thinking") can be requested
    pub thinking: bool,
    /// Image attachments are accepted
    pub vision: bool,
}

struct ModelFamily {
    provider: Provider,
    pattern: &'static str,
    capabilities: ModelCapabilities,
}

const fn caps(context_window: usize, max_output_tokens: usize, thinking: bool) -> ModelCapabilities {
    ModelCapabilities {
        context_window,
        max_output_tokens,
        thinking,
        vision: true,
    }
}

// Checked top to bottom; the first pattern that matches wins.
const FAMILIES: &[ModelFamily] = &[
    ModelFamily { provider: Provider::Anthropic, pattern: r"^claude-(opus|sonnet)-4", capabilities: caps(200_000, 64_000, true) },
    ModelFamily { provider: Provider::Anthropic, pattern: r"^claude-haiku-4", capabilities: caps(200_000, 64_000, true) },
    ModelFamily { provider: Provider::Anthropic, pattern: r"^claude-3-7-sonnet", capabilities: caps(200_000, 64_000, true) },
    ModelFamily { provider: Provider::Anthropic, pattern: r"^claude-3-5-(sonnet|haiku)", capabilities: caps(200_000, 8_192, false) },
    ModelFamily { provider: Provider::Anthropic, pattern: r"^claude-3-", capabilities: caps(200_000, 4_096, false) },
    ModelFamily { provider: Provider::OpenAI, pattern: r"^(o1|o3|o4)(-|$)", capabilities: caps(200_000, 100_000, true) },
    ModelFamily { provider: Provider::OpenAI, pattern: r"^gpt-5", capabilities: caps(400_000, 128_000, true) },
    ModelFamily { provider: Provider::OpenAI, pattern: r"^gpt-4\.1", capabilities: caps(1_047_576, 32_768, false) },
    ModelFamily { provider: Provider::OpenAI, pattern: r"^gpt-4o", capabilities: caps(128_000, 16_384, false) },
    ModelFamily { provider: Provider::Google, pattern: r"^gemini-2\.5-", capabilities: caps(1_048_576, 65_536, true) },
    ModelFamily { provider: Provider::Google, pattern: r"^gemini-", capabilities: caps(1_048_576, 8_192, false) },
];

/// [`FAMILIES`] with each pattern compiled once
static COMPILED_FAMILIES: LazyLock<Vec<(Provider, Regex, ModelCapabilities)>> = LazyLock::new(|| {
    FAMILIES
        .iter()
        .filter_map(|family| {
            Regex::new(family.pattern)
                .ok()
                .map(|re| (family.provider, re, family.capabilities))
        })
        .collect()
});

/// Fallback for model ids no family recognizes
const UNKNOWN: ModelCapabilities = ModelCapabilities {
    context_window: 128_000,
    max_output_tokens: 4_096,
    thinking: false,
    vision: false,
};

/// Looks up the capabilities of a model by its vendor id
///
/// Model ids are matched by family prefix, so dated snapshots of a known
/// family are recognized without being listed individually.
///
/// # Examples
///
/// ```
/// use crosstalk_core::Provider;
/// use crosstalk_core::model::capabilities;
///
/// assert!(capabilities(Provider::Anthropic, "claude-sonnet-4-20250514").thinking);
/// assert!(!capabilities(Provider::Anthropic, "claude-3-5-haiku-20241022").thinking);
/// assert!(capabilities(Provider::OpenAI, "o3-mini").thinking);
/// ```
pub fn capabilities(provider: Provider, model: &str) -> ModelCapabilities {
    COMPILED_FAMILIES
        .iter()
        .find(|(family_provider, pattern, _)| *family_provider == provider && pattern.is_match(model))
        .map(|(_, _, capabilities)| *capabilities)
        .unwrap_or(UNKNOWN)
}

/// Shorthand for the capability the adapters guard on before sending
pub fn supports_thinking(provider: Provider, model: &str) -> bool {
    capabilities(provider, model).thinking
}

#[cfg(test)]
mod tests {
    use super::*;
    use parameterized::parameterized;

    #[test]
    fn test_provider_display() {
        assert_eq!(Provider::OpenAI.to_string(), "openai");
        assert_eq!(Provider::Anthropic.to_string(), "anthropic");
        assert_eq!(Provider::Google.to_string(), "google");
    }

    #[test]
    fn test_provider_serialization() {
        assert_eq!(serde_json::to_string(&Provider::Anthropic).unwrap(), "\"anthropic\"");
        let p: Provider = serde_json::from_str("\"google\"").unwrap();
        assert_eq!(p, Provider::Google);
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Google);
        assert!("cohere".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_api_key_env_var() {
        assert_eq!(Provider::OpenAI.api_key_env_var(), "OPENAI_API_KEY");
        assert_eq!(Provider::Anthropic.api_key_env_var(), "ANTHROPIC_API_KEY");
    }

    #[parameterized(
        provider = {
            Provider::Anthropic, Provider::Anthropic, Provider::Anthropic,
            Provider::OpenAI, Provider::OpenAI, Provider::OpenAI,
            Provider::Google, Provider::Google
        },
        model = {
            "claude-3-7-sonnet-20250219", "claude-opus-4-1-20250805", "claude-3-5-sonnet-20241022",
            "o1", "gpt-4o-mini", "o3-mini",
            "gemini-2.5-flash", "gemini-2.0-flash"
        },
        thinking = { true, true, false, true, false, true, true, false }
    )]
    fn test_thinking_support(provider: Provider, model: &str, thinking: bool) {
        assert_eq!(supports_thinking(provider, model), thinking);
    }

    #[test]
    fn test_every_family_pattern_compiles() {
        assert_eq!(COMPILED_FAMILIES.len(), FAMILIES.len());
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let caps = capabilities(Provider::OpenAI, "some-future-model");
        assert!(!caps.thinking);
        assert_eq!(caps.max_output_tokens, 4_096);
    }

    #[test]
    fn test_provider_scoping() {
        // A Claude id routed through the OpenAI family table matches nothing
        assert!(!supports_thinking(Provider::OpenAI, "claude-3-7-sonnet-20250219"));
    }
}
