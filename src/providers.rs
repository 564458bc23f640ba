//! Built-in presets for common OpenAI-compatible upstreams.
//!
//! A preset fills in the base URL and the environment variable holding the API key,
//! so a config file only needs `provider = "openrouter"` to point the gateway at it.
//! Every base URL already includes the API version path; the gateway appends
//! `/chat/completions`.

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        default_api_key_env: "FIREWORKS_API_KEY",
    },
    ProviderPreset {
        name: "grok",
        base_url: "https://api.x.ai/v1",
        default_api_key_env: "XAI_API_KEY",
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        default_api_key_env: "TOGETHER_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("fireworks").is_some());
        assert!(ProviderPreset::from_name("OpenRouter").is_some()); // case-insensitive
        assert!(ProviderPreset::from_name("unknown_provider").is_none());
    }

    #[test]
    fn test_base_urls_have_no_trailing_slash() {
        for preset in ProviderPreset::all() {
            assert!(
                !preset.base_url.ends_with('/'),
                "Provider {} base_url must not end with '/'",
                preset.name
            );
        }
    }
}
