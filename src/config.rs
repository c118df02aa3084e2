use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

const DEFAULT_LLM_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const DEFAULT_SERPER_BASE_URL: &str = "https://google.serper.dev";

/// Settings for one chat-completions model.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout: u64,
    pub max_tokens: u32,
}

impl LlmSettings {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("LLM_API_KEY (or GOOGLE_API_KEY) is not set");
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            bail!("LLM_BASE_URL must be an http(s) URL, got '{}'", self.base_url);
        }
        if self.model.trim().is_empty() {
            bail!("LLM model name is empty");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            bail!("temperature must be within [0.0, 2.0], got {}", self.temperature);
        }
        if self.timeout == 0 {
            bail!("LLM_TIMEOUT_SECS must be greater than zero");
        }
        if self.max_tokens == 0 {
            bail!("LLM_MAX_TOKENS must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub api_key: String,
    pub base_url: String,
    pub location: String,
    pub country: String,
    pub language: String,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct PathSettings {
    pub output_dir: PathBuf,
    pub fallback_dir: PathBuf,
    pub pdf_output_dir: PathBuf,
}

/// Waits inserted between stages to stay under the LLM provider's rate limit.
#[derive(Debug, Clone)]
pub struct PacingSettings {
    pub stage_cooldown: Duration,
    pub scrape_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct WhoisSettings {
    /// `host:port` of the first server queried
    pub server: String,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmSettings,
    pub scraping_model: String,
    pub scraping_temperature: f32,
    pub search: SearchSettings,
    pub paths: PathSettings,
    pub pacing: PacingSettings,
    pub whois: WhoisSettings,
}

impl Config {
    /// Load configuration from the process environment (`.env` is read by `main`).
    pub fn load() -> Result<Self> {
        let api_key = env::var("LLM_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        let llm = LlmSettings {
            api_key,
            base_url: env_or("LLM_BASE_URL", DEFAULT_LLM_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: env_or("LLM_MODEL", "gemini-2.5-flash-lite"),
            temperature: parse_env("LLM_TEMPERATURE", 0.7)?,
            timeout: parse_env("LLM_TIMEOUT_SECS", 60)?,
            max_tokens: parse_env("LLM_MAX_TOKENS", 4096)?,
        };

        let search = SearchSettings {
            api_key: env_or("SERPER_API_KEY", ""),
            base_url: env_or("SERPER_BASE_URL", DEFAULT_SERPER_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            location: env_or("SEARCH_LOCATION", "Tunisia"),
            country: env_or("SEARCH_COUNTRY", "tn"),
            language: env_or("SEARCH_LANGUAGE", "fr"),
            timeout: parse_env("SEARCH_TIMEOUT_SECS", 30)?,
        };

        let paths = PathSettings {
            output_dir: PathBuf::from(env_or("OUTPUT_DIR", "./ai-agent-output")),
            fallback_dir: PathBuf::from(env_or("FALLBACK_DIR", "./fallback")),
            pdf_output_dir: PathBuf::from(env_or("PDF_OUTPUT_DIR", "./pdf-output")),
        };

        let pacing = PacingSettings {
            stage_cooldown: Duration::from_secs(parse_env("STAGE_COOLDOWN_SECS", 60)?),
            scrape_cooldown: Duration::from_secs(parse_env("SCRAPE_COOLDOWN_SECS", 15)?),
        };

        let whois = WhoisSettings {
            server: env_or("WHOIS_SERVER", "whois.iana.org:43"),
            timeout: parse_env("WHOIS_TIMEOUT_SECS", 10)?,
        };

        Ok(Self {
            llm,
            scraping_model: env_or("LLM_SCRAPING_MODEL", "gemini-2.5-flash"),
            scraping_temperature: parse_env("LLM_SCRAPING_TEMPERATURE", 0.0)?,
            search,
            paths,
            pacing,
            whois,
        })
    }

    /// Checks everything the analysis pipeline needs.
    pub fn validate(&self) -> Result<()> {
        self.llm.validate()?;
        self.llm_for_scraping().validate()?;
        if self.search.api_key.trim().is_empty() {
            bail!("SERPER_API_KEY is not set");
        }
        Ok(())
    }

    /// Same endpoint and key, with the extraction model and its temperature.
    pub fn llm_for_scraping(&self) -> LlmSettings {
        LlmSettings {
            model: self.scraping_model.clone(),
            temperature: self.scraping_temperature,
            ..self.llm.clone()
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        _ => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config(llm_base: &str, serper_base: &str, root: &std::path::Path) -> Config {
    Config {
        llm: LlmSettings {
            api_key: "test-key".to_string(),
            base_url: llm_base.to_string(),
            model: "gemini-2.5-flash-lite".to_string(),
            temperature: 0.7,
            timeout: 5,
            max_tokens: 1024,
        },
        scraping_model: "gemini-2.5-flash".to_string(),
        scraping_temperature: 0.0,
        search: SearchSettings {
            api_key: "serper-key".to_string(),
            base_url: serper_base.to_string(),
            location: "Tunisia".to_string(),
            country: "tn".to_string(),
            language: "fr".to_string(),
            timeout: 5,
        },
        paths: PathSettings {
            output_dir: root.join("out"),
            fallback_dir: root.join("fallback"),
            pdf_output_dir: root.join("pdf"),
        },
        pacing: PacingSettings {
            stage_cooldown: Duration::ZERO,
            scrape_cooldown: Duration::ZERO,
        },
        whois: WhoisSettings {
            server: "127.0.0.1:43".to_string(),
            timeout: 2,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scraping_settings_keep_endpoint_and_swap_model() {
        let cfg = test_config("http://llm.local", "http://serper.local", std::path::Path::new("/tmp"));
        let scraping = cfg.llm_for_scraping();
        assert_eq!(scraping.base_url, "http://llm.local");
        assert_eq!(scraping.api_key, "test-key");
        assert_eq!(scraping.model, "gemini-2.5-flash");
        assert_eq!(scraping.temperature, 0.0);
    }

    #[test]
    fn validate_rejects_missing_keys() {
        let mut cfg = test_config("http://llm.local", "http://serper.local", std::path::Path::new("/tmp"));
        assert!(cfg.validate().is_ok());

        cfg.search.api_key.clear();
        assert!(cfg.validate().is_err());

        cfg.search.api_key = "k".into();
        cfg.llm.api_key = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_temperature_and_url() {
        let mut cfg = test_config("http://llm.local", "http://serper.local", std::path::Path::new("/tmp"));
        cfg.llm.temperature = 3.5;
        assert!(cfg.llm.validate().is_err());

        cfg.llm.temperature = 0.5;
        cfg.llm.base_url = "ftp://nope".into();
        assert!(cfg.llm.validate().is_err());
    }
}
