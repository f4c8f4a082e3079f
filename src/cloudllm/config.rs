//! Provider registry — loads named provider instances from YAML configuration (or environment
//! variables alone, when no config file is present) and hands back ready-to-use
//! [`ProviderAdapter`] instances by id.
//!
//! # Example
//!
//! ```rust,no_run
//! use cloudllm::cloudllm::config::ProviderRegistry;
//!
//! let registry = ProviderRegistry::load(None).unwrap();
//! if let Ok(adapter) = registry.get("openai") {
//!     let _ = adapter.provider_name();
//! }
//! ```

use crate::cloudllm::client_wrapper::ProviderAdapter;
use crate::cloudllm::clients::{claude::AnthropicProvider, gemini::GeminiProvider, grok::GrokProvider, openai::OpenAIProvider};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// The wire dialect a provider instance speaks — determines which adapter type is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Openai,
    Anthropic,
    Gemini,
    Grok,
}

fn default_enabled() -> bool {
    true
}

/// One provider entry as it appears in the `providers:` list in `llm_providers.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstanceConfig {
    /// Unique identifier this instance is registered and looked up under (e.g. `openai_personal`).
    pub provider_id: String,
    pub provider_type: Dialect,
    /// User-facing label. Carried through to [`RegisteredProvider`] but otherwise opaque to this
    /// crate — display only.
    pub display_name: String,
    pub api_key_env: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Entries with `enabled: false` are skipped silently during load — distinct from a missing
    /// API key, which is skipped with a `log::warn!`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub models: Vec<String>,
}

/// The top-level shape of `llm_providers.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmProvidersConfig {
    #[serde(default)]
    pub providers: Vec<ProviderInstanceConfig>,
    #[serde(default)]
    pub default_provider_id: Option<String>,
}

/// Errors raised while loading or querying a [`ProviderRegistry`].
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// The same provider id appeared twice while registering (e.g. once from a file and once
    /// from a programmatic call).
    DuplicateProvider(String),
    /// [`ProviderRegistry::get`] was asked for an id that was never registered.
    UnknownProvider(String),
    /// A provider entry named an environment variable that isn't set. Registration does not fail
    /// outright for this — the entry is skipped with a `log::warn!` and loading continues.
    MissingApiKey { provider: String, env_var: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateProvider(id) => write!(f, "duplicate provider id: {}", id),
            ConfigError::UnknownProvider(id) => write!(f, "unknown provider id: {}", id),
            ConfigError::MissingApiKey { provider, env_var } => write!(
                f,
                "provider '{}' is missing its API key (expected env var '{}')",
                provider, env_var
            ),
        }
    }
}

impl Error for ConfigError {}

/// Search path, in priority order, for the provider config file when no explicit path is given.
const CONFIG_SEARCH_PATH: &[&str] = &[
    "./llm_providers.yaml",
    "./config/llm_providers.yaml",
    "./.config/llm_providers.yaml",
];

fn locate_config_file() -> Option<PathBuf> {
    CONFIG_SEARCH_PATH
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Hardcoded fallback provider set used when no YAML file is found on the search path. One
/// entry is registered per recognized API-key env var that is actually set.
fn env_only_fallback() -> LlmProvidersConfig {
    let providers = vec![
        ProviderInstanceConfig {
            provider_id: "openai".to_string(),
            provider_type: Dialect::Openai,
            display_name: "OpenAI".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            default_model: Some("gpt-4.1-mini".to_string()),
            enabled: true,
            metadata: HashMap::new(),
            models: vec![],
        },
        ProviderInstanceConfig {
            provider_id: "anthropic".to_string(),
            provider_type: Dialect::Anthropic,
            display_name: "Anthropic Claude".to_string(),
            base_url: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            default_model: Some("claude-3-5-sonnet-latest".to_string()),
            enabled: true,
            metadata: HashMap::new(),
            models: vec![],
        },
        ProviderInstanceConfig {
            provider_id: "gemini".to_string(),
            provider_type: Dialect::Gemini,
            display_name: "Google Gemini".to_string(),
            base_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            default_model: Some("gemini-1.5-pro".to_string()),
            enabled: true,
            metadata: HashMap::new(),
            models: vec![],
        },
        ProviderInstanceConfig {
            provider_id: "grok".to_string(),
            provider_type: Dialect::Grok,
            display_name: "Grok".to_string(),
            base_url: None,
            api_key_env: "GROK_API_KEY".to_string(),
            default_model: Some("grok-2-latest".to_string()),
            enabled: true,
            metadata: HashMap::new(),
            models: vec![],
        },
    ];
    LlmProvidersConfig {
        providers,
        default_provider_id: None,
    }
}

fn build_adapter(dialect: Dialect, api_key: String, base_url: Option<&str>) -> Arc<dyn ProviderAdapter> {
    match dialect {
        Dialect::Openai => match base_url {
            Some(url) => Arc::new(OpenAIProvider::with_base_url(api_key, url)),
            None => Arc::new(OpenAIProvider::new(api_key)),
        },
        Dialect::Anthropic => match base_url {
            Some(url) => Arc::new(AnthropicProvider::with_base_url(api_key, url)),
            None => Arc::new(AnthropicProvider::new(api_key)),
        },
        Dialect::Gemini => match base_url {
            Some(url) => Arc::new(GeminiProvider::with_base_url(api_key, url)),
            None => Arc::new(GeminiProvider::new(api_key)),
        },
        Dialect::Grok => match base_url {
            Some(url) => Arc::new(GrokProvider::with_base_url(api_key, url)),
            None => Arc::new(GrokProvider::new(api_key)),
        },
    }
}

/// A registered provider instance: its adapter plus the metadata the reasoning engine needs to
/// pick a default model and report which named models this entry is willing to serve.
pub struct RegisteredProvider {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub display_name: String,
    pub default_model: Option<String>,
    pub models: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Holds every provider instance resolved from configuration, keyed by id.
///
/// Adapter construction (and therefore API-key resolution) happens during [`ProviderRegistry::load`]
/// / [`ProviderRegistry::register`] — there is no separate deferred "first use" step in this
/// design, since registration itself is the bootstrap point a hosting application controls.
pub struct ProviderRegistry {
    providers: HashMap<String, RegisteredProvider>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    fn empty() -> Self {
        ProviderRegistry {
            providers: HashMap::new(),
            default_provider: None,
        }
    }

    /// Load provider configuration from `path`, or (if `None`) from the first file found on the
    /// search path, or (if no file exists anywhere on the search path) from recognized
    /// environment variables alone.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => locate_config_file(),
        };

        let parsed = match resolved {
            Some(p) => {
                let text = std::fs::read_to_string(&p).unwrap_or_default();
                serde_yaml::from_str(&text).unwrap_or_default()
            }
            None => env_only_fallback(),
        };

        Self::from_parsed(parsed)
    }

    fn from_parsed(parsed: LlmProvidersConfig) -> Result<Self, ConfigError> {
        let mut registry = ProviderRegistry::empty();
        for entry in parsed.providers {
            if !entry.enabled {
                log::debug!("skipping provider '{}': disabled", entry.provider_id);
                continue;
            }
            match std::env::var(&entry.api_key_env) {
                Ok(key) => {
                    registry.register(
                        entry.provider_id,
                        entry.provider_type,
                        entry.display_name,
                        key,
                        entry.base_url.as_deref(),
                        entry.default_model,
                        entry.models,
                        entry.metadata,
                    )?;
                }
                Err(_) => {
                    log::warn!(
                        "skipping provider '{}': env var '{}' is not set",
                        entry.provider_id,
                        entry.api_key_env
                    );
                }
            }
        }
        registry.default_provider = parsed.default_provider_id.or_else(|| {
            registry
                .providers
                .keys()
                .next()
                .cloned()
        });
        Ok(registry)
    }

    /// Register one provider instance, constructing its adapter immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        id: impl Into<String>,
        dialect: Dialect,
        display_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<&str>,
        default_model: Option<String>,
        models: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), ConfigError> {
        let id = id.into();
        if self.providers.contains_key(&id) {
            return Err(ConfigError::DuplicateProvider(id));
        }
        let adapter = build_adapter(dialect, api_key.into(), base_url);
        self.providers.insert(
            id,
            RegisteredProvider {
                adapter,
                display_name: display_name.into(),
                default_model,
                models,
                metadata,
            },
        );
        Ok(())
    }

    /// Look up a provider's adapter by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
        self.providers
            .get(id)
            .map(|p| Arc::clone(&p.adapter))
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))
    }

    /// Look up the full registered entry (adapter + model metadata) by id.
    pub fn get_provider(&self, id: &str) -> Result<&RegisteredProvider, ConfigError> {
        self.providers
            .get(id)
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))
    }

    /// The id chosen as the default provider: either the config's explicit `default_provider`,
    /// or (failing that) the first id registered, or `None` if the registry is empty.
    pub fn default_provider_id(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}

static GLOBAL_REGISTRY: Lazy<RwLock<Arc<ProviderRegistry>>> = Lazy::new(|| {
    let registry = ProviderRegistry::load(None).unwrap_or_else(|_| ProviderRegistry::empty());
    RwLock::new(Arc::new(registry))
});

/// The process-wide default registry, lazily loaded on first access per [`ProviderRegistry::load`]'s
/// search-path rules. Tests and embedding applications that need a different configuration should
/// call [`set_global_registry`] instead of relying on this default.
pub fn get_global_registry() -> Arc<ProviderRegistry> {
    Arc::clone(&GLOBAL_REGISTRY.read().unwrap())
}

/// Replace the process-wide default registry — primarily for test isolation, where each test
/// wants its own set of (fake) provider ids without touching real environment variables.
pub fn set_global_registry(registry: ProviderRegistry) {
    *GLOBAL_REGISTRY.write().unwrap() = Arc::new(registry);
}
