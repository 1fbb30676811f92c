use std::sync::Arc;
use surfpilot_core::Config;

use crate::{Oracle, ResponsesOracle};

/// Default API base for providers speaking the Responses API.
fn default_api_base(provider_name: &str) -> &'static str {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Build the oracle described by `config`.
///
/// The provider is `agents.defaults.provider` when set, else the first one
/// with an API key. A missing key is an error unless `OPENAI_API_KEY` is set.
pub fn create_oracle(config: &Config) -> anyhow::Result<Arc<dyn Oracle>> {
    let provider_name = config.provider_name();
    let explicit = config.agents.defaults.provider.is_some();
    let provider_cfg = config.get_provider(&provider_name);

    if explicit && provider_cfg.is_none() {
        return Err(anyhow::anyhow!(
            "Provider '{}' is explicitly configured but not found in providers section",
            provider_name
        ));
    }

    let api_key = config.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key for provider '{}'. Set providers.{}.apiKey in config or OPENAI_API_KEY.",
            provider_name,
            provider_name
        )
    })?;

    let api_base = provider_cfg
        .and_then(|p| p.api_base.as_deref())
        .unwrap_or_else(|| default_api_base(&provider_name));

    let oracle = ResponsesOracle::new_with_proxy(
        &api_key,
        Some(api_base),
        &config.agents.defaults.model,
        provider_cfg.and_then(|p| p.proxy.as_deref()),
        config.network.proxy.as_deref(),
        &config.network.no_proxy,
    );
    Ok(Arc::new(oracle))
}
