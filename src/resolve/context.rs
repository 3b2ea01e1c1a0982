use crate::config::ConfigStore;
use crate::errors::{Result, SessionError};
use crate::runtime::ContainerRuntime;

/// Contexts tried, in order, when the config names none that exists.
pub const FALLBACK_CONTEXTS: [&str; 3] = ["containai-docker", "containai-secure", "docker-containai"];

/// The non-isolated engine, only used with `--force`.
pub const DEFAULT_CONTEXT: &str = "default";

/// Pick the runtime context (isolation boundary) to target.
pub async fn resolve_context(
    runtime: &dyn ContainerRuntime,
    env_override: Option<&str>,
    config: Option<&dyn ConfigStore>,
    force: bool,
) -> Result<String> {
    if let Some(name) = env_override {
        if runtime.context_exists(name).await? {
            return Ok(name.to_string());
        }
        return Err(SessionError::UnknownContext(name.to_string()));
    }

    if let Some(config) = config
        && let Some(value) = config.get("secure_engine.context_name")?
        && let Some(name) = value.as_str()
    {
        if runtime.context_exists(name).await? {
            return Ok(name.to_string());
        }
        tracing::warn!(context = name, "configured context does not exist, trying defaults");
    }

    for name in FALLBACK_CONTEXTS {
        if runtime.context_exists(name).await? {
            return Ok(name.to_string());
        }
    }

    if force {
        tracing::warn!("no isolated context found; using '{}' because of --force", DEFAULT_CONTEXT);
        return Ok(DEFAULT_CONTEXT.to_string());
    }

    Err(SessionError::NoIsolationContext)
}
