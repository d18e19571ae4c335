use gpfixture_config::load_config;
use gpfixture_config::shared::HarnessConfig;

/// Loads the [`HarnessConfig`], overlays the Greenplum session variables and
/// validates the result.
pub fn load_harness_config() -> anyhow::Result<HarnessConfig> {
    let mut config = load_config::<HarnessConfig>()?;
    config.apply_greenplum_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    Ok(config)
}
