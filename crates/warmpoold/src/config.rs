//! Configuration resolution: defaults, file, environment, then flags.

use anyhow::Context;
use warmpool_core::PoolConfig;

use crate::{RunArgs, SourceArgs};

pub fn resolve(source: &SourceArgs, run: Option<&RunArgs>) -> anyhow::Result<PoolConfig> {
    let mut config = match &source.config {
        Some(path) => PoolConfig::from_file(path)?,
        None => PoolConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("applying WARMPOOL_* environment overrides")?;
    apply_flags(&mut config, source, run);
    config.validate()?;
    Ok(config)
}

fn apply_flags(config: &mut PoolConfig, source: &SourceArgs, run: Option<&RunArgs>) {
    if let Some(path) = &source.registry {
        config.registry_path = path.clone();
    }
    let Some(run) = run else {
        return;
    };
    if let Some(listen) = &run.listen {
        config.listen = listen.clone();
    }
    if let Some(reserve) = run.min_reserve {
        config.min_unoccupied_reserve = reserve;
    }
    if let Some(secs) = run.spawn_cooldown {
        config.spawn_cooldown_secs = secs;
    }
    if let Some(secs) = run.grace_period {
        config.shutdown_grace_period_secs = secs;
    }
    if let Some(secs) = run.tick_interval {
        config.tick_interval_secs = secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warmpool.toml");
        std::fs::write(
            &path,
            "min_unoccupied_reserve = 2\nspawn_cooldown_secs = 10\nregistry_path = \"/srv/a.redb\"\n",
        )
        .unwrap();

        let source = SourceArgs {
            config: Some(path),
            registry: Some(PathBuf::from("/srv/b.redb")),
        };
        let run = RunArgs {
            source: source.clone(),
            spawn_cooldown: Some(7),
            ..RunArgs::default()
        };

        let mut config = PoolConfig::from_file(source.config.as_ref().unwrap()).unwrap();
        apply_flags(&mut config, &source, Some(&run));

        assert_eq!(config.min_unoccupied_reserve, 2);
        assert_eq!(config.spawn_cooldown_secs, 7);
        assert_eq!(config.registry_path, PathBuf::from("/srv/b.redb"));
    }

    #[test]
    fn run_flags_ignored_without_run_args() {
        let mut config = PoolConfig::default();
        apply_flags(&mut config, &SourceArgs::default(), None);
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn invalid_flag_values_are_rejected() {
        let mut config = PoolConfig::default();
        let run = RunArgs {
            min_reserve: Some(0),
            ..RunArgs::default()
        };
        apply_flags(&mut config, &SourceArgs::default(), Some(&run));
        assert!(config.validate().is_err());
    }
}
