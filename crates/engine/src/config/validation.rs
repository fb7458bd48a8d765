use super::loader::{ConfigError, EngineConfig};

/// Validate the complete engine configuration.
///
/// Collects every problem before failing so one run reports them all.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_sources(config, &mut errors);
    validate_loader(config, &mut errors);
    validate_tags(config, &mut errors);
    validate_recommendation(config, &mut errors);
    validate_retry(config, &mut errors);
    validate_metrics(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_sources(config: &EngineConfig, errors: &mut Vec<String>) {
    let s = &config.system.sources;

    for (name, location) in [("movies", &s.movies), ("ratings", &s.ratings), ("tags", &s.tags)] {
        if location.trim().is_empty() {
            errors.push(format!("sources.{} must not be empty", name));
        }
    }
}

fn validate_loader(config: &EngineConfig, errors: &mut Vec<String>) {
    let l = &config.system.loader;

    if l.batch_size == 0 {
        errors.push("loader.batch_size must be > 0".into());
    }
    if l.workers == 0 {
        errors.push("loader.workers must be > 0".into());
    }
    if l.workers > 64 {
        errors.push("loader.workers must be <= 64".into());
    }
}

fn validate_tags(config: &EngineConfig, errors: &mut Vec<String>) {
    let w = config.system.tags.weight_per_application;

    if !w.is_finite() || w <= 0.0 {
        errors.push("tags.weight_per_application must be a positive number".into());
    }
}

fn validate_recommendation(config: &EngineConfig, errors: &mut Vec<String>) {
    let r = &config.system.recommendation;

    if !r.liked_threshold.is_finite() {
        errors.push("recommendation.liked_threshold must be finite".into());
    }
    if !r.quality_threshold.is_finite() {
        errors.push("recommendation.quality_threshold must be finite".into());
    }
    if r.top_genres == 0 {
        errors.push("recommendation.top_genres must be > 0".into());
    }
    if r.result_limit == 0 {
        errors.push("recommendation.result_limit must be > 0".into());
    }
}

fn validate_retry(config: &EngineConfig, errors: &mut Vec<String>) {
    let validate_one =
        |rc: &cinegraph_common::config::RetryConfig, name: &str, errors: &mut Vec<String>| {
            if rc.max_attempts == 0 {
                errors.push(format!("retry.{}.max_attempts must be > 0", name));
            }
            if rc.initial_backoff_ms == 0 {
                errors.push(format!("retry.{}.initial_backoff_ms must be > 0", name));
            }
            if rc.max_backoff_ms < rc.initial_backoff_ms {
                errors.push(format!(
                    "retry.{}.max_backoff_ms must be >= initial_backoff_ms",
                    name
                ));
            }
            if rc.backoff_multiplier < 1.0 {
                errors.push(format!("retry.{}.backoff_multiplier must be >= 1.0", name));
            }
        };

    validate_one(&config.system.retry.database, "database", errors);
    validate_one(&config.system.retry.batches, "batches", errors);
}

fn validate_metrics(config: &EngineConfig, errors: &mut Vec<String>) {
    if let Some(addr) = &config.system.metrics.listen_addr {
        if addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("metrics.listen_addr '{}' is not a socket address", addr));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&EngineConfig::defaults()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = EngineConfig::defaults();
        config.system.loader.workers = 0;
        config.system.tags.weight_per_application = -1.0;
        config.system.recommendation.top_genres = 0;
        config.system.retry.batches.backoff_multiplier = 0.5;
        config.system.metrics.listen_addr = Some("localhost".into());

        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("loader.workers"));
        assert!(err.contains("tags.weight_per_application"));
        assert!(err.contains("recommendation.top_genres"));
        assert!(err.contains("retry.batches.backoff_multiplier"));
        assert!(err.contains("metrics.listen_addr"));
    }

    #[test]
    fn test_blank_source_rejected() {
        let mut config = EngineConfig::defaults();
        config.system.sources.tags = "  ".into();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("sources.tags"));
    }
}
