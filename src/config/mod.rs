// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(path, &contents)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn parse_config(path: &Path, contents: &str) -> Result<Config> {
    let is_yaml = matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    );

    let config = if is_yaml {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_json_config() {
        let path = std::env::temp_dir().join(format!("lb-config-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(
            &path,
            r#"{"backends": [{"url": "http://127.0.0.1:9001"}], "health_check": {"interval_secs": 2}}"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.health_check.interval_secs, 2);
        assert_eq!(config.health_check.timeout_secs, 5);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_config() {
        let path = std::env::temp_dir().join(format!("lb-config-{}.yml", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "backends: []\n").await.unwrap();

        assert!(load_config(&path).await.is_err());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file() {
        assert!(load_config("/nonexistent/lb.yaml").await.is_err());
    }
}
