use crate::error::Result;
use super::types::RunConfig;
use std::path::Path;

/// Parse a stratadb.yaml file into a RunConfig.
/// Relative database paths are resolved against the file's directory.
pub fn parse_config(path: &Path) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config_str(&content)?;

    if let Some(base) = path.parent() {
        for db in &mut config.databases {
            if let Some(db_path) = &db.path {
                if db_path.is_relative() {
                    db.path = Some(base.join(db_path));
                }
            }
        }
    }

    Ok(config)
}

/// Parse a run configuration YAML string into a RunConfig
pub fn parse_config_str(content: &str) -> Result<RunConfig> {
    let config: RunConfig = serde_yaml::from_str(content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::error::StrataError;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
databases:
  - name: group
    path: dbs/group
  - name: private
    backend: filesystem
    path: /srv/private
    public: false
    format: yaml
  - name: archive
    backend: remote
    url: "sqlite://archive.db"
"#;

    #[test]
    fn test_parse_config_str() {
        let config = parse_config_str(CONFIG).unwrap();
        assert_eq!(config.databases.len(), 3);

        let group = &config.databases[0];
        assert_eq!(group.backend_kind().unwrap(), BackendKind::Filesystem);
        assert!(group.public);
        assert!(group.format.is_none());

        let private = &config.databases[1];
        assert!(!private.public);
        assert_eq!(private.format.as_deref(), Some("yaml"));

        let archive = &config.databases[2];
        assert_eq!(archive.backend_kind().unwrap(), BackendKind::Remote);
        assert_eq!(archive.endpoint().unwrap(), "sqlite://archive.db");
        assert!(archive.storage_path().is_err());
    }

    #[test]
    fn test_unknown_backend_is_configuration_error() {
        let config = parse_config_str("databases:\n  - name: x\n    backend: tape\n").unwrap();
        assert!(matches!(
            config.databases[0].backend_kind(),
            Err(StrataError::Configuration(_))
        ));
    }

    #[test]
    fn test_parse_config_resolves_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stratadb.yaml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = parse_config(&path).unwrap();
        assert_eq!(
            config.databases[0].path.as_deref(),
            Some(tmp.path().join("dbs/group").as_path())
        );
        assert_eq!(
            config.databases[1].path.as_deref(),
            Some(Path::new("/srv/private"))
        );
    }

    #[test]
    fn test_empty_config() {
        let config = parse_config_str("{}").unwrap();
        assert!(config.databases.is_empty());
    }
}
