use std::path::Path;

use iridium_stomp_server::{ServerOptions, StaticCredentials};
use serde::Deserialize;

/// Contents of the `stompd` TOML file.
///
/// ```toml
/// [server]
/// port = 61613
/// secured = true
/// heartbeat = { x = 10000, y = 10000 }
///
/// [[users]]
/// login = "guest"
/// passcode = "guest"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerOptions,
    pub users: Vec<User>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub login: String,
    pub passcode: String,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::parse(&text).map_err(|e| format!("Invalid configuration in {}: {}", path.display(), e))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn credentials(&self) -> StaticCredentials {
        self.users
            .iter()
            .map(|u| (u.login.clone(), u.passcode.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iridium_stomp_server::Heartbeat;

    #[test]
    fn empty_file_uses_defaults() {
        let config = FileConfig::parse("").unwrap();
        assert_eq!(config.server, ServerOptions::default());
        assert!(config.users.is_empty());
    }

    #[test]
    fn partial_server_table() {
        let config = FileConfig::parse(
            r#"
            [server]
            port = 7000
            secured = true
            supported_versions = ["1.2"]
            heartbeat = { x = 500, y = 2000 }

            [[users]]
            login = "guest"
            passcode = "guest"

            [[users]]
            login = "admin"
            passcode = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 7000);
        assert!(config.server.secured);
        assert_eq!(config.server.supported_versions, vec!["1.2".to_string()]);
        assert_eq!(config.server.heartbeat, Heartbeat::new(500, 2000));
        assert_eq!(config.server.host, ServerOptions::default().host);
        assert_eq!(config.credentials().len(), 2);
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(FileConfig::parse("[server]\nport = \"nope\"").is_err());
    }
}
