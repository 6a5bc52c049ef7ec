//! Broker connection options and where they come from.
//!
//! Options are layered, later sources overriding earlier ones:
//!
//! 1. `appsettings.json`
//! 2. `appsettings.Local.json`
//! 3. `appsettings.{ENV}.json`, `ENV` from `RPC_ENVIRONMENT` (default `Production`)
//! 4. environment variables prefixed `RPC__`, nested with `__`
//!    (e.g. `RPC__RABBITMQ__HOSTNAME=broker`)
//!
//! All files are optional. Within the merged result, the `RabbitMQ` section
//! supplies the base options and the `RpcRabbitMQ` section overrides any field
//! it sets. Section and field names are matched ignoring case and underscores,
//! so `HostName`, `hostname` and `host_name` are the same key.
//!
//! ```json
//! {
//!   "RabbitMQ":    { "HostName": "rabbit.internal", "UserName": "svc", "Password": "secret" },
//!   "RpcRabbitMQ": { "VirtualHost": "rpc" }
//! }
//! ```

use std::path::Path;

use config::{Config, Environment, File, FileFormat, Map, Value};
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Variable selecting the environment-specific settings file.
pub const ENVIRONMENT_VAR: &str = "RPC_ENVIRONMENT";

/// Environment used when [`ENVIRONMENT_VAR`] is unset.
pub const DEFAULT_ENVIRONMENT: &str = "Production";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "RPC";

/// Separator for environment variable prefix and nesting.
pub const ENV_SEPARATOR: &str = "__";

/// Section with the base broker options.
pub const BASE_SECTION: &str = "RabbitMQ";

/// Section whose fields override [`BASE_SECTION`].
pub const OVERRIDE_SECTION: &str = "RpcRabbitMQ";

/// Broker connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RabbitMqOptions {
    #[serde(alias = "hostname", alias = "host_name")]
    pub host_name: String,
    #[serde(alias = "port")]
    pub port: u16,
    #[serde(alias = "ssl")]
    pub ssl: bool,
    #[serde(alias = "username", alias = "user_name")]
    pub user_name: String,
    #[serde(alias = "password")]
    pub password: String,
    #[serde(alias = "virtualhost", alias = "virtual_host")]
    pub virtual_host: String,
}

impl Default for RabbitMqOptions {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            port: 5672,
            ssl: false,
            user_name: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
        }
    }
}

impl RabbitMqOptions {
    /// Load from the working directory and the process environment.
    pub fn load() -> Result<Self> {
        Self::from_dir(".")
    }

    /// Load from the settings files in `dir` and the process environment.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let environment = std::env::var(ENVIRONMENT_VAR)
            .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
        Self::layered(dir.as_ref(), &environment, None)
    }

    /// Load with an explicit environment name and, when given, a fixed set of
    /// environment variables instead of the process environment.
    pub(crate) fn layered(
        dir: &Path,
        environment: &str,
        env_vars: Option<Map<String, String>>,
    ) -> Result<Self> {
        let json = |name: String| {
            File::from(dir.join(name))
                .format(FileFormat::Json)
                .required(false)
        };

        let settings = Config::builder()
            .add_source(json("appsettings.json".to_string()))
            .add_source(json("appsettings.Local.json".to_string()))
            .add_source(json(format!("appsettings.{}.json", environment)))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .source(env_vars),
            )
            .build()?;

        Self::from_settings(settings)
    }

    /// Resolve options from already merged settings.
    pub fn from_settings(settings: Config) -> Result<Self> {
        let root: Map<String, Value> = settings.try_deserialize()?;

        let mut options = Self::default();
        for section in [BASE_SECTION, OVERRIDE_SECTION] {
            if let Some(table) = lookup(&root, section) {
                options.overlay(table.clone().into_table()?)?;
            }
        }

        tracing::debug!(
            host = %options.host_name,
            port = options.port,
            vhost = %options.virtual_host,
            "Broker options resolved"
        );
        Ok(options)
    }

    /// Apply every field the section sets.
    fn overlay(&mut self, section: Map<String, Value>) -> Result<()> {
        if let Some(v) = lookup(&section, "HostName") {
            self.host_name = v.clone().into_string()?;
        }
        if let Some(v) = lookup(&section, "Port") {
            let port = v.clone().into_int()?;
            self.port = u16::try_from(port).map_err(|_| {
                config::ConfigError::Message(format!("Port {} is out of range", port))
            })?;
        }
        if let Some(v) = lookup(&section, "Ssl") {
            self.ssl = v.clone().into_bool()?;
        }
        if let Some(v) = lookup(&section, "UserName") {
            self.user_name = v.clone().into_string()?;
        }
        if let Some(v) = lookup(&section, "Password") {
            self.password = v.clone().into_string()?;
        }
        if let Some(v) = lookup(&section, "VirtualHost") {
            self.virtual_host = v.clone().into_string()?;
        }
        Ok(())
    }

    /// Connection URI for `lapin`.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: if self.ssl {
                AMQPScheme::AMQPS
            } else {
                AMQPScheme::AMQP
            },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.user_name.clone(),
                    password: self.password.clone(),
                },
                host: self.host_name.clone(),
                port: self.port,
            },
            vhost: self.virtual_host.clone(),
            query: Default::default(),
        }
    }
}

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn lookup<'a>(table: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let wanted = normalize(key);
    table
        .iter()
        .find(|(k, _)| normalize(k) == wanted)
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        fs::write(dir.path().join(name), contents).unwrap();
    }

    fn no_env() -> Option<Map<String, String>> {
        Some(Map::new())
    }

    fn load(dir: &TempDir, environment: &str) -> Result<RabbitMqOptions> {
        RabbitMqOptions::layered(dir.path(), environment, no_env())
    }

    #[test]
    fn test_defaults_without_sources() {
        let dir = TempDir::new().unwrap();
        let options = load(&dir, "Production").unwrap();
        assert_eq!(options, RabbitMqOptions::default());
        assert_eq!(options.host_name, "localhost");
        assert_eq!(options.port, 5672);
    }

    #[test]
    fn test_file_cascade() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "appsettings.json",
            r#"{"RabbitMQ": {"HostName": "base", "Port": 5673, "UserName": "svc"}}"#,
        );
        write(
            &dir,
            "appsettings.Local.json",
            r#"{"RabbitMQ": {"HostName": "local"}}"#,
        );
        write(
            &dir,
            "appsettings.Staging.json",
            r#"{"RabbitMQ": {"Password": "staging-secret"}}"#,
        );

        let options = load(&dir, "Staging").unwrap();
        assert_eq!(options.host_name, "local");
        assert_eq!(options.port, 5673);
        assert_eq!(options.user_name, "svc");
        assert_eq!(options.password, "staging-secret");
    }

    #[test]
    fn test_other_environment_file_ignored() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "appsettings.Staging.json",
            r#"{"RabbitMQ": {"HostName": "staging"}}"#,
        );

        let options = load(&dir, "Production").unwrap();
        assert_eq!(options.host_name, "localhost");
    }

    #[test]
    fn test_rpc_section_overrides_base() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "appsettings.json",
            r#"{
                "RabbitMQ": {"HostName": "shared", "VirtualHost": "/", "Ssl": false},
                "RpcRabbitMQ": {"VirtualHost": "rpc", "Ssl": true}
            }"#,
        );

        let options = load(&dir, "Production").unwrap();
        assert_eq!(options.host_name, "shared");
        assert_eq!(options.virtual_host, "rpc");
        assert!(options.ssl);
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "appsettings.json",
            r#"{"RabbitMQ": {"HostName": "file", "Port": 5673}}"#,
        );

        let mut env = Map::new();
        env.insert("RPC__RABBITMQ__HOSTNAME".to_string(), "from-env".to_string());
        env.insert("RPC__RABBITMQ__PORT".to_string(), "5999".to_string());

        let result = RabbitMqOptions::layered(dir.path(), "Production", Some(env));
        let options = result.unwrap();
        assert_eq!(options.host_name, "from-env");
        assert_eq!(options.port, 5999);
    }

    #[test]
    fn test_out_of_range_port_is_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "appsettings.json", r#"{"RabbitMQ": {"Port": 70000}}"#);
        assert!(load(&dir, "Production").is_err());
    }

    #[test]
    fn test_amqp_uri() {
        let options = RabbitMqOptions {
            host_name: "rabbit".to_string(),
            port: 5671,
            ssl: true,
            user_name: "svc".to_string(),
            password: "pw".to_string(),
            virtual_host: "rpc".to_string(),
        };

        let uri = options.amqp_uri();
        assert!(matches!(uri.scheme, AMQPScheme::AMQPS));
        assert_eq!(uri.authority.host, "rabbit");
        assert_eq!(uri.authority.port, 5671);
        assert_eq!(uri.authority.userinfo.username, "svc");
        assert_eq!(uri.vhost, "rpc");
    }

    #[test]
    fn test_serde_accepts_pascal_and_snake_case() {
        let pascal = r#"{"HostName": "a", "Port": 1}"#;
        let snake = r#"{"host_name": "a", "port": 1}"#;
        let pascal: RabbitMqOptions = serde_json::from_str(pascal).unwrap();
        let snake: RabbitMqOptions = serde_json::from_str(snake).unwrap();
        assert_eq!(pascal, snake);
        assert_eq!(pascal.user_name, "guest");
    }
}
