use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Backend routes, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub register: String,
    pub logout: String,
    pub refresh: String,
    pub me: String,
    pub message_stream: String,
    pub history: String,
    pub conversations: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".into(),
            register: "/auth/register".into(),
            logout: "/auth/logout".into(),
            refresh: "/auth/refresh".into(),
            me: "/auth/me".into(),
            message_stream: "/chat/message/stream".into(),
            history: "/chat/history".into(),
            conversations: "/conversations".into(),
        }
    }
}

impl Endpoints {
    pub fn conversation(&self, id: &str) -> String {
        format!("{}/{}", self.conversations.trim_end_matches('/'), id)
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: Url,
    pub timeout: Duration,
    pub data_dir: PathBuf,
    pub endpoints: Endpoints,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("client configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => format!("Rapport is misconfigured: {detail}. Update rapport.yaml."),
        }
    }
}

impl ClientSettings {
    /// Loads `.env`, then `rapport.yaml` if one exists, then environment
    /// overrides. Missing files are not an error.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let file = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                parse_config(&contents)?
            }
            None => ClientSection::default(),
        };
        resolve_settings(file, |key| std::env::var(key).ok())
    }

    pub fn session_dir(&self) -> PathBuf {
        self.data_dir.join("session")
    }
}

fn parse_config(contents: &str) -> Result<ClientSection, ConfigError> {
    let config: RapportConfig = serde_yaml::from_str(contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid rapport.yaml: {err}")))?;
    Ok(config.client.unwrap_or_default())
}

fn resolve_settings(
    file: ClientSection,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, ConfigError> {
    let raw_url = env("RAPPORT_API_URL")
        .or(file.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let api_url = Url::parse(raw_url.trim())
        .map_err(|err| ConfigError::Invalid(format!("api_url `{raw_url}` is not a URL: {err}")))?;
    if !matches!(api_url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "api_url must use http or https, got `{}`",
            api_url.scheme()
        )));
    }

    let timeout_secs = match env("RAPPORT_TIMEOUT_SECS") {
        Some(value) => value.trim().parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!("RAPPORT_TIMEOUT_SECS `{value}` is not a number"))
        })?,
        None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    };
    if timeout_secs == 0 {
        return Err(ConfigError::Invalid("timeout must be at least one second".into()));
    }

    let data_dir = env("RAPPORT_DATA_DIR")
        .map(PathBuf::from)
        .or(file.data_dir)
        .unwrap_or_else(default_data_dir);

    Ok(ClientSettings {
        api_url,
        timeout: Duration::from_secs(timeout_secs),
        data_dir,
        endpoints: file.endpoints.unwrap_or_default(),
    })
}

fn default_data_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.data_local_dir().join("rapport")
    } else {
        PathBuf::from(".rapport")
    }
}

fn locate_config_file() -> Option<PathBuf> {
    rapport_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn rapport_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("rapport");
        paths.push(config_dir.join("rapport.yaml"));
        paths.push(config_dir.join("rapport.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".rapport").join("rapport.yaml"));
        paths.push(home_dir.join(".rapport").join("rapport.yml"));
    } else {
        paths.push(PathBuf::from("rapport.yaml"));
        paths.push(PathBuf::from("rapport.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct RapportConfig {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    endpoints: Option<Endpoints>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_file_or_env() {
        let settings = resolve_settings(ClientSection::default(), no_env).expect("defaults");
        assert_eq!(settings.api_url.as_str(), "http://localhost:3001/api");
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.endpoints.refresh, "/auth/refresh");
    }

    #[test]
    fn yaml_section_is_applied() {
        let section = parse_config(
            "client:\n  api_url: https://chat.example.com/api\n  timeout_secs: 10\n  endpoints:\n    history: /v2/history\n",
        )
        .expect("yaml");
        let settings = resolve_settings(section, no_env).expect("settings");
        assert_eq!(settings.api_url.host_str(), Some("chat.example.com"));
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.endpoints.history, "/v2/history");
        assert_eq!(settings.endpoints.login, "/auth/login");
    }

    #[test]
    fn environment_overrides_file() {
        let section = ClientSection {
            api_url: Some("https://file.example.com".into()),
            ..ClientSection::default()
        };
        let settings = resolve_settings(section, |key| match key {
            "RAPPORT_API_URL" => Some("http://env.example.com/api".into()),
            "RAPPORT_DATA_DIR" => Some("/tmp/rapport-test".into()),
            _ => None,
        })
        .expect("settings");
        assert_eq!(settings.api_url.host_str(), Some("env.example.com"));
        assert_eq!(settings.session_dir(), PathBuf::from("/tmp/rapport-test/session"));
    }

    #[test]
    fn rejects_bad_values() {
        let err = resolve_settings(
            ClientSection {
                api_url: Some("ftp://example.com".into()),
                ..ClientSection::default()
            },
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = resolve_settings(ClientSection::default(), |key| {
            (key == "RAPPORT_TIMEOUT_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.user_message().contains("RAPPORT_TIMEOUT_SECS"));
    }

    #[test]
    fn conversation_route_joins_id() {
        assert_eq!(Endpoints::default().conversation("c1"), "/conversations/c1");
    }
}
