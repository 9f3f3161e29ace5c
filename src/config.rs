use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Google OAuth credentials and the calendar to mirror
    pub google: GoogleConfig,

    /// Notion integration token and the database to mirror into
    pub notion: NotionConfig,
}

/// OAuth credentials for Google Calendar
#[derive(Debug, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Calendar to mirror ("primary" or a calendar's email-style ID)
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
}

/// Notion internal integration credentials
#[derive(Debug, Deserialize)]
pub struct NotionConfig {
    pub api_token: String,
    pub database_id: String,
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

/// Tokens for the authenticated Google account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Tokens {
    /// Whether the access token needs a refresh before use.
    /// A minute of slack keeps an in-flight request from racing expiry.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => chrono::Utc::now() + chrono::Duration::seconds(60) >= at,
            None => true,
        }
    }
}

/// Get the config directory path (~/.config/calmirror)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("calmirror");
    Ok(config_dir)
}

/// Get the config file path (~/.config/calmirror/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Get the tokens file path (~/.config/calmirror/tokens.json)
pub fn tokens_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("tokens.json"))
}

/// Get the sync cursor file path (~/.config/calmirror/sync_cursor.txt)
pub fn cursor_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("sync_cursor.txt"))
}

/// Load config from ~/.config/calmirror/config.toml
pub fn load_config() -> Result<Config> {
    let path = config_path()?;

    if !path.exists() {
        anyhow::bail!(
            "Config file not found at {}\n\n\
            Create it with your Google OAuth credentials and Notion integration:\n\n\
            [google]\n\
            client_id = \"your-client-id.apps.googleusercontent.com\"\n\
            client_secret = \"your-client-secret\"\n\
            calendar_id = \"primary\"\n\n\
            [notion]\n\
            api_token = \"secret_your-integration-token\"\n\
            database_id = \"your-database-id\"\n\n\
            Then run `calmirror-cli auth` to connect your Google account.",
            path.display()
        );
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

    Ok(config)
}

/// Load tokens from ~/.config/calmirror/tokens.json, if the file exists
pub fn load_tokens() -> Result<Option<Tokens>> {
    let path = tokens_path()?;

    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read tokens file at {}", path.display()))?;

    let tokens: Tokens = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse tokens file at {}", path.display()))?;

    Ok(Some(tokens))
}

/// Save tokens to ~/.config/calmirror/tokens.json
pub fn save_tokens(tokens: &Tokens) -> Result<()> {
    let path = tokens_path()?;

    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
    }

    let contents = serde_json::to_string_pretty(tokens).context("Failed to serialize tokens")?;

    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write tokens file at {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [google]
            client_id = "abc.apps.googleusercontent.com"
            client_secret = "shh"
            calendar_id = "team@group.calendar.google.com"

            [notion]
            api_token = "secret_token"
            database_id = "db-123"
            "#,
        )
        .unwrap();

        assert_eq!(config.google.calendar_id, "team@group.calendar.google.com");
        assert_eq!(config.notion.database_id, "db-123");
    }

    #[test]
    fn test_calendar_id_defaults_to_primary() {
        let config: Config = toml::from_str(
            r#"
            [google]
            client_id = "abc.apps.googleusercontent.com"
            client_secret = "shh"

            [notion]
            api_token = "secret_token"
            database_id = "db-123"
            "#,
        )
        .unwrap();

        assert_eq!(config.google.calendar_id, "primary");
    }

    #[test]
    fn test_token_expiry() {
        let fresh = Tokens {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(!fresh.is_expired());

        let stale = Tokens {
            expires_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
            ..fresh.clone()
        };
        assert!(stale.is_expired());

        // Unknown expiry is treated as expired so we refresh before using it
        let unknown = Tokens {
            expires_at: None,
            ..fresh
        };
        assert!(unknown.is_expired());
    }
}
