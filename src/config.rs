use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use parley::models::{Role, UserId};

/// Saved login profile for the command-line front end. The API token is
/// stored base64-obfuscated, not encrypted.
#[derive(Serialize, Deserialize, Clone)]
pub struct Profile {
    /// HTTP(S) base of the marketplace backend, e.g. `http://localhost:8000`.
    pub server: String,
    pub user_id: UserId,
    pub full_name: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_role() -> Role {
    Role::Client
}

impl Profile {
    pub fn new(
        server: &str,
        user_id: UserId,
        full_name: &str,
        role: Role,
        token: Option<&str>,
    ) -> Self {
        Profile {
            server: server.to_string(),
            user_id,
            full_name: full_name.to_string(),
            role,
            token: token.map(|t| BASE64.encode(t)),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.token.as_ref().map(|encoded| {
            String::from_utf8(BASE64.decode(encoded).unwrap_or_default()).unwrap_or_default()
        })
    }

    /// Websocket base derived from the HTTP server address.
    pub fn ws_base(&self) -> String {
        if let Some(rest) = self.server.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.server.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", self.server)
        }
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("parley");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

pub fn save_profile(profile: &Profile) -> Result<()> {
    let config_path = get_config_path()?;
    let file = File::create(config_path)?;
    serde_json::to_writer_pretty(file, profile)?;

    info!("Profile saved for user {}", profile.user_id);
    Ok(())
}

pub fn load_profile() -> Result<Option<Profile>> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(None);
    }

    let mut file = File::open(&config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let profile: Profile = serde_json::from_str(&contents)?;
    info!(
        "Loaded profile for user {} from {}",
        profile.user_id,
        config_path.display()
    );

    Ok(Some(profile))
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

#[cfg(test)]
pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("profile.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        set_config_path_override(dir.path().join("profile.json"));

        let profile = Profile::new(
            "http://localhost:8000",
            7,
            "Amina Wanjiru",
            Role::Provider,
            Some("secret-token"),
        );
        save_profile(&profile).unwrap();

        let loaded = load_profile().unwrap().expect("profile should exist");
        assert_eq!(loaded.server, "http://localhost:8000");
        assert_eq!(loaded.user_id, 7);
        assert_eq!(loaded.role, Role::Provider);
        assert_eq!(loaded.get_token().as_deref(), Some("secret-token"));
        // Token is not stored as plaintext.
        assert_ne!(loaded.token.as_deref(), Some("secret-token"));
    }

    #[test]
    fn ws_base_mirrors_http_scheme() {
        let plain = Profile::new("http://localhost:8000", 1, "A", Role::Client, None);
        assert_eq!(plain.ws_base(), "ws://localhost:8000");
        let tls = Profile::new("https://market.example", 1, "A", Role::Client, None);
        assert_eq!(tls.ws_base(), "wss://market.example");
    }
}
