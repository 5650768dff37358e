use crate::error::TestpressError;
use dirs::{config_dir, data_dir};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_PROJECT_NAME: &str = "testpress";
const PREFERENCES_VERSION: u32 = 1;

pub const SECTION_BASIC: &str = "basic";
pub const SECTION_SITE: &str = "site";
pub const SECTION_COMPOSE: &str = "compose";
pub const KEY_WORDPRESS_FOLDER: &str = "wordpress-folder";
pub const KEY_GUTENBERG_FOLDER: &str = "gutenberg-folder";
pub const KEY_PORT: &str = "port";
pub const KEY_PROJECT_NAME: &str = "project-name";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Preferences {
    pub version: u32,
    pub basic: BasicPreferences,
    pub site: SitePreferences,
    pub compose: ComposePreferences,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct BasicPreferences {
    pub wordpress_folder: String,
    pub gutenberg_folder: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SitePreferences {
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ComposePreferences {
    pub project_name: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            basic: BasicPreferences::default(),
            site: SitePreferences::default(),
            compose: ComposePreferences::default(),
        }
    }
}

impl Default for SitePreferences {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl Default for ComposePreferences {
    fn default() -> Self {
        Self {
            project_name: DEFAULT_PROJECT_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub section: String,
    pub key: String,
    pub value: String,
}

impl Notification {
    pub fn new(section: &str, key: &str, value: impl Into<String>) -> Self {
        Self {
            section: section.to_string(),
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub primary_folder: Option<PathBuf>,
    pub secondary_folder: Option<PathBuf>,
    /// Zero means unset.
    pub port: u16,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            primary_folder: None,
            secondary_folder: None,
            port: DEFAULT_PORT,
        }
    }
}

pub fn folder_from_preference(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(expand_path(trimmed)))
    }
}

impl Snapshot {
    pub fn from_preferences(prefs: &Preferences) -> Self {
        Self {
            primary_folder: folder_from_preference(&prefs.basic.wordpress_folder),
            secondary_folder: folder_from_preference(&prefs.basic.gutenberg_folder),
            port: if prefs.site.port == 0 {
                DEFAULT_PORT
            } else {
                prefs.site.port
            },
        }
    }

    /// The primary folder and port, when both are configured.
    pub fn startable(&self) -> Option<(&Path, u16)> {
        match &self.primary_folder {
            Some(folder) if self.port != 0 => Some((folder.as_path(), self.port)),
            _ => None,
        }
    }

    pub fn primary_display(&self) -> String {
        display_optional(self.primary_folder.as_deref())
    }

    pub fn secondary_display(&self) -> String {
        display_optional(self.secondary_folder.as_deref())
    }
}

fn display_optional(path: Option<&Path>) -> String {
    path.map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl Preferences {
    pub fn get(&self, section: &str, key: &str) -> Result<String, TestpressError> {
        match (section, key) {
            (SECTION_BASIC, KEY_WORDPRESS_FOLDER) => Ok(self.basic.wordpress_folder.clone()),
            (SECTION_BASIC, KEY_GUTENBERG_FOLDER) => Ok(self.basic.gutenberg_folder.clone()),
            (SECTION_SITE, KEY_PORT) => Ok(self.site.port.to_string()),
            (SECTION_COMPOSE, KEY_PROJECT_NAME) => Ok(self.compose.project_name.clone()),
            _ => Err(unknown_preference(section, key)),
        }
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) -> Result<(), TestpressError> {
        match (section, key) {
            (SECTION_BASIC, KEY_WORDPRESS_FOLDER) => {
                self.basic.wordpress_folder = value.trim().to_string();
            }
            (SECTION_BASIC, KEY_GUTENBERG_FOLDER) => {
                self.basic.gutenberg_folder = value.trim().to_string();
            }
            (SECTION_SITE, KEY_PORT) => {
                self.site.port = parse_port(value)?;
            }
            (SECTION_COMPOSE, KEY_PROJECT_NAME) => {
                self.compose.project_name = value.trim().to_string();
            }
            _ => return Err(unknown_preference(section, key)),
        }
        validate_preferences(self)
    }

    /// Notifications for every watched preference whose value differs
    /// between `self` and `newer`.
    pub fn changes_to(&self, newer: &Preferences) -> Vec<Notification> {
        let mut changes = Vec::new();
        if self.basic.wordpress_folder != newer.basic.wordpress_folder {
            changes.push(Notification::new(
                SECTION_BASIC,
                KEY_WORDPRESS_FOLDER,
                newer.basic.wordpress_folder.clone(),
            ));
        }
        if self.basic.gutenberg_folder != newer.basic.gutenberg_folder {
            changes.push(Notification::new(
                SECTION_BASIC,
                KEY_GUTENBERG_FOLDER,
                newer.basic.gutenberg_folder.clone(),
            ));
        }
        if self.site.port != newer.site.port {
            changes.push(Notification::new(
                SECTION_SITE,
                KEY_PORT,
                newer.site.port.to_string(),
            ));
        }
        changes
    }
}

fn unknown_preference(section: &str, key: &str) -> TestpressError {
    TestpressError::Config(format!(
        "unknown preference '{section}.{key}'; known: basic.wordpress-folder, basic.gutenberg-folder, site.port, compose.project-name"
    ))
}

pub fn parse_port(value: &str) -> Result<u16, TestpressError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| TestpressError::Config(format!("invalid port '{}'", value.trim())))
}

pub fn read_preferences_from_str(content: &str) -> Result<Preferences, TestpressError> {
    let prefs: Preferences = serde_yaml::from_str(content)?;
    if prefs.version != PREFERENCES_VERSION {
        return Err(TestpressError::Config(format!(
            "unsupported preferences version {}",
            prefs.version
        )));
    }
    validate_preferences(&prefs)?;
    Ok(prefs)
}

pub fn read_preferences(path: &Path) -> Result<Preferences, TestpressError> {
    if !path.exists() {
        return Ok(Preferences::default());
    }
    let content = fs::read_to_string(path)?;
    read_preferences_from_str(&content)
}

pub fn validate_preferences(prefs: &Preferences) -> Result<(), TestpressError> {
    let project = prefs.compose.project_name.trim();
    if project.is_empty() {
        return Err(TestpressError::Config(
            "compose.project-name must be non-empty".to_string(),
        ));
    }
    if !project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(TestpressError::Config(format!(
            "compose.project-name '{project}' may only contain lowercase letters, digits, '-' and '_'"
        )));
    }
    for (field, value) in [
        ("basic.wordpress-folder", &prefs.basic.wordpress_folder),
        ("basic.gutenberg-folder", &prefs.basic.gutenberg_folder),
    ] {
        if value.contains('\n') || value.contains('\r') {
            return Err(TestpressError::Config(format!(
                "{field} contains an invalid newline"
            )));
        }
    }
    Ok(())
}

pub fn write_preferences(path: &Path, prefs: &Preferences) -> Result<(), TestpressError> {
    validate_preferences(prefs)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let body = serde_yaml::to_string(prefs)?;
    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, body)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("TESTPRESS_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("testpress")
        .join("preferences.yaml")
}

pub fn resolve_tools_dir() -> PathBuf {
    if let Ok(path) = env::var("TESTPRESS_TOOLS_DIR") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("testpress")
        .join("tools")
}
