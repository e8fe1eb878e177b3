use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Most recent connections kept in [`Preferences::connection_history`].
const MAX_HISTORY: usize = 16;

/// Room and connect options a session is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub simulcast: bool,
    pub adaptive_stream: bool,
    pub dynacast: bool,
    pub report_stats: bool,
    pub auto_subscribe: bool,
    /// Send media without subscribing to anyone else's.
    pub publish_mode: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            simulcast: true,
            adaptive_stream: false,
            dynacast: false,
            report_stats: false,
            auto_subscribe: true,
            publish_mode: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionHistoryEntry {
    pub url: String,
    pub token: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_true")]
    pub simulcast: bool,
    #[serde(default)]
    pub adaptive_stream: bool,
    #[serde(default)]
    pub dynacast: bool,
    #[serde(default)]
    pub report_stats: bool,
    #[serde(default = "default_true")]
    pub auto_subscribe: bool,
    #[serde(default)]
    pub publish_mode: bool,
    #[serde(default)]
    pub connection_history: Vec<ConnectionHistoryEntry>,
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            url: String::new(),
            token: String::new(),
            simulcast: options.simulcast,
            adaptive_stream: options.adaptive_stream,
            dynacast: options.dynacast,
            report_stats: options.report_stats,
            auto_subscribe: options.auto_subscribe,
            publish_mode: options.publish_mode,
            connection_history: Vec::new(),
        }
    }
}

impl Preferences {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            simulcast: self.simulcast,
            adaptive_stream: self.adaptive_stream,
            dynacast: self.dynacast,
            report_stats: self.report_stats,
            auto_subscribe: self.auto_subscribe,
            publish_mode: self.publish_mode,
        }
    }
}

/// JSON-file backed preferences. Every setter writes through immediately.
pub struct PreferencesStore {
    preferences: Mutex<Preferences>,
    file_path: PathBuf,
}

impl PreferencesStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("preferences.json");
        let preferences = Self::load(&file_path);
        Self {
            preferences: Mutex::new(preferences),
            file_path,
        }
    }

    pub fn get(&self) -> Preferences {
        self.lock().clone()
    }

    pub fn set_url(&self, url: &str) {
        self.update(|p| p.url = url.to_string());
    }

    pub fn set_token(&self, token: &str) {
        self.update(|p| p.token = token.to_string());
    }

    pub fn set_simulcast(&self, enabled: bool) {
        self.update(|p| p.simulcast = enabled);
    }

    pub fn set_adaptive_stream(&self, enabled: bool) {
        self.update(|p| p.adaptive_stream = enabled);
    }

    pub fn set_dynacast(&self, enabled: bool) {
        self.update(|p| p.dynacast = enabled);
    }

    pub fn set_report_stats(&self, enabled: bool) {
        self.update(|p| p.report_stats = enabled);
    }

    pub fn set_auto_subscribe(&self, enabled: bool) {
        self.update(|p| p.auto_subscribe = enabled);
    }

    pub fn set_publish_mode(&self, enabled: bool) {
        self.update(|p| p.publish_mode = enabled);
    }

    /// Remember a successful connection, most recent first.
    pub fn record_connection(&self, url: &str, token: &str) {
        self.update(|p| {
            p.connection_history
                .retain(|e| !(e.url == url && e.token == token));
            p.connection_history.insert(
                0,
                ConnectionHistoryEntry {
                    url: url.to_string(),
                    token: token.to_string(),
                },
            );
            p.connection_history.truncate(MAX_HISTORY);
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Preferences> {
        self.preferences.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut Preferences)) {
        let snapshot = {
            let mut preferences = self.lock();
            f(&mut preferences);
            preferences.clone()
        };
        self.save(&snapshot);
    }

    fn save(&self, preferences: &Preferences) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create preferences dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(preferences) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("cannot write preferences: {e}");
                }
            }
            Err(e) => tracing::warn!("cannot serialize preferences: {e}"),
        }
    }

    fn load(path: &Path) -> Preferences {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring corrupt preferences file: {e}");
                Preferences::default()
            }),
            Err(_) => Preferences::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_preferences() {
        let p = Preferences::default();
        assert!(p.url.is_empty());
        assert!(p.simulcast);
        assert!(p.auto_subscribe);
        assert!(!p.publish_mode);
        assert_eq!(p.session_options(), SessionOptions::default());
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = PreferencesStore::new(dir.path());
        assert_eq!(store.get(), Preferences::default());
    }

    #[test]
    fn test_every_setter_persists() {
        let dir = temp_dir();
        {
            let store = PreferencesStore::new(dir.path());
            store.set_url("wss://example.livekit.cloud");
            store.set_token("secret");
            store.set_simulcast(false);
            store.set_adaptive_stream(true);
            store.set_dynacast(true);
            store.set_report_stats(true);
            store.set_auto_subscribe(false);
            store.set_publish_mode(true);
        }
        let p = PreferencesStore::new(dir.path()).get();
        assert_eq!(p.url, "wss://example.livekit.cloud");
        assert_eq!(p.token, "secret");
        assert_eq!(
            p.session_options(),
            SessionOptions {
                simulcast: false,
                adaptive_stream: true,
                dynacast: true,
                report_stats: true,
                auto_subscribe: false,
                publish_mode: true,
            }
        );
    }

    #[test]
    fn test_file_uses_camel_case_keys() {
        let dir = temp_dir();
        let store = PreferencesStore::new(dir.path());
        store.set_adaptive_stream(true);
        let raw = fs::read_to_string(dir.path().join("preferences.json")).unwrap();
        assert!(raw.contains("\"adaptiveStream\": true"));
        assert!(raw.contains("\"publishMode\""));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("preferences.json"), "not json!!!").unwrap();
        let store = PreferencesStore::new(dir.path());
        assert_eq!(store.get(), Preferences::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("preferences.json"),
            r#"{"url":"wss://a","dynacast":true}"#,
        )
        .unwrap();
        let p = PreferencesStore::new(dir.path()).get();
        assert_eq!(p.url, "wss://a");
        assert!(p.dynacast);
        assert!(p.simulcast);
        assert!(p.auto_subscribe);
    }

    #[test]
    fn test_history_is_most_recent_first_and_deduplicated() {
        let dir = temp_dir();
        let store = PreferencesStore::new(dir.path());
        store.record_connection("wss://a", "t1");
        store.record_connection("wss://b", "t2");
        store.record_connection("wss://a", "t1");

        let history = store.get().connection_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].url, "wss://a");
        assert_eq!(history[1].url, "wss://b");
    }

    #[test]
    fn test_history_is_capped() {
        let dir = temp_dir();
        let store = PreferencesStore::new(dir.path());
        for i in 0..(MAX_HISTORY + 4) {
            store.record_connection(&format!("wss://room-{i}"), "t");
        }
        let history = store.get().connection_history;
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].url, format!("wss://room-{}", MAX_HISTORY + 3));
    }
}
