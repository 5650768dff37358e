use crate::config::{
    folder_from_preference, parse_port, read_preferences, Notification, Preferences, DEFAULT_PORT,
    KEY_GUTENBERG_FOLDER, KEY_PORT, KEY_WORDPRESS_FOLDER, SECTION_BASIC, SECTION_SITE,
};
use crate::docker::compose_down;
use crate::error::TestpressError;
use crate::process::ProcessRunner;
use crate::session::Session;
use crate::supervisor::Control;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Unchanged,
    /// Runs were invalidated; `tore_down` says whether `down` was issued.
    Restart { tore_down: bool },
}

pub struct Reactor<'a, R: ?Sized> {
    runner: &'a R,
    session: &'a Session,
}

impl<'a, R: ProcessRunner + ?Sized> Reactor<'a, R> {
    pub fn new(runner: &'a R, session: &'a Session) -> Self {
        Self { runner, session }
    }

    pub fn differs(&self, notification: &Notification) -> bool {
        let applied = self.session.applied();
        match (notification.section.as_str(), notification.key.as_str()) {
            (SECTION_BASIC, KEY_WORDPRESS_FOLDER) => {
                folder_from_preference(&notification.value) != applied.primary_folder
            }
            (SECTION_BASIC, KEY_GUTENBERG_FOLDER) => {
                folder_from_preference(&notification.value) != applied.secondary_folder
            }
            (SECTION_SITE, KEY_PORT) => match parse_port(&notification.value) {
                Ok(0) => applied.port != DEFAULT_PORT,
                Ok(port) => applied.port != port,
                Err(err) => {
                    warn!("ignoring port change: {err}");
                    false
                }
            },
            _ => false,
        }
    }

    pub fn on_preference_saved(&self, notification: &Notification) -> Reaction {
        self.on_preferences_saved(std::slice::from_ref(notification))
    }

    /// Handles every change from one save; at most one restart results.
    pub fn on_preferences_saved(&self, notifications: &[Notification]) -> Reaction {
        let changed: Vec<&Notification> = notifications
            .iter()
            .filter(|notification| self.differs(notification))
            .collect();
        if changed.is_empty() {
            debug!("preferences saved without relevant changes");
            return Reaction::Unchanged;
        }
        for notification in &changed {
            info!(
                "{}.{} changed to '{}'",
                notification.section, notification.key, notification.value
            );
        }

        self.session.invalidate_runs();

        let tore_down = self.session.persistent_descriptor().exists();
        if tore_down {
            info!("stopping containers");
            if let Err(err) = compose_down(self.runner, self.session) {
                warn!("{err}");
            }
        }
        Reaction::Restart { tore_down }
    }
}

pub struct PreferenceWatcher {
    path: PathBuf,
    last: Preferences,
}

impl PreferenceWatcher {
    pub fn new(path: PathBuf) -> Self {
        let last = read_preferences(&path).unwrap_or_else(|err| {
            warn!("failed to read preferences {}: {err}", path.display());
            Preferences::default()
        });
        Self { path, last }
    }

    pub fn poll(&mut self) -> Vec<Notification> {
        match read_preferences(&self.path) {
            Ok(prefs) => {
                let changes = self.last.changes_to(&prefs);
                self.last = prefs;
                changes
            }
            Err(err) => {
                debug!("ignoring unreadable preferences: {err}");
                Vec::new()
            }
        }
    }

    fn concerns(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event
                .paths
                .iter()
                .any(|path| path.file_name() == self.path.file_name())
    }
}

pub type WatchEvents = Receiver<notify::Result<Event>>;

/// Watches the directory holding `path`; saves replace the file by rename.
pub fn start_watch(path: &Path) -> Result<(RecommendedWatcher, WatchEvents), TestpressError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    debug!("watching {} for preference changes", dir.display());
    Ok((watcher, rx))
}

/// Feeds preference saves to the reactor and sends a restart request after
/// each relevant change. Returns when either channel closes.
pub fn watch_preferences<R: ProcessRunner + ?Sized>(
    mut watcher: PreferenceWatcher,
    events: &WatchEvents,
    runner: &R,
    session: &Session,
    restart: &Sender<Control>,
) {
    let reactor = Reactor::new(runner, session);
    for event in events {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!("preference watch error: {err}");
                continue;
            }
        };
        if !watcher.concerns(&event) {
            continue;
        }
        let changes = watcher.poll();
        if changes.is_empty() {
            continue;
        }
        if let Reaction::Restart { .. } = reactor.on_preferences_saved(&changes) {
            if restart.send(Control::Restart).is_err() {
                return;
            }
        }
    }
    debug!("preference watch closed");
}
