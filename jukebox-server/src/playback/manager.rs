//! Canonical playback state owner
//!
//! [`PlaybackManager`] is the single writer of [`PlaybackState`]. Every
//! mutation runs under one async lock in three steps:
//!
//! 1. validate the precondition, failing without touching state
//! 2. send the device command, failing without touching state; a failed
//!    command is retried once after re-establishing the device session
//! 3. mutate, checkpoint, publish `PlaybackStateChanged`
//!
//! Readers use [`get_snapshot`](PlaybackManager::get_snapshot), which never
//! waits on the writer lock.

use super::state::{next_position, previous_position, Advance, PlaybackCore};
use crate::connection::ConnectionManager;
use crate::device::{DeviceConnection, DeviceError};
use crate::error::{Error, Result};
use jukebox_common::events::{
    Event, EventBus, EventHandler, HandlerError, HandlerResult, JukeboxEvent, PlaybackState,
    PlaybackStatus, Track,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub struct PlaybackManager {
    core: Mutex<PlaybackCore>,
    snapshot: RwLock<Arc<PlaybackState>>,
    connections: Arc<ConnectionManager>,
    bus: Arc<EventBus>,
    runtime: Option<Handle>,
    this: Weak<PlaybackManager>,
}

impl PlaybackManager {
    /// Create the manager with an empty playback state
    ///
    /// Bus handlers spawn their work on the runtime current at construction.
    pub fn new(connections: Arc<ConnectionManager>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: Mutex::new(PlaybackCore::default()),
            snapshot: RwLock::new(Arc::new(PlaybackState::empty())),
            connections,
            bus,
            runtime: Handle::try_current().ok(),
            this: this.clone(),
        })
    }

    /// Immutable copy of the latest committed state
    pub fn get_snapshot(&self) -> Arc<PlaybackState> {
        self.snapshot.read().clone()
    }

    fn device(&self) -> Result<Arc<dyn DeviceConnection>> {
        self.connections.active_connection().ok_or(Error::NoActiveDevice)
    }

    /// Run `op` against `device`, reconnecting once if it fails
    ///
    /// The error of the first attempt is returned when the reconnect fails.
    async fn command<T, F, Fut>(&self, device: &Arc<dyn DeviceConnection>, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn DeviceConnection>) -> Fut,
        Fut: Future<Output = std::result::Result<T, DeviceError>>,
    {
        let first = match op(device.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        warn!("Command on '{}' failed: {}; reconnecting", device.name(), first);
        if let Err(e) = device.reconnect().await {
            warn!("Reconnect to '{}' failed: {}", device.name(), e);
            return Err(first.into());
        }
        info!("Reconnected to '{}'", device.name());
        Ok(op(device.clone()).await?)
    }

    /// Publish the state under the writer lock
    fn commit(&self, core: &mut MutexGuard<'_, PlaybackCore>) {
        core.checkpoint();
        debug_assert!(core.state.is_consistent());
        let snapshot = Arc::new(core.state.clone());
        *self.snapshot.write() = snapshot.clone();
        self.bus.publish(JukeboxEvent::PlaybackStateChanged {
            state: PlaybackState::clone(&snapshot),
        });
    }

    /// Load track `index` on the device and start it
    async fn start_track(
        &self,
        core: &mut MutexGuard<'_, PlaybackCore>,
        device: &Arc<dyn DeviceConnection>,
        index: usize,
    ) -> Result<()> {
        let track = core
            .state
            .playlist
            .get(index)
            .cloned()
            .ok_or(Error::IndexOutOfRange {
                index,
                len: core.state.playlist.len(),
            })?;

        let loaded = &track;
        self.command(device, move |d| async move { d.play_track(loaded).await })
            .await?;
        info!("Playing '{}' on {}", track.title, device.name());

        core.select(index);
        core.loaded_on = Some(device.name().to_string());
        core.set_status(PlaybackStatus::Playing);
        Ok(())
    }

    // ========================================
    // Transport
    // ========================================

    /// Resume, or start the current (or first) track
    pub async fn play(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        if core.state.playlist.is_empty() {
            return Err(Error::InvalidState("playlist is empty".to_string()));
        }
        let device = self.device()?;
        if core.state.status == PlaybackStatus::Playing {
            return Ok(());
        }

        let loaded_here = core.loaded_on.as_deref() == Some(device.name());
        match core.state.current_index() {
            Some(_) if loaded_here && core.state.status == PlaybackStatus::Paused => {
                self.command(&device, |d| async move { d.resume().await })
                    .await?;
                core.set_status(PlaybackStatus::Playing);
            }
            Some(index) => self.start_track(&mut core, &device, index).await?,
            None => self.start_track(&mut core, &device, 0).await?,
        }
        self.commit(&mut core);
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        let device = self.device()?;
        if core.state.status != PlaybackStatus::Playing {
            return Ok(());
        }

        self.command(&device, |d| async move { d.pause().await })
            .await?;
        core.set_status(PlaybackStatus::Paused);
        self.commit(&mut core);
        Ok(())
    }

    /// Advance one track; past the end wraps with repeat, otherwise stops
    pub async fn next(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        self.advance(&mut core).await
    }

    async fn advance(&self, core: &mut MutexGuard<'_, PlaybackCore>) -> Result<()> {
        if core.state.playlist.is_empty() {
            return Err(Error::InvalidState("playlist is empty".to_string()));
        }
        let device = self.device()?;

        let step = next_position(
            core.state.current_index(),
            core.state.playlist.len(),
            core.state.repeat,
        );
        match step {
            Advance::To(index) => self.start_track(core, &device, index).await?,
            Advance::End => {
                self.command(&device, |d| async move { d.stop().await })
                    .await?;
                info!("End of playlist");
                core.loaded_on = None;
                core.set_status(PlaybackStatus::Idle);
            }
        }
        self.commit(core);
        Ok(())
    }

    /// Go back one track, or restart the current one if it is under way
    pub async fn previous(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        if core.state.playlist.is_empty() {
            return Err(Error::InvalidState("playlist is empty".to_string()));
        }
        let device = self.device()?;

        let index = previous_position(
            core.state.current_index(),
            core.state.playlist.len(),
            core.state.repeat,
            core.clock.elapsed(),
        );
        self.start_track(&mut core, &device, index).await?;
        self.commit(&mut core);
        Ok(())
    }

    /// Stop the device and reset to an empty playlist
    pub async fn stop(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        if let Some(device) = self.connections.active_connection() {
            if core.loaded_on.as_deref() == Some(device.name()) {
                self.command(&device, |d| async move { d.stop().await })
                    .await?;
            }
        }
        core.reset();
        self.commit(&mut core);
        Ok(())
    }

    // ========================================
    // Playlist
    // ========================================

    /// Replace the playlist with `tracks` and start the first one
    pub async fn play_album(&self, tracks: Vec<Track>) -> Result<()> {
        if tracks.is_empty() {
            return Err(Error::InvalidInput("album has no tracks".to_string()));
        }
        let mut core = self.core.lock().await;
        let device = self.device()?;

        let mut first = tracks[0].clone();
        first.track_number = 0;
        let loaded = &first;
        self.command(&device, move |d| async move { d.play_track(loaded).await })
            .await?;
        info!("Playing album '{}' ({} tracks)", first.album, tracks.len());

        core.load_playlist(tracks);
        core.select(0);
        core.loaded_on = Some(device.name().to_string());
        core.set_status(PlaybackStatus::Playing);
        self.commit(&mut core);
        Ok(())
    }

    pub async fn play_track_at_index(&self, index: usize) -> Result<()> {
        let mut core = self.core.lock().await;
        let len = core.state.playlist.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        let device = self.device()?;

        self.start_track(&mut core, &device, index).await?;
        self.commit(&mut core);
        Ok(())
    }

    // ========================================
    // Settings
    // ========================================

    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        if volume > 100 {
            return Err(Error::InvalidInput(format!(
                "volume must be between 0 and 100, got {}",
                volume
            )));
        }
        let mut core = self.core.lock().await;
        let device = self.device()?;

        self.command(&device, move |d| async move { d.set_volume(volume).await })
            .await?;
        core.state.volume = volume;
        self.commit(&mut core);
        Ok(())
    }

    pub async fn set_repeat(&self, repeat: bool) -> Result<()> {
        let mut core = self.core.lock().await;
        core.state.repeat = repeat;
        self.commit(&mut core);
        Ok(())
    }

    // ========================================
    // Device notifications
    // ========================================

    /// Adopt a newly active device
    ///
    /// A track still loaded on the previous device pauses; the next `play`
    /// reloads it. A track already started on `device_name` keeps playing.
    /// Volume is read back from the new device when possible.
    pub async fn on_device_changed(&self, device_name: &str) {
        let mut core = self.core.lock().await;
        core.state.device_name = Some(device_name.to_string());
        if core.state.status == PlaybackStatus::Playing
            && core.loaded_on.as_deref() != Some(device_name)
        {
            core.set_status(PlaybackStatus::Paused);
        }

        match self.connections.active_connection() {
            Some(device) if device.name() == device_name => match device.volume().await {
                Ok(volume) => core.state.volume = volume,
                Err(e) => warn!("Volume resync from '{}' failed: {}", device_name, e),
            },
            _ => debug!("'{}' no longer active, skipping volume resync", device_name),
        }
        self.commit(&mut core);
    }

    /// Move on after the device finished the current track
    pub async fn on_track_finished(&self, device_name: &str) -> Result<()> {
        let mut core = self.core.lock().await;
        if core.loaded_on.as_deref() != Some(device_name)
            || core.state.status != PlaybackStatus::Playing
        {
            debug!("Ignoring track end from '{}'", device_name);
            return Ok(());
        }
        self.advance(&mut core).await
    }

    fn spawn<F>(&self, task: F) -> HandlerResult
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| HandlerError::new("no async runtime available"))?;
        runtime.spawn(task);
        Ok(())
    }
}

impl EventHandler for PlaybackManager {
    fn name(&self) -> &str {
        "PlaybackManager"
    }

    fn handle(&self, event: &Event) -> HandlerResult {
        let Some(manager) = self.this.upgrade() else {
            return Ok(());
        };
        match &event.payload {
            JukeboxEvent::DeviceChanged { device_name } => {
                let device_name = device_name.clone();
                self.spawn(async move { manager.on_device_changed(&device_name).await })
            }
            JukeboxEvent::TrackFinished { device_name } => {
                let device_name = device_name.clone();
                self.spawn(async move {
                    if let Err(e) = manager.on_track_finished(&device_name).await {
                        warn!("Auto-advance failed: {}", e);
                        manager.bus.publish(JukeboxEvent::PlaybackError {
                            message: e.to_string(),
                        });
                    }
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MemoryBackend, StaticDeviceRegistry};
    use jukebox_common::events::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track {
                track_number: i + 1,
                title: format!("Song {}", i + 1),
                artist: "Band".to_string(),
                album: "Record".to_string(),
                year: Some(2001),
                duration: 180.0,
                thumb: None,
                uri: format!("http://media.local/record/{}.mp3", i + 1),
            })
            .collect()
    }

    struct Fixture {
        backend: MemoryBackend,
        connections: Arc<ConnectionManager>,
        playback: Arc<PlaybackManager>,
        changes: Arc<AtomicUsize>,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(StaticDeviceRegistry::from_names(["Living Room", "Kitchen"]));
        let backend = MemoryBackend::from_registry(registry.as_ref());
        let bus = Arc::new(EventBus::new());
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(backend.clone()),
            registry,
            bus.clone(),
        ));
        let playback = PlaybackManager::new(connections.clone(), bus.clone());

        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        bus.subscribe(
            EventKind::PlaybackStateChanged,
            Arc::new(move |_: &Event| -> HandlerResult {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        connections.connect("Living Room", TIMEOUT).await.unwrap();
        playback.on_device_changed("Living Room").await;
        changes.store(0, Ordering::SeqCst);

        Fixture {
            backend,
            connections,
            playback,
            changes,
        }
    }

    #[tokio::test]
    async fn test_play_album_starts_first_track() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();

        let snapshot = f.playback.get_snapshot();
        assert_eq!(snapshot.status, PlaybackStatus::Playing);
        assert_eq!(snapshot.current_index(), Some(0));
        assert_eq!(snapshot.playlist.len(), 3);
        assert!(snapshot.is_consistent());
        assert_eq!(f.changes.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.backend.commands("Living Room").last().map(String::as_str),
            Some("play http://media.local/record/1.mp3")
        );
    }

    #[tokio::test]
    async fn test_index_out_of_range_leaves_state_unchanged() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();
        let before = f.playback.get_snapshot();

        let err = f.playback.play_track_at_index(5).await.unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 5, len: 3 }));
        assert_eq!(f.playback.get_snapshot(), before);
        assert_eq!(f.changes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_active_device() {
        let registry = Arc::new(StaticDeviceRegistry::from_names(["Kitchen"]));
        let bus = Arc::new(EventBus::new());
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(MemoryBackend::from_registry(registry.as_ref())),
            registry,
            bus.clone(),
        ));
        let playback = PlaybackManager::new(connections, bus);

        let err = playback.play_album(tracks(2)).await.unwrap_err();
        assert!(matches!(err, Error::NoActiveDevice));
        assert!(playback.get_snapshot().playlist.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_device_does_not_mutate() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();
        f.backend.set_reachable("Living Room", false);

        let err = f.playback.next().await.unwrap_err();
        assert!(matches!(err, Error::DeviceUnreachable(_)));
        assert_eq!(f.playback.get_snapshot().current_index(), Some(0));
    }

    #[tokio::test]
    async fn test_next_stops_at_end_without_repeat() {
        let f = fixture().await;
        f.playback.play_album(tracks(2)).await.unwrap();

        f.playback.next().await.unwrap();
        assert_eq!(f.playback.get_snapshot().current_index(), Some(1));

        f.playback.next().await.unwrap();
        let snapshot = f.playback.get_snapshot();
        assert_eq!(snapshot.status, PlaybackStatus::Idle);
        assert_eq!(snapshot.current_index(), Some(1));
        assert_eq!(snapshot.elapsed_time, 0.0);
    }

    #[tokio::test]
    async fn test_next_wraps_with_repeat() {
        let f = fixture().await;
        f.playback.play_album(tracks(2)).await.unwrap();
        f.playback.set_repeat(true).await.unwrap();

        f.playback.next().await.unwrap();
        f.playback.next().await.unwrap();
        let snapshot = f.playback.get_snapshot();
        assert_eq!(snapshot.current_index(), Some(0));
        assert_eq!(snapshot.status, PlaybackStatus::Playing);
        assert!(snapshot.repeat);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let f = fixture().await;
        f.playback.play_album(tracks(2)).await.unwrap();
        f.playback.pause().await.unwrap();
        assert_eq!(f.playback.get_snapshot().status, PlaybackStatus::Paused);

        f.playback.play().await.unwrap();
        assert_eq!(f.playback.get_snapshot().status, PlaybackStatus::Playing);
        let commands = f.backend.commands("Living Room");
        assert_eq!(&commands[commands.len() - 2..], ["pause", "resume"]);
    }

    #[tokio::test]
    async fn test_set_volume() {
        let f = fixture().await;
        f.playback.set_volume(35).await.unwrap();
        assert_eq!(f.playback.get_snapshot().volume, 35);
        assert_eq!(f.backend.device_volume("Living Room"), Some(35));

        let err = f.playback.set_volume(101).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(f.playback.get_snapshot().volume, 35);
    }

    #[tokio::test]
    async fn test_device_change_resyncs_volume_and_reloads() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();
        f.backend.set_device_volume("Kitchen", 72);

        f.connections.connect("Kitchen", TIMEOUT).await.unwrap();
        f.playback.on_device_changed("Kitchen").await;

        let snapshot = f.playback.get_snapshot();
        assert_eq!(snapshot.device_name.as_deref(), Some("Kitchen"));
        assert_eq!(snapshot.volume, 72);
        assert_eq!(snapshot.status, PlaybackStatus::Paused);

        // The track is loaded again on the new device, not resumed
        f.playback.play().await.unwrap();
        assert_eq!(
            f.backend.commands("Kitchen").last().map(String::as_str),
            Some("play http://media.local/record/1.mp3")
        );
    }

    #[tokio::test]
    async fn test_late_device_change_keeps_playback_started_there() {
        let f = fixture().await;
        f.connections.connect("Kitchen", TIMEOUT).await.unwrap();
        f.playback.play_album(tracks(3)).await.unwrap();

        // Notification for the switch arrives after playback already began
        f.playback.on_device_changed("Kitchen").await;

        let snapshot = f.playback.get_snapshot();
        assert_eq!(snapshot.status, PlaybackStatus::Playing);
        assert_eq!(snapshot.device_name.as_deref(), Some("Kitchen"));

        f.playback.pause().await.unwrap();
        assert_eq!(f.playback.get_snapshot().status, PlaybackStatus::Paused);
        assert_eq!(
            f.backend.commands("Kitchen").last().map(String::as_str),
            Some("pause")
        );
    }

    #[tokio::test]
    async fn test_lost_session_is_reestablished() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();
        f.backend.interrupt_session("Living Room");

        f.playback.next().await.unwrap();

        assert_eq!(f.playback.get_snapshot().current_index(), Some(1));
        let commands = f.backend.commands("Living Room");
        assert_eq!(
            &commands[commands.len() - 2..],
            ["reconnect", "play http://media.local/record/2.mp3"]
        );
    }

    #[tokio::test]
    async fn test_failed_reconnect_surfaces_unreachable() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();
        f.playback.pause().await.unwrap();
        f.backend.set_reachable("Living Room", false);

        let err = f.playback.play().await.unwrap_err();
        assert!(matches!(err, Error::DeviceUnreachable(_)));
        assert_eq!(f.playback.get_snapshot().status, PlaybackStatus::Paused);
        assert!(!f
            .backend
            .commands("Living Room")
            .contains(&"reconnect".to_string()));
    }

    #[tokio::test]
    async fn test_volume_resync_failure_keeps_previous_volume() {
        let f = fixture().await;
        f.playback.set_volume(40).await.unwrap();
        f.backend.set_volume_readable("Kitchen", false);

        f.connections.connect("Kitchen", TIMEOUT).await.unwrap();
        f.playback.on_device_changed("Kitchen").await;

        let snapshot = f.playback.get_snapshot();
        assert_eq!(snapshot.device_name.as_deref(), Some("Kitchen"));
        assert_eq!(snapshot.volume, 40);
    }

    #[tokio::test]
    async fn test_track_finished_advances() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();

        f.playback.on_track_finished("Kitchen").await.unwrap();
        assert_eq!(f.playback.get_snapshot().current_index(), Some(0));

        f.playback.on_track_finished("Living Room").await.unwrap();
        assert_eq!(f.playback.get_snapshot().current_index(), Some(1));
    }

    #[tokio::test]
    async fn test_stop_resets_state() {
        let f = fixture().await;
        f.playback.play_album(tracks(3)).await.unwrap();
        f.playback.stop().await.unwrap();

        let snapshot = f.playback.get_snapshot();
        assert!(snapshot.playlist.is_empty());
        assert!(snapshot.current_track.is_none());
        assert_eq!(snapshot.device_name.as_deref(), Some("Living Room"));
    }
}
