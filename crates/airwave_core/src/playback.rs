//! Playback Controller
//!
//! User-facing transport on top of one [`StreamSession`]: what is playing,
//! what comes next, and whether the shared graph is allowed to make sound.
//! Stations are live and have no position, so pausing one disconnects it;
//! tracks pause in place.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::catalog::{PlayableItem, RadioStation, Track};
use crate::error::StreamResult;
use crate::graph::{Activation, AudioGraphManager, GraphState};
use crate::message::SessionEvent;
use crate::session::{ConnectionState, StreamSession};

/// What the player shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub item: Option<PlayableItem>,
    pub state: ConnectionState,
    pub is_playing: bool,
    /// Setting up, stalled, or waiting for a retry
    pub is_buffering: bool,
    /// Only for terminal errors
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub queue_position: Option<usize>,
    pub queue_length: usize,
    pub volume: f32,
    pub muted: bool,
    pub master_volume: f32,
}

#[derive(Default)]
struct Queue {
    items: Vec<PlayableItem>,
    position: usize,
    current: Option<PlayableItem>,
}

impl Queue {
    fn has_next(&self) -> bool {
        self.position + 1 < self.items.len()
    }
}

pub struct PlaybackController {
    graph: Arc<AudioGraphManager>,
    session: StreamSession,
    queue: Mutex<Queue>,
}

impl PlaybackController {
    /// Must be called inside a tokio runtime; spawns the auto-advance task
    pub fn new(graph: Arc<AudioGraphManager>, session: StreamSession) -> Arc<Self> {
        let events = session.subscribe();
        let controller = Arc::new(Self {
            graph,
            session,
            queue: Mutex::new(Queue::default()),
        });
        tokio::spawn(auto_advance(Arc::downgrade(&controller), events));
        controller
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn graph(&self) -> &Arc<AudioGraphManager> {
        &self.graph
    }

    pub async fn play_station(&self, station: RadioStation) -> StreamResult<()> {
        self.play_queue(vec![PlayableItem::Station(station)], 0).await
    }

    /// Replace the queue with `tracks` and start at `start`
    pub async fn play_tracks(&self, tracks: Vec<Track>, start: usize) -> StreamResult<()> {
        let items = tracks.into_iter().map(PlayableItem::Track).collect();
        self.play_queue(items, start).await
    }

    pub async fn play_url(&self, url: &str) -> StreamResult<()> {
        self.play_queue(
            vec![PlayableItem::Url {
                url: url.to_string(),
            }],
            0,
        )
        .await
    }

    async fn play_queue(&self, items: Vec<PlayableItem>, start: usize) -> StreamResult<()> {
        let item = {
            let mut queue = self.queue.lock();
            queue.position = start.min(items.len().saturating_sub(1));
            queue.items = items;
            queue.items.get(queue.position).cloned()
        };
        match item {
            Some(item) => self.start(item, Activation::UserGesture).await,
            None => {
                self.stop();
                Ok(())
            }
        }
    }

    async fn start(&self, item: PlayableItem, activation: Activation) -> StreamResult<()> {
        self.ensure_graph(activation).await?;
        self.begin(item).await
    }

    /// Connect `item`; the graph is already running
    async fn begin(&self, item: PlayableItem) -> StreamResult<()> {
        info!("Playing {}", item.title());
        let url = item.stream_url().to_string();
        self.queue.lock().current = Some(item);
        self.session.connect(&url).await
    }

    /// Bring the graph to `running`
    ///
    /// Only direct user actions pass [`Activation::UserGesture`]; playback the
    /// player starts on its own is programmatic and can be refused.
    async fn ensure_graph(&self, activation: Activation) -> StreamResult<()> {
        if self.graph.state() == GraphState::Error {
            self.graph.retry().await?;
        }
        self.graph.resume(activation).await?;
        Ok(())
    }

    pub fn pause(&self) {
        let is_track = self
            .queue
            .lock()
            .current
            .as_ref()
            .is_some_and(PlayableItem::is_track);
        if is_track {
            self.session.pause();
        } else {
            self.session.disconnect();
        }
    }

    /// Continue the current item: in place for a paused track, otherwise by
    /// reconnecting
    pub async fn resume(&self) -> StreamResult<()> {
        let Some(item) = self.queue.lock().current.clone() else {
            return Ok(());
        };
        let in_place =
            item.is_track() && self.session.is_paused() && self.session.state().is_active();
        if in_place {
            self.ensure_graph(Activation::UserGesture).await?;
            return self.session.resume_playback().await;
        }
        self.start(item, Activation::UserGesture).await
    }

    pub async fn toggle(&self) -> StreamResult<()> {
        if self.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.resume().await
        }
    }

    pub fn stop(&self) {
        self.session.disconnect();
        self.queue.lock().current = None;
    }

    /// Skip forward; no-op at the end of the queue
    pub async fn next(&self) -> StreamResult<()> {
        self.step_forward(Activation::UserGesture).await
    }

    /// Move to the next item once the graph agrees to run
    ///
    /// A refused resume leaves the queue where it was.
    async fn step_forward(&self, activation: Activation) -> StreamResult<()> {
        if !self.queue.lock().has_next() {
            return Ok(());
        }
        self.ensure_graph(activation).await?;
        let item = {
            let mut queue = self.queue.lock();
            if !queue.has_next() {
                return Ok(());
            }
            queue.position += 1;
            queue.items[queue.position].clone()
        };
        self.begin(item).await
    }

    /// Skip back; no-op at the start of the queue
    pub async fn previous(&self) -> StreamResult<()> {
        let item = {
            let mut queue = self.queue.lock();
            if queue.position == 0 || queue.items.is_empty() {
                return Ok(());
            }
            queue.position -= 1;
            queue.items[queue.position].clone()
        };
        self.start(item, Activation::UserGesture).await
    }

    pub fn set_volume(&self, level: f32) -> f32 {
        self.session.set_volume(level)
    }

    pub fn set_muted(&self, muted: bool) {
        self.session.set_muted(muted)
    }

    pub fn set_master_volume(&self, level: f32) -> f32 {
        self.graph.set_master_volume(level)
    }

    pub fn current(&self) -> Option<PlayableItem> {
        self.queue.lock().current.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.session.state() == ConnectionState::Connected && !self.session.is_paused()
    }

    pub fn status(&self) -> PlaybackStatus {
        let snapshot = self.session.snapshot();
        let (item, queue_position, queue_length) = {
            let queue = self.queue.lock();
            let position = (!queue.items.is_empty()).then_some(queue.position);
            (queue.current.clone(), position, queue.items.len())
        };
        let is_buffering = matches!(
            snapshot.state,
            ConnectionState::Resolving | ConnectionState::Connecting | ConnectionState::Buffering
        ) || (snapshot.state == ConnectionState::Error && snapshot.retrying);
        let error_message = snapshot
            .error_message
            .filter(|_| snapshot.state == ConnectionState::Error && !snapshot.retrying);

        PlaybackStatus {
            item,
            state: snapshot.state,
            is_playing: snapshot.state == ConnectionState::Connected && !snapshot.paused,
            is_buffering,
            error_message,
            retry_count: snapshot.retry_count,
            queue_position,
            queue_length,
            volume: snapshot.volume,
            muted: snapshot.muted,
            master_volume: self.graph.master_volume(),
        }
    }

    async fn advance_after_end(&self) -> StreamResult<()> {
        let has_next = {
            let queue = self.queue.lock();
            queue.current.as_ref().is_some_and(PlayableItem::is_track) && queue.has_next()
        };
        if has_next {
            debug!("Track ended, advancing");
            self.step_forward(Activation::Programmatic).await
        } else {
            debug!("Queue finished");
            Ok(())
        }
    }
}

async fn auto_advance(controller: Weak<PlaybackController>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Ended) => {
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                if let Err(e) = controller.advance_after_end().await {
                    warn!("Auto-advance failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("Auto-advance skipped {} events", skipped),
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use airwave_dsp::AnalyserConfig;

    use crate::config::{GraphConfig, SessionConfig};
    use crate::error::{GraphError, StreamError};
    use crate::graph::{AutoplayPolicy, OfflineBackend};
    use crate::media::{MediaElementFactory, MediaEvent};
    use crate::resolver::StreamResolver;
    use crate::test_support::{MockResolver, Script, ScriptedMediaFactory};

    struct Fixture {
        backend: Arc<OfflineBackend>,
        media: Arc<ScriptedMediaFactory>,
        controller: Arc<PlaybackController>,
    }

    fn fixture(policy: AutoplayPolicy) -> Fixture {
        let backend = Arc::new(OfflineBackend::new(policy));
        let graph = Arc::new(AudioGraphManager::new(
            Arc::clone(&backend) as _,
            GraphConfig::default(),
        ));
        let media = Arc::new(ScriptedMediaFactory::new());
        let session = StreamSession::new(
            Arc::clone(&graph),
            Arc::new(MockResolver::new()) as Arc<dyn StreamResolver>,
            Arc::clone(&media) as Arc<dyn MediaElementFactory>,
            SessionConfig::default(),
            AnalyserConfig::default(),
        );
        Fixture {
            backend,
            media,
            controller: PlaybackController::new(graph, session),
        }
    }

    fn station(id: &str) -> RadioStation {
        RadioStation {
            id: id.to_string(),
            name: format!("Station {id}"),
            genre: None,
            url: format!("http://radio/{id}"),
            direct_url: None,
            image: None,
        }
    }

    fn tracks(n: usize) -> Vec<Track> {
        (0..n)
            .map(|i| Track {
                id: format!("t{i}"),
                title: format!("Track {i}"),
                artist: None,
                url: format!("http://cdn/t{i}.mp3"),
                duration: Some(120),
            })
            .collect()
    }

    async fn settle_tasks() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_station_resumes_gated_graph() {
        let f = fixture(AutoplayPolicy::RequireGesture);
        f.controller.play_station(station("jazz")).await.unwrap();

        assert_eq!(f.controller.graph().state(), GraphState::Running);
        let status = f.controller.status();
        assert!(status.is_playing);
        assert!(!status.is_buffering);
        assert_eq!(status.queue_length, 1);
        assert_eq!(status.item.unwrap().title(), "Station jazz");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_station_disconnects_and_resume_reconnects() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.controller.play_station(station("jazz")).await.unwrap();

        f.controller.pause();
        assert_eq!(f.controller.session().state(), ConnectionState::Disconnected);
        assert!(f.media.element(0).is_stopped());
        assert!(f.controller.current().is_some());

        f.controller.resume().await.unwrap();
        assert!(f.controller.is_playing());
        assert_eq!(f.media.created_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_pauses_in_place() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.controller.play_tracks(tracks(1), 0).await.unwrap();

        f.controller.toggle().await.unwrap();
        assert!(!f.controller.is_playing());
        assert_eq!(f.controller.session().state(), ConnectionState::Connected);

        f.controller.toggle().await.unwrap();
        assert!(f.controller.is_playing());
        assert_eq!(f.media.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_navigation_is_bounded() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.controller.play_tracks(tracks(2), 5).await.unwrap();
        assert_eq!(f.controller.status().queue_position, Some(1));

        f.controller.next().await.unwrap();
        assert_eq!(f.media.created_count(), 1);

        f.controller.previous().await.unwrap();
        assert_eq!(f.controller.status().queue_position, Some(0));
        f.controller.previous().await.unwrap();
        assert_eq!(f.media.created_count(), 2);
        assert_eq!(f.media.last().url, "http://cdn/t0.mp3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_end_advances_queue() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.controller.play_tracks(tracks(2), 0).await.unwrap();

        f.media.element(0).emit(MediaEvent::Ended);
        settle_tasks().await;
        assert_eq!(f.media.created_count(), 2);
        assert_eq!(f.media.last().url, "http://cdn/t1.mp3");
        assert_eq!(f.controller.status().queue_position, Some(1));

        // Last track ending leaves the player stopped
        f.media.element(1).emit(MediaEvent::Ended);
        settle_tasks().await;
        assert_eq!(f.media.created_count(), 2);
        assert_eq!(f.controller.session().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_advance_resumes_after_earlier_gesture() {
        let f = fixture(AutoplayPolicy::RequireGesture);
        f.controller.play_tracks(tracks(2), 0).await.unwrap();
        f.controller.graph().suspend().await.unwrap();

        // Sticky activation still lets a programmatic resume through
        f.media.element(0).emit(MediaEvent::Ended);
        settle_tasks().await;
        assert_eq!(f.media.created_count(), 2);
        assert_eq!(f.controller.graph().state(), GraphState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_advance_refused_without_activation() {
        let f = fixture(AutoplayPolicy::RequireGesture);
        f.controller.graph().initialize().await.unwrap();
        {
            let mut queue = f.controller.queue.lock();
            queue.items = tracks(2).into_iter().map(PlayableItem::Track).collect();
            queue.position = 0;
            queue.current = queue.items.first().cloned();
        }

        let refused = f.controller.advance_after_end().await;
        assert!(matches!(refused, Err(StreamError::Graph(GraphError::Resume(_)))));
        assert_eq!(f.media.created_count(), 0);
        assert_eq!(f.controller.graph().state(), GraphState::Suspended);
        assert_eq!(f.controller.status().queue_position, Some(0));

        // A user skip is a gesture and gets through
        f.controller.next().await.unwrap();
        assert_eq!(f.controller.graph().state(), GraphState::Running);
        assert_eq!(f.media.last().url, "http://cdn/t1.mp3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_after_pause_while_connecting_resumes_in_place() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.media
            .script("http://cdn/t0.mp3", Script::ReadyAfter(Duration::from_secs(1)));
        let pending = {
            let controller = Arc::clone(&f.controller);
            tokio::spawn(async move { controller.play_tracks(tracks(1), 0).await })
        };
        settle_tasks().await;
        f.controller.pause();
        pending.await.unwrap().unwrap();
        assert!(!f.controller.is_playing());

        f.controller.toggle().await.unwrap();
        assert!(f.controller.is_playing());
        assert_eq!(f.media.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_graph_is_retried_on_play() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.backend.set_fail_init(true);
        assert!(matches!(
            f.controller.graph().initialize().await,
            Err(GraphError::Init(_))
        ));

        f.backend.set_fail_init(false);
        f.controller.play_url("http://radio/live").await.unwrap();
        assert_eq!(f.controller.graph().state(), GraphState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_graph_surfaces_error() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.controller.graph().teardown().await;
        let err = f.controller.play_url("http://radio/live").await.unwrap_err();
        assert_eq!(err, StreamError::Graph(GraphError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_stops() {
        let f = fixture(AutoplayPolicy::Allowed);
        f.controller.play_station(station("jazz")).await.unwrap();
        f.controller.play_tracks(Vec::new(), 0).await.unwrap();

        let status = f.controller.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.item.is_none());
        assert_eq!(status.queue_position, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_volumes() {
        let f = fixture(AutoplayPolicy::Allowed);
        assert_eq!(f.controller.set_volume(0.4), 0.4);
        assert_eq!(f.controller.set_master_volume(1.5), 1.0);
        f.controller.set_muted(true);
        let status = f.controller.status();
        assert_eq!(status.volume, 0.4);
        assert!(status.muted);
        assert_eq!(status.master_volume, 1.0);
        assert_eq!(status.state, ConnectionState::Idle);
    }
}
