//! A marker/group pairing with its own continuous-update state.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::config::ComSettings;
use crate::engine::{self, Pose};
use crate::error::{ComError, SchedulerError, SessionError};
use crate::scene::Scene;
use crate::scheduler::{PeriodicTimer, SessionStats, TokioTimer, UpdateScheduler};

const POSE_CHANNEL_CAPACITY: usize = 64;

pub type SharedScene = Arc<Mutex<Scene>>;

/// Owns the settings and the scheduler for one marker following one
/// collection. Several sessions may share a scene.
pub struct ComSession<T: PeriodicTimer> {
    scene: SharedScene,
    settings: ComSettings,
    scheduler: UpdateScheduler<T>,
    poses: broadcast::Sender<Pose>,
}

impl<T: PeriodicTimer> ComSession<T> {
    pub fn new(scene: SharedScene, settings: ComSettings, timer: T) -> Self {
        let (poses, _) = broadcast::channel(POSE_CHANNEL_CAPACITY);
        Self {
            scene,
            settings,
            scheduler: UpdateScheduler::new(timer),
            poses,
        }
    }

    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    pub fn settings(&self) -> &ComSettings {
        &self.settings
    }

    /// Replaces the settings. Refused while continuous update is running,
    /// since the running task holds its own copy.
    pub fn set_settings(&mut self, settings: ComSettings) -> Result<(), SchedulerError> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.settings = settings;
        Ok(())
    }

    pub fn scheduler(&self) -> &UpdateScheduler<T> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut UpdateScheduler<T> {
        &mut self.scheduler
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn stats(&self) -> SessionStats {
        self.scheduler.stats()
    }

    /// Receives every pose produced by this session, one-shot or scheduled.
    pub fn subscribe(&self) -> broadcast::Receiver<Pose> {
        self.poses.subscribe()
    }

    pub fn update_now(&self) -> Result<Pose, ComError> {
        let pose = engine::recompute(&mut self.scene.lock(), &self.settings)?;
        let _ = self.poses.send(pose);
        Ok(pose)
    }

    /// Starts continuous update. Marker and group are checked up front so a
    /// misconfigured session refuses to start instead of failing every tick.
    pub fn start_continuous(&mut self) -> Result<(), SessionError> {
        engine::resolve_targets(&self.scene.lock(), &self.settings)?;
        let scene = self.scene.clone();
        let settings = self.settings.clone();
        let poses = self.poses.clone();
        self.scheduler
            .start(self.settings.update_interval(), move || {
                let pose = engine::recompute(&mut scene.lock(), &settings)?;
                let _ = poses.send(pose);
                Ok(())
            })?;
        info!(
            marker = self.settings.marker.as_deref().unwrap_or_default(),
            group = self.settings.group.as_deref().unwrap_or_default(),
            "center of mass session running"
        );
        Ok(())
    }

    pub fn stop_continuous(&mut self) -> bool {
        self.scheduler.stop()
    }
}

impl ComSession<TokioTimer> {
    /// Resolves once the current session has run `limit` ticks, whether or not
    /// they produced a pose.
    pub async fn ticks_reached(&self, limit: u64) {
        let mut poll = tokio::time::interval(self.settings.update_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while self.stats().ticks < limit {
            poll.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nalgebra::Vector3;

    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::{ObjectKind, Transform};
    use crate::scheduler::ManualTimer;

    fn session() -> ComSession<ManualTimer> {
        let mut scene = Scene::new("test");
        scene.spawn_object("marker", ObjectKind::Empty, Transform::default());
        let a = scene.spawn_mesh(
            "a",
            Transform::at(Vector3::new(0.0, 0.0, 2.0)),
            Mesh::cube(1.0),
        );
        scene.add_mass_properties(&[a]);
        scene.link("bodies", a);
        let settings = ComSettings {
            marker: Some("marker".into()),
            group: Some("bodies".into()),
            update_rate: 1,
            ..ComSettings::default()
        };
        ComSession::new(Arc::new(Mutex::new(scene)), settings, ManualTimer::new())
    }

    #[test]
    fn test_update_now_moves_marker_and_publishes() {
        let session = session();
        let mut poses = session.subscribe();

        let pose = session.update_now().unwrap();
        assert_eq!(pose.position, Vector3::new(0.0, 0.0, 2.0));
        assert_eq!(poses.try_recv().unwrap(), pose);

        let scene = session.scene().lock();
        let marker = scene.find("marker").unwrap();
        assert_eq!(scene.position(marker), Some(Vector3::new(0.0, 0.0, 2.0)));
    }

    #[test]
    fn test_continuous_follows_scene_changes() {
        let mut session = session();
        session.start_continuous().unwrap();
        assert!(session.is_running());

        session.scheduler_mut().timer_mut().advance(Duration::from_millis(10));
        {
            let mut scene = session.scene().lock();
            let a = scene.find("a").unwrap();
            scene.set_position(a, Vector3::new(4.0, 0.0, 0.0));
        }
        session.scheduler_mut().timer_mut().advance(Duration::from_millis(10));

        let scene = session.scene().lock();
        let marker = scene.find("marker").unwrap();
        assert_eq!(scene.position(marker), Some(Vector3::new(4.0, 0.0, 0.0)));
        drop(scene);
        assert_eq!(session.stats().ticks, 2);
    }

    #[test]
    fn test_misconfigured_session_refuses_to_start() {
        let mut session = session();
        session
            .set_settings(ComSettings {
                marker: None,
                ..session.settings().clone()
            })
            .unwrap();
        assert_eq!(
            session.start_continuous(),
            Err(SessionError::Com(ComError::MissingMarker))
        );
        assert!(!session.is_running());
    }

    #[test]
    fn test_second_start_rejected() {
        let mut session = session();
        session.start_continuous().unwrap();
        assert_eq!(
            session.start_continuous(),
            Err(SessionError::Scheduler(SchedulerError::AlreadyRunning))
        );
        assert!(session.stop_continuous());
        assert!(!session.stop_continuous());
    }

    #[test]
    fn test_zero_mass_tick_keeps_running() {
        let mut session = session();
        session.start_continuous().unwrap();
        {
            let mut scene = session.scene().lock();
            let a = scene.find("a").unwrap();
            scene.set_active(a, false);
        }
        session.scheduler_mut().timer_mut().advance(Duration::from_millis(30));
        assert!(session.is_running());
        assert_eq!(session.stats().failures, 3);
    }

    #[test]
    fn test_settings_locked_while_running() {
        let mut session = session();
        let moved = ComSettings {
            snap_cursor: true,
            update_rate: 20,
            ..session.settings().clone()
        };
        session.start_continuous().unwrap();

        assert_eq!(
            session.set_settings(moved.clone()),
            Err(SchedulerError::AlreadyRunning)
        );
        assert_eq!(session.settings().update_rate, 1);

        session.stop_continuous();
        session.set_settings(moved).unwrap();
        assert!(session.settings().snap_cursor);
        session.start_continuous().unwrap();
        assert_eq!(session.scheduler().interval(), Some(Duration::from_millis(200)));
    }
}
