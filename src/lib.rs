pub mod config;
pub mod engine;
pub mod error;
pub mod generate;
pub mod mesh;
pub mod registry;
pub mod scene;
pub mod scene_file;
pub mod scheduler;
pub mod session;
pub mod web;

pub use config::ComSettings;
pub use engine::{recompute, MassSample, Pose, UpdateOptions};
pub use error::{ComError, SchedulerError, SessionError};
pub use scene::{MassComponent, ObjectId, Scene};
pub use scheduler::{ManualTimer, PeriodicTimer, TokioTimer, UpdateScheduler};
pub use session::ComSession;
