//! # steward-supervisor
//!
//! Process supervision engine for steward.
//!
//! Spawns services as process-group leaders, captures their output into
//! rotating log files and a live notification hub, and brings them down
//! through a fixed signal escalation ladder. Pairs with
//! [`steward-core`](../steward_core/index.html) for the config and data
//! model.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use steward_core::{Limits, Mode, Service};
//! use steward_supervisor::{
//!     Engine, EngineConfig, HubConfig, NotificationHub, UnixSpawner,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = NotificationHub::new(HubConfig {
//!     replay_chunks: 200,
//!     subscriber_queue: 100,
//!     send_deadline: Duration::from_secs(1),
//! });
//! let engine = Engine::new(
//!     EngineConfig {
//!         mode: Mode::Staging,
//!         meta: Default::default(),
//!         service_dir: "service".into(),
//!         log_dir: "log".into(),
//!         limits: Limits::default(),
//!     },
//!     hub.clone(),
//!     Arc::new(UnixSpawner),
//! );
//!
//! engine
//!     .init(vec![Service {
//!         name: "web".into(),
//!         tag: String::new(),
//!         exec: "web-server".into(),
//!         folder: String::new(),
//!         env: vec![],
//!         args: vec!["-v".into()],
//!     }])
//!     .await;
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod hub;
pub mod logfile;
pub mod proc;
pub mod ring;
pub mod runner;
pub mod stat;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use hub::{HubConfig, Msg, NotificationHub, SubscriberId};
pub use logfile::{RotatePolicy, Stream};
pub use proc::{ProcessControl, ProcessHandle, SpawnSpec, SpawnedProcess, UnixSpawner};
pub use ring::ChunkRing;
pub use runner::{Runner, RunnerConfig, RunnerEvent};
pub use stat::StatSnapshot;
