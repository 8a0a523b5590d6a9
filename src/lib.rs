//! Core library for `loadctl`, a distributed load-test controller.
//!
//! Drives a time-indexed load curve against a web application by
//! provisioning DigitalOcean droplets on demand, deploying containerised
//! load generators onto them over SSH, and tearing the fleet down cleanly
//! at the end of a run or on cancellation.

pub mod backend;
pub mod cli;
pub mod config;
pub mod digitalocean;
pub mod fixtures;
pub mod fleet;
pub mod janitor;
pub mod load_curve;
pub mod run;
pub mod ssh_exec;
pub mod worker;

pub use backend::{Backend, BackendError, InstanceHandle, InstanceNetworking, InstanceRequest};
pub use cli::Flags;
pub use config::{ConfigError, EnvConfig, FileConfig, RunConfig};
pub use digitalocean::{DigitalOceanBackend, DigitalOceanError};
pub use fixtures::{Classroom, FixtureError, Pupil, Teacher};
pub use fleet::{FleetController, RunError, RunParameters, WorkerFactory};
pub use janitor::{Janitor, JanitorConfig, JanitorError, SweepSummary};
pub use load_curve::{LoadCurve, LoadCurveError};
pub use run::{OrchestratorError, Outcome};
pub use ssh_exec::{RemoteExecutor, SshError};
pub use worker::{Step, Worker, WorkerError};
