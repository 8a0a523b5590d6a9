//! End-to-end fleet behaviour against a scripted backend: no real instance
//! or SSH traffic, so every scenario here stays fast and deterministic.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use loadctl::backend::BackendFuture;
use loadctl::fixtures::{Classroom, Pupil, Teacher};
use loadctl::fleet::{FleetController, RunError, RunParameters, WorkerFactory};
use loadctl::load_curve::LoadCurve;
use loadctl::{Backend, InstanceHandle, InstanceNetworking, InstanceRequest};

#[derive(Debug, Error, Clone, Eq, PartialEq)]
enum FakeError {
    #[error("fake provisioning failure")]
    Create,
    #[error("fake readiness failure")]
    WaitForReady,
}

#[derive(Default)]
struct ScriptedState {
    create_calls: u32,
    fail_create: bool,
    fail_wait_immediately: bool,
    wait_blocks_until_cancelled: bool,
    destroyed: Vec<InstanceHandle>,
}

/// A [`Backend`] whose behaviour is fixed at construction time, never
/// touching the network or a real SSH client.
#[derive(Clone, Default)]
struct ScriptedBackend {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedBackend {
    fn failing_create() -> Self {
        let backend = Self::default();
        backend.state.try_lock().unwrap_or_else(|err| panic!("fresh mutex: {err}")).fail_create = true;
        backend
    }

    fn failing_wait() -> Self {
        let backend = Self::default();
        backend
            .state
            .try_lock()
            .unwrap_or_else(|err| panic!("fresh mutex: {err}"))
            .fail_wait_immediately = true;
        backend
    }

    fn blocking_until_cancelled() -> Self {
        let backend = Self::default();
        backend
            .state
            .try_lock()
            .unwrap_or_else(|err| panic!("fresh mutex: {err}"))
            .wait_blocks_until_cancelled = true;
        backend
    }

    async fn destroyed(&self) -> Vec<InstanceHandle> {
        self.state.lock().await.destroyed.clone()
    }

    async fn create_calls(&self) -> u32 {
        self.state.lock().await.create_calls
    }
}

impl Backend for ScriptedBackend {
    type Error = FakeError;

    fn create<'a>(&'a self, request: &'a InstanceRequest) -> BackendFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.create_calls += 1;
            if state.fail_create {
                return Err(FakeError::Create);
            }
            Ok(InstanceHandle {
                id: format!("fake-{}", state.create_calls),
                name: request.tag.clone(),
            })
        })
    }

    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a InstanceHandle,
        cancellation: &'a CancellationToken,
    ) -> BackendFuture<'a, InstanceNetworking, Self::Error> {
        Box::pin(async move {
            let blocks = self.state.lock().await.wait_blocks_until_cancelled;
            if blocks {
                cancellation.cancelled().await;
                self.state.lock().await.destroyed.push(handle.clone());
                return Err(FakeError::WaitForReady);
            }

            let fails = self.state.lock().await.fail_wait_immediately;
            if fails {
                self.state.lock().await.destroyed.push(handle.clone());
                return Err(FakeError::WaitForReady);
            }

            Ok(InstanceNetworking {
                public_ip: Ipv4Addr::new(127, 0, 0, 1),
                ssh_port: 22,
            })
        })
    }

    fn destroy(&self, handle: InstanceHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            self.state.lock().await.destroyed.push(handle);
            Ok(())
        })
    }
}

fn classroom(name: &str) -> Classroom {
    Classroom {
        prepared: false,
        name: name.to_owned(),
        teacher: Teacher {
            email: format!("{name}@load-test.com"),
            password: String::from("Passwort123!"),
        },
        pupils: vec![Pupil {
            username: format!("{name}-pupil"),
            password: String::from("Passwort123!"),
            company: None,
        }],
    }
}

fn fixtures(count: usize) -> Vec<Classroom> {
    (0..count).map(|i| classroom(&format!("room-{i}"))).collect()
}

fn remote_factory(backend: ScriptedBackend) -> WorkerFactory<ScriptedBackend> {
    WorkerFactory::Remote {
        backend: Arc::new(backend),
        do_size: String::from("s-2vcpu-8gb"),
        do_region: String::from("fra1"),
        dd_api_key: String::from("dd-key"),
    }
}

#[tokio::test]
async fn monotone_violation_is_reported_before_running_out_the_curve() {
    // The backend hangs in `wait_for_ready` rather than succeeding, so
    // index 0's spawned worker never reaches the real-SSH deploy path before
    // the monotonicity check at index 1 fires.
    let backend = ScriptedBackend::blocking_until_cancelled();
    let curve =
        LoadCurve::new(vec![3, 1], Duration::from_millis(10)).unwrap_or_else(|err| panic!("valid curve: {err}"));
    let params = RunParameters {
        url: String::from("https://example.test"),
        load_curve: curve,
        fixtures: fixtures(3),
    };
    let fleet = FleetController::new("monorun", Some(3), remote_factory(backend));
    let cancellation = CancellationToken::new();

    let err = fleet
        .run(&params, &cancellation)
        .await
        .expect_err("decreasing curve should fail");
    assert!(matches!(
        err,
        RunError::MonotoneViolation {
            index: 1,
            level: 1,
            previous: 3,
        }
    ));
}

#[tokio::test]
async fn provisioning_failure_surfaces_as_worker_error_without_destroying_anything() {
    let backend = ScriptedBackend::failing_create();
    let curve = LoadCurve::new(vec![2], Duration::from_secs(30)).unwrap_or_else(|err| panic!("valid curve: {err}"));
    let params = RunParameters {
        url: String::from("https://example.test"),
        load_curve: curve,
        fixtures: fixtures(2),
    };
    let fleet = FleetController::new("provfail", Some(2), remote_factory(backend.clone()));
    let cancellation = CancellationToken::new();

    let err = fleet.run(&params, &cancellation).await.expect_err("create failure should fail the run");
    assert!(matches!(err, RunError::Worker(_)));
    assert!(backend.destroyed().await.is_empty(), "nothing was ever created, so nothing should be destroyed");
}

#[tokio::test]
async fn readiness_failure_destroys_the_half_created_instance() {
    let backend = ScriptedBackend::failing_wait();
    let curve = LoadCurve::new(vec![1], Duration::from_secs(30)).unwrap_or_else(|err| panic!("valid curve: {err}"));
    let params = RunParameters {
        url: String::from("https://example.test"),
        load_curve: curve,
        fixtures: fixtures(1),
    };
    let fleet = FleetController::new("waitfail", Some(1), remote_factory(backend.clone()));
    let cancellation = CancellationToken::new();

    let err = fleet.run(&params, &cancellation).await.expect_err("readiness failure should fail the run");
    assert!(matches!(err, RunError::Worker(_)));
    assert_eq!(backend.create_calls().await, 1);
    assert_eq!(backend.destroyed().await.len(), 1, "the half-created instance must be destroyed");
}

#[tokio::test]
async fn cancellation_during_provisioning_stops_the_run_and_tears_down() {
    let backend = ScriptedBackend::blocking_until_cancelled();
    let curve =
        LoadCurve::new(vec![1], Duration::from_secs(3600)).unwrap_or_else(|err| panic!("valid curve: {err}"));
    let params = RunParameters {
        url: String::from("https://example.test"),
        load_curve: curve,
        fixtures: fixtures(1),
    };
    let fleet = FleetController::new("cancelrun", Some(1), remote_factory(backend.clone()));
    let cancellation = CancellationToken::new();

    let token_for_cancel = cancellation.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        token_for_cancel.cancel();
    });

    let err = fleet.run(&params, &cancellation).await.expect_err("cancellation should fail the run");
    assert!(matches!(err, RunError::Cancelled));

    // Give the backgrounded provisioning task a moment to observe the
    // cancellation and record its teardown.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.destroyed().await.len(), 1);
}

#[tokio::test]
async fn zero_delta_curve_completes_without_touching_the_backend() {
    let backend = ScriptedBackend::default();
    let curve =
        LoadCurve::new(vec![0, 0], Duration::from_millis(10)).unwrap_or_else(|err| panic!("valid curve: {err}"));
    let params = RunParameters {
        url: String::from("https://example.test"),
        load_curve: curve,
        fixtures: Vec::new(),
    };
    let fleet = FleetController::new("idle", Some(1), remote_factory(backend.clone()));
    let cancellation = CancellationToken::new();

    fleet.run(&params, &cancellation).await.unwrap_or_else(|err| panic!("idle curve should complete: {err}"));
    assert_eq!(backend.create_calls().await, 0);
}
