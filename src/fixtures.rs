//! Classroom fixtures: the indexable resource pool consumed by workers.
//!
//! Fixture *generation* and database dump *creation* are explicitly out of
//! scope — this module only reads an already-generated fixture file,
//! shuffles it, and invokes the external `mongorestore` dump restore.

use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::load_curve::LoadCurve;

/// Timeout applied to the `mongorestore` invocation.
const DB_RESTORE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default path to the MongoDB dump archive restored before a run, relative
/// to the process working directory.
pub const DEFAULT_DUMP_ARCHIVE_PATH: &str = "accounts/data/dump";

/// Default path to the fixture file consumed by [`read_fixtures`].
pub const DEFAULT_FIXTURE_PATH: &str = "accounts/data/accounts.json";

/// A teacher credential attached to a classroom.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Teacher {
    /// Login email for the teacher account.
    pub email: String,
    /// Plaintext password used to authenticate the teacher account.
    pub password: String,
}

/// A pupil credential attached to a classroom.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Pupil {
    /// Login username for the pupil account.
    pub username: String,
    /// Plaintext password used to authenticate the pupil account.
    pub password: String,
    /// Optional company/tenant label. Older fixture files predate this
    /// field, so it is tolerated as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

/// One classroom: a teacher plus its pupils, and whether the accounts
/// already exist in the target database's restored dump.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Classroom {
    /// Whether this classroom's accounts already exist in the target DB.
    pub prepared: bool,
    /// Human-readable classroom name.
    pub name: String,
    /// Teacher credential for this classroom.
    pub teacher: Teacher,
    /// Pupil credentials for this classroom.
    pub pupils: Vec<Pupil>,
}

/// Errors raised while loading or validating fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Raised when the fixture file cannot be read from disk.
    #[error("failed to read fixture file {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Raised when the fixture file is not valid JSON.
    #[error("failed to parse fixture file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// Raised when the fixture file has fewer classrooms than the curve's
    /// peak concurrency demands.
    #[error("fixture exhaustion: curve needs {needed} classrooms but only {available} are available")]
    Exhausted {
        /// Classrooms required by the curve's highest level.
        needed: u32,
        /// Classrooms actually present in the fixture file.
        available: usize,
    },
    /// Raised when `mongorestore` cannot be spawned or exits non-zero.
    #[error("mongorestore failed: {message}")]
    Restore {
        /// Human-readable description of the failure.
        message: String,
    },
    /// Raised when `mongorestore` does not finish within its timeout.
    #[error("mongorestore did not finish within {0:?}")]
    RestoreTimeout(Duration),
}

/// Reads the fixture file at `path` and parses it as a JSON array of
/// [`Classroom`] records.
///
/// # Errors
///
/// Returns [`FixtureError::Read`] or [`FixtureError::Parse`] on failure.
pub async fn read_fixtures(path: &Utf8Path) -> Result<Vec<Classroom>, FixtureError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| FixtureError::Read {
            path: path.to_string(),
            source,
        })?;

    serde_json::from_slice(&bytes).map_err(|source| FixtureError::Parse {
        path: path.to_string(),
        source,
    })
}

/// Validates that the fixture pool is large enough to satisfy the curve's
/// peak concurrency.
///
/// # Errors
///
/// Returns [`FixtureError::Exhausted`] when `fixtures.len()` is smaller than
/// `curve.max_level()`.
pub fn ensure_sufficient(fixtures: &[Classroom], curve: &LoadCurve) -> Result<(), FixtureError> {
    let needed = curve.max_level();
    if (needed as usize) > fixtures.len() {
        return Err(FixtureError::Exhausted {
            needed,
            available: fixtures.len(),
        });
    }
    Ok(())
}

/// Shuffles fixtures in place so prepared and unprepared classrooms
/// interleave evenly through a run.
pub fn shuffle(fixtures: &mut [Classroom]) {
    use rand::seq::SliceRandom;
    fixtures.shuffle(&mut rand::thread_rng());
}

/// Invokes `mongorestore` to reset the target database from a dump archive,
/// bounded by a 60-second timeout.
///
/// # Errors
///
/// Returns [`FixtureError::Restore`] when the process fails to spawn or
/// exits non-zero, or [`FixtureError::RestoreTimeout`] when it does not
/// finish within the timeout.
pub async fn restore_dump(db_uri: &str, archive_path: &str) -> Result<(), FixtureError> {
    let run = async {
        Command::new("mongorestore")
            .arg("--drop")
            .arg(format!("--uri={db_uri}"))
            .arg(format!("--archive={archive_path}"))
            .arg("--nsFrom=meteor.*")
            .arg("--nsTo=pearup.*")
            .status()
            .await
            .map_err(|source| FixtureError::Restore {
                message: source.to_string(),
            })
    };

    match timeout(DB_RESTORE_TIMEOUT, run).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(FixtureError::Restore {
            message: format!("mongorestore exited with {status}"),
        }),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(FixtureError::RestoreTimeout(DB_RESTORE_TIMEOUT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn sample_classroom(name: &str, prepared: bool) -> Classroom {
        Classroom {
            prepared,
            name: name.to_owned(),
            teacher: Teacher {
                email: format!("{name}@load-test.com"),
                password: String::from("Passwort123!"),
            },
            pupils: vec![Pupil {
                username: format!("{name}-pupil-1"),
                password: String::from("Passwort123!"),
                company: None,
            }],
        }
    }

    #[test]
    fn ensure_sufficient_accepts_exact_match() {
        let curve = LoadCurve::new(vec![2], StdDuration::from_secs(1)).expect("valid curve");
        let fixtures = vec![sample_classroom("a", true), sample_classroom("b", false)];
        assert!(ensure_sufficient(&fixtures, &curve).is_ok());
    }

    #[test]
    fn ensure_sufficient_rejects_shortfall() {
        let curve = LoadCurve::new(vec![3], StdDuration::from_secs(1)).expect("valid curve");
        let fixtures = vec![sample_classroom("a", true)];
        let err = ensure_sufficient(&fixtures, &curve).expect_err("should be exhausted");
        assert!(matches!(
            err,
            FixtureError::Exhausted {
                needed: 3,
                available: 1
            }
        ));
    }

    #[test]
    fn pupil_without_company_round_trips() {
        let json = r#"{"prepared":false,"name":"k","teacher":{"email":"e","password":"p"},
            "pupils":[{"username":"u","password":"p"}]}"#;
        let classroom: Classroom = serde_json::from_str(json).expect("should parse");
        assert_eq!(classroom.pupils.first().map(|pupil| pupil.company.clone()), Some(None));
    }

    #[test]
    fn shuffle_preserves_multiset() {
        let mut fixtures: Vec<Classroom> = (0..20)
            .map(|i| sample_classroom(&format!("room-{i}"), i % 2 == 0))
            .collect();
        let before_names: std::collections::BTreeSet<_> =
            fixtures.iter().map(|c| c.name.clone()).collect();

        shuffle(&mut fixtures);

        let after_names: std::collections::BTreeSet<_> =
            fixtures.iter().map(|c| c.name.clone()).collect();
        assert_eq!(before_names, after_names);
    }
}
