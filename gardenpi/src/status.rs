//! Read-only mirror of the appliance state.
use crate::command::RELAY_COUNT;
use crate::utils::timestamp;
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct Status {
    pub led: bool,
    pub button: bool,
    pub lcd: String,
    pub relays: [bool; RELAY_COUNT],
    /// RFC 3339, local time when known.
    pub updated_at: Option<String>,
}

/// Holds the [Status] and writes it out as JSON after every change.
#[derive(Debug)]
pub struct StatusMirror {
    status: Mutex<Status>,
    path: Option<PathBuf>,
}

impl StatusMirror {
    pub fn new(path: Option<PathBuf>) -> Self {
        StatusMirror {
            status: Mutex::new(Status::default()),
            path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Status {
        self.lock().clone()
    }

    /// Applies `change`, stamps the time and persists the result.
    ///
    /// Failing to persist is logged; the in-memory status is updated regardless.
    pub fn update(&self, change: impl FnOnce(&mut Status)) {
        let status = {
            let mut status = self.lock();
            change(&mut status);
            status.updated_at = Some(timestamp());
            status.clone()
        };
        trace!("Status: {:?}", status);

        if let Some(path) = &self.path {
            let written = serde_json::to_vec_pretty(&status)
                .map_err(std::io::Error::from)
                .and_then(|json| std::fs::write(path, json));
            if let Err(err) = written {
                warn!("Writing status to {:?} failed: {}", path, err);
            }
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&*self.lock()).unwrap_or_else(|_| "{}".to_string())
    }
}
