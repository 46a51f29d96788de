//! Worker versions and the registration that tracks which one is live.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use url::Url;

use crate::ServiceWorkerError;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Registered, install not yet dispatched.
    #[default]
    Parsed,
    /// Install event in flight.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate event in flight.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced by a newer version or unregistered.
    Redundant,
}

/// One worker version.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Set once the install handler asked to skip waiting.
    pub skip_waiting: bool,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            skip_waiting: false,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// The installing / waiting / active slots for one scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create an empty registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Whether `url` falls under this registration's scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }

    /// Put a new version in the installing slot. Any previous installing
    /// version is dropped as redundant and returned.
    pub fn begin_install(&mut self, mut worker: ServiceWorker) -> Option<ServiceWorker> {
        worker.set_state(ServiceWorkerState::Installing);
        let replaced = self.installing.replace(worker);
        replaced.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Move version `id` from installing to waiting. A previously waiting
    /// version becomes redundant and is returned.
    ///
    /// Fails without touching any slot when `id` no longer holds the installing
    /// slot, i.e. a newer registration replaced it mid-install.
    pub fn install_complete(
        &mut self,
        id: ServiceWorkerId,
        skip_waiting: bool,
    ) -> Result<Option<ServiceWorker>, ServiceWorkerError> {
        let mut worker = take_if(&mut self.installing, id, "installing")?;
        worker.set_state(ServiceWorkerState::Installed);
        worker.skip_waiting = skip_waiting;
        Ok(self.waiting.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        }))
    }

    /// Whether waiting version `id` may activate now: it asked to skip waiting,
    /// or nothing is active yet.
    pub fn can_activate(&self, id: ServiceWorkerId) -> bool {
        match &self.waiting {
            Some(waiting) if waiting.id == id => waiting.skip_waiting || self.active.is_none(),
            _ => false,
        }
    }

    /// Move waiting version `id` into the active slot in `Activating` state.
    /// Returns the version it superseded, now redundant.
    pub fn begin_activate(
        &mut self,
        id: ServiceWorkerId,
    ) -> Result<Option<ServiceWorker>, ServiceWorkerError> {
        let mut worker = take_if(&mut self.waiting, id, "waiting")?;
        worker.set_state(ServiceWorkerState::Activating);
        Ok(self.active.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        }))
    }

    /// Finish activating version `id`. Returns false if a newer version took
    /// the active slot while its activate event ran.
    pub fn activation_complete(&mut self, id: ServiceWorkerId) -> bool {
        match self.active.as_mut() {
            Some(worker) if worker.id == id && worker.state == ServiceWorkerState::Activating => {
                worker.set_state(ServiceWorkerState::Activated);
                true
            }
            _ => false,
        }
    }

    /// Get the active worker, if activation finished.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref().filter(|w| w.is_active())
    }

    /// Unregister: every slot becomes redundant.
    pub fn unregister(&mut self) {
        for slot in [&mut self.installing, &mut self.waiting, &mut self.active] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
    }
}

fn take_if(
    slot: &mut Option<ServiceWorker>,
    id: ServiceWorkerId,
    slot_name: &str,
) -> Result<ServiceWorker, ServiceWorkerError> {
    match slot.as_ref().map(|w| w.id) {
        Some(current) if current == id => slot
            .take()
            .ok_or_else(|| ServiceWorkerError::State(format!("{slot_name} slot emptied"))),
        Some(current) => Err(ServiceWorkerError::State(format!(
            "worker {} replaced worker {} in the {slot_name} slot",
            current.raw(),
            id.raw()
        ))),
        None => Err(ServiceWorkerError::State(format!(
            "worker {} is not {slot_name}",
            id.raw()
        ))),
    }
}
