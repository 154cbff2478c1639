// src/interception/lifecycle.rs
//! Interceptor lifecycle
//!
//! The interceptor goes through install and activate before it controls
//! traffic. Install always skips waiting, so activation follows immediately.
//! Activation optionally claims connections that were accepted earlier;
//! without a claim those connections stay uncontrolled until they close.
//!
//! ```text
//! Parsed → Installing → Installed → Activating → Activated
//! ```

use crate::utils::errors::{ProxyError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parsed => "parsed",
            Phase::Installing => "installing",
            Phase::Installed => "installed",
            Phase::Activating => "activating",
            Phase::Activated => "activated",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the process-wide interceptor
pub struct Lifecycle {
    phase: watch::Sender<Phase>,
    claim_clients: bool,
    claimed: AtomicBool,
    /// Held for the whole of install or activate
    steps: Mutex<()>,
}

impl Lifecycle {
    pub fn new(claim_clients: bool) -> Self {
        let (phase, _) = watch::channel(Phase::Parsed);
        Self {
            phase,
            claim_clients,
            claimed: AtomicBool::new(false),
            steps: Mutex::new(()),
        }
    }

    /// Run the install step, skipping the waiting period
    pub fn install(&self) -> Result<()> {
        let _step = self.steps.lock();
        self.transition("install", Phase::Parsed, Phase::Installing)?;
        debug!("Interceptor installing");
        self.transition("install", Phase::Installing, Phase::Installed)?;
        info!("Interceptor installed, skipping wait");
        Ok(())
    }

    /// Run the activate step; a second call is a no-op
    pub fn activate(&self) -> Result<()> {
        let _step = self.steps.lock();
        if self.phase() == Phase::Activated {
            return Ok(());
        }

        self.transition("activate", Phase::Installed, Phase::Activating)?;
        if self.claim_clients {
            self.claimed.store(true, Ordering::Release);
            info!("Claimed existing clients");
        }
        self.transition("activate", Phase::Activating, Phase::Activated)?;
        info!("Interceptor activated");
        Ok(())
    }

    /// Install and activate in one go, as done at startup
    pub fn start(&self) -> Result<()> {
        self.install()?;
        self.activate()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.phase() == Phase::Activated
    }

    /// Whether clients that connected before activation were claimed
    pub fn clients_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Whether a connection accepted while `active_at_accept` held is controlled now
    pub fn controls(&self, active_at_accept: bool) -> bool {
        active_at_accept || self.clients_claimed()
    }

    /// Observe phase changes
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn transition(&self, step: &'static str, from: Phase, to: Phase) -> Result<()> {
        let mut moved = false;
        self.phase.send_if_modified(|phase| {
            if *phase == from {
                *phase = to;
                moved = true;
            }
            moved
        });

        if moved {
            debug!("Lifecycle {} -> {}", from, to);
            Ok(())
        } else {
            Err(ProxyError::Lifecycle {
                step,
                phase: self.phase().to_string(),
            })
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(true)
    }
}
