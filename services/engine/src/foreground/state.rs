//! services/engine/src/foreground/state.rs
//!
//! Defines the state shared by every component of a foreground context.

use crate::agent::AgentHandle;
use crate::config::Config;
use dose_reminder_core::ports::{Clock, DoseStore, LocalStorage};
use dose_reminder_core::window::WindowPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

//=========================================================================================
// EngineContext (Shared Across All Foreground Components)
//=========================================================================================

/// The shared foreground state, created once at startup and handed to every component.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn DoseStore>,
    pub local: Arc<dyn LocalStorage>,
    pub clock: Arc<dyn Clock>,
    pub agent: AgentHandle,
    pub config: Arc<Config>,
}

impl EngineContext {
    pub fn policy(&self) -> WindowPolicy {
        self.config.window_policy
    }
}

//=========================================================================================
// Single-flight Guard
//=========================================================================================

/// Prevents two invocations of the same operation from overlapping.
#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another invocation holds the guard.
    pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flag: &self.in_flight,
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Releases the flag on drop.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
