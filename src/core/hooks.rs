//! Hook traits for extensibility
//!
//! The transfer engine asks a `CapabilityProbe` which kernel relay paths are
//! usable. Production uses `SystemProbe`; tests inject `FixedProbe` to drive
//! every branch of the fallback chain on any platform.
//!
//! A `LoginObserver` hears about every admitted player right before the
//! relay starts.

use super::access::Verdict;
use super::connection::ConnContext;
use super::splice;
use crate::logger::log;

/// Told about each player admitted to a service
pub trait LoginObserver: Send + Sync {
    fn player_admitted(&self, service: &str, ctx: &ConnContext, name: &str, verdict: Verdict);
}

/// Logs every admitted player at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginLogger;

impl LoginObserver for LoginLogger {
    fn player_admitted(&self, service: &str, ctx: &ConnContext, name: &str, verdict: Verdict) {
        log::info!(
            service = service,
            conn = %ctx,
            "New Minecraft player logged in: {} [{}]",
            name,
            verdict.as_str()
        );
    }
}

/// Platform capabilities relevant to strategy selection
pub trait CapabilityProbe: Send + Sync {
    /// Kernel pipe relay (splice) can be set up
    fn splice_available(&self) -> bool;

    /// The relay pipe can be enlarged beyond its default capacity
    fn pipe_resize_available(&self) -> bool;
}

/// Probes the running kernel once at construction
#[derive(Debug, Clone, Copy)]
pub struct SystemProbe {
    splice: bool,
    pipe_resize: bool,
}

impl SystemProbe {
    pub fn detect() -> Self {
        let splice = splice::pipe_supported();
        Self {
            splice,
            pipe_resize: splice && splice::pipe_resize_supported(),
        }
    }
}

impl CapabilityProbe for SystemProbe {
    fn splice_available(&self) -> bool {
        self.splice
    }

    fn pipe_resize_available(&self) -> bool {
        self.pipe_resize
    }
}

/// Probe with hard-coded answers
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe {
    pub splice: bool,
    pub pipe_resize: bool,
}

impl CapabilityProbe for FixedProbe {
    fn splice_available(&self) -> bool {
        self.splice
    }

    fn pipe_resize_available(&self) -> bool {
        self.pipe_resize
    }
}
