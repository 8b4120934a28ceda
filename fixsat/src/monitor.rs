//! Observation hooks for search events.
use fixsat_formula::Lit;

/// Callback interface receiving propagation and backtrack events.
///
/// Monitors observe the search; they cannot influence it. Events arrive in trail order.
pub trait Monitor {
    /// A literal was set true at the given decision level.
    fn on_propagate(&mut self, lit: Lit, level: usize);

    /// The search undid all assignments above the given decision level.
    fn on_backtrack(&mut self, level: usize);
}

/// Registered monitors.
#[derive(Default)]
pub struct Monitors {
    monitors: Vec<Box<dyn Monitor>>,
}

impl Monitors {
    pub fn register(&mut self, monitor: Box<dyn Monitor>) {
        self.monitors.push(monitor);
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn notify_propagate(&mut self, lit: Lit, level: usize) {
        for monitor in self.monitors.iter_mut() {
            monitor.on_propagate(lit, level);
        }
    }

    pub fn notify_backtrack(&mut self, level: usize) {
        for monitor in self.monitors.iter_mut() {
            monitor.on_backtrack(level);
        }
    }
}
