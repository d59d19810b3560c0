use std::cell::Cell;
use std::fmt::{Debug, Formatter};
use std::time::{Duration, Instant};

/// Drops edges that arrive too soon after the last accepted one.
///
/// Rejected edges do not restart the window, so a line that keeps bouncing still gets an edge
/// through once per window.
pub struct EdgeDebounce {
    last_accepted: Cell<Option<Instant>>,
    pub window: Duration,
}

impl EdgeDebounce {
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(200);

    pub fn new() -> Self {
        Self {
            last_accepted: Cell::new(None),
            window: Self::DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Decides whether an edge seen at `at` goes through, remembering it if it does.
    pub fn accept(&self, at: Instant) -> bool {
        if let Some(last) = self.last_accepted.get() {
            if at.saturating_duration_since(last) < self.window {
                return false;
            }
        }

        self.last_accepted.set(Some(at));
        true
    }

    /// Forgets the last accepted edge.
    pub fn reset(&self) {
        self.last_accepted.set(None);
    }
}

impl Default for EdgeDebounce {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for EdgeDebounce {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EdgeDebounce({:?})", self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_edge_always_passes() {
        let debounce = EdgeDebounce::new();
        assert!(debounce.accept(Instant::now()));
    }

    #[test]
    fn edges_inside_the_window_are_dropped() {
        let debounce = EdgeDebounce::new().with_window(Duration::from_millis(200));
        let start = Instant::now();

        assert!(debounce.accept(start));
        assert!(!debounce.accept(start + Duration::from_millis(10)));
        assert!(!debounce.accept(start + Duration::from_millis(199)));
        assert!(debounce.accept(start + Duration::from_millis(200)));
        assert!(!debounce.accept(start + Duration::from_millis(350)));
        assert!(debounce.accept(start + Duration::from_millis(400)));
    }

    #[test]
    fn reset_reopens_the_window() {
        let debounce = EdgeDebounce::new();
        let start = Instant::now();

        assert!(debounce.accept(start));
        debounce.reset();
        assert!(debounce.accept(start + Duration::from_millis(1)));
    }
}
