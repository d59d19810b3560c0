use std::fmt::Debug;
use std::thread::sleep;
use std::time::Duration;

/// Blocking wait used between bus operations.
///
/// Kept behind a trait so the timing of a whole sequence can be recorded instead of slept through.
pub trait Delay: Debug + Send {
    fn delay(&mut self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        sleep(duration);
    }
}
