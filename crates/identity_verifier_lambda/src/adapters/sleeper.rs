use std::time::Duration;

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the invocation for the requested delay.
///
/// The poller is sequential; inside a multi-threaded runtime the wait is moved
/// off the async scheduler with `block_in_place`.
pub struct BlockingSleeper;

impl Sleeper for BlockingSleeper {
    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(_) => tokio::task::block_in_place(|| std::thread::sleep(duration)),
            Err(_) => std::thread::sleep(duration),
        }
    }
}
