//! Timer-backed suspension.

use parking_lot::Mutex;
use std::time::Duration;
use triomphe::Arc;

use crate::party::Party;
use crate::party::Waker;
use crate::promise::Poll;
use crate::promise::Promise;

struct SleepState {
  fired: bool,
}

/// A promise that resolves once a delay has elapsed.
///
/// The timer is armed on the first poll, against the event engine of the
/// party the promise is polled on. The waker captured at arm time is the
/// resume path; spurious polls before the timer fires stay pending.
pub struct Sleep {
  delay: Duration,
  state: Option<Arc<Mutex<SleepState>>>,
}

/// Suspends the calling participant for `delay`.
#[inline]
pub fn sleep(delay: Duration) -> Sleep {
  Sleep { delay, state: None }
}

impl Promise for Sleep {
  type Output = ();

  fn poll(&mut self) -> Poll<()> {
    match &self.state {
      None => {
        let state: Arc<Mutex<SleepState>> = Arc::new(Mutex::new(SleepState { fired: false }));
        let shared: Arc<Mutex<SleepState>> = Arc::clone(&state);
        let mut waker: Waker = Party::make_owning_waker();

        Party::current_engine().run_after(
          self.delay,
          Box::new(move || {
            shared.lock().fired = true;
            waker.wakeup();
          }),
        );

        self.state = Some(state);
        Poll::Pending
      }
      Some(state) => {
        if state.lock().fired {
          Poll::Ready(())
        } else {
          Poll::Pending
        }
      }
    }
  }
}
