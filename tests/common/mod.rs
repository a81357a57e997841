//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;

use convoke::arena::ArenaRef;
use convoke::engine::EngineRef;
use convoke::engine::default_engine;

/// How long a blocking wait may take before the test is declared hung.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Installs a tracing collector when `CONVOKE_LOG` is set, e.g.
/// `CONVOKE_LOG=1 RUST_LOG=convoke=trace cargo test`.
pub fn init_tracing() {
  static INIT: std::sync::Once = std::sync::Once::new();

  INIT.call_once(|| {
    if std::env::var_os("CONVOKE_LOG").is_some() {
      let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    }
  });
}

/// Creates an arena advertising the shared test engine.
pub fn make_arena() -> ArenaRef {
  init_tracing();

  let arena: ArenaRef = ArenaRef::new();

  arena.set_context::<EngineRef>(default_engine());
  arena
}

/// A one-shot, level-triggered notification.
///
/// Unlike a channel, waiting after the notification fired returns
/// immediately, and multiple threads may wait on the same notification.
#[derive(Default)]
pub struct Notification {
  fired: Mutex<bool>,
  condvar: Condvar,
}

impl Notification {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fires the notification, releasing every waiter.
  pub fn notify(&self) {
    let mut fired = self.fired.lock().unwrap();

    *fired = true;
    self.condvar.notify_all();
  }

  /// Returns `true` if the notification has fired.
  pub fn has_been_notified(&self) -> bool {
    *self.fired.lock().unwrap()
  }

  /// Blocks until the notification fires.
  ///
  /// # Panics
  ///
  /// Panics after [`WAIT_TIMEOUT`] so a lost wakeup fails the test instead
  /// of hanging it.
  pub fn wait(&self) {
    let fired = self.fired.lock().unwrap();

    let (fired, result) = self
      .condvar
      .wait_timeout_while(fired, WAIT_TIMEOUT, |fired| !*fired)
      .unwrap();

    assert!(!result.timed_out(), "notification wait timed out");
    assert!(*fired);
  }
}
