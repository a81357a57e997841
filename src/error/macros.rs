//! Internal error handling macros.
//!
//! Provides two categories of error handling:
//!
//! - [`fatal!`]: For unrecoverable runtime bugs (invariant violations)
//! - [`raise!`]: For recoverable system errors (capacity limits, misuse)
//!
//! Both tag their diagnostics with an error class (`SysCap` for exhausted
//! limits, `SysInv` for broken invariants) so a panic message can be
//! matched without depending on the prose around it.

/// Reports an unrecoverable scheduler fault and aborts the process.
///
/// Use this for errors that indicate bugs in the scheduling core itself,
/// where unwinding through half-updated state would make things worse. The
/// diagnostic is written to stderr and the process aborts immediately.
///
/// # Examples
///
/// ```ignore
/// if state & LOCKED == 0 {
///   fatal!("turn executed without holding the party lock");
/// }
/// ```
macro_rules! fatal {
  ($error:expr) => {{
    ::std::eprintln!(
      "convoke: fatal scheduler fault at {}:{}: {}",
      ::std::file!(),
      ::std::line!(),
      $error,
    );

    ::std::process::abort();
  }};
}

/// Panics with a classified, recoverable system error.
///
/// `SysCap` marks exhausted limits that a supervisor may recover from by
/// resizing or shedding load; `SysInv` marks API misuse caught at a
/// boundary. Both arms share one diagnostic shape, differing only in the
/// class tag and summary baked into the format string.
///
/// # Examples
///
/// ```ignore
/// if free_slots < requested {
///   raise!(Error, SysCap, "party participant table is full");
/// }
/// ```
macro_rules! raise {
  (Error, SysCap, $error:expr) => {
    raise!(@panic "SysCap", "scheduler limit hit", $error)
  };
  (Error, SysInv, $error:expr) => {
    raise!(@panic "SysInv", "scheduler contract broken", $error)
  };
  (@panic $class:literal, $summary:literal, $error:expr) => {
    ::std::panic!(
      ::std::concat!("convoke: [", $class, "] ", $summary, " at {}:{}: {}"),
      ::std::file!(),
      ::std::line!(),
      $error,
    )
  };
}

pub(crate) use fatal;
pub(crate) use raise;
