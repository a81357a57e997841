#![cfg(loom)]

use loom::sync::Arc;
use loom::sync::atomic::AtomicUsize;
use loom::sync::atomic::Ordering;
use loom::thread;

use convoke::sync::DualArc;
use convoke::sync::DualRefCount;
use convoke::sync::DualRefCounted;
use convoke::sync::WeakDualArc;

struct Flags {
  orphaned: AtomicUsize,
  dropped: AtomicUsize,
}

struct Tracked {
  count: DualRefCount,
  flags: Arc<Flags>,
}

impl Tracked {
  fn new(flags: Arc<Flags>) -> DualArc<Self> {
    DualArc::new(Self {
      count: DualRefCount::new(1),
      flags,
    })
  }
}

impl DualRefCounted for Tracked {
  fn dual_count(&self) -> &DualRefCount {
    &self.count
  }

  fn orphaned(&self) {
    self.flags.orphaned.fetch_add(1, Ordering::AcqRel);
  }
}

impl Drop for Tracked {
  fn drop(&mut self) {
    // The orphan must have completed before destruction.
    assert_eq!(self.flags.orphaned.load(Ordering::Acquire), 1);
    self.flags.dropped.fetch_add(1, Ordering::AcqRel);
  }
}

fn flags() -> Arc<Flags> {
  Arc::new(Flags {
    orphaned: AtomicUsize::new(0),
    dropped: AtomicUsize::new(0),
  })
}

#[test]
fn concurrent_final_unrefs_destroy_once() {
  loom::model(|| {
    let flags: Arc<Flags> = flags();
    let this: DualArc<Tracked> = Tracked::new(Arc::clone(&flags));
    let that: DualArc<Tracked> = this.clone();

    let t1 = thread::spawn(move || drop(this));
    let t2 = thread::spawn(move || drop(that));

    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
    assert_eq!(flags.dropped.load(Ordering::Acquire), 1);
  });
}

#[test]
fn upgrade_races_final_unref() {
  loom::model(|| {
    let flags: Arc<Flags> = flags();
    let this: DualArc<Tracked> = Tracked::new(Arc::clone(&flags));
    let weak: WeakDualArc<Tracked> = this.downgrade();

    let t1 = thread::spawn(move || drop(this));

    let t2 = thread::spawn(move || {
      // The upgrade either wins a strong ref before the orphan or fails;
      // it can never resurrect an orphaned object.
      if let Some(strong) = weak.upgrade() {
        assert_eq!(strong.flags.orphaned.load(Ordering::Acquire), 0);
        drop(strong);
      }

      drop(weak);
    });

    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
    assert_eq!(flags.dropped.load(Ordering::Acquire), 1);
  });
}

#[test]
fn weak_unrefs_race_strong_unref() {
  loom::model(|| {
    let flags: Arc<Flags> = flags();
    let this: DualArc<Tracked> = Tracked::new(Arc::clone(&flags));
    let weak1: WeakDualArc<Tracked> = this.downgrade();
    let weak2: WeakDualArc<Tracked> = weak1.clone();

    let t1 = thread::spawn(move || drop(this));
    let t2 = thread::spawn(move || drop(weak1));

    drop(weak2);

    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(flags.orphaned.load(Ordering::Acquire), 1);
    assert_eq!(flags.dropped.load(Ordering::Acquire), 1);
  });
}
