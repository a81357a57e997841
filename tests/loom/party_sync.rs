#![cfg(loom)]

use loom::sync::Arc;
use loom::sync::Mutex;
use loom::sync::atomic::AtomicBool;
use loom::sync::atomic::AtomicUsize;
use loom::sync::atomic::Ordering;
use loom::thread;

use convoke::sync::PartySync;
use convoke::sync::PartySyncUsingAtomics;

type Registry = Arc<Vec<Mutex<Option<Arc<AtomicBool>>>>>;

fn registry() -> Registry {
  Arc::new((0..4).map(|_| Mutex::new(None)).collect())
}

/// Adds one participant, drives the party if this thread won the lock, and
/// balances the spawn ref. Returns the participant's completion flag; a
/// wakeup posted while another thread runs the party is drained before that
/// runner releases the lock, so the flag is set once every thread joined.
fn add_and_run(sync: &PartySyncUsingAtomics, registry: &Registry) -> Arc<AtomicBool> {
  let done: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));

  let run: bool = sync.add_participants_and_ref(1, |slots| {
    *registry[slots[0]].lock().unwrap() = Some(Arc::clone(&done));
  });

  if run {
    assert!(!sync.run_party(|slot| {
      let Some(participant) = registry[slot].lock().unwrap().take() else {
        return false;
      };

      participant.store(true, Ordering::Release);
      true
    }));
  }

  assert!(!sync.unref());

  done
}

#[test]
fn concurrent_adds_complete_all_participants() {
  loom::model(|| {
    let sync: Arc<PartySyncUsingAtomics> = Arc::new(PartySyncUsingAtomics::new(1));
    let registry: Registry = registry();

    let t1 = {
      let sync: Arc<PartySyncUsingAtomics> = Arc::clone(&sync);
      let registry: Registry = Arc::clone(&registry);

      thread::spawn(move || add_and_run(&sync, &registry))
    };

    let t2 = {
      let sync: Arc<PartySyncUsingAtomics> = Arc::clone(&sync);
      let registry: Registry = Arc::clone(&registry);

      thread::spawn(move || add_and_run(&sync, &registry))
    };

    let done1: Arc<AtomicBool> = t1.join().unwrap();
    let done2: Arc<AtomicBool> = t2.join().unwrap();

    assert!(done1.load(Ordering::Acquire));
    assert!(done2.load(Ordering::Acquire));

    // The initial ref is still held; dropping it is the only destruction.
    assert!(sync.unref());
  });
}

#[test]
fn unref_races_running_turn() {
  loom::model(|| {
    let sync: Arc<PartySyncUsingAtomics> = Arc::new(PartySyncUsingAtomics::new(1));
    let destroys: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

    assert!(sync.add_participants_and_ref(1, |slots| {
      assert_eq!(slots[0], 0);
    }));

    let t1 = {
      let sync: Arc<PartySyncUsingAtomics> = Arc::clone(&sync);
      let destroys: Arc<AtomicUsize> = Arc::clone(&destroys);

      thread::spawn(move || {
        let mut polls: usize = 0;

        let destroy: bool = sync.run_party(|slot| {
          assert_eq!(slot, 0);
          polls += 1;

          if polls < 2 {
            sync.force_immediate_repoll(1);
            return false;
          }

          true
        });

        assert_eq!(polls, 2);

        if destroy {
          destroys.fetch_add(1, Ordering::AcqRel);
        }
      })
    };

    let t2 = {
      let sync: Arc<PartySyncUsingAtomics> = Arc::clone(&sync);
      let destroys: Arc<AtomicUsize> = Arc::clone(&destroys);

      thread::spawn(move || {
        if sync.unref() {
          destroys.fetch_add(1, Ordering::AcqRel);
        }
      })
    };

    if sync.unref() {
      destroys.fetch_add(1, Ordering::AcqRel);
    }

    t1.join().unwrap();
    t2.join().unwrap();

    // Exactly one of the three paths observed the final ref.
    assert_eq!(destroys.load(Ordering::Acquire), 1);
  });
}

#[test]
fn wakeup_during_turn_is_not_lost() {
  loom::model(|| {
    let sync: Arc<PartySyncUsingAtomics> = Arc::new(PartySyncUsingAtomics::new(1));
    let polls: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

    assert!(sync.add_participants_and_ref(1, |_slots| {}));

    let waker = {
      let sync: Arc<PartySyncUsingAtomics> = Arc::clone(&sync);
      let polls: Arc<AtomicUsize> = Arc::clone(&polls);

      thread::spawn(move || {
        // May land during the running turn or after the lock released.
        if sync.schedule_wakeup(1) {
          assert!(!sync.run_party(|_slot| {
            polls.fetch_add(1, Ordering::AcqRel);
            true
          }));
        }
      })
    };

    {
      let polls: Arc<AtomicUsize> = Arc::clone(&polls);

      assert!(!sync.run_party(move |_slot| {
        // Stay allocated so the racing wakeup has a live target.
        polls.fetch_add(1, Ordering::AcqRel) >= 1
      }));
    }

    waker.join().unwrap();

    // The participant was polled at least once after the extra wakeup
    // landed, whichever thread ended up running it.
    assert!(polls.load(Ordering::Acquire) >= 1);
    assert!(!sync.unref());
    assert!(sync.unref());
  });
}
