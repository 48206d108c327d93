//! The clean driver: rebuilds every registered clean target in reverse
//! registration order, AND-aggregating the result.
//!
//! Grounded directly on `core.py::make_clean`: cycle-check every clean
//! target up front, then linearize and run each one in reverse order so
//! that targets registered later (typically nested subfile cleanups) run
//! first.

use crate::environment::Environment;
use crate::graph;
use crate::linearize::{display_cycle, linearize, run_sequence};

pub fn run_clean(env: &Environment) -> bool {
    let targets = env.clean_targets();

    for t in &targets {
        if let Some(cycle) = graph::detect_cycle(t) {
            display_cycle(&cycle);
            return false;
        }
    }

    let mut sequence = Vec::new();
    for t in targets.iter().rev() {
        sequence.extend(linearize(t));
    }

    run_sequence(&sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Target;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn clean_targets_run_in_reverse_registration_order() {
        let env = Environment::new(".");
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        let first = Target::plain("first", vec![], Some(Arc::new(move |_| {
            o1.lock().unwrap().push("first");
            true
        })));
        let o2 = order.clone();
        let second = Target::plain("second", vec![], Some(Arc::new(move |_| {
            o2.lock().unwrap().push("second");
            true
        })));

        env.add_target(&first, false, true);
        env.add_target(&second, false, true);

        assert!(run_clean(&env));
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn a_failed_clean_target_stops_the_rest() {
        let env = Environment::new(".");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        // Registered first, so it runs *last* under reverse order; it must
        // never run once the later-registered (and thus earlier-run) target
        // fails.
        let should_not_run = Target::plain("should_not_run", vec![], Some(Arc::new(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            true
        })));
        let bad = Target::plain("bad", vec![], Some(Arc::new(|_| false)));

        env.add_target(&should_not_run, false, true);
        env.add_target(&bad, false, true);

        assert!(!run_clean(&env));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
