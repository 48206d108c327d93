use std::path::Path;
use std::sync::Arc;

use sandworm::environment::Environment;
use sandworm::target::Target;
use sandworm::{clean, linearize, scheduler};

/// Switches CWD into a fresh temp directory for the duration of `f`,
/// restoring it afterwards. Serializes tests against the process-global
/// ChdirGuard lock `Target::build` also takes, the same way
/// `conftest.py`'s `workdir` fixture isolates each test into its own CWD.
fn in_tempdir<T>(f: impl FnOnce(&Path) -> T) -> T {
    let dir = tempfile::tempdir().unwrap();
    let prev = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let result = f(dir.path());
    std::env::set_current_dir(prev).unwrap();
    result
}

fn check_builder(targ: &Target) -> bool {
    std::fs::write(targ.name(), "check\n").is_ok()
}

#[test]
fn single_file_target_builds_and_writes_content() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let foo = Target::file("foo.txt", vec![], Some(Arc::new(check_builder)));
        env.add_target(&foo, true, false);

        assert!(linearize::root_build(&foo));
        assert_eq!(std::fs::read_to_string(dir.join("foo.txt")).unwrap(), "check\n");
    });
}

#[test]
fn a_stale_dependency_forces_a_rebuild() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let bar = Target::file("bar.txt", vec![], None);
        let foo = Target::file("foo.txt", vec![bar.clone()], Some(Arc::new(check_builder)));
        env.add_target(&foo, true, false);

        std::fs::write(dir.join("foo.txt"), "").unwrap();
        // mtime resolution is per-second; sleep past a boundary so bar.txt's
        // rewrite is observably newer than foo.txt's creation.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(dir.join("bar.txt"), "").unwrap();

        assert!(linearize::root_build(&foo));
        assert_eq!(std::fs::read_to_string(dir.join("foo.txt")).unwrap(), "check\n");
    });
}

#[test]
fn a_fresh_dependency_skips_the_rebuild() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let bar = Target::file("bar.txt", vec![], None);
        let foo = Target::file("foo.txt", vec![bar.clone()], Some(Arc::new(check_builder)));
        env.add_target(&foo, true, false);

        std::fs::write(dir.join("bar.txt"), "").unwrap();
        std::fs::write(dir.join("foo.txt"), "").unwrap();

        assert!(linearize::root_build(&foo));
        assert_eq!(std::fs::read_to_string(dir.join("foo.txt")).unwrap(), "");
    });
}

#[test]
fn a_failed_builder_fails_the_whole_build() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let foo = Target::file("foo.txt", vec![], Some(Arc::new(|_: &Target| false)));
        env.add_target(&foo, false, false);

        assert!(!linearize::root_build(&foo));
    });
}

#[test]
fn a_dependency_cycle_is_rejected_without_running_any_builder() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let calls = Arc::new(AtomicUsize::new(0));
        let builder = {
            let calls = calls.clone();
            move |_: &Target| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            }
        };

        let foo_stub = Target::plain("foo", vec![], Some(Arc::new(builder.clone())));
        let bar = Target::plain("bar", vec![foo_stub], Some(Arc::new(builder.clone())));
        let foo = Target::plain("foo", vec![bar], Some(Arc::new(builder)));
        env.add_target(&foo, true, false);

        assert!(!linearize::root_build(&foo));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn no_rule_target_with_no_dependencies_fails() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let foo = Target::plain("foo", vec![], None);
        env.add_target(&foo, true, false);

        assert!(!linearize::root_build(&foo));
    });
}

#[test]
fn no_rule_target_with_dependencies_is_a_phony_success() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let bar = Target::file("bar.txt", vec![], Some(Arc::new(check_builder)));
        let foo = Target::plain("foo", vec![bar], None);
        env.add_target(&foo, true, false);

        assert!(linearize::root_build(&foo));
        assert_eq!(std::fs::read_to_string(dir.join("bar.txt")).unwrap(), "check\n");
    });
}

#[test]
fn clean_targets_run_in_reverse_registration_order() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let append_builder = |targ: &Target| -> bool {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open("foo.txt")
                .unwrap();
            writeln!(f, "{}", targ.name()).is_ok()
        };

        env.add_target(&Target::plain("foo", vec![], Some(Arc::new(append_builder))), false, true);
        env.add_target(&Target::plain("bar", vec![], Some(Arc::new(append_builder))), false, true);

        assert!(clean::run_clean(&env));
        assert_eq!(std::fs::read_to_string(dir.join("foo.txt")).unwrap(), "bar\nfoo\n");
    });
}

#[test]
fn parallel_build_matches_serial_build_outcome_on_a_diamond() {
    in_tempdir(|dir| {
        let env = Environment::new(dir);
        let base = Target::file("base.txt", vec![], Some(Arc::new(check_builder)));
        let left = Target::file("left.txt", vec![base.clone()], Some(Arc::new(check_builder)));
        let right = Target::file("right.txt", vec![base], Some(Arc::new(check_builder)));
        let top = Target::file("top.txt", vec![left, right], Some(Arc::new(check_builder)));
        env.add_target(&top, true, false);

        assert!(scheduler::parallel_build(&top, Some(2)));
        for name in ["base.txt", "left.txt", "right.txt", "top.txt"] {
            assert!(dir.join(name).exists());
        }
    });
}
