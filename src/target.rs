//! The build node: name, dependencies, builder action, cached staleness.
//!
//! A [`Target`] is a cheap `Arc` handle; cloning it shares the same cached
//! `exists`/`last_modified`/`out_of_date`/`built` state, which is what lets
//! diamond-shaped dependency graphs memoize staleness exactly once per node
//! (register the same `Target` handle as a dependency of more than one
//! parent rather than constructing two separate nodes with the same name).

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::error;

use crate::environment::Environment;

/// A user-supplied build action. Must be `Send + Sync` so the parallel
/// scheduler can hand it to a worker thread; Rust enforces this at
/// compile time, which is the static analogue of spec's runtime
/// "non-transportable builder fails at construction" requirement.
pub type BuilderFn = Arc<dyn Fn(&Target) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Plain,
    File,
}

impl TargetKind {
    pub fn name(&self) -> &'static str {
        match self {
            TargetKind::Plain => "Target",
            TargetKind::File => "FileTarget",
        }
    }
}

/// The `(concrete type, fullname)` pair Targets are keyed and compared by.
pub type Key = (TargetKind, String);

struct TargetInner {
    kind: TargetKind,
    name: String,
    dependencies: Vec<Target>,
    builder: Option<BuilderFn>,
    env: OnceLock<Environment>,
    built: AtomicBool,
    fullname: OnceLock<String>,
    exists: OnceLock<bool>,
    last_modified: OnceLock<Option<i64>>,
    out_of_date: OnceLock<bool>,
}

/// A build node. Cheap to clone (reference-counted).
#[derive(Clone)]
pub struct Target(Arc<TargetInner>);

impl Target {
    /// A plain (non-file) target: `exists` is always false, `last_modified`
    /// is always `None`, and `fullname` equals `name`.
    pub fn plain(
        name: impl Into<String>,
        dependencies: Vec<Target>,
        builder: Option<BuilderFn>,
    ) -> Self {
        let name = name.into();
        let fullname = OnceLock::new();
        fullname.set(name.clone()).ok();
        Target(Arc::new(TargetInner {
            kind: TargetKind::Plain,
            name,
            dependencies,
            builder,
            env: OnceLock::new(),
            built: AtomicBool::new(false),
            fullname,
            exists: OnceLock::new(),
            last_modified: OnceLock::new(),
            out_of_date: OnceLock::new(),
        }))
    }

    /// A file target: `name` is interpreted relative to the owning
    /// Environment's `basedir` once attached.
    pub fn file(
        name: impl Into<String>,
        dependencies: Vec<Target>,
        builder: Option<BuilderFn>,
    ) -> Self {
        Target(Arc::new(TargetInner {
            kind: TargetKind::File,
            name: name.into(),
            dependencies,
            builder,
            env: OnceLock::new(),
            built: AtomicBool::new(false),
            fullname: OnceLock::new(),
            exists: OnceLock::new(),
            last_modified: OnceLock::new(),
            out_of_date: OnceLock::new(),
        }))
    }

    pub fn kind(&self) -> TargetKind {
        self.0.kind
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn dependencies(&self) -> &[Target] {
        &self.0.dependencies
    }

    pub fn builder(&self) -> Option<&BuilderFn> {
        self.0.builder.as_ref()
    }

    /// Absolute filesystem path for a file target. Panics for plain targets.
    pub fn path(&self) -> PathBuf {
        assert!(self.0.kind == TargetKind::File, "path() on a non-file target");
        self.env().basedir().join(&self.0.name)
    }

    /// Canonical `(kind, fullname)` identity used for equality, hashing and
    /// graph bookkeeping.
    pub fn key(&self) -> Key {
        (self.0.kind, self.fullname().to_string())
    }

    pub fn fullname(&self) -> &str {
        self.0.fullname.get_or_init(|| match self.0.kind {
            TargetKind::Plain => self.0.name.clone(),
            TargetKind::File => {
                let joined = self.path_raw();
                joined
                    .canonicalize()
                    .unwrap_or(joined)
                    .to_string_lossy()
                    .into_owned()
            }
        })
    }

    fn path_raw(&self) -> PathBuf {
        self.env().basedir().join(&self.0.name)
    }

    /// The owning Environment. Reading this before the Target has been
    /// added to one is a programmer error (an engine invariant violation
    /// per spec section 7) and aborts the run.
    pub fn env(&self) -> &Environment {
        self.0
            .env
            .get()
            .expect("Target::env() read before the target was added to an Environment")
    }

    /// Attach the owning Environment. A no-op if already attached
    /// (idempotent re-adds are allowed; the first attach wins).
    pub(crate) fn attach_env(&self, env: Environment) {
        let _ = self.0.env.set(env);
    }

    pub fn exists(&self) -> bool {
        *self.0.exists.get_or_init(|| match self.0.kind {
            TargetKind::Plain => false,
            TargetKind::File => self.path_raw().exists(),
        })
    }

    /// Integer mtime (seconds), or `None` for plain targets and missing files.
    pub fn last_modified(&self) -> Option<i64> {
        *self.0.last_modified.get_or_init(|| match self.0.kind {
            TargetKind::Plain => None,
            TargetKind::File => std::fs::metadata(self.path_raw()).ok().and_then(|meta| {
                meta.modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
            }),
        })
    }

    /// True iff missing, or any dependency is out of date, or any
    /// dependency's mtime is newer than this target's. Memoized.
    pub fn out_of_date(&self) -> bool {
        *self.0.out_of_date.get_or_init(|| {
            if !self.exists() {
                return true;
            }
            for dep in self.dependencies() {
                if dep.out_of_date() {
                    return true;
                }
                if let (Some(mine), Some(theirs)) = (self.last_modified(), dep.last_modified()) {
                    if theirs > mine {
                        return true;
                    }
                }
            }
            false
        })
    }

    pub fn built(&self) -> bool {
        self.0.built.load(Ordering::SeqCst)
    }

    /// Run the builder with CWD switched to `env().basedir()`, restoring it
    /// on every exit path (including a panicking builder). Returns true on
    /// success and marks the target built.
    pub fn build(&self) -> bool {
        let env = self.env().clone();
        let ok = match ChdirGuard::enter(env.basedir()) {
            Ok(_guard) => self.run_builder(),
            Err(e) => {
                error!("failed to change directory to {}: {}", env.basedir().display(), e);
                false
            }
        };
        if ok {
            self.0.built.store(true, Ordering::SeqCst);
        }
        ok
    }

    fn run_builder(&self) -> bool {
        match &self.0.builder {
            Some(builder) => {
                let builder = builder.clone();
                let this = self.clone();
                match catch_unwind(AssertUnwindSafe(move || builder(&this))) {
                    Ok(result) => result,
                    Err(_) => {
                        error!("builder for {} panicked", self.fullname());
                        false
                    }
                }
            }
            None => {
                if self.exists() || !self.dependencies().is_empty() {
                    true
                } else {
                    error!("no rule to build {}", self.fullname());
                    false
                }
            }
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind == other.0.kind && self.fullname() == other.fullname()
    }
}
impl Eq for Target {}

impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.kind.hash(state);
        self.fullname().hash(state);
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.0.kind.name())
            .field("fullname", &self.fullname())
            .finish()
    }
}

/// Saves and restores the process's current directory across a scope.
///
/// CWD is a process-wide resource. The Python original dispatches builders
/// into separate OS *processes*, each with its own CWD, so no cross-job
/// locking was needed there. This engine's parallel scheduler dispatches
/// builders into OS *threads* sharing one address space, so a global lock
/// is required to keep one job's `chdir` from leaking into another's while
/// its builder runs (see DESIGN.md).
struct ChdirGuard {
    prev: PathBuf,
    _lock: std::sync::MutexGuard<'static, ()>,
}

static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

impl ChdirGuard {
    fn enter(dir: &Path) -> std::io::Result<Self> {
        let lock = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let prev = std::env::current_dir()?;
        std::env::set_current_dir(dir)?;
        Ok(ChdirGuard { prev, _lock: lock })
    }
}

impl Drop for ChdirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_target_fullname_equals_name() {
        let t = Target::plain("foo", vec![], None);
        assert_eq!(t.fullname(), "foo");
        assert!(!t.exists());
        assert_eq!(t.last_modified(), None);
    }

    #[test]
    fn no_rule_and_no_deps_is_unbuildable() {
        let env = Environment::new(std::env::temp_dir());
        let t = Target::plain("foo", vec![], None);
        env.add_target(&t, false, false);
        assert!(!t.build());
        assert!(!t.built());
    }

    #[test]
    fn no_rule_with_dependencies_is_a_phony_success() {
        let env = Environment::new(std::env::temp_dir());
        let dep = Target::plain("bar", vec![], Some(Arc::new(|_: &Target| true)));
        let t = Target::plain("foo", vec![dep], None);
        env.add_target(&t, false, false);
        assert!(t.build());
    }

    #[test]
    fn identity_is_kind_and_fullname() {
        let a = Target::plain("foo", vec![], None);
        let b = Target::plain("foo", vec![], None);
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
    }
}
