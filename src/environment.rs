//! A scoped key/value configuration with parent chaining, plus the target
//! registry a [`Target`](crate::target::Target) graph is registered into.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::target::Target;

/// The "arbitrary value" a Wormfile may stash in an Environment. CLI
/// `KEY=VAL` tokens always produce `Str`; Rust Wormfile code may use any
/// variant.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    Str(String),
    Bool(bool),
    Int(i64),
}

impl EnvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnvValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EnvValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<String> for EnvValue {
    fn from(s: String) -> Self {
        EnvValue::Str(s)
    }
}
impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        EnvValue::Str(s.to_string())
    }
}
impl From<bool> for EnvValue {
    fn from(b: bool) -> Self {
        EnvValue::Bool(b)
    }
}
impl From<i64> for EnvValue {
    fn from(i: i64) -> Self {
        EnvValue::Int(i)
    }
}

struct EnvironmentInner {
    basedir: PathBuf,
    prev: Option<Environment>,
    vars: RwLock<HashMap<String, EnvValue>>,
    targets: RwLock<HashMap<String, Target>>,
    clean_targets: RwLock<Vec<Target>>,
    main_target: RwLock<Option<Target>>,
}

/// A scoped config + target registry. Cheap to clone (reference-counted);
/// clones share the same underlying scope.
#[derive(Clone)]
pub struct Environment(Arc<EnvironmentInner>);

impl Environment {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Environment(Arc::new(EnvironmentInner {
            basedir: basedir.into(),
            prev: None,
            vars: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
            clean_targets: RwLock::new(Vec::new()),
            main_target: RwLock::new(None),
        }))
    }

    /// A child scope for a nested Wormfile, chained to this Environment.
    pub fn child(&self, basedir: impl Into<PathBuf>) -> Self {
        Environment(Arc::new(EnvironmentInner {
            basedir: basedir.into(),
            prev: Some(self.clone()),
            vars: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
            clean_targets: RwLock::new(Vec::new()),
            main_target: RwLock::new(None),
        }))
    }

    pub fn basedir(&self) -> &Path {
        &self.0.basedir
    }

    /// Local scope -> parent scope (recursively) -> process environment
    /// variable -> `None`.
    pub fn get(&self, key: &str) -> Option<EnvValue> {
        if let Some(v) = self.0.vars.read().unwrap().get(key) {
            return Some(v.clone());
        }
        if let Some(prev) = &self.0.prev {
            if let Some(v) = prev.get(key) {
                return Some(v);
            }
        } else if let Ok(v) = std::env::var(key) {
            return Some(EnvValue::Str(v));
        }
        None
    }

    pub fn get_or(&self, key: &str, default: EnvValue) -> EnvValue {
        self.get(key).unwrap_or(default)
    }

    /// Writes to local scope only.
    pub fn set(&self, key: impl Into<String>, value: impl Into<EnvValue>) {
        self.0.vars.write().unwrap().insert(key.into(), value.into());
    }

    pub fn set_if_unset(&self, key: impl Into<String>, value: impl Into<EnvValue>) {
        let key = key.into();
        if self.get(&key).is_none() {
            self.set(key, value);
        }
    }

    pub fn load_defaults(&self, defaults: impl IntoIterator<Item = (String, EnvValue)>) {
        for (k, v) in defaults {
            self.set_if_unset(k, v);
        }
    }

    pub fn main_target(&self) -> Option<Target> {
        self.0.main_target.read().unwrap().clone()
    }

    /// Looks up a registered target by its short `name` (as registered, not
    /// its resolved `fullname`) — this is what the CLI's `TARGET` positional
    /// argument matches against.
    pub fn target(&self, name: &str) -> Option<Target> {
        self.0.targets.read().unwrap().get(name).cloned()
    }

    /// Idempotent by name. Setting `main` updates `main_target`; setting
    /// `clean` appends to this Environment's clean list (and every
    /// ancestor's, via the parent chain). Recurses into `t.dependencies`.
    pub fn add_target(&self, t: &Target, main: bool, clean: bool) {
        t.attach_env(self.clone());
        let name = t.name().to_string();

        let already_present = self.0.targets.read().unwrap().contains_key(&name);
        if !already_present {
            self.0.targets.write().unwrap().insert(name, t.clone());
        }

        if main {
            *self.0.main_target.write().unwrap() = Some(t.clone());
        }
        if clean {
            let mut env = Some(self.clone());
            while let Some(e) = env {
                e.0.clean_targets.write().unwrap().push(t.clone());
                env = e.0.prev.clone();
            }
        }

        if !already_present {
            for dep in t.dependencies() {
                self.add_target(dep, false, false);
            }
        }
    }

    pub fn clean_targets(&self) -> Vec<Target> {
        self.0.clean_targets.read().unwrap().clone()
    }

    /// Opens a nested Wormfile in `dir` under a child Environment, running
    /// `loader` with CWD switched to `dir` for its duration.
    pub fn load_subfile(
        &self,
        dir: impl Into<PathBuf>,
        loader: impl FnOnce(&Environment) -> bool,
    ) -> std::io::Result<(Environment, bool)> {
        let dir = dir.into();
        let prev_cwd = std::env::current_dir()?;
        std::env::set_current_dir(&dir)?;
        let child = self.child(dir);
        let ok = loader(&child);
        std::env::set_current_dir(prev_cwd)?;
        Ok((child, ok))
    }
}
