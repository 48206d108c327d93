//! The parallel scheduler: dispatches builders to worker threads bounded by
//! `-p N`, honoring the dependency partial order and cascading failures.
//!
//! Grounded on the completion-channel / readiness-prepass design in
//! `parallel.py`, translated from OS processes + pipes to OS threads + a
//! single [`mpsc`] channel (our workers share the parent's address space, so
//! a channel plays the role the original's per-job `Pipe()` + fileno queue
//! played across process boundaries).

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{error, info};

use crate::graph;
use crate::linearize::display_cycle;
use crate::target::{Key, Target};

/// Opaque id assigned to each target that will actually run as a job.
pub type Token = usize;

/// The set of tokens a job is still waiting on. `Many` is only allocated
/// for genuinely multi-predecessor jobs; the common single-predecessor case
/// is `One`.
#[derive(Debug, Clone)]
enum WaitSet {
    None,
    One(Token),
    Many(HashSet<Token>),
}

impl WaitSet {
    fn from_tokens(tokens: HashSet<Token>) -> Self {
        let mut it = tokens.into_iter();
        match (it.next(), it.next()) {
            (None, _) => WaitSet::None,
            (Some(t), None) => WaitSet::One(t),
            (Some(a), Some(b)) => {
                let mut s = HashSet::new();
                s.insert(a);
                s.insert(b);
                s.extend(it);
                WaitSet::Many(s)
            }
        }
    }

    /// Removes `token`; returns true if the set is now empty (the job is
    /// unblocked).
    fn resolve(&mut self, token: Token) -> bool {
        match self {
            WaitSet::None => true,
            WaitSet::One(t) => {
                debug_assert_eq!(*t, token);
                *self = WaitSet::None;
                true
            }
            WaitSet::Many(set) => {
                set.remove(&token);
                set.is_empty()
            }
        }
    }
}

#[derive(Clone)]
struct PrePassEntry {
    /// What a dependent of this target should wait on: this target's own
    /// token if it is a real job, or its forwarded wait set if it is a
    /// phony aggregate.
    forward: ForwardWait,
    token: Option<Token>,
}

#[derive(Clone)]
enum ForwardWait {
    Token(Token),
    Set(HashSet<Token>),
}

struct Job {
    target: Target,
    token: Token,
    remaining: WaitSet,
    failed: bool,
}

struct PrePass {
    jobs: HashMap<Token, Job>,
    leaves: Vec<Token>,
    /// token -> tokens of jobs waiting on it, so a completion can find who
    /// to notify without a linear scan.
    dependents: HashMap<Token, Vec<Token>>,
}

fn populate(
    memo: &mut HashMap<Key, PrePassEntry>,
    jobs: &mut HashMap<Token, Job>,
    next_token: &mut Token,
    targ: &Target,
) -> PrePassEntry {
    if let Some(entry) = memo.get(&targ.key()) {
        return entry.clone();
    }

    let mut wait_tokens: HashSet<Token> = HashSet::new();
    for dep in targ.dependencies() {
        let dep_entry = populate(memo, jobs, next_token, dep);
        match dep_entry.forward {
            ForwardWait::Token(t) => {
                wait_tokens.insert(t);
            }
            ForwardWait::Set(set) => wait_tokens.extend(set),
        }
    }

    let is_phony = targ.builder().is_none() && !targ.dependencies().is_empty();

    // Up-to-date targets are pruned before the pre-pass: they get no token
    // and forward nothing, the same way linearize_recurse skips them.
    let entry = if !targ.out_of_date() {
        PrePassEntry { forward: ForwardWait::Set(HashSet::new()), token: None }
    } else if is_phony {
        let forward = match wait_tokens.len() {
            0 => ForwardWait::Set(HashSet::new()),
            1 => ForwardWait::Token(*wait_tokens.iter().next().unwrap()),
            _ => ForwardWait::Set(wait_tokens),
        };
        PrePassEntry { forward, token: None }
    } else {
        let waitset = WaitSet::from_tokens(wait_tokens);
        let token = *next_token;
        *next_token += 1;
        jobs.insert(
            token,
            Job {
                target: targ.clone(),
                token,
                remaining: waitset,
                failed: false,
            },
        );
        PrePassEntry {
            forward: ForwardWait::Token(token),
            token: Some(token),
        }
    };

    memo.insert(targ.key(), entry.clone());
    entry
}

fn build_prepass(root: &Target) -> PrePass {
    let mut memo = HashMap::new();
    let mut jobs = HashMap::new();
    let mut next_token = 0usize;
    populate(&mut memo, &mut jobs, &mut next_token, root);

    let mut dependents: HashMap<Token, Vec<Token>> = HashMap::new();
    let mut leaves = Vec::new();
    for job in jobs.values() {
        match &job.remaining {
            WaitSet::None => leaves.push(job.token),
            WaitSet::One(t) => dependents.entry(*t).or_default().push(job.token),
            WaitSet::Many(set) => {
                for t in set {
                    dependents.entry(*t).or_default().push(job.token);
                }
            }
        }
    }

    PrePass { jobs, leaves, dependents }
}

/// A bounded semaphore gating how many builders run concurrently. `None`
/// means unbounded.
struct Limiter {
    state: Mutex<usize>,
    cond: Condvar,
    cap: Option<usize>,
}

impl Limiter {
    fn new(cap: Option<usize>) -> Arc<Self> {
        Arc::new(Limiter { state: Mutex::new(0), cond: Condvar::new(), cap })
    }

    fn acquire(&self) {
        let Some(cap) = self.cap else { return };
        let mut active = self.state.lock().unwrap();
        while *active >= cap {
            active = self.cond.wait(active).unwrap();
        }
        *active += 1;
    }

    fn release(&self) {
        if self.cap.is_none() {
            return;
        }
        let mut active = self.state.lock().unwrap();
        *active -= 1;
        self.cond.notify_one();
    }
}

enum Completion {
    Done(Token, bool),
}

fn dispatch(tx: mpsc::Sender<Completion>, limiter: Arc<Limiter>, job: &Job) {
    let token = job.token;
    if job.target.builder().is_none() {
        // Runnable only because it has no dependencies; no work to spawn.
        let ok = job.target.exists();
        let _ = tx.send(Completion::Done(token, ok));
        return;
    }

    let targ = job.target.clone();
    limiter.acquire();
    let limiter = limiter.clone();
    std::thread::spawn(move || {
        let ok = targ.build();
        limiter.release();
        let _ = tx.send(Completion::Done(token, ok));
    });
}

/// Runs `root`'s build graph with at most `max_workers` builders running
/// concurrently (`None` = unbounded). Returns overall success.
pub fn parallel_build(root: &Target, max_workers: Option<usize>) -> bool {
    if let Some(cycle) = graph::detect_cycle(root) {
        display_cycle(&cycle);
        return false;
    }

    let mut pre = build_prepass(root);
    let (tx, rx) = mpsc::channel();
    let limiter = Limiter::new(max_workers);

    let mut remaining = pre.jobs.len();
    if remaining == 0 {
        info!("Build successful");
        return true;
    }

    for token in pre.leaves.clone() {
        let job = pre.jobs.get(&token).expect("leaf token must be a known job");
        dispatch(tx.clone(), limiter.clone(), job);
    }

    let mut any_failures = false;

    while remaining > 0 {
        let Completion::Done(token, success) = rx.recv().expect("scheduler channel closed early");
        remaining -= 1;
        if !success {
            any_failures = true;
            error!(
                "Build failed for {}: {}",
                pre.jobs[&token].target.kind().name(),
                pre.jobs[&token].target.fullname()
            );
        }

        let Some(waiters) = pre.dependents.remove(&token) else {
            continue;
        };
        for waiter_token in waiters {
            let unblocked = {
                let job = pre.jobs.get_mut(&waiter_token).expect("waiter token must be a known job");
                job.failed = job.failed || !success;
                job.remaining.resolve(token)
            };
            if unblocked {
                let job = pre.jobs.get(&waiter_token).unwrap();
                if job.failed {
                    // Cascade: deliver a synthetic failure without running it.
                    let _ = tx.send(Completion::Done(waiter_token, false));
                } else {
                    dispatch(tx.clone(), limiter.clone(), job);
                }
            }
        }
    }

    if !any_failures {
        info!("Build successful");
    }
    !any_failures
}
