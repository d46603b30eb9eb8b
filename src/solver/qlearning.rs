// src/solver/qlearning.rs

//! Q-learning relaxation of unsatisfiable requests
//!
//! The agent perturbs the wanted list (dropping or re-adding original
//! targets) looking for a satisfiable request that keeps as many targets as
//! possible. Each perturbation is checked by re-running the solver with the
//! [`Explainer`] attached, so relaxation never recurses into itself.

use super::assertion::AssertionList;
use super::formula::{Formula, VariableMap};
use super::resolver::{Explainer, PackageResolver};
use super::{QLearningOptions, Solver};
use crate::error::{Error, Result};
use crate::package::Package;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, info};

/// Reward numerator for a satisfiable request
const SOLVED_REWARD: f64 = 24.0;
/// Reward for an unsatisfiable request
const UNSAT_PENALTY: f64 = -1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Action {
    Add(usize),
    Remove(usize),
    NoAction,
}

/// Membership mask over the original targets
type State = Vec<bool>;

/// Resolver that searches nearby satisfiable requests with Q-learning
#[derive(Debug, Clone)]
pub struct QLearningResolver {
    options: QLearningOptions,
}

impl QLearningResolver {
    pub fn new(options: QLearningOptions) -> Self {
        Self { options }
    }

    fn actions(&self, targets: usize) -> Vec<Action> {
        let mut actions = Vec::with_capacity(targets * 2 + 1);
        for i in 0..targets {
            actions.push(Action::Add(i));
            actions.push(Action::Remove(i));
        }
        if self.options.do_noop {
            actions.push(Action::NoAction);
        }
        actions
    }

    fn apply(state: &State, action: Action) -> State {
        let mut next = state.clone();
        match action {
            Action::Add(i) => next[i] = true,
            Action::Remove(i) => next[i] = false,
            Action::NoAction => {}
        }
        next
    }

    fn best_action(
        q: &HashMap<(State, Action), f64>,
        state: &State,
        actions: &[Action],
    ) -> (Action, f64) {
        let mut best = (actions[0], f64::NEG_INFINITY);
        for &a in actions {
            let value = q.get(&(state.clone(), a)).copied().unwrap_or(0.0);
            if value > best.1 {
                best = (a, value);
            }
        }
        best
    }
}

impl PackageResolver for QLearningResolver {
    fn resolve(
        &self,
        _formula: &Formula,
        _variables: &VariableMap,
        solver: &Solver<'_>,
        wanted: &[Package],
    ) -> Result<AssertionList> {
        let targets = wanted.len();
        if targets == 0 {
            return Err(Error::ResolverExhausted { attempts: 0 });
        }

        let actions = self.actions(targets);
        let opts = &self.options;
        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut q: HashMap<(State, Action), f64> = HashMap::new();
        let mut outcomes: HashMap<State, Option<AssertionList>> = HashMap::new();
        let mut observed_delta = opts.initial_observed_delta;
        let mut best: Option<AssertionList> = None;

        let full: State = vec![true; targets];
        outcomes.insert(full.clone(), None);
        let mut state = full.clone();
        let mut attempts = 0;
        let subsets = 1usize
            .checked_shl(targets as u32)
            .map_or(usize::MAX, |n| n - 1);

        info!("Relaxing unsatisfiable request of {} packages", targets);

        while attempts < opts.max_attempts {
            attempts += 1;

            let action = if rng.gen_bool(opts.exploration) {
                actions[rng.gen_range(0..actions.len())]
            } else {
                Self::best_action(&q, &state, &actions).0
            };
            let next = Self::apply(&state, action);
            let attempted = next.iter().filter(|&&b| b).count();

            let (reward, terminal) = if attempted == 0 {
                (UNSAT_PENALTY, true)
            } else {
                let cached = outcomes.get(&next).cloned();
                let outcome = match cached {
                    Some(known) => known,
                    None => {
                        let request: Vec<Package> = wanted
                            .iter()
                            .zip(&next)
                            .filter(|(_, keep)| **keep)
                            .map(|(p, _)| p.clone())
                            .collect();
                        let result = match solver.install_with(&request, Some(&Explainer)) {
                            Ok(assertions) => Some(assertions),
                            Err(Error::Unsatisfiable { .. }) => None,
                            Err(e) => return Err(e),
                        };
                        outcomes.insert(next.clone(), result.clone());
                        result
                    }
                };

                match outcome {
                    Some(assertions) => {
                        let delta = targets - attempted;
                        if delta < observed_delta {
                            debug!("Found satisfiable request dropping {} targets", delta);
                            observed_delta = delta;
                            best = Some(assertions);
                        }
                        (SOLVED_REWARD / attempted as f64, true)
                    }
                    None => (UNSAT_PENALTY, false),
                }
            };

            let future = if terminal {
                0.0
            } else {
                Self::best_action(&q, &next, &actions).1
            };
            let entry = q.entry((state.clone(), action)).or_insert(0.0);
            *entry += opts.learning_rate * (reward + opts.discount * future - *entry);

            // Dropping a single target is the best any relaxation can do
            if observed_delta <= 1 {
                break;
            }
            // Every subset has been tried
            if outcomes.len() >= subsets {
                break;
            }

            state = if terminal { full.clone() } else { next };
        }

        match best {
            Some(assertions) => {
                info!(
                    "Relaxed request after {} attempts, dropping {} targets",
                    attempts, observed_delta
                );
                Ok(assertions)
            }
            None => Err(Error::ResolverExhausted { attempts }),
        }
    }
}
