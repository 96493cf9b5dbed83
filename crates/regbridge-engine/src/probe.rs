/*!
 * Completion probes.
 *
 * The dispatcher asks a probe whether the host engine has finished the
 * step an action waits on. Until the probe says so, the action stays busy.
 */
use std::collections::VecDeque;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::action::ActionKind;

/// Tells the dispatcher whether the current step is done
pub trait CompletionProbe: fmt::Debug + Send {
    /// Whether the step the action waits on is complete
    fn is_done(&mut self, kind: ActionKind) -> bool;
}

/// Probe that is always done
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDone;

impl CompletionProbe for AlwaysDone {
    fn is_done(&mut self, _kind: ActionKind) -> bool {
        true
    }
}

/// Probe that is never done; every action runs into its timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDone;

impl CompletionProbe for NeverDone {
    fn is_done(&mut self, _kind: ActionKind) -> bool {
        false
    }
}

/// Probe that reports done at random, six times out of ten
#[derive(Debug)]
pub struct SimulatedProbe {
    rng: StdRng,
}

impl SimulatedProbe {
    /// Create a probe seeded from the OS
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a reproducible probe
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionProbe for SimulatedProbe {
    fn is_done(&mut self, _kind: ActionKind) -> bool {
        self.rng.gen_range(0..10) < 6
    }
}

/// Probe that replays a fixed sequence of answers, then reports done
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    answers: VecDeque<bool>,
    asked: usize,
}

impl ScriptedProbe {
    /// Replay `answers` in order
    pub fn new<I: IntoIterator<Item = bool>>(answers: I) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: 0,
        }
    }

    /// Busy `n` times, then done
    pub fn busy_for(n: usize) -> Self {
        Self::new(std::iter::repeat(false).take(n))
    }

    /// Number of times the probe was consulted
    pub fn asked(&self) -> usize {
        self.asked
    }
}

impl CompletionProbe for ScriptedProbe {
    fn is_done(&mut self, _kind: ActionKind) -> bool {
        self.asked += 1;
        self.answers.pop_front().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probes() {
        assert!(AlwaysDone.is_done(ActionKind::DeviceCreate));
        assert!(!NeverDone.is_done(ActionKind::DatapointRead));
    }

    #[test]
    fn test_scripted_probe() {
        let mut probe = ScriptedProbe::busy_for(2);
        assert!(!probe.is_done(ActionKind::DatapointWrite));
        assert!(!probe.is_done(ActionKind::DatapointWrite));
        assert!(probe.is_done(ActionKind::DatapointWrite));
        assert_eq!(probe.asked(), 3);
    }

    #[test]
    fn test_simulated_probe_rate() {
        let mut probe = SimulatedProbe::seeded(7);
        let done = (0..10_000)
            .filter(|_| probe.is_done(ActionKind::DatapointRead))
            .count();
        assert!((5_500..6_500).contains(&done), "done {} times", done);
    }
}
