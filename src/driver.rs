//! Collaborator interfaces and a tick-based driver.
//!
//! The engine never reaches out to its collaborators on its own. A
//! [`LearningDriver`] is composed from an [`ObservationSource`], a
//! [`PolicyConsumer`] and an engine, and each [`LearningDriver::tick`] pulls
//! one batch, runs a lifecycle cycle, serves rules to the policy and queues
//! the policy's reported outcomes for the next cycle.

use crate::condition::QueryContext;
use crate::engine::{CycleReport, RuleEngine};
use crate::observation::Observation;
use crate::rule::CandidateRule;

/// Supplies batches of observations.
pub trait ObservationSource {
    /// Next batch; an empty batch means nothing new happened.
    fn next_batch(&mut self) -> Vec<Observation>;
}

/// Consumes rules and reports what happened when it acted on them.
pub trait PolicyConsumer {
    /// Situation to look up rules for, or `None` to skip this tick.
    fn query(&mut self) -> Option<QueryContext>;

    /// Acts on the ranked rules and returns the observed outcomes.
    fn apply(&mut self, rules: &[&CandidateRule]) -> Vec<Observation>;
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub cycle: CycleReport,
    pub rules_served: usize,
    pub feedback: usize,
}

/// Runs the engine against its collaborators, one tick at a time.
#[derive(Debug)]
pub struct LearningDriver<S, P> {
    engine: RuleEngine,
    source: S,
    policy: P,
    ticks: u64,
}

impl<S: ObservationSource, P: PolicyConsumer> LearningDriver<S, P> {
    #[must_use]
    pub fn new(engine: RuleEngine, source: S, policy: P) -> Self {
        Self {
            engine,
            source,
            policy,
            ticks: 0,
        }
    }

    pub fn tick(&mut self) -> TickReport {
        let batch = self.source.next_batch();
        let cycle = self.engine.run_cycle(&batch);

        let mut rules_served = 0;
        let mut feedback = Vec::new();
        if let Some(query) = self.policy.query() {
            let rules = self.engine.get_applicable_rules(&query);
            rules_served = rules.len();
            feedback = self.policy.apply(&rules);
        }
        let feedback_count = feedback.len();
        for obs in feedback {
            self.engine.record_outcome(obs);
        }

        self.ticks += 1;
        TickReport {
            cycle,
            rules_served,
            feedback: feedback_count,
        }
    }

    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    pub const fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RuleEngine {
        &mut self.engine
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Tears the driver down into its parts.
    pub fn into_parts(self) -> (RuleEngine, S, P) {
        (self.engine, self.source, self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Outcome;

    struct Scripted {
        batches: Vec<Vec<Observation>>,
    }

    impl ObservationSource for Scripted {
        fn next_batch(&mut self) -> Vec<Observation> {
            if self.batches.is_empty() {
                Vec::new()
            } else {
                self.batches.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct Greedy {
        seen: Vec<usize>,
    }

    impl PolicyConsumer for Greedy {
        fn query(&mut self) -> Option<QueryContext> {
            Some(QueryContext::new().subject("goblin"))
        }

        fn apply(&mut self, rules: &[&CandidateRule]) -> Vec<Observation> {
            self.seen.push(rules.len());
            if rules.is_empty() {
                return Vec::new();
            }
            vec![Observation::new("arena", "goblin", "strike", Outcome::success(1.0))]
        }
    }

    #[test]
    fn test_tick_feeds_outcomes_back() {
        let source = Scripted {
            batches: vec![vec![
                Observation::new("arena", "goblin", "strike", Outcome::success(1.0)),
                Observation::new("arena", "goblin", "strike", Outcome::success(1.0)),
            ]],
        };
        let mut driver = LearningDriver::new(RuleEngine::new(), source, Greedy::default());

        let first = driver.tick();
        assert!(first.rules_served > 0);
        assert_eq!(first.feedback, 1);
        assert_eq!(driver.engine().pending_feedback().len(), 1);

        let second = driver.tick();
        assert_eq!(second.cycle.validation.observations, 1);
        assert!(second.cycle.bloom.gated);
        assert!(driver.engine().pending_feedback().len() <= 1);
        assert_eq!(driver.ticks(), 2);
    }
}
