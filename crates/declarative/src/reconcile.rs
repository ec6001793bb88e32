//! Reconciliation - prune a template graph down to the steps that must run

use crate::error::Result;
use crate::graph::PlanGraph;
use crate::report::RunReport;
use crate::state::ObservedState;
use crate::step::StepId;
use crate::types::{CheckOutcome, StepStatus};

/// Outcome of pruning a template against observed state
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Steps that still have to run, with edges between them
    pub graph: PlanGraph,
    /// Steps whose check reported `Satisfied`, in topological order
    pub pruned: Vec<StepId>,
    /// Expected observed state once `graph` has run successfully
    pub projected: ObservedState,
}

impl Reconciliation {
    /// Check if there is anything left to do
    pub fn has_changes(&self) -> bool {
        !self.graph.is_empty()
    }
}

/// Prune every step whose check already reports `Satisfied`
///
/// Steps are visited in topological order against a simulated state: each
/// kept step's declared effects are applied before its dependents are
/// checked, so a step downstream of a destructive step is re-evaluated
/// against the state that step leaves behind. `Unknown` keeps the step.
pub fn prune(template: PlanGraph, observed: &ObservedState) -> Result<Reconciliation> {
    let order = template.topological_order()?;
    let mut simulated = observed.clone();
    let mut pruned = Vec::new();

    for id in &order {
        let Some(node) = template.get(id) else {
            continue;
        };
        match node.step.check(&simulated) {
            CheckOutcome::Satisfied => {
                log::debug!("Pruning satisfied step {id}");
                pruned.push(id.clone());
            }
            outcome => {
                log::trace!("Keeping step {id} ({outcome:?})");
                node.step.effects(&mut simulated);
            }
        }
    }

    let graph = template.retain(|node| !pruned.contains(&node.id()));
    Ok(Reconciliation {
        graph,
        pruned,
        projected: simulated,
    })
}

/// Observed state after a run: `before` plus the effects of every step
/// that ended `succeeded`, applied in completion order
pub fn observe_run(graph: &PlanGraph, report: &RunReport, before: &ObservedState) -> ObservedState {
    let mut state = before.clone();
    for id in report.completion_order() {
        let succeeded = report
            .record(id)
            .is_some_and(|r| r.status == StepStatus::Succeeded);
        if succeeded && let Some(node) = graph.get(id) {
            node.step.effects(&mut state);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ApplyContext;
    use crate::error::StepError;
    use crate::step::Step;
    use crate::types::ResourceState;

    /// Ensures a fact is present (or absent, when `remove` is set)
    #[derive(Debug)]
    struct Ensure {
        id: &'static str,
        fact: &'static str,
        remove: bool,
    }

    impl Ensure {
        fn present(id: &'static str, fact: &'static str) -> Self {
            Self {
                id,
                fact,
                remove: false,
            }
        }

        fn absent(id: &'static str, fact: &'static str) -> Self {
            Self {
                id,
                fact,
                remove: true,
            }
        }
    }

    impl Step for Ensure {
        fn id(&self) -> StepId {
            self.id.to_string()
        }

        fn description(&self) -> String {
            self.id.to_string()
        }

        fn check(&self, observed: &ObservedState) -> CheckOutcome {
            match observed.get(self.fact) {
                Some(s) if s.is_present() != self.remove => CheckOutcome::Satisfied,
                Some(_) => CheckOutcome::Unsatisfied,
                None => CheckOutcome::Unknown,
            }
        }

        fn apply(&self, _ctx: &ApplyContext<'_>) -> std::result::Result<String, StepError> {
            Ok(String::new())
        }

        fn effects(&self, observed: &mut ObservedState) {
            let state = if self.remove {
                ResourceState::Absent
            } else {
                ResourceState::present()
            };
            observed.set(self.fact, state);
        }
    }

    #[test]
    fn test_empty_observation_keeps_everything() {
        let mut graph = PlanGraph::new();
        graph.add(Ensure::present("home", "dir:/srv"), &[]).unwrap();
        graph.add(Ensure::present("user", "user:site"), &["home"]).unwrap();

        let result = prune(graph, &ObservedState::new()).unwrap();
        assert_eq!(result.graph.len(), 2);
        assert!(result.pruned.is_empty());
    }

    #[test]
    fn test_satisfied_steps_pruned_and_edges_dropped() {
        let mut graph = PlanGraph::new();
        graph.add(Ensure::present("home", "dir:/srv"), &[]).unwrap();
        graph.add(Ensure::present("user", "user:site"), &["home"]).unwrap();

        let mut observed = ObservedState::new();
        observed.set("dir:/srv", ResourceState::present());
        observed.set("user:site", ResourceState::Absent);

        let result = prune(graph, &observed).unwrap();
        assert_eq!(result.pruned, vec!["home".to_string()]);
        assert_eq!(result.graph.ids(), vec!["user".to_string()]);
        assert!(result.graph.get("user").unwrap().preconditions.is_empty());
    }

    #[test]
    fn test_downstream_rechecked_after_destructive_step() {
        let mut graph = PlanGraph::new();
        graph.add(Ensure::absent("remove", "checkout"), &[]).unwrap();
        graph.add(Ensure::present("clone", "checkout"), &["remove"]).unwrap();

        let mut observed = ObservedState::new();
        observed.set("checkout", ResourceState::present());

        let result = prune(graph, &observed).unwrap();
        assert_eq!(result.graph.len(), 2);
        assert_eq!(result.projected.get("checkout"), Some(&ResourceState::present()));
    }

    #[test]
    fn test_projected_state_converges() {
        let mut graph = PlanGraph::new();
        graph.add(Ensure::present("home", "dir:/srv"), &[]).unwrap();
        graph.add(Ensure::present("user", "user:site"), &["home"]).unwrap();
        let template = graph.clone();

        let first = prune(graph, &ObservedState::new()).unwrap();
        let second = prune(template, &first.projected).unwrap();
        assert!(!second.has_changes());
        assert_eq!(second.pruned.len(), 2);
    }
}
