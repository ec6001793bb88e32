//! Plan graph - steps plus the dependency relation between them

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::error::{GraphError, Result};
use crate::step::{SharedStep, Step, StepId};

/// A step placed in a plan graph, with the steps that must succeed first
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub step: SharedStep,
    pub preconditions: Vec<StepId>,
}

impl PlannedStep {
    pub fn id(&self) -> StepId {
        self.step.id()
    }
}

/// A directed acyclic graph of steps
///
/// Steps are kept in insertion order, which is also the tie-break order
/// for scheduling independent steps.
#[derive(Debug, Clone, Default)]
pub struct PlanGraph {
    nodes: Vec<PlannedStep>,
    index: HashMap<StepId, usize>,
}

impl PlanGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step that runs after `preconditions` have succeeded
    ///
    /// Preconditions may name steps that are added later; call
    /// [`PlanGraph::validate`] once the graph is complete.
    pub fn add<S: Step + 'static>(&mut self, step: S, preconditions: &[&str]) -> Result<()> {
        self.add_shared(
            std::sync::Arc::new(step),
            preconditions.iter().map(|p| (*p).to_string()).collect(),
        )
    }

    /// Add an already shared step
    pub fn add_shared(&mut self, step: SharedStep, preconditions: Vec<StepId>) -> Result<()> {
        let id = step.id();
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateStep(id));
        }

        let mut seen = BTreeSet::new();
        let preconditions = preconditions
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();

        self.index.insert(id, self.nodes.len());
        self.nodes.push(PlannedStep {
            step,
            preconditions,
        });
        Ok(())
    }

    /// Check that every precondition resolves and the graph is acyclic
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            for pre in &node.preconditions {
                if !self.index.contains_key(pre) {
                    return Err(GraphError::DanglingPrecondition {
                        step: node.id(),
                        missing: pre.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(GraphError::Cycle(cycle));
        }

        Ok(())
    }

    /// Topological order, independent steps in insertion order
    pub fn topological_order(&self) -> Result<Vec<StepId>> {
        Ok(self
            .layers()?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Steps grouped into waves: every step in a layer depends only on
    /// steps in earlier layers, so a layer's steps are mutually independent
    pub fn layers(&self) -> Result<Vec<Vec<StepId>>> {
        self.validate()?;

        let mut remaining: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| n.preconditions.len())
            .collect();
        let dependents = self.dependents_by_index();

        let mut current: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut layers = Vec::new();

        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for &i in &current {
                for &d in &dependents[i] {
                    remaining[d] -= 1;
                    if remaining[d] == 0 {
                        next.insert(d);
                    }
                }
            }
            layers.push(current.iter().map(|&i| self.nodes[i].id()).collect());
            current = next.into_iter().collect();
        }

        Ok(layers)
    }

    pub fn get(&self, id: &str) -> Option<&PlannedStep> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Step ids in insertion order
    pub fn ids(&self) -> Vec<StepId> {
        self.nodes.iter().map(PlannedStep::id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedStep> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Steps that list `id` as a precondition
    pub fn dependents(&self, id: &str) -> Vec<StepId> {
        self.nodes
            .iter()
            .filter(|n| n.preconditions.iter().any(|p| p == id))
            .map(PlannedStep::id)
            .collect()
    }

    /// Whether `to` is reachable from `from` along dependency edges
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        let (Some(&start), Some(&goal)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        let dependents = self.dependents_by_index();
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);

        while let Some(i) = queue.pop_front() {
            if i == goal {
                return true;
            }
            for &d in &dependents[i] {
                if !seen[d] {
                    seen[d] = true;
                    queue.push_back(d);
                }
            }
        }
        false
    }

    /// Keep only steps matching `keep`
    ///
    /// A kept step inherits the preconditions of every removed step it
    /// depended on, so ordering between the remaining steps is preserved.
    pub fn retain<F>(self, mut keep: F) -> Self
    where
        F: FnMut(&PlannedStep) -> bool,
    {
        let kept: Vec<bool> = self.nodes.iter().map(|n| keep(n)).collect();

        let mut graph = Self::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if !kept[i] {
                continue;
            }
            let preconditions = self.kept_preconditions(i, &kept);
            graph.index.insert(node.id(), graph.nodes.len());
            graph.nodes.push(PlannedStep {
                step: node.step.clone(),
                preconditions,
            });
        }
        graph
    }

    /// Nearest kept ancestors of `node`, looking through removed steps
    fn kept_preconditions(&self, node: usize, kept: &[bool]) -> Vec<StepId> {
        let direct = |i: usize| {
            self.nodes[i]
                .preconditions
                .iter()
                .filter_map(|p| self.index.get(p).copied())
                .collect::<Vec<_>>()
        };

        let mut seen = vec![false; self.nodes.len()];
        let mut found = BTreeSet::new();
        let mut stack = direct(node);
        while let Some(i) = stack.pop() {
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            if kept[i] {
                found.insert(i);
            } else {
                stack.extend(direct(i));
            }
        }
        found.into_iter().map(|i| self.nodes[i].id()).collect()
    }

    pub(crate) fn nodes(&self) -> &[PlannedStep] {
        &self.nodes
    }

    pub(crate) fn dependents_by_index(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for pre in &node.preconditions {
                if let Some(&p) = self.index.get(pre) {
                    dependents[p].push(i);
                }
            }
        }
        dependents
    }

    pub(crate) fn preconditions_by_index(&self) -> Vec<Vec<usize>> {
        self.nodes
            .iter()
            .map(|n| {
                n.preconditions
                    .iter()
                    .filter_map(|p| self.index.get(p).copied())
                    .collect()
            })
            .collect()
    }

    fn find_cycle(&self) -> Option<Vec<StepId>> {
        let dependents = self.dependents_by_index();
        let mut states = vec![Visit::New; self.nodes.len()];
        let mut stack = Vec::new();

        for start in 0..self.nodes.len() {
            if states[start] == Visit::New
                && let Some(path) = self.detect_cycle(start, &dependents, &mut states, &mut stack)
            {
                return Some(path);
            }
        }
        None
    }

    fn detect_cycle(
        &self,
        node: usize,
        dependents: &[Vec<usize>],
        states: &mut [Visit],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<StepId>> {
        states[node] = Visit::Visiting;
        stack.push(node);

        for &next in &dependents[node] {
            match states[next] {
                Visit::Visiting => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<StepId> =
                        stack[start..].iter().map(|&n| self.nodes[n].id()).collect();
                    cycle.push(self.nodes[next].id());
                    return Some(cycle);
                }
                Visit::New => {
                    if let Some(cycle) = self.detect_cycle(next, dependents, states, stack) {
                        return Some(cycle);
                    }
                }
                Visit::Done => {}
            }
        }

        stack.pop();
        states[node] = Visit::Done;
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Visiting,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ApplyContext;
    use crate::error::StepError;
    use crate::state::ObservedState;
    use crate::types::CheckOutcome;

    #[derive(Debug)]
    struct Noop(&'static str);

    impl Step for Noop {
        fn id(&self) -> StepId {
            self.0.to_string()
        }

        fn description(&self) -> String {
            format!("noop {}", self.0)
        }

        fn check(&self, _observed: &ObservedState) -> CheckOutcome {
            CheckOutcome::Unknown
        }

        fn apply(&self, _ctx: &ApplyContext<'_>) -> std::result::Result<String, StepError> {
            Ok(String::new())
        }
    }

    fn diamond() -> PlanGraph {
        let mut graph = PlanGraph::new();
        graph.add(Noop("clone"), &[]).unwrap();
        graph.add(Noop("deps"), &["clone"]).unwrap();
        graph.add(Noop("nginx"), &["clone"]).unwrap();
        graph.add(Noop("init"), &["clone"]).unwrap();
        graph.add(Noop("start"), &["deps", "nginx", "init"]).unwrap();
        graph
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut graph = PlanGraph::new();
        graph.add(Noop("a"), &[]).unwrap();
        assert_eq!(
            graph.add(Noop("a"), &[]),
            Err(GraphError::DuplicateStep("a".into()))
        );
    }

    #[test]
    fn test_dangling_precondition() {
        let mut graph = PlanGraph::new();
        graph.add(Noop("a"), &["ghost"]).unwrap();
        assert_eq!(
            graph.validate(),
            Err(GraphError::DanglingPrecondition {
                step: "a".into(),
                missing: "ghost".into()
            })
        );
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let mut graph = PlanGraph::new();
        graph.add(Noop("a"), &["c"]).unwrap();
        graph.add(Noop("b"), &["a"]).unwrap();
        graph.add(Noop("c"), &["b"]).unwrap();

        match graph.validate() {
            Err(GraphError::Cycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn test_layers_group_independent_steps() {
        let layers = diamond().layers().unwrap();
        assert_eq!(
            layers,
            vec![
                vec!["clone".to_string()],
                vec!["deps".to_string(), "nginx".to_string(), "init".to_string()],
                vec!["start".to_string()],
            ]
        );
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let graph = diamond();
        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        for node in graph.iter() {
            for pre in &node.preconditions {
                assert!(pos(pre) < pos(&node.id()));
            }
        }
    }

    #[test]
    fn test_has_path() {
        let graph = diamond();
        assert!(graph.has_path("clone", "start"));
        assert!(!graph.has_path("deps", "nginx"));
        assert!(!graph.has_path("start", "clone"));
    }

    #[test]
    fn test_retain_drops_edges_to_removed_roots() {
        let graph = diamond().retain(|n| n.id() != "clone");
        assert_eq!(graph.len(), 4);
        assert!(graph.get("deps").unwrap().preconditions.is_empty());
        assert_eq!(graph.get("start").unwrap().preconditions.len(), 3);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_retain_keeps_order_through_removed_steps() {
        let graph = diamond().retain(|n| !matches!(n.id().as_str(), "deps" | "nginx" | "init"));
        assert_eq!(graph.get("start").unwrap().preconditions, vec!["clone".to_string()]);
        assert!(graph.has_path("clone", "start"));
    }
}
