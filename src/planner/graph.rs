//! Step graph: validation and deterministic ordering.

use std::collections::{BTreeSet, HashMap};

use crate::error::GraphError;
use crate::steps::{Step, StepId};

/// A validated set of steps with their prerequisite edges.
#[derive(Debug, Clone)]
pub struct StepGraph {
    /// Steps in declaration order.
    steps: Vec<Step>,
    /// Declaration index of each id.
    index: HashMap<StepId, usize>,
    /// Prerequisite indices per step, in declaration order of the prerequisites.
    dependencies: Vec<Vec<usize>>,
    /// Indices of the steps that depend on each step.
    dependents: Vec<Vec<usize>>,
}

impl StepGraph {
    /// Builds a graph, rejecting duplicate ids and unknown prerequisites.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateStep`] or [`GraphError::UnknownPrerequisite`].
    pub fn new(steps: Vec<Step>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateStep {
                    id: step.id.to_string(),
                });
            }
        }

        let mut dependencies = vec![Vec::new(); steps.len()];
        let mut dependents = vec![Vec::new(); steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for prerequisite in &step.prerequisites {
                let Some(&dep) = index.get(prerequisite) else {
                    return Err(GraphError::UnknownPrerequisite {
                        step: step.id.to_string(),
                        prerequisite: prerequisite.to_string(),
                    });
                };
                if !dependencies[i].contains(&dep) {
                    dependencies[i].push(dep);
                    dependents[dep].push(i);
                }
            }
        }

        Ok(Self {
            steps,
            index,
            dependencies,
            dependents,
        })
    }

    /// Returns the steps in a linear order where every step follows all of
    /// its prerequisites. Among steps that are ready at the same time, the
    /// one declared first goes first.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Cycle`] naming a cycle if the graph has one.
    pub fn execution_order(&self) -> Result<Vec<&Step>, GraphError> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(next) = ready.pop_first() {
            order.push(&self.steps[next]);
            for &dependent in &self.dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.steps.len() {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(GraphError::Cycle {
                cycle: cycle
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(" -> "),
            });
        }

        Ok(order)
    }

    /// Finds a cycle, returned as a path that starts and ends on the same step.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<&StepId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            Visiting,
            Visited,
        }

        fn visit(
            node: usize,
            graph: &StepGraph,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            marks[node] = Mark::Visiting;
            path.push(node);

            for &dep in &graph.dependencies[node] {
                match marks[dep] {
                    Mark::Visiting => {
                        let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(dep, graph, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Visited => {}
                }
            }

            path.pop();
            marks[node] = Mark::Visited;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.steps.len()];
        let mut path = Vec::new();
        for start in 0..self.steps.len() {
            if marks[start] == Mark::Unvisited
                && let Some(cycle) = visit(start, self, &mut marks, &mut path)
            {
                return Some(cycle.into_iter().map(|i| &self.steps[i].id).collect());
            }
        }
        None
    }

    /// Returns every step that depends on `id`, directly or transitively,
    /// in declaration order.
    #[must_use]
    pub fn transitive_dependents(&self, id: &StepId) -> Vec<&StepId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };

        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &dependent in &self.dependents[node] {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
        seen.into_iter().map(|i| &self.steps[i].id).collect()
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the graph has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
