//! Task graphs.
//!
//! Dependencies are declared by name and resolved once, when the graph is
//! built: group names expand to every member of the group, then the edges
//! are checked for cycles and a topological order is fixed. Execution only
//! ever consults the resolved form.

use crate::error::{Error, Result};
use crate::task::TaskSpec;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

/// Declares a graph before resolution.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    name: String,
    tasks: Vec<TaskSpec>,
    on_success: Vec<String>,
    schedule: Option<Duration>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    /// Trigger `graph` after each successful run of this one.
    pub fn on_success(mut self, graph: impl Into<String>) -> Self {
        self.on_success.push(graph.into());
        self
    }

    /// Trigger this graph every `interval`.
    pub fn schedule(mut self, interval: Duration) -> Self {
        self.schedule = Some(interval);
        self
    }

    pub fn build(self) -> Result<TaskGraph> {
        if self.tasks.is_empty() {
            return Err(Error::EmptyGraph { graph: self.name });
        }

        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut groups: HashMap<String, Vec<NodeIndex>> = HashMap::new();

        for (pos, task) in self.tasks.iter().enumerate() {
            let idx = graph.add_node(pos);
            if index.insert(task.id.clone(), idx).is_some() {
                return Err(Error::DuplicateTask {
                    graph: self.name,
                    task: task.id.clone(),
                });
            }
            if let Some(group) = &task.group {
                groups.entry(group.clone()).or_default().push(idx);
            }
        }

        if let Some(clash) = groups.keys().find(|g| index.contains_key(*g)) {
            return Err(Error::DuplicateTask {
                graph: self.name.clone(),
                task: clash.clone(),
            });
        }

        for (pos, task) in self.tasks.iter().enumerate() {
            let to = NodeIndex::new(pos);
            let mut upstream = BTreeSet::new();
            for dep in &task.depends_on {
                if let Some(&from) = index.get(dep) {
                    upstream.insert(from);
                } else if let Some(members) = groups.get(dep) {
                    upstream.extend(members.iter().copied());
                } else {
                    return Err(Error::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            for from in upstream {
                graph.add_edge(from, to, ());
            }
        }

        let order = toposort(&graph).map_err(|pos| Error::CycleDetected {
            graph: self.name.clone(),
            task: self.tasks[pos].id.clone(),
        })?;

        let upstream = (0..self.tasks.len())
            .map(|pos| neighbors(&graph, pos, Direction::Incoming))
            .collect();
        let downstream = (0..self.tasks.len())
            .map(|pos| neighbors(&graph, pos, Direction::Outgoing))
            .collect();

        Ok(TaskGraph {
            name: self.name,
            tasks: self.tasks,
            order,
            upstream,
            downstream,
            on_success: self.on_success,
            schedule: self.schedule,
        })
    }
}

/// Kahn's algorithm; ties resolve in declaration order. On a cycle, returns
/// the position of a task that could not be ordered.
fn toposort(graph: &DiGraph<usize, ()>) -> std::result::Result<Vec<usize>, usize> {
    let mut in_degree = vec![0usize; graph.node_count()];
    for edge in graph.edge_references() {
        in_degree[edge.target().index()] += 1;
    }

    let mut queue: VecDeque<usize> = (0..graph.node_count())
        .filter(|&pos| in_degree[pos] == 0)
        .collect();
    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(pos) = queue.pop_front() {
        order.push(pos);
        for next in neighbors(graph, pos, Direction::Outgoing) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != graph.node_count() {
        let stuck = (0..graph.node_count())
            .find(|&pos| in_degree[pos] > 0)
            .unwrap_or(0);
        return Err(stuck);
    }
    Ok(order)
}

fn neighbors(graph: &DiGraph<usize, ()>, pos: usize, dir: Direction) -> Vec<usize> {
    let mut out: Vec<usize> = graph
        .neighbors_directed(NodeIndex::new(pos), dir)
        .map(|n| n.index())
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// A resolved, acyclic task graph.
#[derive(Debug)]
pub struct TaskGraph {
    name: String,
    tasks: Vec<TaskSpec>,
    order: Vec<usize>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
    on_success: Vec<String>,
    schedule: Option<Duration>,
}

impl TaskGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task positions in a dependency-respecting order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn task(&self, pos: usize) -> &TaskSpec {
        &self.tasks[pos]
    }

    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == task_id)
    }

    /// Direct upstream positions of `pos`, after group expansion.
    pub fn upstream(&self, pos: usize) -> &[usize] {
        &self.upstream[pos]
    }

    pub fn downstream(&self, pos: usize) -> &[usize] {
        &self.downstream[pos]
    }

    /// Task ids in execution order.
    pub fn task_ids(&self) -> Vec<&str> {
        self.order.iter().map(|&p| self.tasks[p].id.as_str()).collect()
    }

    pub fn on_success(&self) -> &[String] {
        &self.on_success
    }

    pub fn schedule(&self) -> Option<Duration> {
        self.schedule
    }
}
