//! Job graph built from needs: relations (Arc<str> optimized)
//!
//! Uses Arc<str> for zero-cost cloning of job IDs.
//!
//! Validation:
//! - Cycle detection using DFS three-color algorithm
//! - Deterministic topological order (Kahn's, declaration order tie-break)

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::EngineError;
use crate::workflow::Workflow;

/// Graph of job dependencies built from needs: declarations
///
/// Uses Arc<str> internally for zero-cost cloning.
pub struct JobGraph {
    /// job_id -> list of dependent job_ids (jobs that need this one)
    adjacency: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// job_id -> list of dependency job_ids (the needs: entries)
    predecessors: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// All job IDs in declaration order
    job_ids: Vec<Arc<str>>,
    /// Quick lookup for job existence
    job_set: HashSet<Arc<str>>,
}

impl JobGraph {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let capacity = workflow.jobs.len();
        let mut adjacency: HashMap<Arc<str>, Vec<Arc<str>>> = HashMap::with_capacity(capacity);
        let mut predecessors: HashMap<Arc<str>, Vec<Arc<str>>> = HashMap::with_capacity(capacity);
        let mut job_ids: Vec<Arc<str>> = Vec::with_capacity(capacity);
        let mut job_set: HashSet<Arc<str>> = HashSet::with_capacity(capacity);

        // Create Arc<str> once per job, reuse everywhere
        for job in &workflow.jobs {
            let id: Arc<str> = Arc::from(job.id.as_str());
            job_ids.push(Arc::clone(&id));
            job_set.insert(Arc::clone(&id));
            adjacency.insert(Arc::clone(&id), Vec::new());
            predecessors.insert(id, Vec::new());
        }

        // Build edges: needs -> job
        for job in &workflow.jobs {
            let tgt_arc = job_set
                .get(job.id.as_str())
                .cloned()
                .unwrap_or_else(|| Arc::from(job.id.as_str()));

            // Repeated needs: entries collapse to one edge, otherwise the
            // in-degree count would never reach zero in topo_order
            let mut seen_needs: HashSet<&str> = HashSet::new();
            for needs in job.needs_ids() {
                if !seen_needs.insert(needs) {
                    continue;
                }
                // Find existing Arc<str> or create new (validation catches unknowns)
                let src_arc = job_set
                    .get(needs)
                    .cloned()
                    .unwrap_or_else(|| Arc::from(needs));

                adjacency
                    .entry(Arc::clone(&src_arc))
                    .or_default()
                    .push(Arc::clone(&tgt_arc));
                predecessors
                    .entry(Arc::clone(&tgt_arc))
                    .or_default()
                    .push(src_arc);
            }
        }

        Self {
            adjacency,
            predecessors,
            job_ids,
            job_set,
        }
    }

    /// Get dependencies of a job (returns Arc<str> slice)
    #[inline]
    pub fn dependencies(&self, job_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(job_id)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    /// Get dependents of a job (jobs whose needs: include it)
    #[inline]
    pub fn dependents(&self, job_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.adjacency
            .get(job_id)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    /// All job IDs in declaration order
    pub fn job_ids(&self) -> &[Arc<str>] {
        &self.job_ids
    }

    /// Check if job exists
    #[inline]
    pub fn contains(&self, job_id: &str) -> bool {
        self.job_set.contains(job_id)
    }

    /// Check if there's a path from `from` to `to` (BFS over dependents)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.adjacency.get(current) {
                for neighbor in neighbors {
                    if neighbor.as_ref() == to {
                        return true;
                    }
                    if !visited.contains(neighbor.as_ref()) {
                        visited.insert(neighbor.as_ref());
                        queue.push_back(neighbor.as_ref());
                    }
                }
            }
        }

        false
    }

    /// Detect cycles in the job graph using DFS with three-color marking.
    ///
    /// Returns `Ok(())` if acyclic, `Err(EngineError::CycleDetected)` with the
    /// cycle path if a cycle exists.
    ///
    /// Uses the standard three-color algorithm:
    /// - White: unvisited
    /// - Gray: currently in DFS stack (visiting)
    /// - Black: fully processed (all descendants visited)
    ///
    /// A cycle is detected when we encounter a Gray node while traversing.
    pub fn detect_cycles(&self) -> Result<(), EngineError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: HashMap<Arc<str>, Color> = self
            .job_ids
            .iter()
            .map(|id| (Arc::clone(id), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        fn dfs(
            node: Arc<str>,
            adjacency: &HashMap<Arc<str>, Vec<Arc<str>>>,
            colors: &mut HashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> Result<(), String> {
            colors.insert(Arc::clone(&node), Color::Gray);
            stack.push(Arc::clone(&node));

            if let Some(neighbors) = adjacency.get(&node) {
                for neighbor in neighbors {
                    match colors.get(neighbor) {
                        Some(Color::Gray) => {
                            // Found cycle: a Gray neighbor is in the current DFS path
                            let cycle_start = stack
                                .iter()
                                .position(|x| x.as_ref() == neighbor.as_ref())
                                .unwrap_or(0);
                            let cycle: Vec<&str> =
                                stack[cycle_start..].iter().map(|s| s.as_ref()).collect();
                            return Err(format!("{} → {}", cycle.join(" → "), neighbor));
                        }
                        Some(Color::White) | None => {
                            dfs(Arc::clone(neighbor), adjacency, colors, stack)?;
                        }
                        Some(Color::Black) => {} // Already processed
                    }
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        for job_id in &self.job_ids {
            if colors.get(job_id) == Some(&Color::White) {
                if let Err(cycle) = dfs(
                    Arc::clone(job_id),
                    &self.adjacency,
                    &mut colors,
                    &mut stack,
                ) {
                    return Err(EngineError::CycleDetected { cycle });
                }
            }
        }

        Ok(())
    }

    /// Topological order via Kahn's algorithm.
    ///
    /// Ties among equally-ready jobs are broken by declaration order, so the
    /// result is deterministic for identical inputs. Assumes `detect_cycles`
    /// has passed; a cycle shows up as a short result and is re-reported.
    pub fn topo_order(&self) -> Result<Vec<Arc<str>>, EngineError> {
        let mut in_degree: HashMap<&str, usize> = self
            .job_ids
            .iter()
            .map(|id| (id.as_ref(), self.dependencies(id).len()))
            .collect();

        let mut order: Vec<Arc<str>> = Vec::with_capacity(self.job_ids.len());
        let mut ready: VecDeque<Arc<str>> = self
            .job_ids
            .iter()
            .filter(|id| in_degree[id.as_ref()] == 0)
            .cloned()
            .collect();

        while let Some(id) = ready.pop_front() {
            order.push(Arc::clone(&id));

            // Declaration-order scan keeps the output deterministic
            for candidate in &self.job_ids {
                if self.dependencies(candidate).iter().any(|d| *d == id) {
                    let deg = in_degree.get_mut(candidate.as_ref()).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push_back(Arc::clone(candidate));
                    }
                }
            }
        }

        if order.len() != self.job_ids.len() {
            self.detect_cycles()?;
        }

        Ok(order)
    }
}
