use std::collections::BTreeSet;

/// Directed prerequisite graph over chapters
///
/// Nodes are chapter indices in proposed order; an edge `(a, b)` means
/// chapter `a` must come before chapter `b`.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    nodes: usize,
    edges: BTreeSet<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

impl PrerequisiteGraph {
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            edges: BTreeSet::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes
    }

    /// Add `prerequisite -> dependent`; self loops and unknown nodes are ignored
    pub fn add_edge(&mut self, prerequisite: usize, dependent: usize) -> bool {
        if prerequisite == dependent || prerequisite >= self.nodes || dependent >= self.nodes {
            return false;
        }
        self.edges.insert((prerequisite, dependent))
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().copied()
    }

    pub fn prerequisites_of(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges.iter().filter(move |(_, d)| *d == node).map(|(p, _)| *p)
    }

    fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.nodes];
        for &(from, to) in &self.edges {
            adjacency[from].push(to);
        }
        adjacency
    }

    /// Edges of some cycle, if the graph has one
    pub fn find_cycle(&self) -> Option<Vec<(usize, usize)>> {
        let adjacency = self.adjacency();
        let mut state = vec![Visit::New; self.nodes];
        let mut path = Vec::new();

        (0..self.nodes).find_map(|start| {
            if state[start] == Visit::New {
                dfs(start, &adjacency, &mut state, &mut path)
            } else {
                None
            }
        })
    }

    /// Remove edges until acyclic, returning the removed edges in order
    ///
    /// From each cycle the edge whose prerequisite appears latest in the
    /// proposed order is the least trustworthy and is dropped.
    pub fn break_cycles(&mut self) -> Vec<(usize, usize)> {
        let mut removed = Vec::new();
        while let Some(cycle) = self.find_cycle() {
            let Some(&weakest) = cycle.iter().max() else {
                break;
            };
            self.edges.remove(&weakest);
            removed.push(weakest);
        }
        removed
    }

    /// Kahn's algorithm, always choosing the ready node with the smallest key
    ///
    /// Returns `None` if the graph has a cycle.
    pub fn topological_order<K: Ord>(&self, key: impl Fn(usize) -> K) -> Option<Vec<usize>> {
        let adjacency = self.adjacency();
        let mut in_degree = vec![0usize; self.nodes];
        for &(_, to) in &self.edges {
            in_degree[to] += 1;
        }

        let mut ready: BTreeSet<(K, usize)> = (0..self.nodes)
            .filter(|&n| in_degree[n] == 0)
            .map(|n| (key(n), n))
            .collect();
        let mut order = Vec::with_capacity(self.nodes);

        while let Some((_, node)) = ready.pop_first() {
            order.push(node);
            for &next in &adjacency[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert((key(next), next));
                }
            }
        }

        (order.len() == self.nodes).then_some(order)
    }
}

fn dfs(
    node: usize,
    adjacency: &[Vec<usize>],
    state: &mut [Visit],
    path: &mut Vec<usize>,
) -> Option<Vec<(usize, usize)>> {
    state[node] = Visit::Active;
    path.push(node);

    for &next in &adjacency[node] {
        match state[next] {
            Visit::Active => {
                let start = path.iter().position(|&n| n == next)?;
                let mut cycle: Vec<(usize, usize)> = path[start..].windows(2).map(|w| (w[0], w[1])).collect();
                cycle.push((node, next));
                return Some(cycle);
            }
            Visit::New => {
                if let Some(cycle) = dfs(next, adjacency, state, path) {
                    return Some(cycle);
                }
            }
            Visit::Done => {}
        }
    }

    path.pop();
    state[node] = Visit::Done;
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_has_no_cycle() {
        let mut graph = PrerequisiteGraph::new(3);
        graph.add_edge(0, 1);
        graph.add_edge(1, 2);
        assert!(graph.find_cycle().is_none());
        assert!(!graph.add_edge(1, 1));
        assert!(!graph.add_edge(0, 9));
    }

    #[test]
    fn test_cycle_broken_at_latest_prerequisite() {
        let mut graph = PrerequisiteGraph::new(3);
        graph.add_edge(0, 1);
        graph.add_edge(1, 2);
        graph.add_edge(2, 0);

        let removed = graph.break_cycles();
        assert_eq!(removed, vec![(2, 0)]);
        assert!(graph.find_cycle().is_none());
        assert_eq!(graph.topological_order(|n| n), Some(vec![0, 1, 2]));
    }

    #[test]
    fn test_two_cycles_both_broken() {
        let mut graph = PrerequisiteGraph::new(4);
        graph.add_edge(0, 1);
        graph.add_edge(1, 0);
        graph.add_edge(2, 3);
        graph.add_edge(3, 2);

        let removed = graph.break_cycles();
        assert_eq!(removed.len(), 2);
        assert!(graph.topological_order(|n| n).is_some());
    }

    #[test]
    fn test_kahn_prefers_smallest_key_among_ready() {
        let mut graph = PrerequisiteGraph::new(3);
        // 2 must precede 0; 1 is free
        graph.add_edge(2, 0);

        let order = graph.topological_order(|n| n).unwrap();
        assert_eq!(order, vec![1, 2, 0]);

        let order = graph.topological_order(|n| std::cmp::Reverse(n)).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_cyclic_graph_has_no_order() {
        let mut graph = PrerequisiteGraph::new(2);
        graph.add_edge(0, 1);
        graph.add_edge(1, 0);
        assert!(graph.topological_order(|n| n).is_none());
    }
}
