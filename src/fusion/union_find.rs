/// Arena-indexed disjoint-set forest with union by rank and path compression
///
/// The resulting partition depends only on which pairs were united, never on
/// the order of the unions.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = node;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Returns false if `a` and `b` were already in the same set
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }
        true
    }

    /// Sets as ascending member lists, ordered by their smallest member
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: Vec<Option<usize>> = vec![None; self.parent.len()];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for node in 0..self.parent.len() {
            let root = self.find(node);
            match by_root[root] {
                Some(slot) => groups[slot].push(node),
                None => {
                    by_root[root] = Some(groups.len());
                    groups.push(vec![node]);
                }
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitive_union() {
        let mut set = DisjointSet::new(5);
        set.union(0, 1);
        set.union(1, 3);
        assert_eq!(set.find(0), set.find(3));
        assert!(!set.union(3, 0));
        assert_eq!(set.groups(), vec![vec![0, 1, 3], vec![2], vec![4]]);
    }

    #[test]
    fn test_grouping_independent_of_order() {
        let pairs = [(0, 1), (2, 3), (1, 2), (4, 5)];

        let mut forward = DisjointSet::new(6);
        for &(a, b) in &pairs {
            forward.union(a, b);
        }
        let mut backward = DisjointSet::new(6);
        for &(a, b) in pairs.iter().rev() {
            backward.union(b, a);
        }

        assert_eq!(forward.groups(), backward.groups());
    }
}
