use crate::comm::message::Rank;

/// One node's view of the binary tree overlay spanned by a job.
///
/// Nodes are indexed in level order: the root is 0, the parent of `i` is
/// `(i-1)/2`, its children are `2i+1` and `2i+2`. Every index is hosted on
/// exactly one process; the hosting processes of an active job always form
/// a prefix `0..volume` of the index space.
#[derive(Debug, Clone)]
pub struct JobTree {
    comm_size: usize,
    index: usize,
    root_rank: Rank,
    parent_rank: Option<Rank>,
    left_child_rank: Option<Rank>,
    right_child_rank: Option<Rank>,
}

impl JobTree {
    pub fn new(comm_size: usize, world_rank: Rank) -> Self {
        Self {
            comm_size,
            index: 0,
            root_rank: world_rank,
            parent_rank: None,
            left_child_rank: None,
            right_child_rank: None,
        }
    }

    /// Take on a (possibly new) position in the tree.
    pub fn update(&mut self, index: usize, root_rank: Rank, parent_rank: Option<Rank>) {
        self.index = index;
        self.root_rank = root_rank;
        self.parent_rank = if index == 0 { None } else { parent_rank };
        self.left_child_rank = None;
        self.right_child_rank = None;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    pub fn comm_size(&self) -> usize {
        self.comm_size
    }

    pub fn root_rank(&self) -> Rank {
        self.root_rank
    }

    pub fn parent_rank(&self) -> Option<Rank> {
        self.parent_rank
    }

    pub fn parent_index(&self) -> Option<usize> {
        (self.index > 0).then(|| (self.index - 1) / 2)
    }

    pub fn left_child_index(&self) -> usize {
        2 * self.index + 1
    }

    pub fn right_child_index(&self) -> usize {
        2 * self.index + 2
    }

    pub fn left_child_rank(&self) -> Option<Rank> {
        self.left_child_rank
    }

    pub fn right_child_rank(&self) -> Option<Rank> {
        self.right_child_rank
    }

    pub fn set_child_rank(&mut self, index: usize, rank: Rank) {
        if index == self.left_child_index() {
            self.left_child_rank = Some(rank);
        } else if index == self.right_child_index() {
            self.right_child_rank = Some(rank);
        }
    }

    pub fn unset_child_rank(&mut self, index: usize) {
        if index == self.left_child_index() {
            self.left_child_rank = None;
        } else if index == self.right_child_index() {
            self.right_child_rank = None;
        }
    }

    pub fn unset_children(&mut self) {
        self.left_child_rank = None;
        self.right_child_rank = None;
    }

    pub fn child_ranks(&self) -> impl Iterator<Item = Rank> + '_ {
        self.left_child_rank.into_iter().chain(self.right_child_rank)
    }

    /// Child slots that must be occupied for the tree to reach `volume`
    /// but have no rank attached yet.
    pub fn open_child_slots(&self, volume: usize) -> Vec<usize> {
        let mut open = Vec::new();
        if self.left_child_index() < volume && self.left_child_rank.is_none() {
            open.push(self.left_child_index());
        }
        if self.right_child_index() < volume && self.right_child_rank.is_none() {
            open.push(self.right_child_index());
        }
        open
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_arithmetic() {
        let mut tree = JobTree::new(8, 3);
        tree.update(1, 0, Some(0));
        assert_eq!(tree.parent_index(), Some(0));
        assert_eq!(tree.left_child_index(), 3);
        assert_eq!(tree.right_child_index(), 4);
        assert!(!tree.is_root());
    }

    #[test]
    fn open_slots_follow_volume() {
        let mut tree = JobTree::new(8, 0);
        tree.update(0, 0, None);
        assert_eq!(tree.open_child_slots(1), Vec::<usize>::new());
        assert_eq!(tree.open_child_slots(2), vec![1]);
        assert_eq!(tree.open_child_slots(3), vec![1, 2]);
        tree.set_child_rank(1, 4);
        assert_eq!(tree.open_child_slots(3), vec![2]);
    }
}
