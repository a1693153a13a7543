use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    priority: f64,
}

/// Keeps the `capacity` highest-priority entries of a stream
///
/// Backed by an array min-heap: the root is always the weakest retained
/// entry, so an insertion into a full selector either replaces the root and
/// sifts it down, or is rejected. Both cost O(log k).
///
/// Priorities are compared with [`f64::total_cmp`]. Between equal priorities
/// the entry that arrived first is retained, and [`pop_highest`] returns the
/// candidate at the lowest heap index, so results are deterministic for a
/// given insertion sequence.
///
/// [`pop_highest`]: TopK::pop_highest
#[derive(Debug, Clone)]
pub struct TopK<T> {
    heap: Vec<Entry<T>>,
    capacity: usize,
}

fn lower(a: f64, b: f64) -> bool {
    a.total_cmp(&b) == Ordering::Less
}

impl<T> TopK<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, value: T, priority: f64) {
        if self.capacity == 0 {
            return;
        }

        if self.heap.len() < self.capacity {
            self.heap.push(Entry { value, priority });
            self.sift_up(self.heap.len() - 1);
            return;
        }

        if lower(self.heap[0].priority, priority) {
            self.heap[0] = Entry { value, priority };
            self.sift_down(0);
        }
    }

    /// Removes the retained entry with the greatest priority
    pub fn pop_highest(&mut self) -> Option<(T, f64)> {
        if self.heap.is_empty() {
            return None;
        }

        // The maximum of a min-heap sits in the leaves.
        let first_leaf = self.heap.len() / 2;
        let mut best = first_leaf;
        for i in first_leaf + 1..self.heap.len() {
            if lower(self.heap[best].priority, self.heap[i].priority) {
                best = i;
            }
        }

        Some(self.remove_at(best))
    }

    /// Removes the retained entry with the smallest priority
    pub fn pop_lowest(&mut self) -> Option<(T, f64)> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    /// Drains the selector into a vector ordered by descending priority
    pub fn into_sorted_vec(mut self) -> Vec<(T, f64)> {
        let mut sorted = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.pop_lowest() {
            sorted.push(entry);
        }
        sorted.reverse();
        sorted
    }

    fn remove_at(&mut self, index: usize) -> (T, f64) {
        let last = self.heap.len() - 1;
        self.heap.swap(index, last);
        let removed = self
            .heap
            .pop()
            .map(|e| (e.value, e.priority))
            .unwrap_or_else(|| unreachable!("heap checked non-empty"));

        if index < self.heap.len() {
            self.sift_down(index);
            self.sift_up(index);
        }
        removed
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !lower(self.heap[index].priority, self.heap[parent].priority) {
                break;
            }
            self.heap.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && lower(self.heap[left].priority, self.heap[smallest].priority) {
                smallest = left;
            }
            if right < len && lower(self.heap[right].priority, self.heap[smallest].priority) {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }
}
