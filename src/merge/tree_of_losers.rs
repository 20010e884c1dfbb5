use std::cmp::Ordering;
use std::mem;

/// Slot value inside the tournament. `Early` only exists while the tree is
/// being built; `Late` marks an exhausted source.
enum Fenced<T> {
    Early,
    Value(T),
    Late,
}

struct Node<T> {
    key: Fenced<T>,
    source: usize,
}

/// Tournament tree of losers over `k` sources.
///
/// Index 0 holds the winner, indices `1..capacity` hold the loser of each
/// match, and leaves are implicit at `capacity + source`. The ordering is
/// passed into every call so the tree never owns it.
pub struct LoserTree<T> {
    nodes: Vec<Node<T>>,
    capacity: usize,
}

impl<T> LoserTree<T> {
    /// Builds the tree from the first value of every source; `None` marks a
    /// source that is already empty.
    pub fn new<C>(values: Vec<Option<T>>, cmp: &C) -> Self
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let sources = values.len();
        if sources == 0 {
            return Self {
                nodes: Vec::new(),
                capacity: 0,
            };
        }

        let capacity = sources.next_power_of_two();
        let mut nodes = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            nodes.push(Node {
                key: Fenced::Early,
                source: usize::MAX,
            });
        }
        let mut tree = Self { nodes, capacity };

        for (source, value) in values.into_iter().enumerate() {
            let key = value.map_or(Fenced::Late, Fenced::Value);
            tree.pass(source, key, cmp);
        }
        for source in sources..capacity {
            tree.pass(source, Fenced::Late, cmp);
        }
        tree
    }

    /// Smallest live value and the source it came from.
    pub fn peek(&self) -> Option<(&T, usize)> {
        match self.nodes.first() {
            Some(Node {
                key: Fenced::Value(value),
                source,
            }) => Some((value, *source)),
            _ => None,
        }
    }

    /// Replaces the winner with the next value from the same source (or
    /// retires that source on `None`) and returns the old winner.
    pub fn replace_top<C>(&mut self, next: Option<T>, cmp: &C) -> Option<T>
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let source = match self.nodes.first() {
            Some(Node {
                key: Fenced::Value(_),
                source,
            }) => *source,
            _ => return None,
        };
        let key = next.map_or(Fenced::Late, Fenced::Value);
        match self.pass(source, key, cmp) {
            Fenced::Value(old) => Some(old),
            _ => None,
        }
    }

    // Plays `key` from leaf `source` up to the root. Whoever loses a match
    // stays in that slot; the final survivor becomes the new winner and the
    // previous winner is handed back.
    fn pass<C>(&mut self, source: usize, key: Fenced<T>, cmp: &C) -> Fenced<T>
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let mut candidate = Node { key, source };
        let mut slot = (self.capacity + source) / 2;
        while slot != 0 {
            if Self::loses(&candidate, &self.nodes[slot], cmp) {
                mem::swap(&mut candidate, &mut self.nodes[slot]);
            }
            slot /= 2;
        }
        mem::replace(&mut self.nodes[0], candidate).key
    }

    // Ties go to the lower source index so equal keys surface in source order.
    fn loses<C>(a: &Node<T>, b: &Node<T>, cmp: &C) -> bool
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let ord = match (&a.key, &b.key) {
            (Fenced::Early, Fenced::Early) | (Fenced::Late, Fenced::Late) => Ordering::Equal,
            (Fenced::Early, _) | (_, Fenced::Late) => Ordering::Less,
            (_, Fenced::Early) | (Fenced::Late, _) => Ordering::Greater,
            (Fenced::Value(x), Fenced::Value(y)) => cmp(x, y),
        };
        ord.then(a.source.cmp(&b.source)) == Ordering::Greater
    }
}
