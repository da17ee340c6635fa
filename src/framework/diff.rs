use std::collections::HashSet;
use std::hash::Hash;

/// Members added to and removed from a set-valued attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> SetDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compute `new - old` and `old - new`, preserving the input iteration order
pub fn diff_sets<'a, T, I, J>(old: I, new: J) -> SetDiff<T>
where
    T: Eq + Hash + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
    J: IntoIterator<Item = &'a T>,
{
    let old: Vec<&T> = old.into_iter().collect();
    let new: Vec<&T> = new.into_iter().collect();
    let old_set: HashSet<&T> = old.iter().copied().collect();
    let new_set: HashSet<&T> = new.iter().copied().collect();

    SetDiff {
        added: new
            .iter()
            .filter(|item| !old_set.contains(*item))
            .map(|item| (*item).clone())
            .collect(),
        removed: old
            .iter()
            .filter(|item| !new_set.contains(*item))
            .map(|item| (*item).clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_diff_sets() {
        let old: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let new: BTreeSet<String> = ["B", "C"].iter().map(|s| s.to_string()).collect();

        let diff = diff_sets(&old, &new);
        assert_eq!(diff.added, vec!["C".to_string()]);
        assert_eq!(diff.removed, vec!["A".to_string()]);
    }

    #[test]
    fn test_identical_sets_have_empty_diff() {
        let old = vec![1, 2, 3];
        let new = vec![3, 2, 1];
        assert!(diff_sets(&old, &new).is_empty());
    }
}
