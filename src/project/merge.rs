//! Three-way merge of existing sub-units against both evaluation passes.

use std::path::{Path, PathBuf};

/// A sub-unit path found by at least one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    pub path: PathBuf,
    pub in_exact: bool,
    pub in_cumulative: bool,
}

/// What to do with the sub-units of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan<K> {
    pub remove: Vec<K>,
    pub add: Vec<Found>,
    pub update: Vec<(K, Found)>,
}

impl<K> Default for MergePlan<K> {
    fn default() -> Self {
        Self {
            remove: Vec::new(),
            add: Vec::new(),
            update: Vec::new(),
        }
    }
}

/// Sorted merge-join of `existing` with the `exact` and `cumulative` lists.
///
/// Paths only in `existing` are removed, paths only in the new lists are
/// added, and paths in both are updated in place.
pub fn merge_sub_units<K: Clone>(
    existing: &[(PathBuf, K)],
    exact: &[PathBuf],
    cumulative: &[PathBuf],
) -> MergePlan<K> {
    let mut existing: Vec<&(PathBuf, K)> = existing.iter().collect();
    existing.sort_by(|a, b| a.0.cmp(&b.0));
    let exact = sorted_unique(exact);
    let cumulative = sorted_unique(cumulative);

    let mut plan = MergePlan::default();
    let (mut e, mut x, mut c) = (0, 0, 0);
    loop {
        let next = [
            existing.get(e).map(|(p, _)| p.as_path()),
            exact.get(x).map(PathBuf::as_path),
            cumulative.get(c).map(PathBuf::as_path),
        ]
        .into_iter()
        .flatten()
        .min()
        .map(Path::to_path_buf);
        let Some(next) = next else {
            break;
        };

        let current = existing.get(e).filter(|(p, _)| *p == next).map(|(_, k)| k.clone());
        if current.is_some() {
            e += 1;
        }
        let in_exact = exact.get(x).is_some_and(|p| *p == next);
        if in_exact {
            x += 1;
        }
        let in_cumulative = cumulative.get(c).is_some_and(|p| *p == next);
        if in_cumulative {
            c += 1;
        }

        let found = Found {
            path: next,
            in_exact,
            in_cumulative,
        };
        match current {
            Some(key) if in_exact || in_cumulative => plan.update.push((key, found)),
            Some(key) => plan.remove.push(key),
            None => plan.add.push(found),
        }
    }
    plan
}

fn sorted_unique(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = paths.to_vec();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/p/{n}"))).collect()
    }

    #[test]
    fn test_three_way_merge() {
        let existing: Vec<(PathBuf, u32)> = paths(&["e", "a", "c"])
            .into_iter()
            .zip([5, 1, 3])
            .collect();
        let plan = merge_sub_units(&existing, &paths(&["d", "b", "c"]), &paths(&["c", "d", "f"]));

        assert_eq!(plan.remove, vec![1, 5]);
        let added: Vec<(&Path, bool, bool)> = plan
            .add
            .iter()
            .map(|f| (f.path.as_path(), f.in_exact, f.in_cumulative))
            .collect();
        assert_eq!(
            added,
            vec![
                (Path::new("/p/b"), true, false),
                (Path::new("/p/d"), true, true),
                (Path::new("/p/f"), false, true),
            ]
        );
        assert_eq!(plan.update.len(), 1);
        assert_eq!(plan.update[0].0, 3);
        assert!(plan.update[0].1.in_exact && plan.update[0].1.in_cumulative);
    }

    #[test]
    fn test_empty_inputs() {
        let plan = merge_sub_units::<u32>(&[], &[], &[]);
        assert_eq!(plan, MergePlan::default());
    }

    #[test]
    fn test_duplicates_collapse() {
        let plan = merge_sub_units::<u32>(&[], &paths(&["a", "a"]), &paths(&["a"]));
        assert_eq!(plan.add.len(), 1);
    }
}
