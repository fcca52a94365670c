/// Greedy one-pass grouping where each group is represented by its first member.
///
/// An item joins the first group whose representative is closer than the
/// threshold; otherwise it founds a new group. Representatives are never
/// updated, so results depend on input order. Once `max_groups` is reached,
/// unmatched items go to the nearest existing group instead.
#[derive(Debug, Clone)]
pub struct FirstMemberGroups<T> {
    representatives: Vec<T>,
    max_groups: Option<usize>,
}

impl<T> Default for FirstMemberGroups<T> {
    fn default() -> Self {
        Self {
            representatives: Vec::new(),
            max_groups: None,
        }
    }
}

impl<T> FirstMemberGroups<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_groups(max_groups: usize) -> Self {
        Self {
            representatives: Vec::new(),
            max_groups: Some(max_groups.max(1)),
        }
    }

    /// Assign `item` to a group and return the group index.
    pub fn assign<F>(&mut self, item: T, threshold: f64, distance: F) -> usize
    where
        F: Fn(&T, &T) -> f64,
    {
        if let Some(i) = self
            .representatives
            .iter()
            .position(|rep| distance(&item, rep) < threshold)
        {
            return i;
        }

        if let Some(max) = self.max_groups {
            if self.representatives.len() >= max {
                return self
                    .representatives
                    .iter()
                    .enumerate()
                    .map(|(i, rep)| (i, distance(&item, rep)))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
            }
        }

        self.representatives.push(item);
        self.representatives.len() - 1
    }

    pub fn len(&self) -> usize {
        self.representatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representatives.is_empty()
    }

    pub fn representatives(&self) -> &[T] {
        &self.representatives
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs_diff(a: &f64, b: &f64) -> f64 {
        (a - b).abs()
    }

    #[test]
    fn test_joins_first_matching_group() {
        let mut groups = FirstMemberGroups::new();
        assert_eq!(groups.assign(0.0, 1.0, abs_diff), 0);
        assert_eq!(groups.assign(5.0, 1.0, abs_diff), 1);
        // Within range of both? Only group 0's representative (0.0) is checked first
        assert_eq!(groups.assign(0.5, 1.0, abs_diff), 0);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_representative_never_moves() {
        let mut groups = FirstMemberGroups::new();
        groups.assign(0.0, 1.0, abs_diff);
        groups.assign(0.9, 1.0, abs_diff);
        // 1.8 is close to 0.9 but the group is still represented by 0.0
        assert_eq!(groups.assign(1.8, 1.0, abs_diff), 1);
        assert_eq!(groups.representatives(), &[0.0, 1.8]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut groups = FirstMemberGroups::new();
        groups.assign(0.0, 1.0, abs_diff);
        assert_eq!(groups.assign(1.0, 1.0, abs_diff), 1);
    }

    #[test]
    fn test_max_groups_falls_back_to_nearest() {
        let mut groups = FirstMemberGroups::with_max_groups(2);
        groups.assign(0.0, 0.1, abs_diff);
        groups.assign(10.0, 0.1, abs_diff);
        assert_eq!(groups.assign(7.0, 0.1, abs_diff), 1);
        assert_eq!(groups.assign(2.0, 0.1, abs_diff), 0);
        assert_eq!(groups.len(), 2);
    }
}
