use std::collections::HashMap;

/// One result row, each cell rendered as text.
pub type Row = Vec<String>;

/// Decides whether a learner's query output matches the expected result set.
pub trait CorrectnessOracle {
    fn compare(&self, submitted: &[Row], expected: &[Row]) -> bool;
}

impl<F> CorrectnessOracle for F
where
    F: Fn(&[Row], &[Row]) -> bool,
{
    fn compare(&self, submitted: &[Row], expected: &[Row]) -> bool {
        self(submitted, expected)
    }
}

/// Treats both result sets as multisets of rows; row order is ignored,
/// cell order and duplicates are not.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnorderedRowMatch;

impl CorrectnessOracle for UnorderedRowMatch {
    fn compare(&self, submitted: &[Row], expected: &[Row]) -> bool {
        if submitted.len() != expected.len() {
            return false;
        }
        let mut counts: HashMap<&Row, isize> = HashMap::new();
        for row in expected {
            *counts.entry(row).or_default() += 1;
        }
        for row in submitted {
            match counts.get_mut(row) {
                Some(count) if *count > 0 => *count -= 1,
                _ => return false,
            }
        }
        true
    }
}
