use std::path::Path;

use polars::prelude::*;
use tracing::{info, warn};

use crate::{
    error::{Result, TutorError},
    experience::Transition,
    state::MasteryState,
};

const STATE_PREFIX: &str = "state_";
const NEXT_STATE_PREFIX: &str = "next_state_";

/// Transitions recovered from a historical CSV export.
#[derive(Debug, Clone, Default)]
pub struct HistoricalDataset {
    pub num_concepts: usize,
    pub transitions: Vec<Transition>,
    pub skipped: usize,
}

impl HistoricalDataset {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }
}

fn count_state_columns(frame: &DataFrame) -> usize {
    frame
        .get_column_names()
        .into_iter()
        .filter(|name| {
            name.strip_prefix(STATE_PREFIX)
                .is_some_and(|suffix| suffix.parse::<usize>().is_ok())
        })
        .count()
}

fn column_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = frame.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn malformed(row: usize, reason: impl Into<String>) -> TutorError {
    TutorError::MalformedDatasetRecord {
        row,
        reason: reason.into(),
    }
}

fn parse_mastery(row: usize, label: &str, cells: &[Vec<Option<f64>>]) -> Result<Vec<f64>> {
    cells
        .iter()
        .enumerate()
        .map(|(i, column)| match column[row] {
            Some(v) if (0.0..=1.0).contains(&v) => Ok(v),
            Some(v) => Err(malformed(row, format!("{label}_{i} = {v} is outside [0, 1]"))),
            None => Err(malformed(row, format!("{label}_{i} is missing or not a number"))),
        })
        .collect()
}

/// Turns one row of already-extracted cells into a transition.
pub fn parse_record(
    row: usize,
    state: &[Vec<Option<f64>>],
    action: Option<f64>,
    reward: Option<f64>,
    next_state: &[Vec<Option<f64>>],
    done_threshold: f64,
) -> Result<Transition> {
    let num_concepts = state.len();
    let mastery = parse_mastery(row, "state", state)?;
    let next_mastery = parse_mastery(row, "next_state", next_state)?;

    let action = match action {
        Some(a) if a.fract() == 0.0 && a >= 0.0 && (a as usize) < num_concepts => a as usize,
        Some(a) => return Err(malformed(row, format!("action {a} is not a concept index"))),
        None => return Err(malformed(row, "action is missing or not a number")),
    };
    let reward = match reward {
        Some(r) if r.is_finite() => r,
        _ => return Err(malformed(row, "reward is missing or not finite")),
    };

    Ok(Transition::new(
        MasteryState::from_mastery(mastery, done_threshold),
        action,
        reward,
        MasteryState::from_mastery(next_mastery, done_threshold),
    ))
}

/// Loads `state_*`, `action`, `reward`, `next_state_*` columns from a CSV file.
///
/// Malformed rows are logged and skipped; a file whose header does not
/// describe a transition table is rejected outright.
pub fn load_transitions_from_csv(
    path: impl AsRef<Path>,
    done_threshold: f64,
) -> Result<HistoricalDataset> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading historical transitions");

    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let num_concepts = count_state_columns(&frame);
    if num_concepts == 0 {
        return Err(TutorError::InvalidConfig(format!(
            "{} has no {STATE_PREFIX}N columns",
            path.display()
        )));
    }

    let state: Vec<Vec<Option<f64>>> = (0..num_concepts)
        .map(|i| column_values(&frame, &format!("{STATE_PREFIX}{i}")))
        .collect::<Result<_>>()?;
    let next_state: Vec<Vec<Option<f64>>> = (0..num_concepts)
        .map(|i| column_values(&frame, &format!("{NEXT_STATE_PREFIX}{i}")))
        .collect::<Result<_>>()?;
    let actions = column_values(&frame, "action")?;
    let rewards = column_values(&frame, "reward")?;

    let mut dataset = HistoricalDataset {
        num_concepts,
        ..HistoricalDataset::default()
    };
    for row in 0..frame.height() {
        match parse_record(
            row,
            &state,
            actions[row],
            rewards[row],
            &next_state,
            done_threshold,
        ) {
            Ok(transition) => dataset.transitions.push(transition),
            Err(err) => {
                warn!(error = %err, "skipping historical record");
                dataset.skipped += 1;
            }
        }
    }

    info!(
        loaded = dataset.transitions.len(),
        skipped = dataset.skipped,
        num_concepts,
        "historical transitions loaded"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_well_formed_rows() {
        let file = write_csv(
            "state_0,state_1,action,reward,next_state_0,next_state_1\n\
             0.5,0.6,0,1.2,0.6,0.6\n\
             0.8,0.75,1,-2,0.8,0.85\n",
        );
        let dataset = load_transitions_from_csv(file.path(), 0.8).unwrap();
        assert_eq!(dataset.num_concepts, 2);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.skipped, 0);

        let first = &dataset.transitions[0];
        assert_eq!(first.state.mastery, vec![0.5, 0.6]);
        assert_eq!(first.action, 0);
        assert_eq!(first.reward, 1.2);
        assert!(!first.is_terminal());
        assert!(dataset.transitions[1].is_terminal());
    }

    #[test]
    fn skips_malformed_rows_and_keeps_going() {
        let file = write_csv(
            "state_0,state_1,action,reward,next_state_0,next_state_1\n\
             0.5,0.6,0,1.2,0.6,0.6\n\
             abc,0.6,0,1.2,0.6,0.6\n\
             0.5,0.6,7,1.2,0.6,0.6\n\
             0.5,1.6,1,1.2,0.6,0.6\n\
             0.5,0.6,1,,0.6,0.6\n\
             0.3,0.6,0,0.2,0.4,0.6\n",
        );
        let dataset = load_transitions_from_csv(file.path(), 0.8).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.skipped, 4);
        assert_eq!(dataset.transitions[1].state.mastery, vec![0.3, 0.6]);
    }

    #[test]
    fn rejects_file_without_state_columns() {
        let file = write_csv("a,b\n1,2\n");
        assert!(load_transitions_from_csv(file.path(), 0.8).is_err());
    }

    #[test]
    fn fractional_action_is_malformed() {
        let state = vec![vec![Some(0.5)], vec![Some(0.5)]];
        let err = parse_record(0, &state, Some(0.5), Some(1.0), &state, 0.8).unwrap_err();
        assert!(matches!(err, TutorError::MalformedDatasetRecord { row: 0, .. }));
    }
}
