use std::collections::VecDeque;

use rand::{rng, seq::index};

use crate::{
    error::{Result, TutorError},
    experience::Transition,
};

/// Bounded FIFO history of transitions.
///
/// Sampling is uniform and without replacement within a batch.
#[derive(Debug, Clone)]
pub struct ExperienceStore {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ExperienceStore {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TutorError::InvalidConfig(
                "replay capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn append(&mut self, transition: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    pub fn bulk_load(&mut self, transitions: impl IntoIterator<Item = Transition>) {
        for transition in transitions {
            self.append(transition);
        }
    }

    pub fn sample_batch(&self, n: usize) -> Result<Vec<&Transition>> {
        if self.buffer.len() < n {
            return Err(TutorError::InsufficientData {
                requested: n,
                available: self.buffer.len(),
            });
        }
        let mut rng = rng();
        Ok(index::sample(&mut rng, self.buffer.len(), n)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect())
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }
}
