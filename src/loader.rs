use crate::dataset::{Frame, ScanDataset};
use anyhow::Result;
use rand::seq::SliceRandom;

#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    pub offset: usize,
    pub shuffle: bool,
}

/// Walks a dataset forward and backward in a fixed order.
#[derive(Debug)]
pub struct ScanLoader {
    dataset: ScanDataset,
    order: Vec<usize>,
    start: usize,
    position: Option<usize>,
}

impl ScanLoader {
    pub fn new(dataset: ScanDataset, options: LoaderOptions) -> Self {
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if options.shuffle {
            order.shuffle(&mut rand::thread_rng());
        }
        let start = options.offset.min(order.len().saturating_sub(1));

        Self {
            dataset,
            order,
            start,
            position: None,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Position in the playback order of the last returned frame.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        let position = match self.position {
            None => self.start,
            Some(position) => position + 1,
        };
        self.load(position)
    }

    pub fn prev_frame(&mut self) -> Option<Result<Frame>> {
        let position = self.position?.checked_sub(1)?;
        self.load(position)
    }

    pub fn restart(&mut self) {
        self.position = None;
    }

    fn load(&mut self, position: usize) -> Option<Result<Frame>> {
        let &index = self.order.get(position)?;
        self.position = Some(position);
        Some(self.dataset.get(index))
    }
}
