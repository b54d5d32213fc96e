use candle::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// A synchronous supplier of fixed-size batches.
pub trait BatchSource {
    /// Rows per batch.
    fn batch_size(&self) -> usize;

    /// Total number of examples.
    fn size(&self) -> usize;

    /// Number of tensors returned by each call to [`BatchSource::next_batch`].
    fn num_variables(&self) -> usize;

    /// Next batch, one tensor per variable, each with `batch_size` rows.
    fn next_batch(&mut self) -> Result<Vec<Tensor>>;
}

/// Batches drawn from in-memory tensors that share their leading dimension.
///
/// When fewer than `batch_size` unread rows remain a new pass starts,
/// reshuffled if shuffling is enabled.
pub struct ArrayIterator {
    variables: Vec<Tensor>,
    batch_size: usize,
    order: Vec<u32>,
    position: usize,
    rng: Option<StdRng>,
}

impl ArrayIterator {
    pub fn new(variables: Vec<Tensor>, batch_size: usize) -> Result<Self> {
        let Some(first) = variables.first() else {
            candle::bail!("an array iterator needs at least one variable")
        };
        let size = first.dim(0)?;
        for (idx, v) in variables.iter().enumerate() {
            if v.dim(0)? != size {
                candle::bail!(
                    "variable {idx} has {} rows, expected {size}",
                    v.dim(0)?
                );
            }
        }
        if batch_size == 0 || batch_size > size {
            candle::bail!("batch size {batch_size} does not fit {size} examples");
        }
        Ok(Self {
            variables,
            batch_size,
            order: (0..size as u32).collect(),
            position: 0,
            rng: None,
        })
    }

    /// Shuffle the row order at the start of every pass.
    pub fn shuffle(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.order.shuffle(&mut rng);
        self.rng = Some(rng);
        self
    }

    pub fn device(&self) -> &Device {
        self.variables[0].device()
    }

    fn start_pass(&mut self) {
        self.position = 0;
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
    }
}

impl BatchSource for ArrayIterator {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn size(&self) -> usize {
        self.order.len()
    }

    fn num_variables(&self) -> usize {
        self.variables.len()
    }

    fn next_batch(&mut self) -> Result<Vec<Tensor>> {
        if self.position + self.batch_size > self.order.len() {
            self.start_pass();
        }
        let rows = &self.order[self.position..self.position + self.batch_size];
        let index = Tensor::from_slice(rows, self.batch_size, self.device())?;
        self.position += self.batch_size;
        self.variables
            .iter()
            .map(|v| v.index_select(&index, 0))
            .collect()
    }
}
