use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;

pub struct MinibatchData {
    pub input: Tensor,
    pub output: Option<Tensor>,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A simple data loader for in-memory tensors. The first axis indexes
/// examples: `(n, h, w, 1)` grids or `(n, d)` feature rows, with
/// optional one-hot labels `(n, c)` sharing the same rows.
///
pub struct InMemoryData {
    input_data: Tensor,
    output_data: Option<Tensor>,
    minibatches: Minibatches,
}

impl InMemoryData {
    ///
    /// Create a data loader with the main data tensor `data`
    ///
    pub fn new(data: &Tensor) -> anyhow::Result<Self> {
        let n = data.dim(0)?;
        anyhow::ensure!(n > 0, "no examples in the data");

        Ok(InMemoryData {
            input_data: data.clone(),
            output_data: None,
            minibatches: Minibatches {
                samples: (0..n).collect(),
                chunks: vec![],
            },
        })
    }

    ///
    /// Create a data loader with the main `data` and output `out`
    ///
    pub fn new_with_output(data: &Tensor, out: &Tensor) -> anyhow::Result<Self> {
        let mut ret = Self::new(data)?;
        anyhow::ensure!(
            out.dim(0)? == ret.num_samples(),
            "{} examples vs. {} labels",
            ret.num_samples(),
            out.dim(0)?
        );
        ret.output_data = Some(out.clone());
        Ok(ret)
    }

    pub fn num_samples(&self) -> usize {
        self.minibatches.size()
    }
}

impl DataLoader for InMemoryData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let samples = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid index = {} vs. total # = {}; need to shuffle data",
                batch_idx,
                self.minibatches.chunks.len()
            )
        })?;

        let rows = samples.iter().map(|&i| i as u32).collect::<Vec<_>>();
        let rows = Tensor::from_vec(rows, samples.len(), self.input_data.device())?;

        let input = take_rows(&self.input_data, &rows, target_device)?;
        let output = self
            .output_data
            .as_ref()
            .map(|y| take_rows(y, &rows, target_device))
            .transpose()?;

        Ok(MinibatchData { input, output })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        anyhow::ensure!(batch_size > 0, "batch size must be positive");
        self.minibatches.shuffle_minibatch(batch_size);
        Ok(())
    }
}

fn take_rows(data: &Tensor, rows: &Tensor, target_device: &Device) -> anyhow::Result<Tensor> {
    Ok(data.index_select(rows, 0)?.to_device(target_device)?)
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        let mut rng = rand::rng();
        self.samples.shuffle(&mut rng);
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn minibatches_partition_rows() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::arange(0f32, 10f32, &dev)?.reshape((10, 1))?;
        let y = (&x * 2.)?;

        let mut data = InMemoryData::new_with_output(&x, &y)?;
        assert!(data.minibatch_data(0, &dev).is_err());

        data.shuffle_minibatch(4)?;
        assert_eq!(data.num_minibatch(), 3);

        let mut seen = vec![];
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &dev)?;
            let xs = mb.input.flatten_all()?.to_vec1::<f32>()?;
            let ys = mb.output.expect("labels").flatten_all()?.to_vec1::<f32>()?;
            for (xi, yi) in xs.iter().zip(ys.iter()) {
                assert_eq!(*yi, 2. * xi);
            }
            seen.extend(xs);
        }
        seen.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
        assert_eq!(seen, (0..10).map(|i| i as f32).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn mismatched_labels_rejected() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::zeros((5, 6, 4, 1), DType::F32, &dev)?;
        let y = Tensor::zeros((4, 3), DType::F32, &dev)?;
        assert!(InMemoryData::new_with_output(&x, &y).is_err());
        assert!(InMemoryData::new(&Tensor::zeros((0, 3), DType::F32, &dev)?).is_err());
        Ok(())
    }
}
