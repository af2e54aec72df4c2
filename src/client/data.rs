//! In-memory datasets and client partitioning.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{FedError, Result};

/// Feature matrix with one label per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Array1<f32>,
}

impl Dataset {
    /// Create a dataset, checking there is one label per feature row.
    pub fn new(features: Array2<f32>, labels: Array1<f32>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(FedError::ShapeError(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    /// An empty dataset with `dim` features.
    pub fn empty(dim: usize) -> Self {
        Self {
            features: Array2::zeros((0, dim)),
            labels: Array1::zeros(0),
        }
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset holds no examples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of features per example.
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    /// Features and label of example `i`.
    pub fn example(&self, i: usize) -> (ArrayView1<'_, f32>, f32) {
        (self.features.row(i), self.labels[i])
    }

    /// Iterate examples in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (ArrayView1<'_, f32>, f32)> + '_ {
        self.features
            .axis_iter(Axis(0))
            .zip(self.labels.iter().copied())
    }

    /// A new dataset made of the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}

/// Hands each client its private `(train, validation)` pair.
pub trait Partitioner: Send + Sync {
    /// Number of partitions, one per client.
    fn num_partitions(&self) -> usize;

    /// Train and validation data for client `cid`.
    fn partition(&self, cid: &str) -> Result<(Dataset, Dataset)>;
}

/// Shuffles once, then deals contiguous shards of near-equal size.
///
/// With `n` examples and `k` partitions the first `n % k` shards get one
/// extra example, so no example is left out. Client ids are the shard
/// indices `"0"..num_partitions`. Each shard keeps its last
/// `val_fraction` of examples for validation.
#[derive(Clone, Debug)]
pub struct IidPartitioner {
    shards: Vec<Dataset>,
    val_fraction: f64,
}

impl IidPartitioner {
    /// Partition `dataset` into `num_partitions` IID shards.
    pub fn new(
        dataset: &Dataset,
        num_partitions: usize,
        val_fraction: f64,
        seed: u64,
    ) -> Result<Self> {
        if num_partitions == 0 {
            return Err(FedError::InvalidConfig(
                "num_partitions must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&val_fraction) {
            return Err(FedError::InvalidConfig(format!(
                "val_fraction must be in [0, 1), got {}",
                val_fraction
            )));
        }

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let base = dataset.len() / num_partitions;
        let extra = dataset.len() % num_partitions;
        let mut start = 0;
        let shards = (0..num_partitions)
            .map(|i| {
                let end = start + base + usize::from(i < extra);
                let shard = dataset.select(&indices[start..end]);
                start = end;
                shard
            })
            .collect();

        Ok(Self {
            shards,
            val_fraction,
        })
    }
}

impl Partitioner for IidPartitioner {
    fn num_partitions(&self) -> usize {
        self.shards.len()
    }

    fn partition(&self, cid: &str) -> Result<(Dataset, Dataset)> {
        let shard = cid
            .parse::<usize>()
            .ok()
            .and_then(|i| self.shards.get(i))
            .ok_or_else(|| FedError::InvalidConfig(format!("unknown client id '{}'", cid)))?;

        let n_val = (shard.len() as f64 * self.val_fraction).floor() as usize;
        let split = shard.len() - n_val;
        let train: Vec<usize> = (0..split).collect();
        let val: Vec<usize> = (split..shard.len()).collect();
        Ok((shard.select(&train), shard.select(&val)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn toy(n: usize) -> Dataset {
        let features = Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f32);
        let labels = Array1::from_shape_fn(n, |i| (i % 2) as f32);
        Dataset::new(features, labels).unwrap()
    }

    #[test]
    fn test_dataset_length_check() {
        let bad = Dataset::new(array![[1.0, 2.0]], array![1.0, 0.0]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_select_rows() {
        let d = toy(4);
        let s = d.select(&[3, 1]);
        assert_eq!(s.len(), 2);
        let (x, y) = s.example(0);
        assert_eq!(x.to_vec(), vec![6.0, 7.0]);
        assert_eq!(y, 1.0);
    }

    #[test]
    fn test_iid_partition_sizes() {
        let d = toy(100);
        let p = IidPartitioner::new(&d, 4, 0.2, 7).unwrap();
        assert_eq!(p.num_partitions(), 4);
        for cid in 0..4 {
            let (train, val) = p.partition(&cid.to_string()).unwrap();
            assert_eq!(train.len(), 20);
            assert_eq!(val.len(), 5);
        }
        assert!(p.partition("4").is_err());
        assert!(p.partition("abc").is_err());
    }

    #[test]
    fn test_iid_partition_disjoint_and_seeded() {
        let d = toy(30);
        let a = IidPartitioner::new(&d, 3, 0.0, 1).unwrap();
        let b = IidPartitioner::new(&d, 3, 0.0, 1).unwrap();
        assert_eq!(a.partition("2").unwrap(), b.partition("2").unwrap());

        // every example lands in exactly one shard (first feature is unique)
        let mut seen: Vec<f32> = (0..3)
            .flat_map(|c| {
                let (train, _) = a.partition(&c.to_string()).unwrap();
                train.iter().map(|(x, _)| x[0]).collect::<Vec<_>>()
            })
            .collect();
        seen.sort_by(|x, y| x.partial_cmp(y).unwrap());
        seen.dedup();
        assert_eq!(seen.len(), 30);
    }

    #[test]
    fn test_iid_partition_spreads_remainder() {
        let d = toy(10);
        let p = IidPartitioner::new(&d, 3, 0.0, 2).unwrap();
        let sizes: Vec<usize> = (0..3)
            .map(|c| p.partition(&c.to_string()).unwrap().0.len())
            .collect();
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn test_more_partitions_than_examples() {
        let d = toy(2);
        let p = IidPartitioner::new(&d, 3, 0.0, 0).unwrap();
        assert_eq!(p.num_partitions(), 3);
        assert_eq!(p.partition("1").unwrap().0.len(), 1);
        let (train, _) = p.partition("2").unwrap();
        assert!(train.is_empty());
        assert_eq!(train.dim(), 2);
    }
}
