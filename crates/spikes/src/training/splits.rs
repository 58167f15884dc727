//! Train/validation index bookkeeping: random split and k-fold partitions.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::TrainError;

/// Indices into the concatenated trace list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
}

impl Split {
    /// Fail if the two index sets share anything or either one is empty.
    pub fn check(&self) -> Result<(), TrainError> {
        if self.train.is_empty() {
            return Err(TrainError::EmptySplit { which: "training" });
        }
        if self.val.is_empty() {
            return Err(TrainError::EmptySplit { which: "validation" });
        }
        let train: HashSet<usize> = self.train.iter().copied().collect();
        let overlap = self.val.iter().filter(|i| train.contains(i)).count();
        if overlap > 0 {
            return Err(TrainError::OverlappingSplit { overlap });
        }
        Ok(())
    }
}

fn shuffled(n: usize, rng: &mut impl Rng) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..n).collect();
    idxs.shuffle(rng);
    idxs
}

/// Shuffle once, take the head `prop_train` share for training and the tail
/// `prop_val` share for validation.
pub fn random_split(
    n: usize,
    prop_train: f64,
    prop_val: f64,
    rng: &mut impl Rng,
) -> Result<Split, TrainError> {
    let idxs = shuffled(n, rng);
    let n_train = (n as f64 * prop_train).floor() as usize;
    let n_val = (n as f64 * prop_val).floor() as usize;
    let split = Split {
        train: idxs[..n_train.min(n)].to_vec(),
        val: idxs[n - n_val.min(n)..].to_vec(),
    };
    split.check()?;
    Ok(split)
}

/// Shuffle once and cut into `nb_folds` contiguous chunks of `n / nb_folds`
/// indices. Up to `nb_folds - 1` trailing indices belong to no fold.
pub fn fold_partition(n: usize, nb_folds: usize, rng: &mut impl Rng) -> Result<Vec<Vec<usize>>, TrainError> {
    if nb_folds < 2 {
        return Err(TrainError::InvalidConfig(format!(
            "need at least 2 folds, got {nb_folds}"
        )));
    }
    let idxs = shuffled(n, rng);
    let size = n / nb_folds;
    Ok((0..nb_folds)
        .map(|k| idxs[k * size..(k + 1) * size].to_vec())
        .collect())
}

/// One split per fold: that fold validates, the others train.
pub fn cross_validation_splits(folds: &[Vec<usize>]) -> Result<Vec<Split>, TrainError> {
    (0..folds.len())
        .map(|k| {
            let split = Split {
                train: folds
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != k)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect(),
                val: folds[k].clone(),
            };
            split.check()?;
            Ok(split)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_split_sizes_and_disjoint() {
        let mut rng = StdRng::seed_from_u64(0);
        let split = random_split(10, 0.8, 0.2, &mut rng).unwrap();
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.val.len(), 2);
        let all: HashSet<usize> = split.train.iter().chain(&split.val).copied().collect();
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn test_random_split_overlap_detected() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = random_split(10, 0.8, 0.5, &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::OverlappingSplit { overlap: 3 }));
    }

    #[test]
    fn test_random_split_empty_validation() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            random_split(3, 0.8, 0.2, &mut rng),
            Err(TrainError::EmptySplit { which: "validation" })
        ));
    }

    #[test]
    fn test_five_folds_of_100() {
        let mut rng = StdRng::seed_from_u64(1);
        let folds = fold_partition(100, 5, &mut rng).unwrap();
        assert_eq!(folds.len(), 5);
        assert!(folds.iter().all(|f| f.len() == 20));

        let mut union = HashSet::new();
        for (i, a) in folds.iter().enumerate() {
            for b in &folds[i + 1..] {
                assert!(a.iter().all(|x| !b.contains(x)));
            }
            union.extend(a.iter().copied());
        }
        assert_eq!(union, (0..100).collect::<HashSet<_>>());
    }

    #[test]
    fn test_fold_remainder_dropped() {
        let mut rng = StdRng::seed_from_u64(2);
        let folds = fold_partition(23, 5, &mut rng).unwrap();
        let covered: usize = folds.iter().map(Vec::len).sum();
        assert_eq!(covered, 20);
        assert!(23 - covered < 5);
    }

    #[test]
    fn test_cross_validation_splits_disjoint() {
        let mut rng = StdRng::seed_from_u64(3);
        let folds = fold_partition(30, 3, &mut rng).unwrap();
        let splits = cross_validation_splits(&folds).unwrap();
        assert_eq!(splits.len(), 3);
        for (k, split) in splits.iter().enumerate() {
            assert_eq!(split.val, folds[k]);
            assert_eq!(split.train.len(), 20);
            split.check().unwrap();
        }
    }

    #[test]
    fn test_single_fold_rejected() {
        let mut rng = StdRng::seed_from_u64(4);
        assert!(fold_partition(10, 1, &mut rng).is_err());
    }

    #[test]
    fn test_too_few_items_for_folds() {
        let mut rng = StdRng::seed_from_u64(5);
        let folds = fold_partition(3, 5, &mut rng).unwrap();
        assert!(cross_validation_splits(&folds).is_err());
    }
}
