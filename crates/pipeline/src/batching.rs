//! Splitting a run's records into endpoint-sized batches.
//!
//! Each endpoint call carries a single product type and marketplace, so
//! records are first grouped on `(marketplace_id, product_type)` and each
//! group is then cut into batches of at most `batch_size`.

use std::collections::HashMap;

use data_loader::{InputRecord, MarketplaceId};
use tracing::debug;

use crate::error::{Result, ValidationError};

/// An ordered group of records sent to the endpoints in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Run-unique, consecutive from 0
    pub index: usize,
    pub marketplace_id: MarketplaceId,
    pub product_type: String,
    pub records: Vec<InputRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First and last input positions covered by the batch.
    pub fn position_range(&self) -> Option<(usize, usize)> {
        let first = self.records.first()?.position;
        let last = self.records.last()?.position;
        Some((first, last))
    }
}

/// Cut `records` into consecutive chunks of at most `batch_size`.
///
/// Yields `ceil(len / batch_size)` chunks; only the last may be short.
pub fn partition<T: Clone>(records: &[T], batch_size: usize) -> Result<Vec<Vec<T>>> {
    if batch_size == 0 {
        return Err(ValidationError::ZeroBatchSize);
    }
    Ok(records
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// Group records by marketplace and product type, then partition each group.
///
/// Groups are ordered by first appearance and records keep their input
/// order within a group.
pub fn plan_batches(records: &[InputRecord], batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(ValidationError::ZeroBatchSize);
    }

    let mut group_of: HashMap<(&str, &str), usize> = HashMap::new();
    let mut groups: Vec<Vec<InputRecord>> = Vec::new();
    for record in records {
        let key = (record.marketplace_id.as_str(), record.product_type.as_str());
        let slot = *group_of.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(record.clone());
    }

    let mut batches = Vec::new();
    for group in &groups {
        for chunk in partition(group, batch_size)? {
            let index = batches.len();
            let marketplace_id = chunk[0].marketplace_id.clone();
            let product_type = chunk[0].product_type.clone();
            batches.push(Batch {
                index,
                marketplace_id,
                product_type,
                records: chunk,
            });
        }
    }

    debug!(
        "Planned {} batches from {} records in {} groups",
        batches.len(),
        records.len(),
        groups.len()
    );
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize, marketplace: &str, pt: &str) -> InputRecord {
        InputRecord::new(format!("B{i:04}"), marketplace, format!("img{i}"), pt, i)
    }

    #[test]
    fn test_partition_sizes() {
        let items: Vec<usize> = (0..40).collect();
        let chunks = partition(&items, 32).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 32);
        assert_eq!(chunks[1].len(), 8);
        assert_eq!(chunks[1][0], 32);

        assert_eq!(partition(&items, 40).unwrap().len(), 1);
        assert_eq!(partition(&items, 1).unwrap().len(), 40);
        assert!(partition::<usize>(&[], 32).unwrap().is_empty());
    }

    #[test]
    fn test_partition_rejects_zero() {
        assert!(matches!(
            partition(&[1, 2, 3], 0),
            Err(ValidationError::ZeroBatchSize)
        ));
    }

    #[test]
    fn test_plan_single_group() {
        let records: Vec<_> = (0..40).map(|i| record(i, "000000", "FLAT_SHEET")).collect();
        let batches = plan_batches(&records, 32).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].index, 0);
        assert_eq!(batches[1].index, 1);
        assert_eq!(batches[0].len(), 32);
        assert_eq!(batches[1].len(), 8);
        assert_eq!(batches[1].position_range(), Some((32, 39)));
    }

    #[test]
    fn test_plan_groups_by_marketplace_and_product_type() {
        let records = vec![
            record(0, "000000", "FLAT_SHEET"),
            record(1, "000001", "FLAT_SHEET"),
            record(2, "000000", "PILLOW"),
            record(3, "000000", "FLAT_SHEET"),
            record(4, "000001", "FLAT_SHEET"),
        ];
        let batches = plan_batches(&records, 32).unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(
            (batches[0].marketplace_id.as_str(), batches[0].product_type.as_str()),
            ("000000", "FLAT_SHEET")
        );
        let positions: Vec<usize> = batches[0].records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 3]);
        assert_eq!(batches[1].marketplace_id, "000001");
        assert_eq!(batches[2].product_type, "PILLOW");

        let total: usize = batches.iter().map(Batch::len).sum();
        assert_eq!(total, records.len());
    }

    #[test]
    fn test_plan_indexes_are_consecutive_across_groups() {
        let mut records: Vec<_> = (0..5).map(|i| record(i, "000000", "A")).collect();
        records.extend((5..10).map(|i| record(i, "000000", "B")));
        let batches = plan_batches(&records, 2).unwrap();

        let indexes: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indexes, (0..6).collect::<Vec<_>>());
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 2));
    }
}
