//! Integration tests for the pipeline.
//!
//! These tests take parsed CSV input through planning, joining, reassembly
//! and validation the way a run does, with the endpoints replaced by a
//! deterministic function of the item id.

use data_loader::{NeighborResult, RecordSet, RecordStatus, read_output_csv, write_output_csv};
use pipeline::{Batch, ValidationError, assemble, join_batch, mark_failed, plan_batches, validate_run};

fn create_test_input() -> RecordSet {
    let mut first = String::from("item_id,marketplace_id,img_id,product_type\n");
    let mut second = String::from("product_type,img_id,marketplace_id,item_id\n");
    for i in 0..25 {
        let pt = if i % 5 == 0 { "PILLOW" } else { "FLAT_SHEET" };
        first.push_str(&format!("A{i:03},000000,img-a{i},{pt}\n"));
    }
    for i in 0..15 {
        let marketplace = if i % 2 == 0 { "000000" } else { "000001" };
        second.push_str(&format!("FLAT_SHEET,img-b{i},{marketplace},B{i:03}\n"));
    }

    RecordSet::from_files(vec![
        ("first.csv", first.as_bytes()),
        ("second.csv", second.as_bytes()),
    ])
    .expect("test input should parse")
}

fn fake_neighbors(batch: &Batch) -> Vec<NeighborResult> {
    batch
        .records
        .iter()
        .map(|r| NeighborResult {
            item_id: r.item_id.clone(),
            neighbor_item_ids: vec![format!("{}-n1", r.item_id), format!("{}-n2", r.item_id)],
            neighbors_dist: vec![0.25, 0.5],
        })
        .collect()
}

#[test]
fn test_full_run_preserves_order_and_identity() {
    let input = create_test_input();
    assert_eq!(input.len(), 40);
    assert_eq!(input.file_count(), 2);

    let batches = plan_batches(input.records(), 8).unwrap();
    for batch in &batches {
        assert!(batch.len() <= 8);
        assert!(batch
            .records
            .iter()
            .all(|r| r.marketplace_id == batch.marketplace_id && r.product_type == batch.product_type));
    }

    let outputs = batches
        .iter()
        .map(|batch| join_batch(batch, fake_neighbors(batch)))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let rows = assemble(outputs);

    validate_run(input.records(), &rows).unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.item_id.as_str()).collect();
    let expected: Vec<&str> = input.records().iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_failed_batch_keeps_row_count() {
    let input = create_test_input();
    let batches = plan_batches(input.records(), 32).unwrap();

    let mut outputs = Vec::new();
    for (i, batch) in batches.iter().enumerate() {
        if i == 0 {
            outputs.push(mark_failed(batch, "endpoint unavailable"));
        } else {
            outputs.push(join_batch(batch, fake_neighbors(batch)).unwrap());
        }
    }
    let rows = assemble(outputs);

    validate_run(input.records(), &rows).unwrap();
    let failed = rows.iter().filter(|r| r.status == RecordStatus::Failed).count();
    assert_eq!(failed, batches[0].len());

    // Written output carries one row per input, failed rows included
    let csv = write_output_csv(&rows).unwrap();
    let read_back = read_output_csv(&csv).unwrap();
    assert_eq!(read_back.len(), input.len());
    assert_eq!(read_back[0].error.as_deref(), rows[0].error.as_deref());
}

#[test]
fn test_dropped_batch_is_caught_before_upload() {
    let input = create_test_input();
    let batches = plan_batches(input.records(), 32).unwrap();

    let outputs = batches
        .iter()
        .skip(1)
        .map(|batch| join_batch(batch, fake_neighbors(batch)).unwrap())
        .collect();
    let rows = assemble(outputs);

    assert!(matches!(
        validate_run(input.records(), &rows),
        Err(ValidationError::RowCountMismatch { expected: 40, .. })
    ));
}
