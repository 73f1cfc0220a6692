//! Partition Module Tests
//!
//! ## Test Scopes
//! - **Coverage**: per-node row ranges are disjoint, contiguous and cover the global extent.
//! - **Round-trip**: global -> local -> global translation is the identity on every node.
//! - **Ownership**: closed-form owner lookup agrees with the shapes.
//! - **Strategies**: column and replicated partitioners.

#[cfg(test)]
mod tests {
    use crate::cluster::types::NodeId;
    use crate::error::Error;
    use crate::partition::{
        Axis, ColumnPartitioner, MatrixEntry, MatrixPartitioner, MutableMatrixEntry,
        NoPartitioner, RowPartitioner,
    };

    // ============================================================
    // TEST 1: Partition coverage
    // ============================================================

    #[test]
    fn test_row_partitions_cover_global_extent() {
        for rows in 0..40u64 {
            for nodes in 1..8usize {
                // ARRANGE
                let partitioner = RowPartitioner::new(rows, 5, NodeId(0), nodes).unwrap();

                // ACT
                let shapes = partitioner.shapes().unwrap();

                // ASSERT: contiguous, ordered, no gaps and full coverage
                let mut next = 0;
                for shape in &shapes {
                    assert_eq!(shape.row_offset, next, "rows={} nodes={}", rows, nodes);
                    assert_eq!(shape.cols, 5);
                    next += shape.rows;
                }
                assert_eq!(next, rows, "rows={} nodes={}", rows, nodes);
            }
        }
    }

    #[test]
    fn test_nine_rows_on_three_nodes() {
        let partitioner = RowPartitioner::new(9, 4, NodeId(0), 3).unwrap();

        let shapes = partitioner.shapes().unwrap();

        assert_eq!(shapes[0].row_range(), 0..3);
        assert_eq!(shapes[1].row_range(), 3..6);
        assert_eq!(shapes[2].row_range(), 6..9);
    }

    #[test]
    fn test_last_node_absorbs_remainder() {
        let partitioner = RowPartitioner::new(10, 1, NodeId(3), 4).unwrap();

        let shape = partitioner.partition_shape();

        assert_eq!(shape.rows, 4);
        assert_eq!(shape.row_offset, 6);
    }

    // ============================================================
    // TEST 2: Coordinate round-trip
    // ============================================================

    #[test]
    fn test_row_translation_round_trip() {
        for nodes in 1..6usize {
            for node in 0..nodes {
                let partitioner = RowPartitioner::new(23, 3, NodeId::new(node), nodes).unwrap();
                let shape = partitioner.partition_shape();

                for local in 0..shape.rows {
                    let global = partitioner.local_to_global_row(local).unwrap();
                    assert_eq!(partitioner.global_to_local_row(global).unwrap(), local);
                }
            }
        }
    }

    #[test]
    fn test_foreign_row_is_invalid_coordinate() {
        // ARRANGE: node 0 owns rows 0..3
        let partitioner = RowPartitioner::new(9, 2, NodeId(0), 3).unwrap();

        // ACT
        let result = partitioner.global_to_local_row(7);

        // ASSERT
        match result {
            Err(Error::InvalidCoordinate { axis, value, start, end }) => {
                assert_eq!(axis, Axis::Row);
                assert_eq!(value, 7);
                assert_eq!((start, end), (0, 3));
            }
            other => panic!("expected InvalidCoordinate, got {:?}", other),
        }
        assert!(partitioner.local_to_global_row(3).is_err());
    }

    // ============================================================
    // TEST 3: Ownership
    // ============================================================

    #[test]
    fn test_owner_lookup_matches_shapes() {
        let partitioner = RowPartitioner::new(17, 2, NodeId(0), 4).unwrap();
        let shapes = partitioner.shapes().unwrap();

        for row in 0..17 {
            let owner = partitioner.partition_of_entry(row, 1).unwrap().unwrap();
            assert!(shapes[owner.index()].row_range().contains(&row));
        }
    }

    #[test]
    fn test_out_of_range_entry_is_rejected() {
        let partitioner = RowPartitioner::new(9, 2, NodeId(0), 3).unwrap();

        assert!(partitioner.partition_of_entry(9, 0).is_err());
        assert!(partitioner.partition_of_entry(0, 2).is_err());
    }

    #[test]
    fn test_of_node_views_other_partition() {
        let partitioner = RowPartitioner::new(9, 2, NodeId(0), 3).unwrap();

        let remote = partitioner.of_node(NodeId(2)).unwrap();

        assert_eq!(remote.node_id(), NodeId(2));
        assert_eq!(remote.global_to_local_row(7).unwrap(), 1);
        assert!(partitioner.of_node(NodeId(3)).is_err());
    }

    // ============================================================
    // TEST 4: Other strategies
    // ============================================================

    #[test]
    fn test_column_partitioner_splits_columns() {
        let partitioner = ColumnPartitioner::new(4, 10, NodeId(2), 3).unwrap();

        let shape = partitioner.partition_shape();

        assert_eq!((shape.rows, shape.cols), (4, 4));
        assert_eq!(shape.col_offset, 6);
        assert_eq!(partitioner.partition_of_entry(0, 9).unwrap(), Some(NodeId(2)));
        assert_eq!(partitioner.partition_of_entry(0, 1).unwrap(), Some(NodeId(0)));
        assert_eq!(partitioner.global_to_local_col(7).unwrap(), 1);
        assert_eq!(partitioner.num_col_partitions(), 3);
    }

    #[test]
    fn test_no_partitioner_reports_not_partitioned() {
        let partitioner = NoPartitioner::new(5, 5, NodeId(1), 3).unwrap();

        assert_eq!(partitioner.partition_of_entry(4, 4).unwrap(), None);
        assert_eq!(partitioner.partition_shape().rows, 5);
        assert_eq!(partitioner.global_to_local_row(4).unwrap(), 4);
        assert!(partitioner.partition_of_entry(5, 0).is_err());
    }

    // ============================================================
    // TEST 5: Entries
    // ============================================================

    #[test]
    fn test_mutable_entry_is_reused() {
        let mut entry = MutableMatrixEntry::default();

        let first = entry.set(1, 2, 3.0).freeze();
        let second = entry.set(4, 5, 6.0).freeze();

        assert_eq!(first, MatrixEntry::new(1, 2, 3.0));
        assert_eq!(second, MatrixEntry::new(4, 5, 6.0));
        assert!(second.is_within(5, 6));
        assert!(!second.is_within(4, 6));
    }
}
