//! Directory Module Tests
//!
//! ## Test Scopes
//! - **Names**: registration, resolution and key identity.
//! - **Partition directory**: append-only entries, segment ownership and row coverage.
//! - **Storage**: local put/get/delete and typed objects.

#[cfg(test)]
mod tests {
    use crate::cluster::types::{MachineDescriptor, NodeId};
    use crate::directory::{Directory, DirectoryKey, DistributionMode, PartitionDescriptor};
    use crate::error::Error;
    use crate::partition::{MatrixPartitioner, RowPartitioner};

    use std::sync::Arc;

    fn owners(n: usize) -> Vec<MachineDescriptor> {
        (0..n)
            .map(|i| MachineDescriptor::derived("10.0.0.1", 6000 + i as u16))
            .collect()
    }

    fn layout(rows: u64, n: usize, segment_size: u64) -> Vec<PartitionDescriptor> {
        let partitioner = RowPartitioner::new(rows, 4, NodeId(0), n).unwrap();
        PartitionDescriptor::layout(&partitioner.shapes().unwrap(), &owners(n), segment_size)
            .unwrap()
    }

    // ============================================================
    // TEST 1: Names
    // ============================================================

    #[test]
    fn test_register_and_resolve() {
        // ARRANGE
        let directory = Directory::new(NodeId(0));

        // ACT
        let key = directory
            .register_name("weights", DistributionMode::Distributed)
            .unwrap();

        // ASSERT
        let resolved = directory.resolve("weights").unwrap();
        assert_eq!(resolved, key);
        assert_eq!(resolved.mode, DistributionMode::Distributed);
        assert!(resolved.partition_directory().is_empty());
        assert!(directory.resolve("bias").is_none());
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let directory = Directory::new(NodeId(0));
        directory.register_name("w", DistributionMode::Local).unwrap();

        let result = directory.register_name("w", DistributionMode::Local);

        assert!(matches!(result, Err(Error::NameTaken(_))));
    }

    #[test]
    fn test_keys_compare_by_uid() {
        let a = DirectoryKey::new("same", DistributionMode::Local);
        let b = DirectoryKey::new("same", DistributionMode::Local);

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.cmp(&b), a.uid.cmp(&b.uid));
    }

    // ============================================================
    // TEST 2: Partition directory
    // ============================================================

    #[test]
    fn test_layout_covers_all_rows() {
        let mut key = DirectoryKey::new("m", DistributionMode::Distributed);

        for (node, descriptor) in layout(10, 3, 2).into_iter().enumerate() {
            key.add_partition_directory_entry(NodeId::new(node), descriptor)
                .unwrap();
        }

        assert!(key.covers_rows(10));
        assert!(!key.covers_rows(11));
    }

    #[test]
    fn test_duplicate_partition_entry_is_rejected() {
        let mut key = DirectoryKey::new("m", DistributionMode::Distributed);
        let descriptors = layout(9, 3, 4);
        key.add_partition_directory_entry(NodeId(0), descriptors[0].clone())
            .unwrap();

        let same_node = key.add_partition_directory_entry(NodeId(0), descriptors[1].clone());
        let same_index = key.add_partition_directory_entry(NodeId(1), descriptors[0].clone());

        assert!(matches!(same_node, Err(Error::DuplicatePartition { .. })));
        assert!(matches!(same_index, Err(Error::Protocol(_))));
        assert_eq!(key.partition_directory().len(), 1);
    }

    #[test]
    fn test_owner_of_segment_scans_partitions() {
        // ARRANGE: 10 rows on 3 nodes -> 3, 3, 4 rows; segments of 2 rows -> 2, 2, 2
        let mut key = DirectoryKey::new("m", DistributionMode::Distributed);
        let machines = owners(3);
        for (node, descriptor) in layout(10, 3, 2).into_iter().enumerate() {
            key.add_partition_directory_entry(NodeId::new(node), descriptor)
                .unwrap();
        }

        // ACT / ASSERT
        assert_eq!(key.owner_of_segment(0).unwrap(), &machines[0]);
        assert_eq!(key.owner_of_segment(1).unwrap(), &machines[0]);
        assert_eq!(key.owner_of_segment(2).unwrap(), &machines[1]);
        assert_eq!(key.owner_of_segment(5).unwrap(), &machines[2]);
        assert!(matches!(key.owner_of_segment(6), Err(Error::UnknownSegment(6))));
        assert_eq!(key.segment_of_row(7).unwrap(), 4);
        assert_eq!(key.segment_of_row(9).unwrap(), 5);
    }

    #[test]
    fn test_directory_entry_for_unknown_name() {
        let directory = Directory::new(NodeId(0));

        let result = directory.add_partition_directory_entry("nope", NodeId(0), layout(3, 1, 1)[0].clone());

        assert!(matches!(result, Err(Error::UnknownName(_))));
    }

    // ============================================================
    // TEST 3: Storage
    // ============================================================

    #[test]
    fn test_put_get_delete_local_partition() {
        // ARRANGE
        let directory = Directory::new(NodeId(1));
        let key = directory.register_name("v", DistributionMode::Local).unwrap();

        // ACT
        directory.put(&key, Arc::new(42u64));
        directory.put_partition(&key, NodeId(2), Arc::new(7u64));

        // ASSERT: only the local slot is visible through get
        let values = directory.get(&key);
        assert_eq!(values.len(), 1);
        assert_eq!(*values[0].clone().downcast::<u64>().unwrap(), 42);
        assert_eq!(directory.partitions(&key).len(), 2);

        assert!(directory.delete(&key));
        assert!(!directory.delete(&key));
        assert!(directory.get(&key).is_empty());
        assert!(directory.get_partition(&key, NodeId(2)).is_some());
    }

    #[test]
    fn test_typed_objects() {
        let directory = Directory::new(NodeId(0));

        directory.put_object("counts", Arc::new(vec![1u32, 2, 3]));

        let counts = directory.get_object::<Vec<u32>>("counts").unwrap();
        assert_eq!(*counts, vec![1, 2, 3]);
        assert!(matches!(
            directory.get_object::<String>("counts"),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            directory.get_object::<String>("missing"),
            Err(Error::UnknownName(_))
        ));
        assert_eq!(directory.names(), vec!["counts".to_string()]);
    }
}
