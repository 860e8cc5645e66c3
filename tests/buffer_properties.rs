// Copyright 2024-2025 Irreducible Inc.

use std::mem::size_of;

use proptest::prelude::*;

use gpu_view::{
    get_next_record, ApiCallRecord, Backpressure, ExternalCorrelationRecord, ExternalKind,
    KernelRecord, Record, ViewBuffer, ViewBufferQueue, ViewError, ViewKind,
};

#[derive(Debug, Clone)]
enum Item {
    Kernel(u64),
    Api(u64),
    External(u64, u64),
}

fn item() -> impl Strategy<Value = Item> {
    prop_oneof![
        any::<u64>().prop_map(Item::Kernel),
        any::<u64>().prop_map(Item::Api),
        (any::<u64>(), any::<u64>()).prop_map(|(c, e)| Item::External(c, e)),
    ]
}

fn insert(buffer: &mut ViewBuffer, item: &Item) -> Result<(), ViewError> {
    match *item {
        Item::Kernel(id) => buffer.insert(&KernelRecord {
            correlation_id: id,
            ..KernelRecord::new()
        }),
        Item::Api(id) => buffer.insert(&ApiCallRecord {
            correlation_id: id,
            ..ApiCallRecord::new(ViewKind::DriverApiCall)
        }),
        Item::External(id, external) => {
            buffer.insert(&ExternalCorrelationRecord::new(id, ExternalKind::Custom3, external))
        }
    }
}

fn size(item: &Item) -> usize {
    match item {
        Item::Kernel(_) => size_of::<KernelRecord>(),
        Item::Api(_) => size_of::<ApiCallRecord>(),
        Item::External(..) => size_of::<ExternalCorrelationRecord>(),
    }
}

fn matches(record: &Record, item: &Item) -> bool {
    match (record, item) {
        (Record::Kernel(r), Item::Kernel(id)) => r.correlation_id == *id,
        (Record::DriverApiCall(r), Item::Api(id)) => r.correlation_id == *id,
        (Record::ExternalCorrelation(r), Item::External(id, external)) => {
            r.correlation_id == *id && r.external_id == *external
        }
        _ => false,
    }
}

proptest! {
    #[test]
    fn inserts_until_full(items in prop::collection::vec(item(), 0..64), capacity in 0usize..4096) {
        let mut buffer = ViewBuffer::new(vec![0u8; capacity].into_boxed_slice());
        let mut stored = Vec::new();

        for item in &items {
            let free = buffer.capacity() - buffer.valid_bytes();
            let before = buffer.valid_bytes();
            match insert(&mut buffer, item) {
                Ok(()) => {
                    prop_assert!(size(item) <= free);
                    prop_assert_eq!(buffer.valid_bytes(), before + size(item));
                    stored.push(item.clone());
                }
                Err(e) => {
                    let is_space = matches!(e, ViewError::InsufficientSpace { .. });
                    prop_assert!(is_space);
                    prop_assert!(size(item) > free);
                    prop_assert_eq!(buffer.valid_bytes(), before);
                }
            }
            prop_assert!(buffer.valid_bytes() <= buffer.capacity());
        }

        // every stored record comes back, in order, and nothing else
        let completed = buffer.into_completed().unwrap();
        let records: Vec<_> = completed.records().collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(records.len(), stored.len());
        for (record, item) in records.iter().zip(&stored) {
            prop_assert!(matches(record, item));
        }
    }

    #[test]
    fn cursor_walk_is_repeatable(items in prop::collection::vec(item(), 1..16)) {
        let mut buffer = ViewBuffer::new(vec![0u8; 4096].into_boxed_slice());
        for item in &items {
            insert(&mut buffer, item).unwrap();
        }

        let valid = buffer.valid();
        let mut current = None;
        let mut walked = 0;
        while let Some(record) = get_next_record(valid, current).unwrap() {
            let again = get_next_record(valid, current).unwrap().unwrap();
            prop_assert_eq!(record.offset(), again.offset());
            prop_assert!(matches(&record.decode(), &items[walked]));
            current = Some(record);
            walked += 1;
        }
        prop_assert_eq!(walked, items.len());
    }

    #[test]
    fn queue_is_fifo(pushed in 0usize..32, popped in 0usize..32) {
        let queue = ViewBufferQueue::new(None, Backpressure::Block);
        for tag in 0..pushed {
            let mut buffer = ViewBuffer::new(vec![0u8; 8].into_boxed_slice());
            buffer.insert(&(tag as u64)).unwrap();
            prop_assert!(queue.push(buffer).is_none());
        }

        let popped = popped.min(pushed);
        for tag in 0..popped {
            let buffer = queue.try_pop().unwrap();
            prop_assert_eq!(buffer.valid(), &(tag as u64).to_ne_bytes()[..]);
            queue.done();
        }
        prop_assert_eq!(queue.len(), pushed - popped);
    }
}
