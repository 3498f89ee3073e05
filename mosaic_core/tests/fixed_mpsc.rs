//! Fixed-size MPSC channels: locking and non-locking variants.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{coordination_slot, read_u32, setup, u32_source};
use mosaic_core::channel::fixed::{mpsc_locking, mpsc_nonlocking, spsc};
use mosaic_core::channel::{keys, token_buffer_size};
use mosaic_core::{CommunicationManager, MemoryManager, MosaicError, Tag};

const TOKEN_SIZE: usize = std::mem::size_of::<u32>();

/// Two producers race pushes under the consumer-side lock; the consumer
/// sees a merge of the per-producer sequences with each subsequence in
/// order.
#[test]
fn locking_merge_preserves_per_producer_order() {
    const CAPACITY: usize = 3;
    let tag: Tag = 2;
    let (comm, memory, space) = setup(3);

    // Consumer-owned shared buffers
    let token_slot = memory
        .allocate_local_memory_slot(&space, token_buffer_size(TOKEN_SIZE, CAPACITY))
        .unwrap();
    let consumer_coordination = coordination_slot(&memory, &space);

    let mut producers = Vec::new();
    for values in [vec![1u32, 2], vec![9u32]] {
        let peer_comm = comm.clone();
        let peer_memory = Arc::clone(&memory);
        let peer_space = Arc::clone(&space);
        producers.push(std::thread::spawn(move || {
            peer_comm.exchange_global_memory_slots(tag, &[]).unwrap();
            peer_comm.fence(tag).unwrap();

            let token_global = peer_comm
                .get_global_memory_slot(tag, keys::TOKEN_BUFFER_KEY)
                .unwrap();
            let consumer_coordination_global = peer_comm
                .get_global_memory_slot(tag, keys::CONSUMER_COORDINATION_BUFFER_KEY)
                .unwrap();

            let scratch = coordination_slot(&peer_memory, &peer_space);
            let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(peer_comm.clone());
            let mut producer = mpsc_locking::Producer::new(
                comm_dyn,
                token_global,
                scratch,
                consumer_coordination_global,
                TOKEN_SIZE,
                CAPACITY,
            )
            .unwrap();

            let cancel = AtomicBool::new(false);
            for value in values {
                let source = u32_source(&peer_memory, &peer_space, &[value]);
                assert!(producer.push_wait(&source, 1, &cancel).unwrap());
            }
            peer_comm.fence(tag).unwrap();
        }));
    }

    comm.exchange_global_memory_slots(
        tag,
        &[
            (keys::TOKEN_BUFFER_KEY, Arc::clone(&token_slot)),
            (
                keys::CONSUMER_COORDINATION_BUFFER_KEY,
                Arc::clone(&consumer_coordination),
            ),
        ],
    )
    .unwrap();
    comm.fence(tag).unwrap();

    let token_global = comm.get_global_memory_slot(tag, keys::TOKEN_BUFFER_KEY).unwrap();
    let consumer_coordination_global = comm
        .get_global_memory_slot(tag, keys::CONSUMER_COORDINATION_BUFFER_KEY)
        .unwrap();
    let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(comm.clone());
    let mut consumer = mpsc_locking::Consumer::new(
        comm_dyn,
        token_global,
        consumer_coordination,
        consumer_coordination_global,
        TOKEN_SIZE,
        CAPACITY,
    )
    .unwrap();

    // All producers have pushed once the closing fence releases
    comm.fence(tag).unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        consumer.update_depth().unwrap();
        match consumer.peek(0) {
            Ok(pos) => {
                seen.push(read_u32(&token_slot, pos));
                while !consumer.pop(1).unwrap() {
                    std::hint::spin_loop();
                }
            }
            Err(MosaicError::PeekOutOfRange { .. }) => std::hint::spin_loop(),
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    for handle in producers {
        handle.join().unwrap();
    }

    let mut multiset = seen.clone();
    multiset.sort_unstable();
    assert_eq!(multiset, vec![1, 2, 9]);

    // P1's subsequence keeps its order
    let one = seen.iter().position(|&v| v == 1).unwrap();
    let two = seen.iter().position(|&v| v == 2).unwrap();
    assert!(one < two);
}

/// Round-robin consumption over a bank of per-producer SPSC channels:
/// every producer's tokens arrive in order, and no sub-channel is served
/// twice in a row while another has tokens.
#[test]
fn nonlocking_round_robin_over_three_producers() {
    const PRODUCERS: usize = 3;
    const PER_PRODUCER: u32 = 5;
    const CAPACITY: usize = 8;
    let tag: Tag = 4;

    let (comm, memory, space) = setup(PRODUCERS + 1);

    let token_key = |id: usize| 100 + id as u64;
    let consumer_coordination_key = |id: usize| 200 + id as u64;
    let producer_coordination_key = |id: usize| 300 + id as u64;

    let mut handles = Vec::new();
    for id in 0..PRODUCERS {
        let peer_comm = comm.clone();
        let peer_memory = Arc::clone(&memory);
        let peer_space = Arc::clone(&space);
        handles.push(std::thread::spawn(move || {
            let coordination = coordination_slot(&peer_memory, &peer_space);
            peer_comm
                .exchange_global_memory_slots(
                    tag,
                    &[(producer_coordination_key(id), Arc::clone(&coordination))],
                )
                .unwrap();
            peer_comm.fence(tag).unwrap();

            let token_global = peer_comm.get_global_memory_slot(tag, token_key(id)).unwrap();
            let own_coordination_global = peer_comm
                .get_global_memory_slot(tag, producer_coordination_key(id))
                .unwrap();

            let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(peer_comm.clone());
            let mut producer = mpsc_nonlocking::Producer::new(
                comm_dyn,
                token_global,
                coordination,
                own_coordination_global,
                TOKEN_SIZE,
                CAPACITY,
            )
            .unwrap();

            let cancel = AtomicBool::new(false);
            for seq in 0..PER_PRODUCER {
                let value = id as u32 * 100 + seq;
                let source = u32_source(&peer_memory, &peer_space, &[value]);
                assert!(producer.push_wait(&source, 1, &cancel).unwrap());
            }
            peer_comm.fence(tag).unwrap();
        }));
    }

    // Consumer: one token buffer and coordination buffer per sub-channel
    let mut pairs = Vec::new();
    let mut token_slots = Vec::new();
    let mut coordination_slots = Vec::new();
    for id in 0..PRODUCERS {
        let token_slot = memory
            .allocate_local_memory_slot(&space, token_buffer_size(TOKEN_SIZE, CAPACITY))
            .unwrap();
        let coordination = coordination_slot(&memory, &space);
        pairs.push((token_key(id), Arc::clone(&token_slot)));
        pairs.push((consumer_coordination_key(id), Arc::clone(&coordination)));
        token_slots.push(token_slot);
        coordination_slots.push(coordination);
    }
    comm.exchange_global_memory_slots(tag, &pairs).unwrap();
    comm.fence(tag).unwrap();

    let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(comm.clone());
    let mut channels = Vec::new();
    for (id, coordination) in coordination_slots.into_iter().enumerate() {
        let token_global = comm.get_global_memory_slot(tag, token_key(id)).unwrap();
        let producer_coordination_global = comm
            .get_global_memory_slot(tag, producer_coordination_key(id))
            .unwrap();
        channels.push(
            spsc::Consumer::new(
                Arc::clone(&comm_dyn),
                token_global,
                coordination,
                producer_coordination_global,
                TOKEN_SIZE,
                CAPACITY,
            )
            .unwrap(),
        );
    }
    let mut consumer = mpsc_nonlocking::Consumer::new(channels).unwrap();

    // Wait until every producer has pushed everything
    comm.fence(tag).unwrap();
    consumer.update_depth().unwrap();
    assert_eq!(consumer.depth(), (PRODUCERS as u32 * PER_PRODUCER) as u64);

    let mut per_producer: Vec<Vec<u32>> = vec![Vec::new(); PRODUCERS];
    let mut previous_channel = None;
    for _ in 0..PRODUCERS as u32 * PER_PRODUCER {
        let (id, pos) = consumer.peek().unwrap();
        // Round-robin never serves the same sub-channel twice in a row
        // while the others still hold tokens
        if per_producer.iter().filter(|seen| (seen.len() as u32) < PER_PRODUCER).count() > 1 {
            assert_ne!(previous_channel, Some(id));
        }
        previous_channel = Some(id);
        per_producer[id].push(read_u32(&token_slots[id], pos));
        consumer.pop().unwrap();
    }

    for (id, values) in per_producer.iter().enumerate() {
        let expected: Vec<u32> = (0..PER_PRODUCER).map(|seq| id as u32 * 100 + seq).collect();
        assert_eq!(values, &expected);
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Popping without a preceding peek is misuse
#[test]
fn nonlocking_pop_requires_peek() {
    let (comm, memory, space) = setup(1);
    let tag: Tag = 6;

    let token_slot = memory
        .allocate_local_memory_slot(&space, token_buffer_size(TOKEN_SIZE, 4))
        .unwrap();
    let consumer_coordination = coordination_slot(&memory, &space);
    let producer_coordination = coordination_slot(&memory, &space);
    comm.exchange_global_memory_slots(
        tag,
        &[
            (keys::TOKEN_BUFFER_KEY, Arc::clone(&token_slot)),
            (
                keys::CONSUMER_COORDINATION_BUFFER_KEY,
                Arc::clone(&consumer_coordination),
            ),
            (
                keys::PRODUCER_COORDINATION_BUFFER_KEY,
                Arc::clone(&producer_coordination),
            ),
        ],
    )
    .unwrap();
    comm.fence(tag).unwrap();

    let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(comm.clone());
    let channel = spsc::Consumer::new(
        comm_dyn,
        comm.get_global_memory_slot(tag, keys::TOKEN_BUFFER_KEY).unwrap(),
        consumer_coordination,
        comm.get_global_memory_slot(tag, keys::PRODUCER_COORDINATION_BUFFER_KEY)
            .unwrap(),
        TOKEN_SIZE,
        4,
    )
    .unwrap();
    let mut consumer = mpsc_nonlocking::Consumer::new(vec![channel]).unwrap();

    assert!(matches!(consumer.pop(), Err(MosaicError::Logic(_))));
    assert!(matches!(
        consumer.peek(),
        Err(MosaicError::WouldUnderflow { .. })
    ));
}
