//! Fixed-size SPSC channel behavior, single-peer and cross-thread.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{coordination_slot, read_u32, setup, u32_source};
use mosaic_core::backends::host::HostMemoryManager;
use mosaic_core::backends::shmem::ShmemCommunicationManager;
use mosaic_core::channel::fixed::spsc::{Consumer, Producer};
use mosaic_core::channel::{keys, token_buffer_size};
use mosaic_core::{
    CommunicationManager, LocalMemorySlot, MemoryManager, MemorySpace, MosaicError, Tag,
};

const TOKEN_SIZE: usize = std::mem::size_of::<u32>();

struct Wiring {
    producer: Producer,
    consumer: Consumer,
    token_slot: Arc<LocalMemorySlot>,
}

/// Wire a single-peer SPSC channel of the given capacity: the consumer owns
/// the token and coordination buffers, the producer its own coordination
/// buffer, all exchanged under `tag`.
fn wire(
    comm: &ShmemCommunicationManager,
    memory: &Arc<HostMemoryManager>,
    space: &Arc<MemorySpace>,
    tag: Tag,
    capacity: usize,
) -> Wiring {
    let token_slot = memory
        .allocate_local_memory_slot(space, token_buffer_size(TOKEN_SIZE, capacity))
        .unwrap();
    let consumer_coordination = coordination_slot(memory, space);
    let producer_coordination = coordination_slot(memory, space);

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

    let token_global = comm.get_global_memory_slot(tag, keys::TOKEN_BUFFER_KEY).unwrap();
    let producer_coordination_global = comm
        .get_global_memory_slot(tag, keys::PRODUCER_COORDINATION_BUFFER_KEY)
        .unwrap();

    let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(comm.clone());
    let producer = Producer::new(
        Arc::clone(&comm_dyn),
        Arc::clone(&token_global),
        producer_coordination,
        Arc::clone(&producer_coordination_global),
        TOKEN_SIZE,
        capacity,
    )
    .unwrap();
    let consumer = Consumer::new(
        comm_dyn,
        token_global,
        consumer_coordination,
        producer_coordination_global,
        TOKEN_SIZE,
        capacity,
    )
    .unwrap();

    Wiring {
        producer,
        consumer,
        token_slot,
    }
}

#[test]
fn push_peek_pop_interleave() {
    let (comm, memory, space) = setup(1);
    let Wiring {
        mut producer,
        mut consumer,
        token_slot,
    } = wire(&comm, &memory, &space, 0, 4);

    let batch = u32_source(&memory, &space, &[10, 20, 30, 40]);
    producer.push(&batch, 4).unwrap();

    let pos = consumer.peek(0).unwrap();
    assert_eq!(read_u32(&token_slot, pos), 10);
    consumer.pop(1).unwrap();

    let pos = consumer.peek(0).unwrap();
    assert_eq!(read_u32(&token_slot, pos), 20);

    let single = u32_source(&memory, &space, &[50]);
    producer.push(&single, 1).unwrap();

    for (offset, expected) in [(0, 20), (1, 30), (2, 40)] {
        let pos = consumer.peek(offset).unwrap();
        assert_eq!(read_u32(&token_slot, pos), expected);
    }
    let pos = consumer.peek(3).unwrap();
    assert_eq!(read_u32(&token_slot, pos), 50);
}

#[test]
fn overflow_underflow_and_peek_range() {
    let (comm, memory, space) = setup(1);
    let Wiring {
        mut producer,
        mut consumer,
        ..
    } = wire(&comm, &memory, &space, 0, 2);

    assert!(matches!(
        consumer.pop(1),
        Err(MosaicError::WouldUnderflow { .. })
    ));
    assert!(matches!(
        consumer.peek(0),
        Err(MosaicError::PeekOutOfRange { .. })
    ));

    let batch = u32_source(&memory, &space, &[1, 2]);
    producer.push(&batch, 2).unwrap();
    assert!(producer.is_full());
    assert!(matches!(
        producer.push(&batch, 1),
        Err(MosaicError::WouldOverflow { .. })
    ));

    // An undersized source slot is misuse, not a capacity condition
    let small = u32_source(&memory, &space, &[7]);
    assert!(matches!(
        producer.push(&small, 2),
        Err(MosaicError::Logic(_))
    ));

    // Popping frees space again
    consumer.pop(2).unwrap();
    producer.push(&batch, 2).unwrap();
}

#[test]
fn counters_match_pushes_after_fence() {
    let (comm, memory, space) = setup(1);
    let tag = 3;
    let Wiring {
        mut producer,
        token_slot,
        ..
    } = wire(&comm, &memory, &space, tag, 4);

    let batch = u32_source(&memory, &space, &[1, 2, 3]);
    producer.push(&batch, 3).unwrap();
    comm.fence(tag).unwrap();

    // One message per pushed token
    assert_eq!(token_slot.messages_recv(), 3);
    assert_eq!(batch.messages_sent(), 3);
}

/// Mixed pushes and pops with random batch sizes never reorder tokens
#[test]
fn fifo_under_random_batches() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const TOTAL: u32 = 300;
    let (comm, memory, space) = setup(1);
    let Wiring {
        mut producer,
        mut consumer,
        token_slot,
    } = wire(&comm, &memory, &space, 0, 8);

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let (mut pushed, mut popped) = (0u32, 0u32);
    while popped < TOTAL {
        if rng.gen_bool(0.5) && pushed < TOTAL {
            let batch: u32 = rng.gen_range(1..=4);
            let batch = batch.min(TOTAL - pushed);
            let values: Vec<u32> = (pushed..pushed + batch).collect();
            let source = u32_source(&memory, &space, &values);
            match producer.push(&source, batch as usize) {
                Ok(()) => pushed += batch,
                Err(MosaicError::WouldOverflow { .. }) => {}
                Err(err) => panic!("unexpected error: {}", err),
            }
        } else {
            match consumer.peek(0) {
                Ok(pos) => {
                    assert_eq!(read_u32(&token_slot, pos), popped);
                    consumer.pop(1).unwrap();
                    popped += 1;
                }
                Err(MosaicError::PeekOutOfRange { .. }) => {}
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
    }
    assert!(consumer.is_empty());
}

#[test]
fn fifo_across_threads() {
    const MESSAGES: u32 = 500;
    const CAPACITY: usize = 8;

    let (comm, memory, space) = setup(2);
    let tag = 1;

    let producer_comm = comm.clone();
    let producer_memory = Arc::clone(&memory);
    let producer_space = Arc::clone(&space);
    let producer_thread = std::thread::spawn(move || {
        let coordination = coordination_slot(&producer_memory, &producer_space);
        producer_comm
            .exchange_global_memory_slots(
                tag,
                &[(
                    keys::PRODUCER_COORDINATION_BUFFER_KEY,
                    Arc::clone(&coordination),
                )],
            )
            .unwrap();
        producer_comm.fence(tag).unwrap();

        let token_global = producer_comm
            .get_global_memory_slot(tag, keys::TOKEN_BUFFER_KEY)
            .unwrap();
        let own_coordination_global = producer_comm
            .get_global_memory_slot(tag, keys::PRODUCER_COORDINATION_BUFFER_KEY)
            .unwrap();

        let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(producer_comm);
        let mut producer = Producer::new(
            comm_dyn,
            token_global,
            coordination,
            own_coordination_global,
            TOKEN_SIZE,
            CAPACITY,
        )
        .unwrap();

        let cancel = AtomicBool::new(false);
        for value in 0..MESSAGES {
            let source = u32_source(&producer_memory, &producer_space, &[value]);
            assert!(producer.push_wait(&source, 1, &cancel).unwrap());
        }
    });

    let token_slot = memory
        .allocate_local_memory_slot(&space, token_buffer_size(TOKEN_SIZE, CAPACITY))
        .unwrap();
    let consumer_coordination = coordination_slot(&memory, &space);
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
    let producer_coordination_global = comm
        .get_global_memory_slot(tag, keys::PRODUCER_COORDINATION_BUFFER_KEY)
        .unwrap();
    let comm_dyn: Arc<dyn CommunicationManager> = Arc::new(comm.clone());
    let mut consumer = Consumer::new(
        comm_dyn,
        token_global,
        consumer_coordination,
        producer_coordination_global,
        TOKEN_SIZE,
        CAPACITY,
    )
    .unwrap();

    // The byte sequence popped equals the byte sequence pushed
    for expected in 0..MESSAGES {
        let pos = loop {
            match consumer.peek(0) {
                Ok(pos) => break pos,
                Err(MosaicError::PeekOutOfRange { .. }) => std::hint::spin_loop(),
                Err(err) => panic!("unexpected error: {}", err),
            }
        };
        assert_eq!(read_u32(&token_slot, pos), expected);
        consumer.pop(1).unwrap();
    }

    producer_thread.join().unwrap();
}
