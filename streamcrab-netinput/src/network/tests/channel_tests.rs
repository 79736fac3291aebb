use super::*;

#[test]
fn test_chunks_arrive_in_fifo_order() {
    let (sender, receiver) = input_channel(ChannelId(0), 10);

    sender.push_chunk(vec![1, 2], false).unwrap();
    sender.push_chunk(vec![3], true).unwrap();
    assert_eq!(receiver.queued(), 2);

    assert_eq!(
        receiver.try_recv(),
        ChunkRecv::Chunk(Chunk {
            bytes: vec![1, 2],
            is_last: false
        })
    );
    let last = receiver.recv().unwrap();
    assert_eq!(last.bytes, vec![3]);
    assert!(last.is_last);
    assert_eq!(receiver.try_recv(), ChunkRecv::Empty);
}

#[test]
fn test_disconnect_is_reported() {
    let (sender, receiver) = input_channel(ChannelId(4), 2);
    drop(sender);
    assert_eq!(receiver.try_recv(), ChunkRecv::Disconnected);
    let err = receiver.recv().unwrap_err();
    assert!(err.to_string().contains("channel_4 closed"));
}

#[test]
fn test_backpressure() {
    let (sender, receiver) = input_channel(ChannelId(0), 2);

    sender.push_chunk(vec![1], false).unwrap();
    sender.push_chunk(vec![2], false).unwrap();

    // Queue full: try_push fails.
    assert!(sender.try_push_chunk(vec![3], false).is_err());

    receiver.recv().unwrap();
    sender.try_push_chunk(vec![3], false).unwrap();
}

#[test]
fn test_input_channels_assigns_sequential_ids() {
    let (senders, receivers) = input_channels(3, 4);
    let ids: Vec<_> = receivers.iter().map(|r| r.channel_id()).collect();
    assert_eq!(ids, vec![ChannelId(0), ChannelId(1), ChannelId(2)]);
    assert_eq!(senders[2].channel_id(), ChannelId(2));
}

#[test]
fn test_router_dispatches_by_channel_id() {
    let (senders, receivers) = input_channels(2, 4);
    let router = ChunkRouter::new(senders);
    assert_eq!(router.channel_count(), 2);

    router.push_chunk(ChannelId(1), vec![9], false).unwrap();
    assert_eq!(receivers[0].try_recv(), ChunkRecv::Empty);
    assert_eq!(receivers[1].recv().unwrap().bytes, vec![9]);

    let err = router.push_chunk(ChannelId(7), vec![1], false).unwrap_err();
    assert!(err.to_string().contains("unknown input channel"));
}

#[tokio::test]
async fn test_send_chunk_waits_for_free_slot() {
    let (sender, receiver) = input_channel(ChannelId(6), 1);
    sender.send_chunk(vec![1], false).await.unwrap();

    let drain = async {
        tokio::task::yield_now().await;
        receiver.try_recv()
    };
    let (sent, first) = tokio::join!(sender.send_chunk(vec![2], true), drain);
    sent.unwrap();
    assert_eq!(
        first,
        ChunkRecv::Chunk(Chunk {
            bytes: vec![1],
            is_last: false
        })
    );
    assert_eq!(receiver.recv().unwrap().bytes, vec![2]);
}
