use super::*;
use crate::network::channel::{ChunkRecv, input_channel};
use crate::network::frame::{Frame, write_frame};
use crate::types::{ChannelId, Watermark};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_pump_splits_stream_and_marks_last_chunk() {
    let (sender, receiver) = input_channel(ChannelId(0), 16);
    let data: Vec<u8> = (0..10).collect();

    let total = pump_reader(&data[..], &sender, 4).await.unwrap();
    assert_eq!(total, 10);

    let mut collected = Vec::new();
    let mut flags = Vec::new();
    while let ChunkRecv::Chunk(chunk) = receiver.try_recv() {
        collected.extend_from_slice(&chunk.bytes);
        flags.push(chunk.is_last);
    }
    assert_eq!(collected, data);
    assert_eq!(flags.last(), Some(&true));
    assert!(flags[..flags.len() - 1].iter().all(|last| !last));
}

#[tokio::test]
async fn test_pump_empty_stream_sends_final_chunk() {
    let (sender, receiver) = input_channel(ChannelId(1), 4);
    let total = pump_reader(&[][..], &sender, 8).await.unwrap();
    assert_eq!(total, 0);

    let chunk = receiver.recv().unwrap();
    assert!(chunk.bytes.is_empty());
    assert!(chunk.is_last);
}

#[tokio::test]
async fn test_pump_forwards_frames_written_to_duplex() {
    let (sender, receiver) = input_channel(ChannelId(2), 64);
    let (mut client, server) = tokio::io::duplex(64);

    let frames = vec![
        Frame::Record(vec![1, 2, 3]),
        Frame::Watermark(Watermark::new(100)),
        Frame::EndOfChannel,
    ];
    let expected: Vec<u8> = frames.iter().flat_map(|f| f.encode()).collect();

    let writer = tokio::spawn(async move {
        for frame in &frames {
            write_frame(&mut client, frame).await.unwrap();
        }
        client.shutdown().await.unwrap();
    });

    let total = pump_reader(server, &sender, 5).await.unwrap();
    writer.await.unwrap();
    assert_eq!(total as usize, expected.len());

    let mut collected = Vec::new();
    while let ChunkRecv::Chunk(chunk) = receiver.try_recv() {
        collected.extend_from_slice(&chunk.bytes);
    }
    assert_eq!(collected, expected);
}

#[tokio::test(flavor = "current_thread")]
async fn test_pump_yields_to_consumer_when_queue_is_full() {
    let (sender, receiver) = input_channel(ChannelId(3), 1);
    let data: Vec<u8> = (0..32).collect();

    let consumer = async {
        let mut collected = Vec::new();
        loop {
            match receiver.try_recv() {
                ChunkRecv::Chunk(chunk) => {
                    collected.extend_from_slice(&chunk.bytes);
                    if chunk.is_last {
                        return collected;
                    }
                }
                ChunkRecv::Empty => tokio::task::yield_now().await,
                ChunkRecv::Disconnected => panic!("pump dropped the sender early"),
            }
        }
    };

    let (total, collected) = tokio::join!(pump_reader(&data[..], &sender, 4), consumer);
    assert_eq!(total.unwrap(), 32);
    assert_eq!(collected, data);
}

#[tokio::test]
async fn test_pump_fails_when_consumer_is_gone() {
    let (sender, receiver) = input_channel(ChannelId(5), 1);
    drop(receiver);
    let err = pump_reader(&[1u8, 2, 3][..], &sender, 1).await.unwrap_err();
    assert!(err.to_string().contains("channel_5 closed"));
}
