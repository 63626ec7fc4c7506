//! Complete transfers between a sender and a receiver over an in-memory link with scripted
//!  faults, running on a paused clock.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use rstest::rstest;
use tokio::time::Instant;
use crate::config::TcpEndConfig;
use crate::error::{ProtocolError, ProtocolStep};
use crate::receiver::Receiver;
use crate::segment::Segment;
use crate::sender::Sender;
use crate::stats::{ReceiverStats, SenderStats};
use crate::test_util::{link, test_config, test_data, Fate, LinkEnd, RecordingSink, PEER_B};

struct Transfer {
    sender_result: anyhow::Result<SenderStats>,
    receiver_result: anyhow::Result<ReceiverStats>,
    received: RecordingSink,
    sender_end: Arc<LinkEnd>,
    receiver_end: Arc<LinkEnd>,
}

async fn transfer(
    data: &[u8],
    mtu: usize,
    sws: usize,
    to_receiver: impl FnMut(usize, &Segment) -> Fate + Send + 'static,
    to_sender: impl FnMut(usize, &Segment) -> Fate + Send + 'static,
) -> Transfer {
    let (sender_end, receiver_end) = link(to_receiver, to_sender);
    let config = test_config(mtu, sws);

    let mut sender = Sender::new(config.clone(), sender_end.clone(), PEER_B, Cursor::new(data.to_vec())).unwrap();
    let mut receiver = Receiver::new(config, receiver_end.clone(), RecordingSink::default()).unwrap();

    let (sender_result, receiver_result) = tokio::join!(sender.run(), receiver.run());
    Transfer {
        sender_result,
        receiver_result,
        received: receiver.into_sink(),
        sender_end,
        receiver_end,
    }
}

fn data_segments(segments: &[Segment]) -> Vec<&Segment> {
    segments.iter()
        .filter(|s| !s.payload.is_empty())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_clean_transfer() {
    let data = test_data(10_000);
    let t = transfer(&data, 1000, 4, |_, _| Fate::Deliver, |_, _| Fate::Deliver).await;

    let sender_stats = t.sender_result.unwrap();
    let receiver_stats = t.receiver_result.unwrap();
    assert_eq!(t.received.data, data);
    assert!(t.received.flushed);

    // 948 bytes of payload per segment
    assert_eq!(data_segments(&t.sender_end.sent_segments()).len(), 11);
    // SYN, handshake ACK, 11 data segments, FIN, final ACK
    assert_eq!(sender_stats.traffic.segments_sent, 15);
    assert_eq!(sender_stats.traffic.payload_bytes_sent, 10_000);
    assert_eq!(sender_stats.retransmissions, 0);
    assert_eq!(sender_stats.duplicate_acks, 0);

    assert_eq!(receiver_stats.traffic.payload_bytes_received, 10_000);
    assert_eq!(receiver_stats.out_of_sequence_discarded, 0);
    assert_eq!(receiver_stats.checksum_discarded(), 0);

    // every ACK was cumulative and in order
    let acks = t.receiver_end.sent_segments().iter()
        .filter(|s| s.is_ack() && !s.is_syn() && !s.is_fin())
        .map(|s| s.acknowledgment_number)
        .collect::<Vec<_>>();
    assert!(acks.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_single_loss_is_recovered_by_fast_retransmit() {
    let data = test_data(10_000);
    let mut dropped = false;
    let (sender_end, receiver_end) = link(move |_, s| {
        if s.sequence_number == 948 && !s.payload.is_empty() && !dropped {
            dropped = true;
            Fate::Drop
        }
        else {
            Fate::Deliver
        }
    }, |_, _| Fate::Deliver);

    // no retransmission timeout can expire in less than 10 seconds
    let config = Arc::new(TcpEndConfig { min_timeout: Duration::from_secs(10), ..TcpEndConfig::new(1000, 4) });
    let mut sender = Sender::new(config.clone(), sender_end.clone(), PEER_B, Cursor::new(data.clone())).unwrap();
    let mut receiver = Receiver::new(config, receiver_end.clone(), RecordingSink::default()).unwrap();

    let run_sender = async {
        sender.connect().await?;
        let started = Instant::now();
        sender.transfer().await?;
        let transfer_time = started.elapsed();
        sender.close().await?;
        anyhow::Ok(transfer_time)
    };
    let (transfer_time, receiver_result) = tokio::join!(run_sender, receiver.run());
    let transfer_time = transfer_time.unwrap();
    receiver_result.unwrap();

    assert!(transfer_time < Duration::from_secs(10), "data transfer took {:?}", transfer_time);
    assert_eq!(receiver.into_sink().data, data);

    let num_acks_948 = receiver_end.sent_segments().iter()
        .filter(|s| s.acknowledgment_number == 948 && !s.is_syn())
        .count();
    assert!(num_acks_948 >= 3);

    let num_sent_948 = data_segments(&sender_end.sent_segments()).iter()
        .filter(|s| s.sequence_number == 948)
        .count();
    assert!(num_sent_948 >= 2);

    let sender_stats = sender.stats();
    assert!(sender_stats.retransmissions >= 1);
    assert!(sender_stats.duplicate_acks >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_silent_receiver() {
    let (sender_end, _receiver_end) = link(|_, _| Fate::Drop, |_, _| Fate::Deliver);
    let mut sender = Sender::new(test_config(1000, 4), sender_end.clone(), PEER_B, Cursor::new(test_data(100))).unwrap();

    let err = sender.run().await.unwrap_err();
    assert_eq!(err.downcast_ref::<ProtocolError>(), Some(&ProtocolError::RetriesExhausted { step: ProtocolStep::AwaitSynAck, attempts: 16 }));

    let sent = sender_end.sent_segments();
    assert_eq!(sent.len(), 16);
    assert!(sent.iter().all(|s| s.is_syn() && !s.is_ack()));
}

#[tokio::test(start_paused = true)]
async fn test_lost_final_ack() {
    let data = test_data(3000);
    let mut final_ack_dropped = false;
    let t = transfer(&data, 1000, 4, move |_, s| {
        let is_final_ack = s.is_ack() && !s.is_fin() && s.payload.is_empty() && s.sequence_number == 3001;
        if is_final_ack && !final_ack_dropped {
            final_ack_dropped = true;
            Fate::Drop
        }
        else {
            Fate::Deliver
        }
    }, |_, _| Fate::Deliver).await;

    t.sender_result.unwrap();
    t.receiver_result.unwrap();
    assert_eq!(t.received.data, data);

    let final_acks = t.sender_end.sent_segments().iter()
        .filter(|s| s.sequence_number == 3001 && s.acknowledgment_number == 1 && !s.is_fin())
        .count();
    assert_eq!(final_acks, 2);

    let receiver_fins = t.receiver_end.sent_segments().iter()
        .filter(|s| s.is_fin())
        .count();
    assert_eq!(receiver_fins, 2);
}

#[tokio::test(start_paused = true)]
async fn test_lost_final_ack_and_lost_resent_fin() {
    let data = test_data(3000);
    let mut final_ack_dropped = false;
    let mut num_fins = 0;
    let t = transfer(&data, 1000, 4, move |_, s| {
        let is_final_ack = s.is_ack() && !s.is_fin() && s.payload.is_empty() && s.sequence_number == 3001;
        if is_final_ack && !final_ack_dropped {
            final_ack_dropped = true;
            Fate::Drop
        }
        else {
            Fate::Deliver
        }
    }, move |_, s| {
        if s.is_fin() {
            num_fins += 1;
            // the first re-sent FIN
            if num_fins == 2 {
                return Fate::Drop;
            }
        }
        Fate::Deliver
    }).await;

    t.sender_result.unwrap();
    t.receiver_result.unwrap();
    assert_eq!(t.received.data, data);

    let final_acks = t.sender_end.sent_segments().iter()
        .filter(|s| s.sequence_number == 3001 && s.acknowledgment_number == 1 && !s.is_fin())
        .count();
    assert_eq!(final_acks, 2);

    let receiver_fins = t.receiver_end.sent_segments().iter()
        .filter(|s| s.is_fin())
        .count();
    assert_eq!(receiver_fins, 3);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_syn_ack_echoes_latest_syn() {
    // the receiver's first SYN+ACK is lost
    let (sender_end, receiver_end) = link(|_, _| Fate::Deliver, |idx, _| if idx == 0 { Fate::Drop } else { Fate::Deliver });

    let config = Arc::new(TcpEndConfig { control_timeout: Duration::from_secs(20), ..TcpEndConfig::new(1000, 4) });
    let mut sender = Sender::new(config.clone(), sender_end.clone(), PEER_B, Cursor::new(test_data(100))).unwrap();
    let mut receiver = Receiver::new(config, receiver_end.clone(), RecordingSink::default()).unwrap();

    let (connected, accepted) = tokio::join!(sender.connect(), receiver.accept());
    connected.unwrap();
    accepted.unwrap();

    let syn_timestamps = sender_end.sent_segments().iter()
        .filter(|s| s.is_syn())
        .map(|s| s.timestamp)
        .collect::<Vec<_>>();
    let echoed = receiver_end.sent_segments().iter()
        .filter(|s| s.is_syn_ack())
        .map(|s| s.timestamp)
        .collect::<Vec<_>>();
    assert_eq!(syn_timestamps.len(), 2);
    assert_eq!(echoed, syn_timestamps);

    // the RTT sample is taken from the second SYN, which was answered without delay
    assert_eq!(sender.retransmission_timeout(), Duration::from_millis(1));
}

#[rstest]
#[case::with_data(test_data(2500))]
#[case::empty(Vec::new())]
#[tokio::test(start_paused = true)]
async fn test_lost_handshake_ack(#[case] data: Vec<u8>) {
    // datagram #1 from the sender is its handshake ACK
    let t = transfer(&data, 1000, 4, |idx, _| if idx == 1 { Fate::Drop } else { Fate::Deliver }, |_, _| Fate::Deliver).await;

    t.sender_result.unwrap();
    t.receiver_result.unwrap();
    assert_eq!(t.received.data, data);
}

#[tokio::test(start_paused = true)]
async fn test_empty_file() {
    let t = transfer(&[], 1000, 4, |_, _| Fate::Deliver, |_, _| Fate::Deliver).await;

    let sender_stats = t.sender_result.unwrap();
    t.receiver_result.unwrap();
    assert!(t.received.data.is_empty());
    assert!(t.received.writes.is_empty());
    assert!(t.received.flushed);

    // SYN, handshake ACK, FIN, final ACK
    assert_eq!(sender_stats.traffic.segments_sent, 4);
    let fin = t.sender_end.sent_segments().into_iter()
        .find(|s| s.is_fin())
        .unwrap();
    assert_eq!(fin.sequence_number, 0);
}

#[rstest]
#[case::large_window(1000, 8)]
#[case::small_segments(100, 4)]
#[case::stop_and_wait(200, 1)]
#[tokio::test(start_paused = true)]
async fn test_exactly_once_under_faults(#[case] mtu: usize, #[case] sws: usize) {
    let data = test_data(7_000);
    let t = transfer(&data, mtu, sws,
        |idx, _| match idx % 11 {
            3 => Fate::Drop,
            5 => Fate::Duplicate,
            7 => Fate::HoldBack,
            9 => Fate::Corrupt,
            _ => Fate::Deliver,
        },
        |idx, _| match idx % 13 {
            4 => Fate::Drop,
            8 => Fate::Duplicate,
            10 => Fate::Corrupt,
            _ => Fate::Deliver,
        },
    ).await;

    let sender_stats = t.sender_result.unwrap();
    let receiver_stats = t.receiver_result.unwrap();

    // the recording sink rejects any write that is not contiguous, so each byte was written once
    assert_eq!(t.received.data, data);
    assert!(sender_stats.retransmissions > 0);
    assert!(receiver_stats.checksum_discarded() > 0);
}
