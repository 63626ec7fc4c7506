use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;
use crate::segment::Segment;
use crate::transport::DatagramSocket;

pub const PEER_A: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4000));
pub const PEER_B: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5000));

/// What happens to a single datagram on its way through the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    Duplicate,
    /// deliver with a single bit flipped
    Corrupt,
    /// deliver after the next datagram that is delivered, i.e. reordered
    HoldBack,
}

type FaultPlan = Box<dyn FnMut(usize, &Segment) -> Fate + Send>;

struct Outbound {
    fault_plan: FaultPlan,
    held_back: Option<Vec<u8>>,
    sent: Vec<Segment>,
}

/// One end of an in-memory datagram link between [PEER_A] and [PEER_B]. The fault plan is
///  called with the running index of every datagram sent from this end and decides its fate.
///
/// Once the other end is dropped, receiving blocks forever so that timeouts still fire.
pub struct LinkEnd {
    addr: SocketAddr,
    peer_addr: SocketAddr,
    to_peer: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    outbound: Mutex<Outbound>,
}

pub fn link(
    a_to_b: impl FnMut(usize, &Segment) -> Fate + Send + 'static,
    b_to_a: impl FnMut(usize, &Segment) -> Fate + Send + 'static,
) -> (Arc<LinkEnd>, Arc<LinkEnd>) {
    let (send_a, recv_a) = mpsc::unbounded_channel();
    let (send_b, recv_b) = mpsc::unbounded_channel();

    let a = LinkEnd::new(PEER_A, PEER_B, send_b, recv_a, Box::new(a_to_b));
    let b = LinkEnd::new(PEER_B, PEER_A, send_a, recv_b, Box::new(b_to_a));
    (Arc::new(a), Arc::new(b))
}

impl LinkEnd {
    fn new(
        addr: SocketAddr,
        peer_addr: SocketAddr,
        to_peer: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
        inbox: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
        fault_plan: FaultPlan,
    ) -> LinkEnd {
        LinkEnd {
            addr,
            peer_addr,
            to_peer,
            inbox: tokio::sync::Mutex::new(inbox),
            outbound: Mutex::new(Outbound {
                fault_plan,
                held_back: None,
                sent: Vec::new(),
            }),
        }
    }

    /// every segment sent from this end, including those the link dropped
    pub fn sent_segments(&self) -> Vec<Segment> {
        self.outbound.lock().unwrap()
            .sent.clone()
    }
}

#[async_trait]
impl DatagramSocket for LinkEnd {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        assert_eq!(to, self.peer_addr);
        let segment = Segment::deser(buf)?;

        let deliveries = {
            let mut outbound = self.outbound.lock().unwrap();
            let idx = outbound.sent.len();
            outbound.sent.push(segment.clone());

            let fate = (outbound.fault_plan)(idx, &segment);
            trace!("link {:?} -> {:?}: datagram #{} ({}) - {:?}", self.addr, self.peer_addr, idx, segment, fate);

            let mut deliveries = Vec::new();
            match fate {
                Fate::Deliver => deliveries.push(buf.to_vec()),
                Fate::Drop => {}
                Fate::Duplicate => {
                    deliveries.push(buf.to_vec());
                    deliveries.push(buf.to_vec());
                }
                Fate::Corrupt => {
                    let mut corrupted = buf.to_vec();
                    let last = corrupted.len() - 1;
                    corrupted[last] ^= 0x01;
                    deliveries.push(corrupted);
                }
                Fate::HoldBack => {
                    if outbound.held_back.is_none() {
                        outbound.held_back = Some(buf.to_vec());
                    }
                    else {
                        deliveries.push(buf.to_vec());
                    }
                }
            }

            if fate != Fate::HoldBack && !deliveries.is_empty() {
                if let Some(held_back) = outbound.held_back.take() {
                    deliveries.push(held_back);
                }
            }
            deliveries
        };

        for datagram in deliveries {
            // the other end may be gone already, which is just another kind of loss
            let _ = self.to_peer.send((datagram, self.addr));
        }
        Ok(())
    }

    async fn recv_datagram(&self, max_len: usize) -> anyhow::Result<(Vec<u8>, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((mut datagram, from)) => {
                datagram.truncate(max_len);
                Ok((datagram, from))
            }
            None => std::future::pending().await,
        }
    }
}
