//! Outbound collaborators of the engine.
//!
//! Released frames go to a [`FrameSink`]; teardown requests go to a
//! [`ControlPlane`]. Both are called from the engine task, synchronously and
//! in order, so implementations must not block. Channel senders and closures
//! implement both traits.

use crate::control::TeardownRequest;
use crate::peer::{PeerAddress, Tid};
use crate::reorder::Release;
use crate::sequence::SeqNum;
use log::warn;
use tokio::sync::mpsc::{error::SendError, UnboundedSender};

/// A frame leaving the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFrame<F> {
    /// Transmitter.
    pub peer: PeerAddress,
    /// Session TID.
    pub tid: Tid,
    /// Sequence number the frame arrived with.
    pub sequence_number: SeqNum,
    /// The frame.
    pub frame: F,
    /// How it left its session.
    pub release: Release,
}

/// Receives frames in delivery order.
pub trait FrameSink<F>: Send + 'static {
    /// Hand one frame to the rest of the receive path.
    fn deliver(&mut self, frame: DeliveredFrame<F>);
}

/// Receives session teardown requests.
pub trait ControlPlane: Send + 'static {
    /// Ask for the Block-Ack session to be torn down.
    fn request_teardown(&mut self, request: TeardownRequest);
}

impl<F: Send + 'static> FrameSink<F> for UnboundedSender<DeliveredFrame<F>> {
    fn deliver(&mut self, frame: DeliveredFrame<F>) {
        if let Err(SendError(frame)) = self.send(frame) {
            warn!(
                "Frame receiver closed, dropping {} tid {} sn {}",
                frame.peer, frame.tid, frame.sequence_number
            );
        }
    }
}

impl<F, T> FrameSink<F> for T
where
    T: FnMut(DeliveredFrame<F>) + Send + 'static,
{
    fn deliver(&mut self, frame: DeliveredFrame<F>) {
        self(frame)
    }
}

impl ControlPlane for UnboundedSender<TeardownRequest> {
    fn request_teardown(&mut self, request: TeardownRequest) {
        if let Err(SendError(request)) = self.send(request) {
            warn!("Control plane receiver closed, dropping {}", request);
        }
    }
}

impl<T> ControlPlane for T
where
    T: FnMut(TeardownRequest) + Send + 'static,
{
    fn request_teardown(&mut self, request: TeardownRequest) {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::TeardownReason;
    use ba_reorder_macros::ba_test;
    use tokio::sync::mpsc;

    fn delivered(raw: u16) -> DeliveredFrame<u16> {
        DeliveredFrame {
            peer: PeerAddress::new([2, 0, 0, 0, 0, 1]),
            tid: Tid::new(0).unwrap(),
            sequence_number: SeqNum::new(raw),
            frame: raw,
            release: Release::InOrder,
        }
    }

    #[ba_test]
    fn test_channel_sink() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        tx.deliver(delivered(4));
        assert_eq!(rx.try_recv().unwrap().frame, 4);

        // A closed receiver is not fatal
        drop(rx);
        tx.deliver(delivered(5));
    }

    #[ba_test]
    fn test_closure_sink_and_control() {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let mut sink = move |frame: DeliveredFrame<u16>| {
            let _ = frame_tx.send(frame.sequence_number.get());
        };
        sink.deliver(delivered(9));
        assert_eq!(frame_rx.try_recv().unwrap(), 9);

        let (req_tx, mut req_rx) = mpsc::unbounded_channel();
        let mut control = move |request: TeardownRequest| {
            let _ = req_tx.send(request.sequence_number.get());
        };
        control.request_teardown(TeardownRequest {
            peer: PeerAddress::new([2, 0, 0, 0, 0, 1]),
            tid: Tid::new(0).unwrap(),
            sequence_number: SeqNum::new(50),
            reason: TeardownReason::OutOfRangeSequenceNumber,
        });
        assert_eq!(req_rx.try_recv().unwrap(), 50);
    }
}
