// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The single-threaded cooperative actor that owns a connection
//!
//! All mutable connection state is owned by the loop; other threads
//! interact only by enqueueing [`Message`]s. The loop blocks on the
//! earliest of the inbound queue and the unified timer deadline, runs
//! every component operation to completion, and signals an idle channel
//! whenever it is about to block with nothing left to do, which test
//! harnesses use for deterministic stepping.

use crate::connection::{Connection, DatagramSender};
use aero_quic_core::{
    crypto::PacketProtection,
    packet::number::PacketNumberSpace,
    recovery::CongestionController,
    time::{Clock, Timestamp},
    transport,
};
use core::time::Duration;
use std::sync::mpsc;

/// An operation executed inline on the loop
///
/// The set is closed: collaborators get a bounded vocabulary, plus an
/// opaque handle reserved for test harnesses to inspect state.
pub enum LoopOp<CC: CongestionController> {
    /// Install key material for a space (TLS collaborator)
    InstallKeys {
        space: PacketNumberSpace,
        tx_protection: Option<PacketProtection>,
        rx_protection: Option<PacketProtection>,
    },
    /// Enqueue outgoing handshake bytes (TLS collaborator)
    WriteCrypto {
        space: PacketNumberSpace,
        data: Vec<u8>,
    },
    /// The TLS collaborator confirmed the handshake
    HandshakeConfirmed,
    /// Close the connection with the given error
    Close(transport::Error),
    /// Run an opaque closure against the connection; for test harnesses
    Inspect(InspectFn<CC>),
}

pub type InspectFn<CC> = Box<dyn FnOnce(&mut Connection<CC>, Timestamp) + Send>;

/// A message for the connection's inbound queue
pub enum Message<CC: CongestionController> {
    /// A datagram delivered by the socket collaborator
    Datagram(Vec<u8>),
    /// Ends the loop. Timers are invalidated, in-flight packets are
    /// dropped without dispatch and the socket is no longer called.
    Exit,
    /// An operation to run inline
    RunOnLoop(LoopOp<CC>),
}

/// The sending side handed to collaborators and harnesses
pub struct ActorHandle<CC: CongestionController> {
    messages: mpsc::Sender<Message<CC>>,
    idle: mpsc::Receiver<()>,
}

impl<CC: CongestionController> ActorHandle<CC> {
    pub fn send(&self, message: Message<CC>) {
        // a dropped actor makes every send a no-op
        let _ = self.messages.send(message);
    }

    pub fn sender(&self) -> mpsc::Sender<Message<CC>> {
        self.messages.clone()
    }

    /// Blocks until the loop reports idle; used for deterministic stepping
    pub fn wait_idle(&self) -> Result<(), mpsc::RecvError> {
        self.idle.recv()
    }
}

pub struct ConnectionActor<CC, Clk, Tx>
where
    CC: CongestionController,
    Clk: Clock,
    Tx: DatagramSender,
{
    connection: Connection<CC>,
    queue: mpsc::Receiver<Message<CC>>,
    clock: Clk,
    sender: Tx,
    idle_signal: mpsc::Sender<()>,
}

impl<CC, Clk, Tx> ConnectionActor<CC, Clk, Tx>
where
    CC: CongestionController,
    Clk: Clock,
    Tx: DatagramSender,
{
    pub fn new(connection: Connection<CC>, clock: Clk, sender: Tx) -> (Self, ActorHandle<CC>) {
        let (message_tx, message_rx) = mpsc::channel();
        let (idle_tx, idle_rx) = mpsc::channel();

        let actor = Self {
            connection,
            queue: message_rx,
            clock,
            sender,
            idle_signal: idle_tx,
        };

        let handle = ActorHandle {
            messages: message_tx,
            idle: idle_rx,
        };

        (actor, handle)
    }

    /// Runs the loop until `Exit` arrives, the connection terminates or
    /// every queue sender is gone
    pub fn run(mut self) {
        loop {
            let now = self.clock.get_time();

            // expired timers first, then give the send path a tick;
            // both run to completion before the next blocking point
            self.connection.on_timeout(now);
            let next_send_time = self.connection.on_transmit(now, &mut self.sender);

            if self.connection.is_finished() {
                tracing::debug!("connection finished; loop exits");
                return;
            }

            let deadline = core::iter::empty()
                .chain(self.connection.next_timer_expiration())
                .chain(next_send_time)
                .min();

            // the loop is about to block: it is observably idle
            let _ = self.idle_signal.send(());

            let message = match deadline {
                Some(deadline) => {
                    let now = self.clock.get_time();
                    // floor the wait so an already-expired deadline cannot
                    // busy-loop; the next iteration will process it
                    let timeout = deadline
                        .saturating_duration_since(now)
                        .max(Duration::from_millis(1));
                    match self.queue.recv_timeout(timeout) {
                        Ok(message) => Some(message),
                        Err(mpsc::RecvTimeoutError::Timeout) => None,
                        Err(mpsc::RecvTimeoutError::Disconnected) => return,
                    }
                }
                None => match self.queue.recv() {
                    Ok(message) => Some(message),
                    Err(_) => return,
                },
            };

            if let Some(message) = message {
                let now = self.clock.get_time();
                if !self.handle_message(message, now) {
                    return;
                }

                // drain whatever else is queued before computing timers
                while let Ok(message) = self.queue.try_recv() {
                    let now = self.clock.get_time();
                    if !self.handle_message(message, now) {
                        return;
                    }
                }
            }
        }
    }

    fn handle_message(&mut self, message: Message<CC>, now: Timestamp) -> bool {
        match message {
            Message::Datagram(mut payload) => {
                self.connection.on_datagram(now, &mut payload);
            }
            Message::Exit => {
                self.connection.exit();
                return false;
            }
            Message::RunOnLoop(op) => match op {
                LoopOp::InstallKeys {
                    space,
                    tx_protection,
                    rx_protection,
                } => {
                    self.connection.install_keys(space, tx_protection, rx_protection);
                }
                LoopOp::WriteCrypto { space, data } => {
                    self.connection.write_crypto(space, &data);
                }
                LoopOp::HandshakeConfirmed => {
                    self.connection.on_handshake_confirmed();
                }
                LoopOp::Close(error) => {
                    self.connection.close(error, now);
                }
                LoopOp::Inspect(inspect) => {
                    inspect(&mut self.connection, now);
                }
            },
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Limits;
    use aero_quic_core::{
        connection::ConnectionId,
        endpoint,
        recovery::testing::unlimited,
        time::StdClock,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    type TestController = unlimited::CongestionController;

    struct NullSender;

    impl DatagramSender for NullSender {
        fn send_datagram(
            &mut self,
            _payload: &[u8],
            _remote_address: std::net::SocketAddr,
        ) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn connection(clock: &StdClock) -> Connection<TestController> {
        Connection::new(
            endpoint::Type::Client,
            "192.0.2.9:4433".parse().unwrap(),
            ConnectionId::try_from_slice(&[1]).unwrap(),
            ConnectionId::try_from_slice(&[2]).unwrap(),
            TestController::default(),
            Limits::default(),
            clock.get_time(),
        )
    }

    #[test]
    fn exit_terminates_the_loop_test() {
        let clock = StdClock::default();
        let (actor, handle) = ConnectionActor::new(connection(&clock), clock, NullSender);

        let join = std::thread::spawn(move || actor.run());
        handle.send(Message::Exit);
        join.join().unwrap();
    }

    #[test]
    fn idle_channel_signals_every_blocking_point_test() {
        let clock = StdClock::default();
        let (actor, handle) = ConnectionActor::new(connection(&clock), clock, NullSender);

        let join = std::thread::spawn(move || actor.run());

        handle.wait_idle().unwrap();
        handle.send(Message::RunOnLoop(LoopOp::HandshakeConfirmed));
        handle.wait_idle().unwrap();

        handle.send(Message::Exit);
        join.join().unwrap();
    }

    #[test]
    fn inspect_runs_inline_test() {
        let clock = StdClock::default();
        let (actor, handle) = ConnectionActor::new(connection(&clock), clock, NullSender);
        let counter = Arc::new(AtomicUsize::new(0));

        let join = std::thread::spawn(move || actor.run());

        let seen = counter.clone();
        handle.send(Message::RunOnLoop(LoopOp::Inspect(Box::new(
            move |connection, _now| {
                assert!(connection.is_active());
                seen.fetch_add(1, Ordering::SeqCst);
            },
        ))));

        handle.wait_idle().unwrap();
        handle.wait_idle().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        handle.send(Message::Exit);
        join.join().unwrap();
    }

    #[test]
    fn dropped_handle_ends_the_loop_test() {
        let clock = StdClock::default();
        let (actor, handle) = ConnectionActor::new(connection(&clock), clock, NullSender);

        let join = std::thread::spawn(move || actor.run());
        drop(handle);
        join.join().unwrap();
    }
}
