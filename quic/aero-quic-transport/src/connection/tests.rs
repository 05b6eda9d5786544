// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use aero_quic_core::{
    crypto::testing as crypto_testing,
    recovery::{testing::unlimited, RttEstimator},
    time::{Clock, NoopClock},
};

type TestController = unlimited::CongestionController;

const CLIENT_CID: &[u8] = &[0xc1, 0x1e];
const SERVER_CID: &[u8] = &[0x5e, 0x4e];

fn cid(bytes: &[u8]) -> ConnectionId {
    ConnectionId::try_from_slice(bytes).unwrap()
}

fn peer_addr() -> SocketAddr {
    "192.0.2.1:4433".parse().unwrap()
}

fn client(now: Timestamp) -> Connection<TestController> {
    let mut connection = Connection::new(
        endpoint::Type::Client,
        peer_addr(),
        cid(CLIENT_CID),
        cid(SERVER_CID),
        TestController::default(),
        Limits::default(),
        now,
    );
    connection.install_keys(
        PacketNumberSpace::Initial,
        Some(crypto_testing::null_protection()),
        Some(crypto_testing::null_protection()),
    );
    connection
}

fn server(now: Timestamp) -> Connection<TestController> {
    let mut connection = Connection::new(
        endpoint::Type::Server,
        peer_addr(),
        cid(SERVER_CID),
        cid(CLIENT_CID),
        TestController::default(),
        Limits::default(),
        now,
    );
    connection.install_keys(
        PacketNumberSpace::Initial,
        Some(crypto_testing::null_protection()),
        Some(crypto_testing::null_protection()),
    );
    connection
}

/// Collects every datagram the connection emits
#[derive(Default)]
struct CapturingSender {
    datagrams: Vec<Vec<u8>>,
}

impl DatagramSender for CapturingSender {
    fn send_datagram(&mut self, payload: &[u8], _remote_address: SocketAddr) -> std::io::Result<()> {
        self.datagrams.push(payload.to_vec());
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum ParsedFrame {
    Padding(usize),
    Ping,
    Ack { ranges: Vec<(u64, u64)>, ack_delay: u64 },
    Crypto { offset: u64, len: usize },
    ConnectionClose { code: u64 },
}

#[derive(Debug)]
struct ParsedPacket {
    space: PacketNumberSpace,
    packet_number: u64,
    frames: Vec<ParsedFrame>,
}

impl ParsedPacket {
    fn is_ack_eliciting(&self) -> bool {
        self.frames.iter().any(|frame| {
            matches!(
                frame,
                ParsedFrame::Ping | ParsedFrame::Crypto { .. }
            )
        })
    }
}

/// Parses a datagram sealed with the null test ciphers: headers are in
/// the clear and the trailing 16 bytes of each payload are the zero tag
fn parse_datagram(datagram: &[u8], short_dcid_len: usize) -> Vec<ParsedPacket> {
    let mut packets = vec![];
    let mut offset = 0;

    while offset < datagram.len() {
        let packet = &datagram[offset..];
        if packet.iter().all(|byte| *byte == 0) {
            // trailing datagram padding
            break;
        }

        if long::is_long_header(packet[0]) {
            let header = parse_long_header(packet).expect("valid long header");
            let space = match header.kind {
                long::Kind::Initial => PacketNumberSpace::Initial,
                long::Kind::Handshake => PacketNumberSpace::Handshake,
            };
            packets.push(parse_packet(
                &packet[..header.total_len],
                header.pn_offset,
                space,
            ));
            offset += header.total_len;
        } else {
            packets.push(parse_packet(
                packet,
                1 + short_dcid_len,
                PacketNumberSpace::ApplicationData,
            ));
            break;
        }
    }

    packets
}

fn parse_packet(packet: &[u8], pn_offset: usize, space: PacketNumberSpace) -> ParsedPacket {
    let pn_len = ((packet[0] & 0b11) + 1) as usize;

    let (truncated, _) = TruncatedPacketNumber::decode(
        DecoderBuffer::new(&packet[pn_offset..pn_offset + pn_len]),
        space.new_packet_number_len(packet[0]),
    )
    .unwrap();
    let packet_number = truncated.into_u64();

    let payload = &packet[pn_offset + pn_len..packet.len() - crypto_testing::TAG_LEN];
    let mut frames = vec![];
    let mut buffer = DecoderBuffer::new(payload);
    while !buffer.is_empty() {
        let (frame, remaining) = FrameRef::decode(buffer).expect("valid frame");
        frames.push(match frame {
            FrameRef::Padding(padding) => ParsedFrame::Padding(padding.length),
            FrameRef::Ping(_) => ParsedFrame::Ping,
            FrameRef::Ack(ack) => ParsedFrame::Ack {
                ranges: ack
                    .ack_ranges()
                    .map(|range| (range.start().as_u64(), range.end().as_u64()))
                    .collect(),
                ack_delay: ack.ack_delay().as_u64(),
            },
            FrameRef::Crypto(crypto) => ParsedFrame::Crypto {
                offset: crypto.offset.as_u64(),
                len: crypto.data.len(),
            },
            FrameRef::ConnectionClose(close) => ParsedFrame::ConnectionClose {
                code: close.error_code.as_u64(),
            },
        });
        buffer = remaining;
    }

    ParsedPacket {
        space,
        packet_number,
        frames,
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Seals a peer Initial packet with the null ciphers; `append` fills the
/// payload through the writer
fn peer_initial_datagram(
    packet_number: u32,
    append: impl FnOnce(&mut PacketWriter),
    now: Timestamp,
) -> Vec<u8> {
    let mut writer = PacketWriter::default();
    let protection = crypto_testing::null_protection();
    writer.reset(1200);
    assert!(writer.start_long_packet(
        long::Kind::Initial,
        PacketNumberSpace::Initial.new_packet_number(VarInt::from_u32(packet_number)),
        PacketNumberSpace::Initial.new_packet_number(VarInt::ZERO),
        &cid(CLIENT_CID),
        &cid(SERVER_CID),
        &protection,
    ));
    append(&mut writer);
    writer.finish_packet(&protection, now).unwrap();
    writer.datagram().to_vec()
}

/// A peer Initial packet acknowledging exactly `acked`
fn peer_ack_datagram(packet_number: u32, acked: u32, now: Timestamp) -> Vec<u8> {
    peer_initial_datagram(
        packet_number,
        |writer| {
            let mut ranges = crate::ack::AckRanges::default();
            ranges
                .insert_packet_number(
                    PacketNumberSpace::Initial.new_packet_number(VarInt::from_u32(acked)),
                )
                .unwrap();
            assert!(writer.append_ack_frame(&ranges, VarInt::ZERO));
        },
        now,
    )
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
//= type=test
//# Initial packets sent by a client MUST be sent in a UDP datagram with a
//# payload of at least 1200 bytes.
#[test]
fn client_initial_padding_test() {
    let now = NoopClock.get_time();
    let mut client = client(now);
    let mut sender = CapturingSender::default();

    client.write_crypto(PacketNumberSpace::Initial, &[0x17; 300]);
    client.on_transmit(now, &mut sender);

    assert_eq!(sender.datagrams.len(), 1);
    let datagram = &sender.datagrams[0];
    assert!(datagram.len() >= 1200);

    let packets = parse_datagram(datagram, 0);
    assert_eq!(packets.len(), 1);
    let packet = &packets[0];
    assert_eq!(packet.space, PacketNumberSpace::Initial);
    assert_eq!(packet.packet_number, 0);
    assert_eq!(
        packet.frames,
        [ParsedFrame::Crypto {
            offset: 0,
            len: 300
        }]
    );

    // everything after the Initial packet is zero padding
    let initial_len = {
        let header = parse_long_header(datagram).unwrap();
        header.total_len
    };
    assert!(datagram[initial_len..].iter().all(|byte| *byte == 0));
}

#[test]
fn ack_eliciting_reception_triggers_ack_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut server = server(t0);

    let mut client_out = CapturingSender::default();
    client.write_crypto(PacketNumberSpace::Initial, b"client hello");
    client.on_transmit(t0, &mut client_out);

    // the client's Initial (pnum 0, CRYPTO) arrives at the server
    let t1 = t0 + ms(10);
    server.on_datagram(t1, &mut client_out.datagrams[0]);
    assert_eq!(
        server.read_crypto(PacketNumberSpace::Initial).as_deref(),
        Some(b"client hello".as_slice())
    );

    // the server's next Initial packet carries an ACK covering [0, 0]
    // with an ACK Delay close to the time since reception
    let t2 = t1 + ms(5);
    let mut server_out = CapturingSender::default();
    server.on_transmit(t2, &mut server_out);

    assert_eq!(server_out.datagrams.len(), 1);
    let packets = parse_datagram(&server_out.datagrams[0], 0);
    let ack = packets[0]
        .frames
        .iter()
        .find_map(|frame| match frame {
            ParsedFrame::Ack { ranges, ack_delay } => Some((ranges.clone(), *ack_delay)),
            _ => None,
        })
        .expect("an ACK frame is present");

    assert_eq!(ack.0, [(0, 0)]);
    // Initial spaces use an ack_delay_exponent of 0: microseconds
    assert_eq!(ack.1, 5_000);

    // the ACK consumes the client's in-flight record exactly once
    let t3 = t2 + ms(10);
    client.on_datagram(t3, &mut server_out.datagrams[0]);
    assert!(!client
        .spaces()
        .initial()
        .unwrap()
        .recovery
        .has_packets_in_flight());
}

#[test]
fn abandoned_speculative_ack_test() {
    let now = NoopClock.get_time();
    let mut client = client(now);
    let mut sender = CapturingSender::default();

    // no ack-eliciting reception outstanding and nothing to send
    let next = client.on_transmit(now, &mut sender);

    assert!(sender.datagrams.is_empty());
    assert!(client.path().congestion_controller.underutilized);
    assert_eq!(next, None);
}

#[test]
fn ack_only_packet_waits_for_ack_policy_test() {
    let t0 = NoopClock.get_time();
    let mut server = server(t0);
    // the application space delays ACKs by max_ack_delay
    server.install_keys(
        PacketNumberSpace::ApplicationData,
        Some(crypto_testing::null_protection()),
        Some(crypto_testing::null_protection()),
    );
    server.on_handshake_confirmed();

    // build a 1-RTT PING from the client
    let mut client = client(t0);
    client.install_keys(
        PacketNumberSpace::ApplicationData,
        Some(crypto_testing::null_protection()),
        Some(crypto_testing::null_protection()),
    );
    client.on_handshake_confirmed();
    let mut client_out = CapturingSender::default();
    {
        // reach into the writer the way the send loop does
        let space = client.spaces.application_mut().unwrap();
        let protection = space.tx_protection.as_ref().unwrap();
        client.writer.reset(1200);
        assert!(client.writer.start_short_packet(
            space.recovery.next_packet_number(),
            space.recovery.largest_acked_packet(),
            &cid(SERVER_CID),
            protection,
        ));
        assert!(client.writer.append_ping_frame());
        client.writer.finish_packet(protection, t0).unwrap();
        client_out.datagrams.push(client.writer.datagram().to_vec());
    }

    let t1 = t0 + ms(1);
    server.on_datagram(t1, &mut client_out.datagrams[0]);

    // within max_ack_delay nothing forces a send; the speculative packet
    // is abandoned
    let mut server_out = CapturingSender::default();
    server.on_transmit(t1 + ms(5), &mut server_out);
    assert!(server_out.datagrams.is_empty());

    // once the delay elapses the ACK goes out alone
    server.on_transmit(t1 + ms(26), &mut server_out);
    assert_eq!(server_out.datagrams.len(), 1);
    let packets = parse_datagram(&server_out.datagrams[0], SERVER_CID.len());
    assert!(packets[0]
        .frames
        .iter()
        .all(|frame| matches!(frame, ParsedFrame::Ack { .. } | ParsedFrame::Padding(_))));
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
//= type=test
//# When a PTO timer expires, a sender MUST send at least one ack-
//# eliciting packet in the packet number space as a probe.
#[test]
fn pto_probe_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut sender = CapturingSender::default();

    client.write_crypto(PacketNumberSpace::Initial, b"client hello");
    client.on_transmit(t0, &mut sender);
    assert_eq!(sender.datagrams.len(), 1);

    // no ACK arrives; advance past the PTO deadline
    let deadline = client.next_timer_expiration().expect("PTO is armed");
    let after = deadline + ms(1);
    client.on_timeout(after);
    client.on_transmit(after, &mut sender);

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
    //= type=test
    //# An endpoint MAY send up to two full-sized datagrams containing
    //# ack-eliciting packets
    assert_eq!(sender.datagrams.len(), 3);

    for probe in &sender.datagrams[1..] {
        assert!(probe.len() >= 1200, "probe datagrams are padded");
        let packets = parse_datagram(probe, 0);
        assert!(packets[0].is_ack_eliciting(), "probes elicit an ACK");
        assert!(packets[0].packet_number > 0);
    }
}

#[test]
fn loss_then_retransmit_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut sender = CapturingSender::default();

    // three Initial packets with CRYPTO, sent at 0ms, 98ms and 100ms
    client.write_crypto(PacketNumberSpace::Initial, b"aaaa");
    client.on_transmit(t0, &mut sender);
    client.write_crypto(PacketNumberSpace::Initial, b"bbbb");
    client.on_transmit(t0 + ms(98), &mut sender);
    client.write_crypto(PacketNumberSpace::Initial, b"cccc");
    client.on_transmit(t0 + ms(100), &mut sender);
    assert_eq!(sender.datagrams.len(), 3);

    // the peer acknowledges only pnum 2
    let mut ack_datagram = peer_ack_datagram(0, 2, t0);

    // on arrival, pnum 0 is two packets behind (threshold not hit) but
    // 130ms old against a 33.75ms time threshold: declared lost
    let t_ack = t0 + ms(130);
    client.on_datagram(t_ack, &mut ack_datagram);

    let recovery = &client.spaces().initial().unwrap().recovery;
    assert!(recovery.has_packets_in_flight(), "pnum 1 is still in flight");

    // the lost CRYPTO bytes reappear in a new Initial packet with a
    // larger packet number
    let mut retransmit = CapturingSender::default();
    client.on_transmit(t_ack + ms(1), &mut retransmit);
    assert_eq!(retransmit.datagrams.len(), 1);

    let packets = parse_datagram(&retransmit.datagrams[0], 0);
    assert_eq!(packets[0].packet_number, 3);
    assert_eq!(
        packets[0]
            .frames
            .iter()
            .find(|frame| matches!(frame, ParsedFrame::Crypto { .. })),
        Some(&ParsedFrame::Crypto { offset: 0, len: 4 })
    );
}

#[test]
fn idle_timeout_test() {
    // a server-side connection with max_idle_timeout = 30s and no events
    let t0 = NoopClock.get_time();
    let mut server = server(t0);

    assert_eq!(server.next_timer_expiration(), Some(t0 + Duration::from_secs(30)));

    server.on_timeout(t0 + Duration::from_secs(30));
    assert!(server.is_finished());
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
//= type=test
//# Prior to validating the client address, servers MUST NOT send more
//# than three times as many bytes as the number of bytes they have
//# received.
#[test]
fn amplification_limit_blocks_all_sending_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut server = server(t0);

    let mut client_out = CapturingSender::default();
    client.write_crypto(PacketNumberSpace::Initial, b"client hello");
    client.on_transmit(t0, &mut client_out);

    let t1 = t0 + ms(10);
    server.on_datagram(t1, &mut client_out.datagrams[0]);

    // more server data than 3x the received 1200 bytes allows
    server.write_crypto(PacketNumberSpace::Initial, &[0x42; 5000]);
    let mut server_out = CapturingSender::default();
    server.on_transmit(t1, &mut server_out);

    let sent: usize = server_out.datagrams.iter().map(Vec::len).sum();
    assert!(sent <= 3 * 1200, "sent {sent} of a 3600 byte budget");
    assert!(!server_out.datagrams.is_empty());

    // blocked entirely now: not even ACK-only packets leave, and no
    // timer will change that without more inbound data
    let next = server.on_transmit(t1 + ms(1), &mut server_out);
    assert_eq!(next, None);
    let sent_after: usize = server_out.datagrams.iter().map(Vec::len).sum();
    assert_eq!(sent_after, sent);

    // receiving another datagram reopens the window
    let mut second = CapturingSender::default();
    client.write_crypto(PacketNumberSpace::Initial, b"more");
    client.on_transmit(t1, &mut second);
    server.on_datagram(t1 + ms(2), &mut second.datagrams[0]);

    server.on_transmit(t1 + ms(2), &mut server_out);
    let sent_final: usize = server_out.datagrams.iter().map(Vec::len).sum();
    assert!(sent_final > sent);
}

#[test]
fn protocol_violation_closes_once_then_drains_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut sender = CapturingSender::default();

    client.write_crypto(PacketNumberSpace::Initial, b"x");
    client.on_transmit(t0, &mut sender);
    assert_eq!(sender.datagrams.len(), 1);

    // an ACK for a packet number the client never sent
    let mut bogus_ack = peer_ack_datagram(0, 9, t0);

    let t1 = t0 + ms(5);
    client.on_datagram(t1, &mut bogus_ack.clone());
    assert!(!client.is_active());

    // exactly one CONNECTION_CLOSE is emitted
    client.on_transmit(t1, &mut sender);
    assert_eq!(sender.datagrams.len(), 2);
    let packets = parse_datagram(&sender.datagrams[1], 0);
    assert!(packets[0].frames.iter().any(|frame| matches!(
        frame,
        ParsedFrame::ConnectionClose { code: 0xa }
    )));

    // further sends and further inbound are ignored during the drain
    client.on_transmit(t1 + ms(1), &mut sender);
    client.on_datagram(t1 + ms(1), &mut bogus_ack);
    assert_eq!(sender.datagrams.len(), 2);

    // the drain period ends the connection
    let drain_deadline = client.next_timer_expiration().expect("drain timer armed");
    client.on_timeout(drain_deadline + ms(1));
    assert!(client.is_finished());
}

#[test]
fn client_discards_initial_keys_with_first_handshake_packet_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut sender = CapturingSender::default();

    client.write_crypto(PacketNumberSpace::Initial, b"initial flight");
    client.install_keys(
        PacketNumberSpace::Handshake,
        Some(crypto_testing::null_protection()),
        Some(crypto_testing::null_protection()),
    );
    client.write_crypto(PacketNumberSpace::Handshake, b"finished");

    client.on_transmit(t0, &mut sender);
    assert_eq!(sender.datagrams.len(), 1);

    // the datagram coalesces Initial + Handshake
    let packets = parse_datagram(&sender.datagrams[0], 0);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].space, PacketNumberSpace::Initial);
    assert_eq!(packets[1].space, PacketNumberSpace::Handshake);

    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
    //= type=test
    //# Thus, a client MUST discard Initial keys when it first sends a
    //# Handshake packet
    assert!(client.spaces().initial().is_none());
    assert!(client.spaces().handshake().is_some());
}

#[test]
fn duplicate_packets_are_dropped_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut server = server(t0);

    let mut client_out = CapturingSender::default();
    client.write_crypto(PacketNumberSpace::Initial, b"hello");
    client.on_transmit(t0, &mut client_out);

    let t1 = t0 + ms(1);
    server.on_datagram(t1, &mut client_out.datagrams[0].clone());
    assert!(server.read_crypto(PacketNumberSpace::Initial).is_some());

    // replaying the same datagram yields nothing new
    server.on_datagram(t1 + ms(1), &mut client_out.datagrams[0]);
    assert!(server.read_crypto(PacketNumberSpace::Initial).is_none());
}

#[test]
fn undecryptable_packets_are_dropped_silently_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut server = server(t0);

    // the server's Initial read keys refuse to open anything
    server
        .spaces
        .get_mut(PacketNumberSpace::Initial)
        .unwrap()
        .rx_protection = Some(crypto_testing::failing_protection());

    let mut client_out = CapturingSender::default();
    client.write_crypto(PacketNumberSpace::Initial, b"hello");
    client.on_transmit(t0, &mut client_out);

    server.on_datagram(t0 + ms(1), &mut client_out.datagrams[0]);
    assert!(server.is_active(), "decryption failures never close");
    assert!(server.read_crypto(PacketNumberSpace::Initial).is_none());
}

/// A controller that always reports a full congestion window
#[derive(Clone, Debug, Default)]
struct LimitedController {
    inner: TestController,
}

impl CongestionController for LimitedController {
    fn congestion_window(&self) -> u32 {
        1200
    }

    fn bytes_in_flight(&self) -> u32 {
        self.inner.bytes_in_flight
    }

    fn is_congestion_limited(&self) -> bool {
        true
    }

    fn requires_fast_retransmission(&self) -> bool {
        false
    }

    fn on_packet_sent(&mut self, time_sent: Timestamp, sent_bytes: usize) {
        self.inner.on_packet_sent(time_sent, sent_bytes);
    }

    fn on_rtt_update(&mut self, time_sent: Timestamp, rtt_estimator: &RttEstimator) {
        self.inner.on_rtt_update(time_sent, rtt_estimator);
    }

    fn on_packet_ack(
        &mut self,
        newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        rtt_estimator: &RttEstimator,
        ack_receive_time: Timestamp,
    ) {
        self.inner
            .on_packet_ack(newest_acked_time_sent, bytes_acknowledged, rtt_estimator, ack_receive_time);
    }

    fn on_packets_lost(
        &mut self,
        lost_bytes: u32,
        newest_lost_time_sent: Timestamp,
        timestamp: Timestamp,
    ) {
        self.inner
            .on_packets_lost(lost_bytes, newest_lost_time_sent, timestamp);
    }

    fn on_packet_discarded(&mut self, bytes_sent: usize) {
        self.inner.on_packet_discarded(bytes_sent);
    }

    fn set_underutilized(&mut self, underutilized: bool) {
        self.inner.set_underutilized(underutilized);
    }

    fn is_underutilized(&self) -> bool {
        self.inner.is_underutilized()
    }
}

#[test]
fn congestion_limited_sends_only_acks_test() {
    let t0 = NoopClock.get_time();

    let mut server: Connection<LimitedController> = Connection::new(
        endpoint::Type::Server,
        peer_addr(),
        cid(SERVER_CID),
        cid(CLIENT_CID),
        LimitedController::default(),
        Limits::default(),
        t0,
    );
    server.install_keys(
        PacketNumberSpace::Initial,
        Some(crypto_testing::null_protection()),
        Some(crypto_testing::null_protection()),
    );
    // data that would be sent if congestion allowed
    server.write_crypto(PacketNumberSpace::Initial, &[0x42; 200]);

    let mut client = client(t0);
    let mut client_out = CapturingSender::default();
    client.write_crypto(PacketNumberSpace::Initial, b"hello");
    client.on_transmit(t0, &mut client_out);

    let t1 = t0 + ms(1);
    server.on_datagram(t1, &mut client_out.datagrams[0]);

    let mut server_out = CapturingSender::default();
    server.on_transmit(t1, &mut server_out);

    // the Initial space must acknowledge immediately, but nothing beyond
    // ACK frames may leave under a congestion limit
    assert_eq!(server_out.datagrams.len(), 1);
    let packets = parse_datagram(&server_out.datagrams[0], 0);
    assert!(!packets[0].is_ack_eliciting());
    assert!(packets[0]
        .frames
        .iter()
        .all(|frame| matches!(frame, ParsedFrame::Ack { .. } | ParsedFrame::Padding(_))));
}

/// A controller whose window can be closed by the test and which, like
/// NewReno, demands one fast retransmission after a loss event
#[derive(Clone, Debug, Default)]
struct FastRetransmitController {
    inner: TestController,
    congestion_limited: bool,
    fast_retransmission: bool,
}

impl CongestionController for FastRetransmitController {
    fn congestion_window(&self) -> u32 {
        12_000
    }

    fn bytes_in_flight(&self) -> u32 {
        self.inner.bytes_in_flight
    }

    fn is_congestion_limited(&self) -> bool {
        self.congestion_limited
    }

    fn requires_fast_retransmission(&self) -> bool {
        self.fast_retransmission
    }

    fn on_packet_sent(&mut self, time_sent: Timestamp, sent_bytes: usize) {
        self.inner.on_packet_sent(time_sent, sent_bytes);
        // the single permitted packet has left
        self.fast_retransmission = false;
    }

    fn on_rtt_update(&mut self, time_sent: Timestamp, rtt_estimator: &RttEstimator) {
        self.inner.on_rtt_update(time_sent, rtt_estimator);
    }

    fn on_packet_ack(
        &mut self,
        newest_acked_time_sent: Timestamp,
        bytes_acknowledged: usize,
        rtt_estimator: &RttEstimator,
        ack_receive_time: Timestamp,
    ) {
        self.inner.on_packet_ack(
            newest_acked_time_sent,
            bytes_acknowledged,
            rtt_estimator,
            ack_receive_time,
        );
    }

    fn on_packets_lost(
        &mut self,
        lost_bytes: u32,
        newest_lost_time_sent: Timestamp,
        timestamp: Timestamp,
    ) {
        self.inner
            .on_packets_lost(lost_bytes, newest_lost_time_sent, timestamp);
        self.fast_retransmission = true;
    }

    fn on_packet_discarded(&mut self, bytes_sent: usize) {
        self.inner.on_packet_discarded(bytes_sent);
    }

    fn set_underutilized(&mut self, underutilized: bool) {
        self.inner.set_underutilized(underutilized);
    }

    fn is_underutilized(&self) -> bool {
        self.inner.is_underutilized()
    }
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
//= type=test
//# If the congestion window is reduced immediately, a
//# single packet can be sent prior to reduction.
#[test]
fn fast_retransmission_allows_one_loss_recovery_datagram_test() {
    let t0 = NoopClock.get_time();
    let mut client: Connection<FastRetransmitController> = Connection::new(
        endpoint::Type::Client,
        peer_addr(),
        cid(CLIENT_CID),
        cid(SERVER_CID),
        FastRetransmitController::default(),
        Limits::default(),
        t0,
    );
    client.install_keys(
        PacketNumberSpace::Initial,
        Some(crypto_testing::null_protection()),
        Some(crypto_testing::null_protection()),
    );

    // three Initial packets with CRYPTO while the window is open
    let mut sender = CapturingSender::default();
    client.write_crypto(PacketNumberSpace::Initial, b"aaaa");
    client.on_transmit(t0, &mut sender);
    client.write_crypto(PacketNumberSpace::Initial, b"bbbb");
    client.on_transmit(t0 + ms(98), &mut sender);
    client.write_crypto(PacketNumberSpace::Initial, b"cccc");
    client.on_transmit(t0 + ms(100), &mut sender);
    assert_eq!(sender.datagrams.len(), 3);

    // the window closes before the acknowledgement arrives
    client.path_mut().congestion_controller.congestion_limited = true;

    // acking only pnum 2 declares pnum 0 lost by the time threshold,
    // which demands a fast retransmission
    let t_ack = t0 + ms(130);
    client.on_datagram(t_ack, &mut peer_ack_datagram(0, 2, t_ack));
    assert!(client.path().congestion_controller.fast_retransmission);

    // new data is also waiting, but only the lost bytes may leave
    client.write_crypto(PacketNumberSpace::Initial, b"dddd");

    let mut recovery_out = CapturingSender::default();
    client.on_transmit(t_ack + ms(1), &mut recovery_out);

    // exactly one datagram, carrying the lost CRYPTO bytes and nothing new
    assert_eq!(recovery_out.datagrams.len(), 1);
    let packets = parse_datagram(&recovery_out.datagrams[0], 0);
    let crypto_frames: Vec<_> = packets[0]
        .frames
        .iter()
        .filter(|frame| matches!(frame, ParsedFrame::Crypto { .. }))
        .collect();
    assert_eq!(crypto_frames, [&ParsedFrame::Crypto { offset: 0, len: 4 }]);

    // the send consumed the allowance
    assert!(!client.path().congestion_controller.fast_retransmission);

    // back under the plain congestion limit, the next tick is ACK-only:
    // an ack-eliciting reception forces an ACK out, but neither the new
    // data nor further retransmissions ride along
    let t_ping = t_ack + ms(2);
    let mut ping_datagram = peer_initial_datagram(
        1,
        |writer| {
            assert!(writer.append_ping_frame());
        },
        t_ping,
    );
    client.on_datagram(t_ping, &mut ping_datagram);

    client.on_transmit(t_ping, &mut recovery_out);
    assert_eq!(recovery_out.datagrams.len(), 2);
    let packets = parse_datagram(&recovery_out.datagrams[1], 0);
    assert!(!packets[0].is_ack_eliciting());
    assert!(packets[0]
        .frames
        .iter()
        .all(|frame| matches!(frame, ParsedFrame::Ack { .. } | ParsedFrame::Padding(_))));
}

#[test]
fn exit_drops_everything_test() {
    let t0 = NoopClock.get_time();
    let mut client = client(t0);
    let mut sender = CapturingSender::default();

    client.write_crypto(PacketNumberSpace::Initial, b"hello");
    client.on_transmit(t0, &mut sender);
    assert_eq!(sender.datagrams.len(), 1);

    client.exit();
    assert!(client.is_finished());
    assert_eq!(client.next_timer_expiration(), None);

    // no further datagrams are produced
    client.on_transmit(t0 + ms(1), &mut sender);
    assert_eq!(sender.datagrams.len(), 1);
}
