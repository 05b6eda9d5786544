// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use aero_quic_core::{frame::CryptoRef, transport, varint::VarInt};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};

//= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
//# Implementations MUST support buffering at least 4096 bytes of data
//# received in out-of-order CRYPTO frames.
const RX_MAX_BUFFER_CAPACITY: usize = 4096;

/// Transmission states for a chunk of outgoing crypto data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkState {
    /// Enqueued but not currently transmitted
    Enqueued,
    /// Transmitted and not yet acknowledged
    InFlight,
    /// Acknowledged, waiting for earlier chunks before release
    Acked,
    /// The carrying packet was declared lost; awaiting retransmission
    Lost,
}

#[derive(Clone, Debug)]
struct Chunk {
    offset: VarInt,
    data: Bytes,
    state: ChunkState,
}

impl Chunk {
    fn end(&self) -> u64 {
        self.offset.as_u64() + self.data.len() as u64
    }
}

/// The CRYPTO data of one packet number space, in both directions
///
/// The TLS collaborator writes outgoing handshake bytes and consumes
/// reassembled incoming bytes. Chunks track their own transmission state
/// so that a lost packet's bytes reappear in the next packet built for
/// the space.
#[derive(Debug, Default)]
pub struct CryptoStream {
    /// Outgoing data in offset order
    tx: VecDeque<Chunk>,
    /// The stream offset the next write is enqueued at
    tx_end: u64,

    /// Received data ready for the TLS collaborator
    assembled: Vec<u8>,
    /// The stream offset up to which data was assembled
    rx_end: u64,
    /// Received data waiting for a gap to fill
    pending: BTreeMap<u64, Bytes>,
}

impl CryptoStream {
    /// Enqueues outgoing crypto data after everything written before it
    pub fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let offset = VarInt::new(self.tx_end).expect("crypto offsets stay in varint range");
        self.tx.push_back(Chunk {
            offset,
            data: Bytes::copy_from_slice(data),
            state: ChunkState::Enqueued,
        });
        self.tx_end += data.len() as u64;
    }

    /// Returns `true` if any data is waiting for (re)transmission
    pub fn has_transmission_interest(&self) -> bool {
        self.tx
            .iter()
            .any(|chunk| matches!(chunk.state, ChunkState::Enqueued | ChunkState::Lost))
    }

    /// The next chunk to transmit: lost data first by virtue of offset
    /// order, then new data
    pub fn next_transmission(&self) -> Option<(VarInt, &[u8])> {
        self.tx
            .iter()
            .find(|chunk| matches!(chunk.state, ChunkState::Enqueued | ChunkState::Lost))
            .map(|chunk| (chunk.offset, &chunk.data[..]))
    }

    /// Like [`Self::next_transmission`], restricted to lost data; used
    /// when the congestion controller only permits recovering what was
    /// already on the wire
    pub fn next_retransmission(&self) -> Option<(VarInt, &[u8])> {
        self.tx
            .iter()
            .find(|chunk| chunk.state == ChunkState::Lost)
            .map(|chunk| (chunk.offset, &chunk.data[..]))
    }

    /// Records that `len` bytes at `offset` were written into a packet,
    /// splitting the chunk when the packet could only take a prefix
    pub fn on_data_sent(&mut self, offset: VarInt, len: usize) {
        let index = self
            .tx
            .iter()
            .position(|chunk| chunk.offset == offset)
            .expect("transmissions start at a chunk boundary");

        let chunk = &mut self.tx[index];
        debug_assert!(matches!(
            chunk.state,
            ChunkState::Enqueued | ChunkState::Lost
        ));

        if len < chunk.data.len() {
            let remainder = chunk.data.split_off(len);
            let remainder_state = chunk.state;
            chunk.state = ChunkState::InFlight;
            let remainder_offset =
                VarInt::new(offset.as_u64() + len as u64).expect("offset stays in range");
            self.tx.insert(
                index + 1,
                Chunk {
                    offset: remainder_offset,
                    data: remainder,
                    state: remainder_state,
                },
            );
        } else {
            chunk.state = ChunkState::InFlight;
        }
    }

    /// Called when a packet carrying `[offset, offset + len)` was
    /// acknowledged; fully acknowledged leading data is released
    pub fn on_frame_ack(&mut self, offset: VarInt, len: usize) {
        let start = offset.as_u64();
        let end = start + len as u64;

        for chunk in &mut self.tx {
            if chunk.offset.as_u64() >= start && chunk.end() <= end {
                chunk.state = ChunkState::Acked;
            }
        }

        while let Some(chunk) = self.tx.front() {
            if chunk.state == ChunkState::Acked {
                self.tx.pop_front();
            } else {
                break;
            }
        }
    }

    /// Called when a packet carrying `[offset, offset + len)` was declared
    /// lost; the bytes are re-marked for transmission
    pub fn on_frame_loss(&mut self, offset: VarInt, len: usize) {
        let start = offset.as_u64();
        let end = start + len as u64;

        for chunk in &mut self.tx {
            if chunk.offset.as_u64() >= start
                && chunk.end() <= end
                && chunk.state == ChunkState::InFlight
            {
                chunk.state = ChunkState::Lost;
            }
        }
    }

    /// Buffers an incoming CRYPTO frame and assembles contiguous data
    pub fn on_crypto_frame(&mut self, frame: CryptoRef) -> Result<(), transport::Error> {
        let offset = frame.offset.as_u64();
        let data = frame.data;

        if offset + data.len() as u64 <= self.rx_end {
            // entirely duplicate
            return Ok(());
        }

        // trim the already assembled prefix
        let (offset, data) = if offset < self.rx_end {
            let skip = (self.rx_end - offset) as usize;
            (self.rx_end, &data[skip..])
        } else {
            (offset, data)
        };

        let buffered: usize = self.pending.values().map(Bytes::len).sum();
        if buffered + data.len() > RX_MAX_BUFFER_CAPACITY {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
            //# If an endpoint does not expand its buffer, it MUST close
            //# the connection with a CRYPTO_BUFFER_EXCEEDED error code.
            return Err(transport::Error::CRYPTO_BUFFER_EXCEEDED);
        }

        self.pending
            .entry(offset)
            .or_insert_with(|| Bytes::copy_from_slice(data));

        // drain whatever became contiguous
        while let Some((&offset, _)) = self.pending.first_key_value() {
            if offset > self.rx_end {
                break;
            }
            let (offset, data) = self.pending.pop_first().expect("checked above");
            let skip = (self.rx_end - offset) as usize;
            if skip < data.len() {
                self.assembled.extend_from_slice(&data[skip..]);
                self.rx_end = offset + data.len() as u64;
            }
        }

        Ok(())
    }

    /// Hands all assembled incoming bytes to the caller
    pub fn take_assembled(&mut self) -> Option<Vec<u8>> {
        if self.assembled.is_empty() {
            return None;
        }
        Some(core::mem::take(&mut self.assembled))
    }

    /// The offset up to which incoming data was assembled
    pub fn rx_assembled_offset(&self) -> u64 {
        self.rx_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(offset: u64, data: &[u8]) -> CryptoRef<'_> {
        CryptoRef {
            offset: VarInt::new(offset).unwrap(),
            data,
        }
    }

    #[test]
    fn transmission_state_test() {
        let mut stream = CryptoStream::default();
        assert!(!stream.has_transmission_interest());

        stream.write(b"client hello");
        assert!(stream.has_transmission_interest());

        let (offset, data) = stream.next_transmission().unwrap();
        assert_eq!(offset, VarInt::ZERO);
        assert_eq!(data, b"client hello");

        stream.on_data_sent(offset, data.len());
        assert!(!stream.has_transmission_interest());
    }

    #[test]
    fn partial_send_splits_the_chunk_test() {
        let mut stream = CryptoStream::default();
        stream.write(b"0123456789");

        stream.on_data_sent(VarInt::ZERO, 4);
        let (offset, data) = stream.next_transmission().unwrap();
        assert_eq!(offset, VarInt::from_u8(4));
        assert_eq!(data, b"456789");
    }

    #[test]
    fn ack_releases_data_test() {
        let mut stream = CryptoStream::default();
        stream.write(b"0123456789");
        stream.on_data_sent(VarInt::ZERO, 10);

        stream.on_frame_ack(VarInt::ZERO, 10);
        assert!(!stream.has_transmission_interest());
        assert!(stream.next_transmission().is_none());
        assert!(stream.tx.is_empty());
    }

    #[test]
    fn loss_requeues_data_test() {
        let mut stream = CryptoStream::default();
        stream.write(b"0123456789");
        stream.on_data_sent(VarInt::ZERO, 10);
        assert!(!stream.has_transmission_interest());

        stream.on_frame_loss(VarInt::ZERO, 10);
        assert!(stream.has_transmission_interest());
        let (offset, data) = stream.next_transmission().unwrap();
        assert_eq!(offset, VarInt::ZERO);
        assert_eq!(data, b"0123456789");

        // a stale loss report after the ack changes nothing
        stream.on_data_sent(offset, 10);
        stream.on_frame_ack(VarInt::ZERO, 10);
        stream.on_frame_loss(VarInt::ZERO, 10);
        assert!(!stream.has_transmission_interest());
    }

    #[test]
    fn retransmission_comes_before_new_data_test() {
        let mut stream = CryptoStream::default();
        stream.write(b"aaaa");
        stream.on_data_sent(VarInt::ZERO, 4);
        stream.write(b"bbbb");
        stream.on_frame_loss(VarInt::ZERO, 4);

        let (offset, data) = stream.next_transmission().unwrap();
        assert_eq!(offset, VarInt::ZERO);
        assert_eq!(data, b"aaaa");
    }

    #[test]
    fn reassembly_test() {
        let mut stream = CryptoStream::default();

        // out of order arrival
        stream.on_crypto_frame(frame(5, b"world")).unwrap();
        assert!(stream.take_assembled().is_none());

        stream.on_crypto_frame(frame(0, b"hello")).unwrap();
        assert_eq!(stream.take_assembled().unwrap(), b"helloworld");
        assert_eq!(stream.rx_assembled_offset(), 10);

        // duplicates are ignored
        stream.on_crypto_frame(frame(0, b"hello")).unwrap();
        assert!(stream.take_assembled().is_none());
    }

    #[test]
    fn overlapping_reassembly_test() {
        let mut stream = CryptoStream::default();
        stream.on_crypto_frame(frame(0, b"abcd")).unwrap();
        // overlaps the assembled prefix
        stream.on_crypto_frame(frame(2, b"cdef")).unwrap();
        assert_eq!(stream.take_assembled().unwrap(), b"abcdef");
    }

    #[test]
    fn rx_buffer_limit_test() {
        let mut stream = CryptoStream::default();
        let large = vec![0u8; RX_MAX_BUFFER_CAPACITY];
        // leaves a gap at offset 0 so nothing assembles
        stream.on_crypto_frame(frame(1, &large)).unwrap();
        assert_eq!(
            stream.on_crypto_frame(frame(RX_MAX_BUFFER_CAPACITY as u64 + 1, b"x")),
            Err(transport::Error::CRYPTO_BUFFER_EXCEEDED)
        );
    }
}
