//! Per-connection receive and transmit buffers
//!
//! The receive side grows in fixed steps up to a hard ceiling. When a read
//! would need more room than the ceiling allows, everything buffered is
//! dropped and reading continues into the emptied buffer: memory stays
//! bounded and the connection survives, at the cost of the frames in flight.
//!
//! The transmit side holds at most one outbound frame plus a write cursor.

use std::io::{self, Write};

use crate::codec;
use crate::config::CommsConfig;
use crate::error::{CommsError, Result};

/// What `prepare_read` had to do to make room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRoom {
    /// Free space was already available
    Ready,
    /// Capacity was increased
    Grown { capacity: usize },
    /// The ceiling was hit and buffered bytes were discarded
    Dropped { discarded: usize },
}

/// Growable receive buffer with a fill mark
///
/// Unread data always starts at offset 0.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    filled: usize,
    increment: usize,
    max: usize,
}

impl ReceiveBuffer {
    pub fn new(initial: usize, increment: usize, max: usize) -> Self {
        Self {
            data: vec![0; initial.min(max)],
            filled: 0,
            increment,
            max,
        }
    }

    pub fn from_config(config: &CommsConfig) -> Self {
        Self::new(
            config.rx_initial_size,
            config.rx_growth_increment,
            config.rx_max_size,
        )
    }

    /// Buffered, not yet consumed bytes
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Make sure there is free space to read into
    ///
    /// # Errors
    ///
    /// `NoMemory` if growing the buffer failed; buffered data is kept.
    pub fn prepare_read(&mut self) -> Result<ReadRoom> {
        if self.filled < self.data.len() {
            return Ok(ReadRoom::Ready);
        }

        let target = (self.data.len() + self.increment).min(self.max);
        if target > self.data.len() {
            self.data
                .try_reserve_exact(target - self.data.len())
                .map_err(|_| CommsError::NoMemory {
                    context: format!("growing receive buffer to {target} bytes"),
                })?;
            self.data.resize(target, 0);
            return Ok(ReadRoom::Grown { capacity: target });
        }

        let discarded = self.filled;
        tracing::warn!(
            discarded,
            ceiling = self.max,
            "receive buffer ceiling reached, dropping buffered data"
        );
        self.filled = 0;
        Ok(ReadRoom::Dropped { discarded })
    }

    /// Free space after the fill mark
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Record `n` bytes written into `spare_mut`
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.data.len());
        self.filled = (self.filled + n).min(self.data.len());
    }

    /// Copy bytes in, applying the same growth and drop policy as socket reads
    pub fn append(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            self.prepare_read()?;
            let spare = self.spare_mut();
            let n = spare.len().min(bytes.len());
            spare[..n].copy_from_slice(&bytes[..n]);
            self.commit(n);
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Fill from a reader until it would block, returning bytes read
    ///
    /// `Ok(0)` with nothing read means end of stream.
    pub fn fill_from<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.prepare_read().map_err(|err| io::Error::new(io::ErrorKind::OutOfMemory, err))?;
        loop {
            match reader.read(self.spare_mut()) {
                Ok(n) => {
                    self.commit(n);
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Drop `n` bytes from the front, moving the rest to offset 0
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.filled);
        self.data.copy_within(n..self.filled, 0);
        self.filled -= n;
    }

    /// Take everything buffered (raw mode)
    pub fn take_all(&mut self) -> Option<Vec<u8>> {
        if self.filled == 0 {
            return None;
        }
        let bytes = self.data[..self.filled].to_vec();
        self.filled = 0;
        Some(bytes)
    }

    /// Extract the next valid frame's payload, discarding skipped noise
    pub fn take_frame(&mut self) -> Option<Vec<u8>> {
        match codec::find_frame(self.filled()) {
            Some(found) => {
                let payload = found.payload(self.filled()).to_vec();
                if found.offset > 0 {
                    tracing::trace!(skipped = found.offset, "discarded bytes ahead of frame");
                }
                self.consume(found.consumed());
                Some(payload)
            }
            None => {
                let noise = codec::discardable_prefix(self.filled());
                if noise > 0 {
                    tracing::trace!(noise, "discarded bytes with no frame marker");
                    self.consume(noise);
                }
                None
            }
        }
    }

    /// Next unit of data for the application: a frame, or in raw mode all bytes
    pub fn take_message(&mut self, raw: bool) -> Option<Vec<u8>> {
        if raw {
            self.take_all()
        } else {
            self.take_frame()
        }
    }

    /// Forget buffered bytes, keeping capacity
    pub fn clear(&mut self) {
        self.filled = 0;
    }
}

/// Progress of a transmit drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every byte was written
    Complete,
    /// The writer would block; `remaining` bytes are still queued
    Pending { remaining: usize },
}

/// Single pending outbound frame and its write cursor
#[derive(Debug)]
pub struct TransmitBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl TransmitBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    /// Frame a payload, or copy it verbatim in raw mode
    pub fn for_payload(payload: &[u8], raw: bool) -> Result<Self> {
        let data = if raw {
            let mut data = Vec::new();
            data.try_reserve_exact(payload.len())
                .map_err(|_| CommsError::NoMemory {
                    context: format!("allocating {} byte transmit buffer", payload.len()),
                })?;
            data.extend_from_slice(payload);
            data
        } else {
            codec::encode(payload)?
        };
        Ok(Self::new(data))
    }

    pub fn remaining(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.data.len()
    }

    /// Write as much as the writer accepts
    ///
    /// # Errors
    ///
    /// Any write error other than `WouldBlock`/`Interrupted`; a writer that
    /// accepts zero bytes is reported as `WriteZero`.
    pub fn drain_to<W: Write>(&mut self, writer: &mut W) -> io::Result<Drain> {
        while !self.is_complete() {
            match writer.write(&self.data[self.cursor..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.cursor += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Drain::Pending {
                        remaining: self.data.len() - self.cursor,
                    })
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(Drain::Complete)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writer that accepts at most `chunk` bytes per call and blocks every
    /// other call
    pub(crate) struct TrickleWriter {
        pub written: Vec<u8>,
        pub chunk: usize,
        pub block_next: bool,
    }

    impl TrickleWriter {
        pub fn new(chunk: usize) -> Self {
            Self {
                written: Vec::new(),
                chunk,
                block_next: false,
            }
        }
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.block_next {
                self.block_next = false;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.block_next = true;
            let n = buf.len().min(self.chunk);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_grows_by_increment() {
        let mut rx = ReceiveBuffer::new(4, 4, 16);
        rx.append(&[1, 2, 3, 4]).unwrap();
        assert_eq!(rx.capacity(), 4);

        rx.append(&[5]).unwrap();
        assert_eq!(rx.capacity(), 8);
        assert_eq!(rx.filled(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ceiling_drops_buffered_data() {
        let mut rx = ReceiveBuffer::new(4, 4, 8);
        rx.append(&[0xAB; 8]).unwrap();
        assert_eq!(rx.len(), 8);

        assert_eq!(rx.prepare_read().unwrap(), ReadRoom::Dropped { discarded: 8 });
        assert!(rx.is_empty());
        assert_eq!(rx.capacity(), 8);
    }

    #[test]
    fn test_overfeeding_never_exceeds_ceiling() {
        let mut rx = ReceiveBuffer::new(16, 16, 64);
        rx.append(&[7u8; 1000]).unwrap();
        assert!(rx.capacity() <= 64);
        assert!(rx.len() <= 64);
    }

    #[test]
    fn test_partial_frame_patience() {
        let frame = codec::encode(b"PATIENT").unwrap();
        let mut rx = ReceiveBuffer::new(4, 4, 256);
        let mut delivered = Vec::new();

        for (i, byte) in frame.iter().enumerate() {
            rx.append(&[*byte]).unwrap();
            while let Some(payload) = rx.take_message(false) {
                delivered.push((i, payload));
            }
        }

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, frame.len() - 1);
        assert_eq!(delivered[0].1, b"PATIENT");
        assert!(rx.is_empty());
    }

    #[test]
    fn test_desync_recovery() {
        let mut rx = ReceiveBuffer::new(64, 64, 1024);
        rx.append(b"\x01\x02garbage\x22\x22\x05").unwrap();
        rx.append(&codec::encode(b"valid").unwrap()).unwrap();

        assert_eq!(rx.take_frame().unwrap(), b"valid");
        assert!(rx.take_frame().is_none());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_noise_without_marker_is_discarded() {
        let mut rx = ReceiveBuffer::new(64, 64, 1024);
        rx.append(b"no frames here\x22").unwrap();
        assert!(rx.take_frame().is_none());
        assert_eq!(rx.filled(), b"\x22");
    }

    #[test]
    fn test_compaction_keeps_remainder_at_front() {
        let mut rx = ReceiveBuffer::new(64, 64, 1024);
        let second = codec::encode(b"two").unwrap();
        rx.append(&codec::encode(b"one").unwrap()).unwrap();
        rx.append(&second[..4]).unwrap();

        assert_eq!(rx.take_frame().unwrap(), b"one");
        assert_eq!(rx.filled(), &second[..4]);
    }

    #[test]
    fn test_raw_mode_takes_everything() {
        let mut rx = ReceiveBuffer::new(8, 8, 64);
        rx.append(b"\x22\x22raw bytes").unwrap();
        assert_eq!(rx.take_message(true).unwrap(), b"\x22\x22raw bytes");
        assert!(rx.take_message(true).is_none());
    }

    #[test]
    fn test_fill_from_reader() {
        let mut rx = ReceiveBuffer::new(4, 4, 64);
        let mut source: &[u8] = b"abcdef";
        assert_eq!(rx.fill_from(&mut source).unwrap(), 4);
        assert_eq!(rx.fill_from(&mut source).unwrap(), 2);
        assert_eq!(rx.fill_from(&mut source).unwrap(), 0);
        assert_eq!(rx.filled(), b"abcdef");
    }

    #[test]
    fn test_transmit_partial_writes() {
        let mut tx = TransmitBuffer::for_payload(b"0123456789", false).unwrap();
        let expected = tx.remaining().to_vec();
        let mut writer = TrickleWriter::new(3);

        let mut rounds = 0;
        loop {
            rounds += 1;
            match tx.drain_to(&mut writer).unwrap() {
                Drain::Complete => break,
                Drain::Pending { remaining } => assert_eq!(remaining, tx.remaining().len()),
            }
        }

        assert!(rounds > 1);
        assert_eq!(writer.written, expected);
    }

    #[test]
    fn test_transmit_raw_is_verbatim() {
        let tx = TransmitBuffer::for_payload(b"raw", true).unwrap();
        assert_eq!(tx.remaining(), b"raw");
    }

    #[test]
    fn test_write_zero_is_error() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut tx = TransmitBuffer::new(vec![1, 2, 3]);
        let err = tx.drain_to(&mut Closed).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
