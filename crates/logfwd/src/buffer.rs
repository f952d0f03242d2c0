// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable, growable, disk-backed circular byte buffer.
//!
//! The buffer decouples ingestion from delivery: ingestion appends formatted
//! records, delivery drains them in chunks. The backing file is treated as a
//! ring with independent read and write cursors.
//!
//! # Growth and overflow
//!
//! The file starts at a small floor and doubles whenever a write does not fit,
//! up to the configured ceiling. Once the ceiling is reached and the backlog
//! still does not fit, the oldest unread bytes are evicted to make room: data
//! loss under sustained overload is preferred over blocking the producer.
//!
//! # Persistence
//!
//! Only the bytes live on disk. Cursors and the used length are process
//! memory, so a restart begins with an empty buffer over the existing file.
//!
//! # Blocking I/O
//!
//! Operations use blocking file I/O under a `std` mutex and are called from
//! async tasks. Reads and writes touch at most one chunk or record. Growth
//! over wrapped data copies only the part that wrapped, unless the ceiling
//! leaves no room past the old end of file and the live data is rewritten
//! from offset 0.

use crate::error::BufferError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// Initial file length of a freshly created buffer.
pub const INITIAL_BUFFER_SIZE: u64 = 64 * 1024;

/// Byte store shared by the ingestion and delivery loops.
///
/// Every operation is atomic with respect to the others.
pub trait RecordBuffer: Send + Sync {
    /// Appends `data`, returning the number of bytes written.
    fn write(&self, data: &[u8]) -> Result<usize, BufferError>;

    /// Removes and returns up to `max_bytes` of the oldest data.
    /// `Ok(None)` means the buffer is empty.
    fn read(&self, max_bytes: u64) -> Result<Option<Vec<u8>>, BufferError>;

    fn has_data(&self) -> bool;

    /// Bytes currently held
    fn size(&self) -> u64;
}

struct RingState {
    file: Option<File>,
    read_pos: u64,
    write_pos: u64,
    size: u64,
    capacity: u64,
}

/// File-backed [`RecordBuffer`].
pub struct RingBuffer {
    path: PathBuf,
    max_capacity: u64,
    state: Mutex<RingState>,
}

impl RingBuffer {
    /// Opens or creates the buffer file at `path`.
    ///
    /// Missing parent directories are created. An empty file is grown to
    /// `min(INITIAL_BUFFER_SIZE, max_capacity)`, a file longer than
    /// `max_capacity` is truncated to it.
    pub fn open(path: impl AsRef<Path>, max_capacity: u64) -> Result<Self, BufferError> {
        let path = path.as_ref();
        debug!(
            "BUFFER | Creating buffer with path: {}, max size: {max_capacity} bytes",
            path.display()
        );

        if max_capacity == 0 {
            return Err(BufferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "maximum buffer size must be greater than 0",
            )));
        }

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut capacity = file.metadata()?.len();
        debug!("BUFFER | Initial buffer file size: {capacity} bytes");

        if capacity == 0 {
            capacity = INITIAL_BUFFER_SIZE.min(max_capacity);
            file.set_len(capacity)?;
        } else if capacity > max_capacity {
            capacity = max_capacity;
            file.set_len(capacity)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            max_capacity,
            state: Mutex::new(RingState {
                file: Some(file),
                read_pos: 0,
                write_pos: 0,
                size: 0,
                capacity,
            }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Currently allocated file length
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.lock().capacity
    }

    #[must_use]
    pub fn max_capacity(&self) -> u64 {
        self.max_capacity
    }

    /// Flushes and releases the backing file.
    ///
    /// Closing twice is a no-op. After closing, reads and writes fail with
    /// [`BufferError::Closed`] while `has_data`/`size` keep reporting the
    /// last known occupancy.
    pub fn close(&self) -> Result<(), BufferError> {
        let mut state = self.lock();
        match state.file.take() {
            Some(file) => {
                debug!("BUFFER | Closing buffer file");
                file.sync_all()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordBuffer for RingBuffer {
    fn write(&self, data: &[u8]) -> Result<usize, BufferError> {
        let len = data.len() as u64;
        if len > self.max_capacity {
            return Err(BufferError::TooLarge {
                len,
                max: self.max_capacity,
            });
        }

        let mut state = self.lock();
        if state.file.is_none() {
            return Err(BufferError::Closed);
        }
        if len == 0 {
            return Ok(0);
        }

        let required = state.size + len;
        if required > state.capacity {
            let target = grown_capacity(state.capacity, required, self.max_capacity);
            if target > state.capacity {
                state.grow(target)?;
            }
        }

        // At the ceiling: make room by dropping the oldest bytes
        let mut read_pos = state.read_pos;
        let mut size = state.size;
        if size + len > state.capacity {
            let overflow = size + len - state.capacity;
            warn!("BUFFER | Buffer full, dropping {overflow} bytes of oldest data");
            read_pos = (read_pos + overflow) % state.capacity;
            size -= overflow;
        }

        state.write_wrapping(state.write_pos, data)?;

        state.read_pos = read_pos;
        state.write_pos = (state.write_pos + len) % state.capacity;
        state.size = size + len;

        Ok(data.len())
    }

    fn read(&self, max_bytes: u64) -> Result<Option<Vec<u8>>, BufferError> {
        let mut state = self.lock();
        if state.file.is_none() {
            return Err(BufferError::Closed);
        }
        if state.size == 0 {
            return Ok(None);
        }

        let to_read = state.size.min(max_bytes);
        let data = state.read_wrapping(state.read_pos, to_read)?;

        state.read_pos = (state.read_pos + to_read) % state.capacity;
        state.size -= to_read;

        Ok(Some(data))
    }

    fn has_data(&self) -> bool {
        self.lock().size > 0
    }

    fn size(&self) -> u64 {
        self.lock().size
    }
}

/// Doubles `capacity` until `required` fits or `max` is reached.
fn grown_capacity(capacity: u64, required: u64, max: u64) -> u64 {
    let mut target = capacity.max(1);
    while target < required && target < max {
        target = target.saturating_mul(2).min(max);
    }
    target
}

impl RingState {
    fn file(&self) -> Result<&File, BufferError> {
        self.file.as_ref().ok_or(BufferError::Closed)
    }

    /// Extends the file to `new_capacity`, keeping the unread bytes in ring
    /// order.
    fn grow(&mut self, new_capacity: u64) -> Result<(), BufferError> {
        self.grow_with(new_capacity, write_at)
    }

    /// [`RingState::grow`] with the relocation writes going through `write`.
    ///
    /// Cursors and capacity change only once the relocated bytes are on disk.
    /// On failure they keep describing the old layout; the file may stay
    /// longer than `capacity`.
    fn grow_with<W>(&mut self, new_capacity: u64, mut write: W) -> Result<(), BufferError>
    where
        W: FnMut(&File, u64, &[u8]) -> std::io::Result<()>,
    {
        debug!(
            "BUFFER | Growing buffer from {} to {new_capacity} bytes",
            self.capacity
        );
        let old_capacity = self.capacity;
        let end = self.read_pos + self.size;

        if self.size == 0 || end <= old_capacity {
            self.file()?.set_len(new_capacity)?;
            if self.size == 0 {
                self.read_pos = 0;
            }
            self.write_pos = self.read_pos + self.size;
            self.capacity = new_capacity;
            return Ok(());
        }

        // Data straddles the old end of file
        let live = self.read_wrapping(self.read_pos, self.size)?;
        let tail_len = (old_capacity - self.read_pos) as usize;
        self.file()?.set_len(new_capacity)?;

        if end <= new_capacity {
            // Move the head past the old end; the old layout stays readable
            write(self.file()?, old_capacity, &live[tail_len..])?;
            self.write_pos = end % new_capacity;
        } else {
            // No room past the old end: lay the data out from offset 0
            if let Err(e) = write(self.file()?, 0, &live) {
                let file = self.file()?;
                let restored = write(file, self.read_pos, &live[..tail_len])
                    .and_then(|()| write(file, 0, &live[tail_len..]));
                if let Err(restore) = restored {
                    error!(
                        "BUFFER | Failed to restore buffer after growth error, discarding {} bytes: {}",
                        self.size, restore
                    );
                    self.read_pos = 0;
                    self.write_pos = 0;
                    self.size = 0;
                }
                return Err(e.into());
            }
            self.read_pos = 0;
            self.write_pos = self.size;
        }

        self.capacity = new_capacity;
        Ok(())
    }

    /// Writes `data` at `offset`, splitting it at the end of the file.
    fn write_wrapping(&self, offset: u64, data: &[u8]) -> Result<(), BufferError> {
        let file = self.file()?;
        let len = data.len() as u64;
        if offset + len <= self.capacity {
            write_at(file, offset, data)?;
        } else {
            let (tail, head) = data.split_at((self.capacity - offset) as usize);
            write_at(file, offset, tail)?;
            write_at(file, 0, head)?;
        }
        Ok(())
    }

    /// Reads `len` bytes at `offset`, splitting at the end of the file.
    fn read_wrapping(&self, offset: u64, len: u64) -> Result<Vec<u8>, BufferError> {
        let file = self.file()?;
        let mut data = vec![0u8; len as usize];
        if offset + len <= self.capacity {
            read_at(file, offset, &mut data)?;
        } else {
            let (tail, head) = data.split_at_mut((self.capacity - offset) as usize);
            read_at(file, offset, tail)?;
            read_at(file, 0, head)?;
        }
        Ok(data)
    }
}

fn write_at(mut file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

fn read_at(mut file: &File, offset: u64, data: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn new_buffer(max: u64) -> (tempfile::TempDir, RingBuffer) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = RingBuffer::open(dir.path().join("test-buffer.log"), max).unwrap();
        (dir, buffer)
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_round_trip() {
        let (_dir, buffer) = new_buffer(1024 * 1024);
        let data = b"<13>1 2024-01-01T00:00:00Z host prog - - - hello\n";

        assert_eq!(buffer.write(data).unwrap(), data.len());
        assert!(buffer.has_data());
        assert_eq!(buffer.size(), data.len() as u64);

        let read = buffer.read(data.len() as u64).unwrap().unwrap();
        assert_eq!(read, data);
        assert!(!buffer.has_data());
        assert!(buffer.read(10).unwrap().is_none());
    }

    #[test]
    fn test_partial_reads_preserve_order() {
        let (_dir, buffer) = new_buffer(1024);
        buffer.write(b"abcdef").unwrap();
        buffer.write(b"ghij").unwrap();

        assert_eq!(buffer.read(4).unwrap().unwrap(), b"abcd");
        assert_eq!(buffer.read(4).unwrap().unwrap(), b"efgh");
        assert_eq!(buffer.read(4).unwrap().unwrap(), b"ij");
        assert!(buffer.read(4).unwrap().is_none());
    }

    #[test]
    fn test_initial_capacity_is_capped_by_ceiling() {
        let (_dir, small) = new_buffer(100);
        assert_eq!(small.capacity(), 100);

        let (_dir, large) = new_buffer(10 * 1024 * 1024);
        assert_eq!(large.capacity(), INITIAL_BUFFER_SIZE);
    }

    #[test]
    fn test_wrap_around_evicts_oldest() {
        let (_dir, buffer) = new_buffer(100);
        let first = pattern(60, 0);
        let second = pattern(60, 100);

        buffer.write(&first).unwrap();
        buffer.write(&second).unwrap();
        assert!(buffer.has_data());

        let read = buffer.read(1000).unwrap().unwrap();
        assert!(read.len() <= 100);
        assert_eq!(read.len(), 100);
        // The 20 oldest bytes were dropped
        assert_eq!(&read[..40], &first[20..]);
        assert_eq!(&read[40..], &second[..]);
    }

    #[test]
    fn test_wrap_around_without_loss() {
        let (_dir, buffer) = new_buffer(100);
        buffer.write(&pattern(70, 0)).unwrap();
        buffer.read(50).unwrap();

        // Write cursor is at 70, 50 bytes free across the end of the file
        let wrapping = pattern(50, 7);
        buffer.write(&wrapping).unwrap();

        let read = buffer.read(1000).unwrap().unwrap();
        assert_eq!(read.len(), 70);
        assert_eq!(&read[..20], &pattern(70, 0)[50..]);
        assert_eq!(&read[20..], &wrapping[..]);
    }

    #[test]
    fn test_rejected_write_leaves_state_unchanged() {
        let (_dir, buffer) = new_buffer(100);
        buffer.write(b"valid data").unwrap();
        let size_before = buffer.size();

        let err = buffer.write(&[0u8; 200]).unwrap_err();
        assert!(matches!(err, BufferError::TooLarge { len: 200, max: 100 }));
        assert_eq!(buffer.size(), size_before);
        assert!(buffer.has_data());

        assert_eq!(buffer.read(10).unwrap().unwrap(), b"valid data");
    }

    #[test]
    fn test_write_exactly_max_capacity() {
        let (_dir, buffer) = new_buffer(200);
        let data = pattern(200, 3);
        assert_eq!(buffer.write(&data).unwrap(), 200);
        assert_eq!(buffer.read(500).unwrap().unwrap(), data);
    }

    #[test]
    fn test_growth_doubles_capacity() {
        let (_dir, buffer) = new_buffer(1024 * 1024);
        assert_eq!(buffer.capacity(), INITIAL_BUFFER_SIZE);

        let data = pattern(INITIAL_BUFFER_SIZE as usize + 1, 1);
        buffer.write(&data).unwrap();
        assert_eq!(buffer.capacity(), INITIAL_BUFFER_SIZE * 2);
        assert_eq!(buffer.read(u64::MAX).unwrap().unwrap(), data);
    }

    #[test]
    fn test_growth_is_capped_at_ceiling() {
        let max = INITIAL_BUFFER_SIZE + 1000;
        let (dir, buffer) = new_buffer(max);
        buffer.write(&pattern(INITIAL_BUFFER_SIZE as usize + 10, 0)).unwrap();

        assert_eq!(buffer.capacity(), max);
        let file_len = std::fs::metadata(dir.path().join("test-buffer.log"))
            .unwrap()
            .len();
        assert_eq!(file_len, max);
    }

    #[test]
    fn test_growth_keeps_wrapped_data_in_order() {
        let (_dir, buffer) = new_buffer(1000);
        // Start at 64 bytes so the wrap happens early
        {
            let mut state = buffer.lock();
            state.file.as_ref().unwrap().set_len(64).unwrap();
            state.capacity = 64;
        }

        let first = pattern(50, 0);
        buffer.write(&first).unwrap();
        buffer.read(40).unwrap();
        let second = pattern(40, 90);
        buffer.write(&second).unwrap(); // wraps, 50 bytes live

        let third = pattern(30, 200);
        buffer.write(&third).unwrap(); // needs growth while wrapped
        assert_eq!(buffer.capacity(), 128);

        let read = buffer.read(1000).unwrap().unwrap();
        let mut expected = first[40..].to_vec();
        expected.extend_from_slice(&second);
        expected.extend_from_slice(&third);
        assert_eq!(read, expected);
    }

    /// 64-byte buffer holding 50 bytes that wrap: 40..64 then 0..26
    fn wrapped_buffer(dir: &tempfile::TempDir) -> (RingBuffer, Vec<u8>) {
        let buffer = RingBuffer::open(dir.path().join("wrapped.log"), 1000).unwrap();
        {
            let mut state = buffer.lock();
            state.file.as_ref().unwrap().set_len(64).unwrap();
            state.capacity = 64;
        }
        let first = pattern(50, 0);
        buffer.write(&first).unwrap();
        buffer.read(40).unwrap();
        let second = pattern(40, 90);
        buffer.write(&second).unwrap();

        let mut live = first[40..].to_vec();
        live.extend_from_slice(&second);
        (buffer, live)
    }

    #[test]
    fn test_wrapped_growth_only_moves_head() {
        let dir = tempfile::tempdir().unwrap();
        let (buffer, live) = wrapped_buffer(&dir);

        let mut writes = Vec::new();
        buffer
            .lock()
            .grow_with(128, |file, offset, data| {
                writes.push((offset, data.len()));
                write_at(file, offset, data)
            })
            .unwrap();

        assert_eq!(writes, vec![(64, 26)]);
        assert_eq!(buffer.lock().read_pos, 40);
        assert_eq!(buffer.capacity(), 128);
        assert_eq!(buffer.read(1000).unwrap().unwrap(), live);
    }

    #[test]
    fn test_failed_growth_keeps_old_layout() {
        let dir = tempfile::tempdir().unwrap();
        let (buffer, live) = wrapped_buffer(&dir);

        let result = buffer
            .lock()
            .grow_with(128, |_, _, _| Err(std::io::Error::other("disk full")));
        assert!(matches!(result, Err(BufferError::Io(_))));

        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.size(), 50);
        assert_eq!(buffer.read(1000).unwrap().unwrap(), live);
    }

    #[test]
    fn test_failed_compaction_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let (buffer, live) = wrapped_buffer(&dir);

        // 40 + 50 does not fit in 80, so growth compacts from offset 0. The
        // first write clobbers part of the head before failing.
        let mut calls = 0;
        let result = buffer.lock().grow_with(80, |file, offset, data| {
            calls += 1;
            if calls == 1 {
                write_at(file, offset, &vec![0xFF; data.len() / 2])?;
                return Err(std::io::Error::other("disk full"));
            }
            write_at(file, offset, data)
        });
        assert!(result.is_err());

        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.read(1000).unwrap().unwrap(), live);

        // Later writes still grow the buffer
        buffer.write(&pattern(100, 7)).unwrap();
        assert_eq!(buffer.read(1000).unwrap().unwrap(), pattern(100, 7));
    }

    #[test]
    fn test_unrecoverable_growth_discards_data() {
        let dir = tempfile::tempdir().unwrap();
        let (buffer, _live) = wrapped_buffer(&dir);

        let result = buffer
            .lock()
            .grow_with(80, |_, _, _| Err(std::io::Error::other("disk full")));
        assert!(result.is_err());

        assert_eq!(buffer.capacity(), 64);
        assert!(!buffer.has_data());
        assert_eq!(buffer.read(1000).unwrap(), None);
    }

    #[test]
    fn test_sustained_overflow_plateaus_at_capacity() {
        let (_dir, buffer) = new_buffer(256);
        for i in 0..50u8 {
            buffer.write(&pattern(40, i)).unwrap();
            assert!(buffer.size() <= buffer.capacity());
        }
        assert_eq!(buffer.capacity(), 256);
        assert_eq!(buffer.size(), 256);

        let read = buffer.read(1000).unwrap().unwrap();
        assert_eq!(read.len(), 256);
        // Newest record is intact at the end
        assert_eq!(&read[216..], &pattern(40, 49)[..]);
    }

    #[test]
    fn test_zero_length_operations() {
        let (_dir, buffer) = new_buffer(1024);
        assert_eq!(buffer.write(&[]).unwrap(), 0);
        assert!(!buffer.has_data());

        buffer.write(b"data").unwrap();
        assert_eq!(buffer.read(0).unwrap().unwrap(), Vec::<u8>::new());
        assert_eq!(buffer.size(), 4);
    }

    #[test]
    fn test_close_operations() {
        let (_dir, buffer) = new_buffer(1024);
        buffer.write(b"test data before close").unwrap();

        buffer.close().unwrap();
        assert!(matches!(buffer.write(b"x"), Err(BufferError::Closed)));
        assert!(matches!(buffer.read(10), Err(BufferError::Closed)));
        assert!(buffer.has_data());

        // Double close is a no-op
        assert!(buffer.close().is_ok());
    }

    #[test]
    fn test_reopen_keeps_file_capacity_but_not_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("buffer.log");
        {
            let buffer = RingBuffer::open(&path, 1024 * 1024).unwrap();
            buffer.write(&pattern(INITIAL_BUFFER_SIZE as usize * 2, 0)).unwrap();
            buffer.close().unwrap();
        }

        let buffer = RingBuffer::open(&path, 1024 * 1024).unwrap();
        assert_eq!(buffer.capacity(), INITIAL_BUFFER_SIZE * 2);
        assert!(!buffer.has_data());
    }

    #[test]
    fn test_open_invalid_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // A regular file cannot be used as a parent directory
        let result = RingBuffer::open(blocker.join("buffer.log"), 1024);
        assert!(matches!(result, Err(BufferError::Io(_))));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let (_dir, buffer) = new_buffer(10 * 1024);
        let buffer = Arc::new(buffer);
        let mut handles = Vec::new();

        for w in 0..4u8 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for i in 0..200u8 {
                    buffer.write(&pattern(37, w.wrapping_mul(i))).unwrap();
                }
            }));
        }
        for _ in 0..2 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for _ in 0..300 {
                    if let Some(data) = buffer.read(100).unwrap() {
                        assert!(data.len() <= 100);
                    }
                    assert!(buffer.size() <= buffer.max_capacity());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(buffer.size() <= buffer.capacity());
        assert!(buffer.capacity() <= buffer.max_capacity());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(Vec<u8>),
        Read(u64),
    }

    fn op_strategy(max: usize) -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..=max).prop_map(Op::Write),
            (0..(max as u64 * 2)).prop_map(Op::Read),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn behaves_like_a_lossy_queue(ops in prop::collection::vec(op_strategy(300), 1..60)) {
            let max = 300u64;
            let (_dir, buffer) = new_buffer(max);
            let mut model: VecDeque<u8> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Write(data) => {
                        buffer.write(&data).unwrap();
                        let overflow = (model.len() + data.len()).saturating_sub(max as usize);
                        model.drain(..overflow);
                        model.extend(data);
                    }
                    Op::Read(n) => {
                        let got = buffer.read(n).unwrap().unwrap_or_default();
                        let take = (n as usize).min(model.len());
                        let expected: Vec<u8> = model.drain(..take).collect();
                        prop_assert_eq!(got, expected);
                    }
                }
                prop_assert_eq!(buffer.size(), model.len() as u64);
                prop_assert!(buffer.capacity() <= max);
            }
        }
    }
}
