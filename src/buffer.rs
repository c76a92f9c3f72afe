// Copyright 2026 The vncmirror Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Buffered, queued writes to the client socket.
//!
//! All server-to-client traffic funnels through an [`OutputBuffer`]: a
//! bounded queue in front of a single writer task. The writer copies each
//! dispatched message into a large write buffer and flushes on a short
//! tick, so many small messages coalesce into few syscalls while a
//! message's bytes always stay contiguous on the wire.
//!
//! Producers never block. Control messages are dropped outright when the
//! queue is full; framebuffer updates are latest-wins, a newly dispatched
//! frame replacing the queued one, so at most one frame waits behind
//! whatever the writer currently has in hand and a slow client always
//! converges on the newest screen.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Notify;

/// Maximum number of queued messages.
const WRITE_QUEUE_DEPTH: usize = 100;

/// Capacity of the writer task's in-memory write buffer.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// How often the writer flushes accumulated bytes to the socket.
const FLUSH_INTERVAL: Duration = Duration::from_millis(5);

/// A queued message. Frames are subject to latest-wins replacement,
/// control messages are not.
enum Message {
    Control(Bytes),
    Frame(Bytes),
}

impl Message {
    fn into_bytes(self) -> Bytes {
        match self {
            Message::Control(bytes) | Message::Frame(bytes) => bytes,
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn push_control(&self, msg: Bytes) -> bool {
        let mut queue = match self.queue.lock() {
            Ok(q) => q,
            Err(_) => return false,
        };
        if queue.len() >= WRITE_QUEUE_DEPTH {
            return false;
        }
        queue.push_back(Message::Control(msg));
        true
    }

    /// Latest-wins enqueue: an already-queued frame is replaced in place;
    /// otherwise, on a full queue, the oldest entry is evicted and the push
    /// retried once.
    fn push_frame(&self, msg: Bytes) -> bool {
        let mut queue = match self.queue.lock() {
            Ok(q) => q,
            Err(_) => return false,
        };
        if let Some(slot) = queue
            .iter_mut()
            .find(|entry| matches!(entry, Message::Frame(_)))
        {
            *slot = Message::Frame(msg);
            return true;
        }
        if queue.len() >= WRITE_QUEUE_DEPTH {
            queue.pop_front();
        }
        if queue.len() >= WRITE_QUEUE_DEPTH {
            return false;
        }
        queue.push_back(Message::Frame(msg));
        true
    }

    fn pop(&self) -> Option<Bytes> {
        self.queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .map(Message::into_bytes)
    }

    fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

/// Write side of a client connection: bounded queue plus writer task.
///
/// Cloning is cheap; all clones share the queue and the closed flag.
#[derive(Clone)]
pub struct OutputBuffer {
    shared: Arc<Shared>,
}

impl OutputBuffer {
    /// Creates the buffer and spawns its writer task over `sink`.
    ///
    /// The task exits after a write error or once [`close`](Self::close) is
    /// called and the queue has drained; either way it flushes what it can
    /// and marks the buffer closed so producers drop immediately.
    pub fn new<W>(sink: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(WRITE_QUEUE_DEPTH)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(run_writer(shared.clone(), sink));

        Self { shared }
    }

    /// Best-effort enqueue for small control messages.
    ///
    /// Silently dropped when the buffer is closed or the queue is full.
    pub fn dispatch(&self, msg: Bytes) {
        if self.is_closed() {
            return;
        }
        if !self.shared.push_control(msg) {
            log::debug!("write queue full, dropping control message");
            return;
        }
        self.shared.notify.notify_one();
    }

    /// Latest-wins enqueue for framebuffer updates.
    ///
    /// A queued frame is superseded in place, so at most one frame ever
    /// waits behind the message currently being written.
    pub fn dispatch_latest(&self, msg: Bytes) {
        if self.is_closed() {
            return;
        }
        if !self.shared.push_frame(msg) {
            log::debug!("write queue full, dropping frame");
            return;
        }
        self.shared.notify.notify_one();
    }

    /// Approximate queue depth, used by the keepalive pacing check.
    pub fn pending(&self) -> usize {
        self.shared.len()
    }

    /// Whether the buffer has been closed (explicitly or by a write error).
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Closes the buffer. Idempotent; subsequent dispatches are dropped.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

async fn run_writer<W>(shared: Arc<Shared>, sink: W)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut sink = BufWriter::with_capacity(WRITE_BUFFER_SIZE, sink);
    let mut flush_tick = tokio::time::interval(FLUSH_INTERVAL);
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.notify.notified() => {
                while let Some(msg) = shared.pop() {
                    if let Err(err) = sink.write_all(&msg).await {
                        log::debug!("client write failed: {err}");
                        shared.closed.store(true, Ordering::Release);
                        return;
                    }
                }
                if shared.closed.load(Ordering::Acquire) {
                    let _ = sink.flush().await;
                    return;
                }
            }
            _ = flush_tick.tick() => {
                if let Err(err) = sink.flush().await {
                    log::debug!("client flush failed: {err}");
                    shared.closed.store(true, Ordering::Release);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn shared() -> Shared {
        Shared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[test]
    fn control_drops_on_full() {
        let s = shared();
        for i in 0..WRITE_QUEUE_DEPTH {
            assert!(s.push_control(Bytes::from(vec![i as u8])));
        }
        assert!(!s.push_control(Bytes::from_static(b"extra")));
        assert_eq!(s.len(), WRITE_QUEUE_DEPTH);
        // Oldest entry untouched.
        assert_eq!(s.pop().unwrap(), Bytes::from(vec![0u8]));
    }

    #[test]
    fn frames_supersede_queued_frames() {
        let s = shared();
        assert!(s.push_control(Bytes::from_static(b"ctrl")));
        for i in 1..=5u8 {
            assert!(s.push_frame(Bytes::from(vec![i])));
        }

        // Only the control message and the newest frame remain.
        assert_eq!(s.len(), 2);
        assert_eq!(s.pop().unwrap(), Bytes::from_static(b"ctrl"));
        assert_eq!(s.pop().unwrap(), Bytes::from(vec![5u8]));
        assert!(s.pop().is_none());
    }

    #[test]
    fn frame_evicts_oldest_when_full_of_control() {
        let s = shared();
        for i in 0..WRITE_QUEUE_DEPTH {
            assert!(s.push_control(Bytes::from(vec![i as u8])));
        }
        assert!(s.push_frame(Bytes::from_static(b"frame")));
        assert_eq!(s.len(), WRITE_QUEUE_DEPTH);
        // Head advanced past the evicted entry.
        assert_eq!(s.pop().unwrap(), Bytes::from(vec![1u8]));
    }

    #[tokio::test]
    async fn writer_delivers_messages_in_order() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let out = OutputBuffer::new(server);

        out.dispatch(Bytes::from_static(b"hello "));
        out.dispatch(Bytes::from_static(b"world"));

        let mut reader = client;
        let mut buf = [0u8; 11];
        tokio::time::timeout(Duration::from_secs(1), reader.read_exact(&mut buf))
            .await
            .expect("writer stalled")
            .unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn close_flushes_and_drops_later_dispatches() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let out = OutputBuffer::new(server);

        out.dispatch(Bytes::from_static(b"bye"));
        out.close();
        out.close(); // idempotent
        out.dispatch(Bytes::from_static(b"after"));
        assert!(out.is_closed());

        let mut reader = client;
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), reader.read_to_end(&mut buf))
            .await
            .expect("writer stalled")
            .unwrap();
        assert_eq!(&buf, b"bye");
    }
}
