//! Unix socket transport for the bus.
//!
//! The leader runs a hub: it accepts followers, fans its own publishes out
//! to all of them and relays anything a follower publishes to the others.
//! Followers run a client that keeps reconnecting to the hub. Frames are
//! MessagePack inside `LengthDelimitedCodec`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use uuid::Uuid;

use super::message::BusMessage;
use super::{BroadcastBus, BusError, LOCAL_CAPACITY};

/// Followers retry the hub this often.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// How long a resigning hub waits for its last frames to flush.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

type Peers = Arc<Mutex<HashMap<Uuid, Peer>>>;

struct Peer {
    tx: mpsc::UnboundedSender<Bytes>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

struct Hub {
    peers: Peers,
    accept: JoinHandle<()>,
}

struct Client {
    outbound: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

enum Link {
    /// No transport; publishes only reach this process.
    Detached,
    Hub(Hub),
    Client(Client),
    Closed,
}

/// Bus endpoint of one helper, either hub or client.
pub struct SocketBus {
    path: PathBuf,
    local: broadcast::Sender<BusMessage>,
    link: Mutex<Link>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deliver(local: &broadcast::Sender<BusMessage>, frame: &[u8]) -> bool {
    match BusMessage::decode(frame) {
        Ok(message) => {
            tracing::trace!(kind = message.kind(), "bus message received");
            // No subscribers is fine: nobody to tell.
            let _ = local.send(message);
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, len = frame.len(), "dropping undecodable bus frame");
            false
        }
    }
}

impl SocketBus {
    fn with_link(path: &Path, link: Link) -> Self {
        let (local, _) = broadcast::channel(LOCAL_CAPACITY);
        Self {
            path: path.to_path_buf(),
            local,
            link: Mutex::new(link),
        }
    }

    /// Bus that only delivers within this process. Used when the socket
    /// cannot be bound; publishes still reach our own subscriber.
    pub fn detached(path: &Path) -> Self {
        Self::with_link(path, Link::Detached)
    }

    /// Listen on `path` as the hub. Must be called from a tokio runtime.
    pub fn hub(path: &Path) -> Result<Self, BusError> {
        let bus = Self::with_link(path, Link::Detached);
        bus.promote()?;
        Ok(bus)
    }

    /// Follower endpoint; connects in the background and keeps retrying.
    pub fn client(path: &Path) -> Self {
        let bus = Self::with_link(path, Link::Detached);
        let client = Client::spawn(bus.path.clone(), bus.local.clone());
        *lock(&bus.link) = Link::Client(client);
        bus
    }

    /// Become the hub. A no-op if already one.
    ///
    /// On bind failure the bus drops to detached mode and the error is
    /// returned; the caller keeps running with local-only delivery.
    pub fn promote(&self) -> Result<(), BusError> {
        let mut link = lock(&self.link);
        match &*link {
            Link::Hub(_) | Link::Closed => return Ok(()),
            Link::Client(client) => client.task.abort(),
            Link::Detached => {}
        }

        match Hub::bind(&self.path, self.local.clone()) {
            Ok(hub) => {
                tracing::info!(socket = %self.path.display(), "bus hub listening");
                *link = Link::Hub(hub);
                Ok(())
            }
            Err(e) => {
                *link = Link::Detached;
                Err(e)
            }
        }
    }

    pub fn is_hub(&self) -> bool {
        matches!(*lock(&self.link), Link::Hub(_))
    }

    /// Connected followers; zero unless this is the hub.
    pub fn peer_count(&self) -> usize {
        match &*lock(&self.link) {
            Link::Hub(hub) => lock(&hub.peers).len(),
            _ => 0,
        }
    }

    /// Stop the transport. A hub removes its socket first, then tells
    /// every follower `leaderResigned` and gives the frames a moment to
    /// flush.
    pub async fn shutdown(&self) {
        let link = std::mem::replace(&mut *lock(&self.link), Link::Closed);

        match link {
            Link::Hub(hub) => {
                hub.accept.abort();
                if let Err(e) = std::fs::remove_file(&self.path)
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(socket = %self.path.display(), error = %e, "failed to remove bus socket");
                }

                let peers: Vec<Peer> = lock(&hub.peers).drain().map(|(_, peer)| peer).collect();
                let message = BusMessage::LeaderResigned {};
                let resigned = match message.encode() {
                    Ok(bytes) => Some(Bytes::from(bytes)),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode leaderResigned");
                        None
                    }
                };

                let mut writers = Vec::with_capacity(peers.len());
                for peer in peers {
                    if let Some(frame) = &resigned {
                        let _ = peer.tx.send(frame.clone());
                    }
                    peer.reader.abort();
                    // Dropping tx lets the writer finish once drained.
                    writers.push(peer.writer);
                }

                let count = writers.len();
                if tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(writers))
                    .await
                    .is_err()
                {
                    tracing::debug!(peers = count, "bus drain timed out");
                }
                tracing::info!(peers = count, "bus hub resigned");
            }
            Link::Client(client) => client.task.abort(),
            Link::Detached | Link::Closed => {}
        }
    }

    /// Connect, send one message, disconnect. For short-lived commands
    /// that need to reach running helpers.
    pub async fn send_once(path: &Path, message: &BusMessage) -> Result<(), BusError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| BusError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        let mut framed = FramedWrite::new(stream, LengthDelimitedCodec::new());
        framed.send(Bytes::from(message.encode()?)).await?;
        SinkExt::<Bytes>::close(&mut framed).await?;
        Ok(())
    }
}

impl BroadcastBus for SocketBus {
    fn publish(&self, message: BusMessage) {
        let frame = match message.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::error!(kind = message.kind(), error = %e, "failed to encode bus message");
                return;
            }
        };

        match &*lock(&self.link) {
            Link::Hub(hub) => relay(&hub.peers, None, &frame),
            Link::Client(client) => {
                let _ = client.outbound.send(frame);
            }
            Link::Detached | Link::Closed => {}
        }

        tracing::debug!(kind = message.kind(), target = ?message.target(), "published");
        let _ = self.local.send(message);
    }

    fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.local.subscribe()
    }
}

impl Drop for SocketBus {
    fn drop(&mut self) {
        match &*lock(&self.link) {
            Link::Hub(hub) => {
                hub.accept.abort();
                for peer in lock(&hub.peers).values() {
                    peer.reader.abort();
                    peer.writer.abort();
                }
            }
            Link::Client(client) => client.task.abort(),
            Link::Detached | Link::Closed => {}
        }
    }
}

/// Queue `frame` for every peer except `from`.
fn relay(peers: &Peers, from: Option<Uuid>, frame: &Bytes) {
    for (id, peer) in lock(peers).iter() {
        if Some(*id) == from {
            continue;
        }
        if peer.tx.send(frame.clone()).is_err() {
            tracing::debug!(peer = %id, "peer writer gone");
        }
    }
}

impl Hub {
    fn bind(path: &Path, local: broadcast::Sender<BusMessage>) -> Result<Self, BusError> {
        use std::os::unix::fs::PermissionsExt;

        // Left behind by a leader that died without cleaning up.
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(socket = %path.display(), "removed stale bus socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(socket = %path.display(), error = %e, "cannot remove stale bus socket"),
        }

        let listener = UnixListener::bind(path).map_err(|source| BusError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));

        let peers: Peers = Arc::new(Mutex::new(HashMap::new()));
        let accept = tokio::spawn(accept_loop(listener, peers.clone(), local));
        Ok(Self { peers, accept })
    }
}

async fn accept_loop(listener: UnixListener, peers: Peers, local: broadcast::Sender<BusMessage>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => add_peer(stream, &peers, &local),
            Err(e) => {
                tracing::warn!(error = %e, "bus accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn add_peer(stream: UnixStream, peers: &Peers, local: &broadcast::Sender<BusMessage>) {
    let id = Uuid::new_v4();
    let (read, write) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let writer = tokio::spawn(async move {
        let mut framed = FramedWrite::new(write, LengthDelimitedCodec::new());
        while let Some(frame) = rx.recv().await {
            if let Err(e) = framed.send(frame).await {
                tracing::debug!(peer = %id, error = %e, "bus write failed");
                break;
            }
        }
    });

    // Insert under the lock the reader needs for removal, so a peer that
    // disconnects immediately is still cleaned up.
    let mut guard = lock(peers);
    let reader = tokio::spawn(peer_reader(id, read, peers.clone(), local.clone()));
    guard.insert(id, Peer { tx, writer, reader });
    tracing::debug!(peer = %id, peers = guard.len(), "bus peer connected");
}

async fn peer_reader(
    id: Uuid,
    read: OwnedReadHalf,
    peers: Peers,
    local: broadcast::Sender<BusMessage>,
) {
    let mut framed = FramedRead::new(read, LengthDelimitedCodec::new());

    while let Some(frame) = framed.next().await {
        match frame {
            Ok(frame) => {
                let frame = frame.freeze();
                if deliver(&local, &frame) {
                    relay(&peers, Some(id), &frame);
                }
            }
            Err(e) => {
                tracing::debug!(peer = %id, error = %e, "bus read failed");
                break;
            }
        }
    }

    lock(&peers).remove(&id);
    tracing::debug!(peer = %id, "bus peer disconnected");
}

impl Client {
    fn spawn(path: PathBuf, local: broadcast::Sender<BusMessage>) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(client_loop(path, rx, local));
        Self { outbound, task }
    }
}

async fn client_loop(
    path: PathBuf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    local: broadcast::Sender<BusMessage>,
) {
    loop {
        match UnixStream::connect(&path).await {
            Ok(stream) => {
                tracing::info!(socket = %path.display(), "connected to bus hub");
                let (read, write) = stream.into_split();
                let mut reader = FramedRead::new(read, LengthDelimitedCodec::new());
                let mut writer = FramedWrite::new(write, LengthDelimitedCodec::new());

                loop {
                    tokio::select! {
                        frame = reader.next() => match frame {
                            Some(Ok(frame)) => {
                                deliver(&local, &frame);
                            }
                            Some(Err(e)) => {
                                tracing::debug!(error = %e, "bus read failed");
                                break;
                            }
                            None => break,
                        },
                        out = outbound.recv() => match out {
                            Some(frame) => {
                                if let Err(e) = writer.send(frame).await {
                                    tracing::debug!(error = %e, "bus write failed");
                                    break;
                                }
                            }
                            None => return,
                        },
                    }
                }
                tracing::info!("bus hub connection closed");
            }
            Err(e) => {
                tracing::trace!(socket = %path.display(), error = %e, "bus hub not reachable");
                // Nobody to relay to; stale publishes are not replayed.
                loop {
                    match outbound.try_recv() {
                        Ok(_) => continue,
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => return,
                    }
                }
            }
        }

        tokio::time::sleep(RECONNECT_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::identity::ProfileIdentity;

    async fn wait_for_peers(hub: &SocketBus, n: usize) {
        for _ in 0..200 {
            if hub.peer_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} peers, have {}", hub.peer_count());
    }

    async fn recv(rx: &mut broadcast::Receiver<BusMessage>) -> BusMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for bus message")
            .unwrap()
    }

    fn release(bundle: &str, pid: u32) -> BusMessage {
        BusMessage::CtrlRelease {
            target_browser: ProfileIdentity::new(bundle, pid),
        }
    }

    #[tokio::test]
    async fn hub_publish_reaches_followers_and_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");

        let hub = SocketBus::hub(&path).unwrap();
        let a = SocketBus::client(&path);
        let b = SocketBus::client(&path);
        let mut own_rx = hub.subscribe();
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();
        wait_for_peers(&hub, 2).await;

        let msg = release("com.google.Chrome", 10);
        hub.publish(msg.clone());

        assert_eq!(recv(&mut own_rx).await, msg);
        assert_eq!(recv(&mut a_rx).await, msg);
        assert_eq!(recv(&mut b_rx).await, msg);
    }

    #[tokio::test]
    async fn follower_publish_is_relayed_to_other_followers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");

        let hub = SocketBus::hub(&path).unwrap();
        let a = SocketBus::client(&path);
        let b = SocketBus::client(&path);
        let mut hub_rx = hub.subscribe();
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();
        wait_for_peers(&hub, 2).await;

        a.publish(BusMessage::ShortcutsChanged {});

        assert_eq!(recv(&mut a_rx).await, BusMessage::ShortcutsChanged {});
        assert_eq!(recv(&mut hub_rx).await, BusMessage::ShortcutsChanged {});
        assert_eq!(recv(&mut b_rx).await, BusMessage::ShortcutsChanged {});

        // Not echoed back to the sender a second time.
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_from_one_sender_keep_their_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");

        let hub = SocketBus::hub(&path).unwrap();
        let a = SocketBus::client(&path);
        let mut a_rx = a.subscribe();
        wait_for_peers(&hub, 1).await;

        for pid in 0..20 {
            hub.publish(release("com.google.Chrome", pid));
        }
        for pid in 0..20 {
            assert_eq!(recv(&mut a_rx).await, release("com.google.Chrome", pid));
        }
    }

    #[tokio::test]
    async fn shutdown_removes_socket_and_announces_resignation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");

        let hub = SocketBus::hub(&path).unwrap();
        let a = SocketBus::client(&path);
        let mut a_rx = a.subscribe();
        wait_for_peers(&hub, 1).await;

        hub.shutdown().await;

        assert!(!path.exists());
        assert_eq!(recv(&mut a_rx).await, BusMessage::LeaderResigned {});
        assert!(!hub.is_hub());
    }

    #[tokio::test]
    async fn follower_promotes_to_hub() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");

        let old = SocketBus::hub(&path).unwrap();
        let successor = SocketBus::client(&path);
        wait_for_peers(&old, 1).await;
        old.shutdown().await;

        successor.promote().unwrap();
        assert!(successor.is_hub());

        let late = SocketBus::client(&path);
        let mut late_rx = late.subscribe();
        wait_for_peers(&successor, 1).await;

        successor.publish(BusMessage::ShortcutsChanged {});
        assert_eq!(recv(&mut late_rx).await, BusMessage::ShortcutsChanged {});
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        std::fs::write(&path, b"stale").unwrap();

        let hub = SocketBus::hub(&path).unwrap();
        assert!(hub.is_hub());
    }

    #[tokio::test]
    async fn detached_bus_delivers_locally() {
        let dir = tempfile::tempdir().unwrap();
        let bus = SocketBus::detached(&dir.path().join("none.sock"));
        let mut rx = bus.subscribe();

        bus.publish(BusMessage::LeaderResigned {});
        assert_eq!(recv(&mut rx).await, BusMessage::LeaderResigned {});
    }

    #[tokio::test]
    async fn send_once_reaches_hub_and_followers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");

        let hub = SocketBus::hub(&path).unwrap();
        let a = SocketBus::client(&path);
        let mut hub_rx = hub.subscribe();
        let mut a_rx = a.subscribe();
        wait_for_peers(&hub, 1).await;

        SocketBus::send_once(&path, &BusMessage::ShortcutsChanged {})
            .await
            .unwrap();

        assert_eq!(recv(&mut hub_rx).await, BusMessage::ShortcutsChanged {});
        assert_eq!(recv(&mut a_rx).await, BusMessage::ShortcutsChanged {});
    }

    #[tokio::test]
    async fn send_once_without_hub_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SocketBus::send_once(&dir.path().join("none.sock"), &BusMessage::ShortcutsChanged {})
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Connect { .. }));
    }
}
