use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use chanchat::bus::{Bus, BusError, BusResult, MemoryBus};
use chanchat::config::SessionConfig;
use chanchat::protocol;
use chanchat::registry::{MemoryRegistry, Registry, RegistryError, RegistryResult};
use chanchat::server;
use chanchat::state::AppState;
use chanchat::types::{Reservation, UserId, CHAT_TOPIC};

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(state: AppState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state);
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(server::run(
            listener,
            state.clone(),
            Duration::from_secs(1),
            async move {
                let _ = stopped.await;
            },
        ));

        Self {
            addr,
            state,
            stop: Some(stop),
            task,
        }
    }

    async fn in_memory() -> Self {
        Self::start(AppState::in_memory(SessionConfig::default())).await
    }

    async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Poll until `name` is gone from the registry
    async fn wait_released(&self, name: &str) {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.names().await.iter().any(|n| n == name) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} was never released", name));
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap();
    }
}

struct Client {
    id: String,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let id = stream.local_addr().unwrap().to_string();
        let (read, writer) = stream.into_split();
        let mut client = Self {
            id,
            lines: BufReader::new(read).lines(),
            writer,
        };
        assert_eq!(client.recv().await.as_deref(), Some(protocol::NAME_PROMPT));
        client
    }

    /// Connect and negotiate `name`, asserting the welcome line
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(name).await;
        let welcome = client.recv().await.expect("welcome line");
        assert_eq!(welcome, format!("Welcome, {}!-{}", name, client.id));
        assert_eq!(protocol::parse_welcome(&welcome), Some(client.id.as_str()));
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .ok()
            .flatten()
    }

    /// Next line a real client would render, skipping its own echo
    async fn recv_rendered(&mut self) -> Option<String> {
        loop {
            let line = self.recv().await?;
            if !protocol::is_own_echo(&line, &self.id) {
                return Some(line);
            }
        }
    }
}

#[tokio::test]
async fn test_welcome_registers_name() {
    let server = TestServer::in_memory().await;

    let _alice = Client::join(server.addr, "alice").await;
    assert_eq!(server.names().await, vec!["alice"]);

    server.stop().await;
}

#[tokio::test]
async fn test_taken_name_is_reprompted() {
    let server = TestServer::in_memory().await;
    let _alice = Client::join(server.addr, "alice").await;

    let mut second = Client::connect(server.addr).await;
    second.send("alice").await;
    assert_eq!(second.recv().await.as_deref(), Some(protocol::NAME_TAKEN));
    assert_eq!(second.recv().await.as_deref(), Some(protocol::NAME_PROMPT));
    assert_eq!(server.names().await, vec!["alice"]);

    // Still negotiating, a free name works
    second.send("alicia").await;
    let welcome = second.recv().await.unwrap();
    assert!(welcome.starts_with("Welcome, alicia!-"));

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_negotiation_admits_one_owner() {
    let server = TestServer::in_memory().await;

    let attempts: Vec<_> = (0..10)
        .map(|_| {
            let addr = server.addr;
            tokio::spawn(async move {
                let mut client = Client::connect(addr).await;
                client.send("carol").await;
                let reply = client.recv().await.unwrap();
                (reply.starts_with("Welcome, carol!-"), client)
            })
        })
        .collect();

    let mut clients = Vec::new();
    let mut welcomed = 0;
    for attempt in attempts {
        let (won, client) = attempt.await.unwrap();
        if won {
            welcomed += 1;
        }
        clients.push(client);
    }

    assert_eq!(welcomed, 1);
    assert_eq!(server.names().await, vec!["carol"]);

    drop(clients);
    server.stop().await;
}

#[tokio::test]
async fn test_chat_is_relayed_with_sender_prefix() {
    let server = TestServer::in_memory().await;
    let mut alice = Client::join(server.addr, "alice").await;
    let mut bob = Client::join(server.addr, "bob").await;

    alice.send("hello").await;
    assert_eq!(
        bob.recv().await,
        Some(format!("{}-alice: hello", alice.id))
    );

    // The server echoes to the sender; the client contract drops it
    let echo = alice.recv().await.unwrap();
    assert!(protocol::is_own_echo(&echo, &alice.id));

    bob.send("hi alice").await;
    assert_eq!(
        alice.recv_rendered().await,
        Some(format!("{}-bob: hi alice", bob.id))
    );

    server.stop().await;
}

#[tokio::test]
async fn test_messages_from_one_sender_arrive_in_order() {
    let server = TestServer::in_memory().await;
    let mut alice = Client::join(server.addr, "alice").await;
    let mut bob = Client::join(server.addr, "bob").await;
    let mut carol = Client::join(server.addr, "carol").await;

    for i in 0..20 {
        alice.send(&format!("message {}", i)).await;
    }

    for receiver in [&mut bob, &mut carol] {
        for i in 0..20 {
            assert_eq!(
                receiver.recv().await,
                Some(format!("{}-alice: message {}", alice.id, i))
            );
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn test_online_lists_everyone() {
    let server = TestServer::in_memory().await;
    let mut alice = Client::join(server.addr, "alice").await;
    let _bob = Client::join(server.addr, "bob").await;

    alice.send("/online").await;
    let reply = alice.recv().await.unwrap();
    let names: HashSet<&str> = reply
        .strip_prefix("Online users: ")
        .expect("online users reply")
        .split_whitespace()
        .collect();
    assert_eq!(names, HashSet::from(["alice", "bob"]));

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_command_keeps_session_active() {
    let server = TestServer::in_memory().await;
    let mut alice = Client::join(server.addr, "alice").await;

    alice.send("/dance").await;
    assert_eq!(alice.recv().await.as_deref(), Some(protocol::UNKNOWN_COMMAND));

    alice.send("/online").await;
    assert_eq!(alice.recv().await.as_deref(), Some("Online users: alice"));

    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_releases_name() {
    let server = TestServer::in_memory().await;
    let alice = Client::join(server.addr, "alice").await;
    drop(alice);

    server.wait_released("alice").await;
    assert!(server.state.connections.is_empty().await);

    let _again = Client::join(server.addr, "alice").await;
    server.stop().await;
}

#[tokio::test]
async fn test_exit_closes_connection_and_releases_name() {
    let server = TestServer::in_memory().await;
    let mut alice = Client::join(server.addr, "alice").await;

    alice.send("/exit").await;
    assert_eq!(alice.recv().await.as_deref(), Some(protocol::EXIT_ACK));
    assert_eq!(alice.recv().await, None);

    server.wait_released("alice").await;
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_clears_registry() {
    let server = TestServer::in_memory().await;
    let mut alice = Client::join(server.addr, "alice").await;
    let state = server.state.clone();

    server.stop().await;

    assert_eq!(alice.recv().await, None);
    assert!(state.registry.list().await.unwrap().is_empty());
    assert!(state.connections.is_empty().await);
}

#[tokio::test]
async fn test_stalled_reader_does_not_hold_up_others() {
    let config = SessionConfig {
        write_timeout: Duration::from_millis(300),
        ..SessionConfig::default()
    };
    let server = TestServer::start(AppState::in_memory(config)).await;

    let _stalled = Client::join(server.addr, "stalled").await;
    let mut reader = Client::join(server.addr, "reader").await;

    let reader_task = tokio::spawn(async move {
        let mut seen = 0;
        loop {
            let line = reader.recv().await.expect("reader connection stays open");
            if line == "done" {
                return seen;
            }
            seen += 1;
        }
    });

    // Far more than the stalled client's socket buffers can absorb
    let chunk = "x".repeat(512 * 1024);
    for _ in 0..40 {
        server.state.bus.publish(CHAT_TOPIC, &chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    server.state.bus.publish(CHAT_TOPIC, "done").await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(10), reader_task)
        .await
        .expect("reader should keep receiving")
        .unwrap();
    assert_eq!(seen, 40);

    server.wait_released("stalled").await;
    assert_eq!(server.names().await, vec!["reader"]);

    server.stop().await;
}

/// Registry whose store is down
struct UnreachableRegistry;

#[async_trait]
impl Registry for UnreachableRegistry {
    async fn reserve(&self, _name: &str, _id: &UserId) -> RegistryResult<Reservation> {
        Err(RegistryError::Timeout(Duration::from_millis(5)))
    }

    async fn list(&self) -> RegistryResult<Vec<(String, UserId)>> {
        Err(RegistryError::Unavailable("connection refused".to_string()))
    }

    async fn remove(&self, _name: &str) -> RegistryResult<()> {
        Ok(())
    }

    async fn clear(&self) -> RegistryResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unavailable_registry_rejects_name() {
    let state = AppState::new(
        Arc::new(UnreachableRegistry),
        Arc::new(MemoryBus::new()),
        SessionConfig::default(),
    );
    let server = TestServer::start(state).await;

    let mut client = Client::connect(server.addr).await;
    client.send("alice").await;
    assert_eq!(
        client.recv().await.as_deref(),
        Some(protocol::REGISTRY_UNAVAILABLE)
    );
    assert_eq!(client.recv().await.as_deref(), Some(protocol::NAME_PROMPT));
    assert!(server.state.connections.is_empty().await);

    server.stop().await;
}

/// Bus that accepts subscriptions but cannot publish
struct BrokenBus;

#[async_trait]
impl Bus for BrokenBus {
    async fn publish(&self, _topic: &str, _payload: &str) -> BusResult<()> {
        Err(BusError::Unavailable("connection reset".to_string()))
    }

    async fn subscribe(&self, _topic: &str) -> BusResult<BoxStream<'static, String>> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

#[tokio::test]
async fn test_unavailable_bus_warns_sender() {
    let state = AppState::new(
        Arc::new(MemoryRegistry::new()),
        Arc::new(BrokenBus),
        SessionConfig::default(),
    );
    let server = TestServer::start(state).await;

    let mut alice = Client::join(server.addr, "alice").await;
    alice.send("hello?").await;
    assert_eq!(
        alice.recv().await.as_deref(),
        Some(protocol::DELIVERY_UNCERTAIN)
    );

    // The session survives the failure
    alice.send("/online").await;
    assert_eq!(alice.recv().await.as_deref(), Some("Online users: alice"));

    server.stop().await;
}
