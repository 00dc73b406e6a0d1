//! Server network layer: accepts connections, parses commands and drives the game
//!
//! Everything runs on one task. Each call to [`Server::turn`] waits once for
//! readiness across the listener and every registered connection, services
//! what is ready in registry order, then flushes the outbound queue and
//! finally closes connections that asked to leave. Replies are never written
//! while commands are still being processed.
//!
//! Writes never wait. Output a peer cannot take yet stays in that
//! connection's [`WriteBuffer`] and the next readiness wait also watches for
//! it becoming writable. A peer that lets its buffer overflow is dropped.

use crate::client_manager::{ClientId, ClientManager};
use crate::connection::{Connection, Listener, WriteBuffer};
use crate::error::{MessageError, ServerError};
use crate::game::GameSession;
use crate::ring_queue::RingQueue;
use log::{debug, error, info, warn};
use shared::{parse, Command, Reply, MSG_MAX_RECIPIENTS, MSG_MAX_SIZE};
use std::future::{poll_fn, Future};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Sleep;

/// How long accepting stops after the listener reports an error.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Turns a closing connection may wait for its remaining output.
pub const CLOSE_LINGER_TURNS: u8 = 4;

/// Runtime settings for a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub rows: usize,
    pub cols: usize,
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rows: shared::DEFAULT_ROWS,
            cols: shared::DEFAULT_COLS,
            max_clients: 64,
        }
    }
}

/// A payload addressed to one or more clients, waiting in the outbound queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    recipients: Vec<ClientId>,
    data: Vec<u8>,
}

impl Message {
    /// Builds a message. Trailing NUL bytes are not part of the payload.
    pub fn new(recipients: &[ClientId], payload: &[u8]) -> Result<Self, MessageError> {
        if recipients.len() > MSG_MAX_RECIPIENTS {
            return Err(MessageError::TooManyRecipients(recipients.len()));
        }

        let end = payload
            .iter()
            .rposition(|&byte| byte != 0)
            .map_or(0, |last| last + 1);
        if end > MSG_MAX_SIZE {
            return Err(MessageError::TooLarge(end));
        }

        Ok(Self {
            recipients: recipients.to_vec(),
            data: payload[..end].to_vec(),
        })
    }

    pub fn reply(recipients: &[ClientId], reply: &Reply) -> Result<Self, MessageError> {
        Self::new(recipients, reply.to_string().as_bytes())
    }

    pub fn recipients(&self) -> &[ClientId] {
        &self.recipients
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A connection already removed from the registry, held until its queued
/// replies are written or it runs out of turns.
struct Closing<C> {
    id: ClientId,
    conn: C,
    pending: WriteBuffer,
    turns_left: u8,
    /// Set once a write failed; nothing more is queued for it.
    failed: bool,
}

/// What one readiness wait produced. Write readiness needs no record: every
/// turn writes whatever is pending.
struct Ready<C> {
    accepted: Option<io::Result<(C, SocketAddr)>>,
    readable: Vec<ClientId>,
}

/// Splits one read into command frames, one per line. A trailing fragment
/// without a newline is still a frame.
pub fn frames(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split_inclusive(|&byte| byte == b'\n')
}

/// Single-threaded Atari Go server.
pub struct Server<L: Listener> {
    listener: L,
    clients: ClientManager<L::Conn>,
    session: GameSession,
    outbox: RingQueue<Message>,
    closing: RingQueue<Closing<L::Conn>>,
    accept_pause: Option<Pin<Box<Sleep>>>,
}

impl Server<TcpListener> {
    pub async fn bind(addr: &str, config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(Self::with_listener(listener, config))
    }
}

impl<L: Listener> Server<L> {
    pub fn with_listener(listener: L, config: ServerConfig) -> Self {
        info!(
            "Board is {}x{}, accepting up to {} clients",
            config.rows, config.cols, config.max_clients
        );
        Server {
            listener,
            clients: ClientManager::new(config.max_clients),
            session: GameSession::new(config.rows, config.cols),
            outbox: RingQueue::new(),
            closing: RingQueue::new(),
            accept_pause: None,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn clients(&self) -> &ClientManager<L::Conn> {
        &self.clients
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Serves clients until a fatal error occurs.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        info!("Server started");
        loop {
            if let Err(e) = self.turn().await {
                error!("Server loop failed: {}", e);
                return Err(e);
            }
        }
    }

    /// One iteration of the event loop.
    ///
    /// Errors are returned only for resource exhaustion; per-client failures
    /// are handled by dropping that client.
    pub async fn turn(&mut self) -> Result<(), ServerError> {
        let ready = {
            let listener = &self.listener;
            let accept_pause = &mut self.accept_pause;
            let clients = &self.clients;
            let closing = &self.closing;
            poll_fn(|cx| poll_ready(listener, accept_pause, clients, closing, cx)).await
        };

        match ready.accepted {
            Some(Ok((conn, peer))) => self.accept(conn, peer)?,
            Some(Err(e)) => {
                warn!(
                    "Failed to accept connection: {}; pausing accepts for {:?}",
                    e, ACCEPT_BACKOFF
                );
                self.accept_pause = Some(Box::pin(tokio::time::sleep(ACCEPT_BACKOFF)));
            }
            None => {}
        }

        for id in ready.readable {
            self.service(id)?;
        }

        self.flush_messages()?;
        self.flush_closing()
    }

    fn accept(&mut self, conn: L::Conn, peer: SocketAddr) -> Result<(), ServerError> {
        if self.clients.is_full() {
            let id = self.clients.next_id()?;
            warn!("Rejecting {}: server full", peer);
            self.closing.put(Closing {
                id,
                conn,
                pending: WriteBuffer::new(),
                turns_left: CLOSE_LINGER_TURNS,
                failed: false,
            })?;
            return self.send(&[id], &Reply::error("server full"));
        }

        let id = self.clients.add_client(conn, peer)?;
        self.send(&[id], &Reply::Ok)
    }

    fn service(&mut self, id: ClientId) -> Result<(), ServerError> {
        let mut buf = [0u8; MSG_MAX_SIZE];
        let read = match self.clients.get(id) {
            Some(client) => client.conn.try_read(&mut buf),
            None => return Ok(()),
        };

        match read {
            Ok(0) => {
                debug!("Client {} closed its connection", id);
                self.disconnect(id)
            }
            Ok(len) => {
                for frame in frames(&buf[..len]) {
                    let command = parse(frame);
                    self.serve(id, command)?;
                    if !self.clients.contains(id) {
                        break;
                    }
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                warn!("Read from client {} failed: {}", id, e);
                self.disconnect(id)
            }
        }
    }

    fn serve(&mut self, id: ClientId, command: Command) -> Result<(), ServerError> {
        let Some(client) = self.clients.get(id) else {
            return Ok(());
        };
        debug!("{} sent {:?}", client, command);

        if !client.logged_in && !matches!(command, Command::Login(_) | Command::Logout) {
            return self.send(&[id], &Reply::error("not logged in"));
        }

        match command {
            Command::Login(name) => {
                if let Some(client) = self.clients.get_mut(id) {
                    client.login(&name);
                    info!("{} logged in", client);
                }
                self.send(&[id], &Reply::Ok)
            }
            Command::Logout => {
                self.send(&[id], &Reply::Ok)?;
                self.disconnect(id)
            }
            Command::Join => match self.session.join(id) {
                Ok(_) => {
                    let name = self.name_of(id);
                    self.send_others(id, &Reply::GotJoin(name))?;
                    self.send(&[id], &Reply::Ok)
                }
                Err(e) => self.send(&[id], &Reply::error(e)),
            },
            Command::Leave => {
                if self.session.leave(id) {
                    self.send_others(id, &Reply::GotLeave)?;
                }
                self.send(&[id], &Reply::Ok)
            }
            Command::Move { row, col } => match self.session.play_move(id, &row, &col) {
                Ok(placement) => {
                    self.send(&[id], &Reply::Ok)?;
                    self.send_others(id, &Reply::GotMove { row, col })?;
                    if let Some(winner) = placement.winner {
                        self.send_members(&Reply::GotWinner(winner))?;
                    }
                    Ok(())
                }
                Err(e) => {
                    debug!("Move from client {} refused: {}", id, e);
                    self.send(&[id], &Reply::error(e))
                }
            },
            Command::Error => self.send(&[id], &Reply::error("malformed command")),
        }
    }

    /// Drops a client from the lobby and the registry. The connection stays
    /// open until the closing queue is flushed.
    fn disconnect(&mut self, id: ClientId) -> Result<(), ServerError> {
        if self.session.leave(id) {
            self.send_others(id, &Reply::GotLeave)?;
        }
        if let Some(client) = self.clients.remove_client(id) {
            self.closing.put(Closing {
                id,
                conn: client.conn,
                pending: client.pending,
                turns_left: CLOSE_LINGER_TURNS,
                failed: false,
            })?;
        }
        Ok(())
    }

    fn name_of(&self, id: ClientId) -> String {
        self.clients
            .get(id)
            .map(|client| client.name.clone())
            .unwrap_or_default()
    }

    fn send(&mut self, recipients: &[ClientId], reply: &Reply) -> Result<(), ServerError> {
        if recipients.is_empty() {
            return Ok(());
        }
        self.outbox.put(Message::reply(recipients, reply)?)?;
        Ok(())
    }

    fn send_others(&mut self, sender: ClientId, reply: &Reply) -> Result<(), ServerError> {
        let others: Vec<ClientId> = self
            .session
            .members()
            .iter()
            .map(|member| member.id)
            .filter(|&id| id != sender)
            .collect();
        self.send(&others, reply)
    }

    fn send_members(&mut self, reply: &Reply) -> Result<(), ServerError> {
        let members: Vec<ClientId> = self.session.members().iter().map(|member| member.id).collect();
        self.send(&members, reply)
    }

    /// Looks a recipient's output buffer up among live clients, then among
    /// those closing.
    fn write_buffer(&mut self, id: ClientId) -> Option<&mut WriteBuffer> {
        if self.clients.contains(id) {
            return self.clients.get_mut(id).map(|client| &mut client.pending);
        }
        self.closing
            .iter_mut()
            .find(|closing| closing.id == id && !closing.failed)
            .map(|closing| &mut closing.pending)
    }

    /// Moves queued messages into per-connection buffers and writes what
    /// each connection takes without waiting. Dropping a client queues
    /// `GOTLEAVE`, so this repeats until the outbox stays empty.
    fn flush_messages(&mut self) -> Result<(), ServerError> {
        loop {
            while let Some(message) = self.outbox.pop() {
                for &to in message.recipients() {
                    let queued = match self.write_buffer(to) {
                        Some(pending) => pending.push(message.data()),
                        None => {
                            debug!("Dropping message for departed client {}", to);
                            continue;
                        }
                    };
                    if let Err(e) = queued {
                        self.drop_writer(to, e)?;
                    }
                }
            }

            for (id, e) in self.write_pending() {
                self.drop_writer(id, e)?;
            }

            if self.outbox.is_empty() {
                return Ok(());
            }
        }
    }

    fn write_pending(&mut self) -> Vec<(ClientId, io::Error)> {
        let mut failed = Vec::new();
        for client in self.clients.iter_mut() {
            if let Err(e) = client.pending.write_to(&client.conn) {
                failed.push((client.id, e));
            }
        }
        for closing in self.closing.iter_mut() {
            if let Err(e) = closing.pending.write_to(&closing.conn) {
                failed.push((closing.id, e));
            }
        }
        failed
    }

    /// Disconnects a client whose output cannot be delivered and discards
    /// what it still had queued.
    fn drop_writer(&mut self, id: ClientId, e: io::Error) -> Result<(), ServerError> {
        warn!("Write to client {} failed: {}", id, e);
        self.disconnect(id)?;
        if let Some(closing) = self.closing.iter_mut().find(|closing| closing.id == id) {
            closing.pending.clear();
            closing.failed = true;
        }
        Ok(())
    }

    /// Closes every connection that has nothing left to send. One still
    /// holding output is kept for up to [`CLOSE_LINGER_TURNS`] more turns.
    fn flush_closing(&mut self) -> Result<(), ServerError> {
        for _ in 0..self.closing.len() {
            let Some(mut closing) = self.closing.pop() else {
                break;
            };

            if !closing.pending.is_empty() && closing.turns_left > 0 {
                closing.turns_left -= 1;
                self.closing.put(closing)?;
                continue;
            }

            if !closing.pending.is_empty() {
                debug!(
                    "Discarding {} unsent bytes for client {}",
                    closing.pending.len(),
                    closing.id
                );
            }
            debug!("Closing connection to client {}", closing.id);
            closing.conn.close();
        }
        Ok(())
    }
}

/// Polls the listener and every registered connection once, registering
/// wakeups for all of them. Connections with pending output are also polled
/// for write readiness. The listener is skipped while an accept pause runs.
/// Ready only when at least one has an event.
fn poll_ready<L: Listener>(
    listener: &L,
    accept_pause: &mut Option<Pin<Box<Sleep>>>,
    clients: &ClientManager<L::Conn>,
    closing: &RingQueue<Closing<L::Conn>>,
    cx: &mut Context<'_>,
) -> Poll<Ready<L::Conn>> {
    let resumed = match accept_pause.as_mut() {
        Some(pause) => pause.as_mut().poll(cx).is_ready(),
        None => false,
    };
    if resumed {
        *accept_pause = None;
    }

    let accepted = if accept_pause.is_some() {
        None
    } else {
        match listener.poll_accept(cx) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        }
    };

    let readable: Vec<ClientId> = clients
        .iter()
        .filter(|client| client.conn.poll_read_ready(cx).is_ready())
        .map(|client| client.id)
        .collect();

    let writable = clients
        .iter()
        .filter(|client| !client.pending.is_empty())
        .map(|client| &client.conn)
        .chain(
            closing
                .iter()
                .filter(|closing| !closing.pending.is_empty())
                .map(|closing| &closing.conn),
        )
        .filter(|conn| conn.poll_write_ready(cx).is_ready())
        .count();

    if accepted.is_none() && readable.is_empty() && writable == 0 {
        Poll::Pending
    } else {
        Poll::Ready(Ready { accepted, readable })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Cell, Pos};
    use crate::connection::{MemoryConnection, MemoryListener};
    use shared::Team;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    fn test_server(config: ServerConfig) -> (Server<MemoryListener>, MemoryListener) {
        let listener = MemoryListener::new();
        (Server::with_listener(listener.clone(), config), listener)
    }

    fn small_board() -> ServerConfig {
        ServerConfig {
            rows: 7,
            cols: 5,
            ..ServerConfig::default()
        }
    }

    async fn step(server: &mut Server<MemoryListener>) {
        tokio::time::timeout(Duration::from_secs(1), server.turn())
            .await
            .expect("turn did not complete")
            .unwrap();
    }

    async fn connect(server: &mut Server<MemoryListener>, listener: &MemoryListener) -> MemoryConnection {
        let conn = listener.connect().unwrap();
        step(server).await;
        assert_eq!(conn.take_lines(), vec!["OK"]);
        conn
    }

    async fn login(
        server: &mut Server<MemoryListener>,
        listener: &MemoryListener,
        name: &str,
    ) -> MemoryConnection {
        let conn = connect(server, listener).await;
        conn.send(format!("LOGIN {}\r\n", name)).unwrap();
        step(server).await;
        assert_eq!(conn.take_lines(), vec!["OK"]);
        conn
    }

    /// Two logged-in clients, both in the lobby, with all output drained.
    async fn lobby(
        server: &mut Server<MemoryListener>,
        listener: &MemoryListener,
    ) -> (MemoryConnection, MemoryConnection) {
        let alice = login(server, listener, "alice").await;
        let bob = login(server, listener, "bob").await;

        alice.send("JOIN\r\n").unwrap();
        step(server).await;
        bob.send("JOIN\r\n").unwrap();
        step(server).await;

        assert_eq!(alice.take_lines(), vec!["OK", "GOTJOIN bob"]);
        assert_eq!(bob.take_lines(), vec!["OK"]);
        (alice, bob)
    }

    #[test]
    fn test_message_creation() {
        let message = Message::new(&[ClientId(1), ClientId(2)], b"OK\r\n\0\0").unwrap();
        assert_eq!(message.recipients(), &[ClientId(1), ClientId(2)]);
        assert_eq!(message.data(), b"OK\r\n");

        let empty = Message::new(&[ClientId(1)], b"\0\0\0").unwrap();
        assert!(empty.data().is_empty());

        let reply = Message::reply(&[ClientId(3)], &Reply::GotWinner(Team::B)).unwrap();
        assert_eq!(reply.data(), b"GOTWINNER X\r\n");
    }

    #[test]
    fn test_message_bounds() {
        let recipients: Vec<ClientId> = (0..=MSG_MAX_RECIPIENTS as u32).map(ClientId).collect();
        assert_eq!(
            Message::new(&recipients, b"OK"),
            Err(MessageError::TooManyRecipients(MSG_MAX_RECIPIENTS + 1))
        );
        assert!(Message::new(&recipients[..MSG_MAX_RECIPIENTS], b"OK").is_ok());

        let mut payload = vec![b'a'; MSG_MAX_SIZE];
        assert!(Message::new(&[ClientId(1)], &payload).is_ok());
        payload.push(b'a');
        assert_eq!(
            Message::new(&[ClientId(1)], &payload),
            Err(MessageError::TooLarge(MSG_MAX_SIZE + 1))
        );
    }

    #[test]
    fn test_frames_split_on_newline() {
        let split: Vec<&[u8]> = frames(b"LOGIN a\r\nJOIN\r\n").collect();
        assert_eq!(split, vec![&b"LOGIN a\r\n"[..], &b"JOIN\r\n"[..]]);

        let tail: Vec<&[u8]> = frames(b"LEAVE\r\nMOVE 1").collect();
        assert_eq!(tail, vec![&b"LEAVE\r\n"[..], &b"MOVE 1"[..]]);

        assert_eq!(frames(b"").count(), 0);
        assert_eq!(frames(b"JOIN").count(), 1);
    }

    #[test]
    fn test_turn_waits_for_events() {
        let (mut server, listener) = test_server(ServerConfig::default());
        {
            let mut turn = task::spawn(server.turn());
            assert_pending!(turn.poll());

            let _conn = listener.connect().unwrap();
            assert!(turn.is_woken());
            assert_ready_ok!(turn.poll());
        }
        assert_eq!(server.clients().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_sends_ok() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let conn = connect(&mut server, &listener).await;

        assert!(!conn.is_closed());
        let client = server.clients().iter().next().unwrap();
        assert!(!client.logged_in);
    }

    #[tokio::test]
    async fn test_commands_require_login() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let conn = connect(&mut server, &listener).await;

        for line in ["JOIN\r\n", "LEAVE\r\n", "MOVE 0 0\r\n", "garbage\r\n"] {
            conn.send(line).unwrap();
            step(&mut server).await;
            assert_eq!(conn.take_lines(), vec!["ERROR not logged in"]);
        }
        assert!(server.session().members().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_command_after_login() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let conn = login(&mut server, &listener, "alice").await;

        conn.send("JOIN extra\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(conn.take_lines(), vec!["ERROR malformed command"]);
    }

    #[tokio::test]
    async fn test_several_commands_in_one_read() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let conn = connect(&mut server, &listener).await;

        conn.send("LOGIN alice\r\nJOIN\r\nJOIN\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(conn.take_lines(), vec!["OK", "OK", "ERROR already in lobby"]);
    }

    #[tokio::test]
    async fn test_join_announces_to_members() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let (alice, bob) = lobby(&mut server, &listener).await;

        let carol = login(&mut server, &listener, "carol").await;
        carol.send("JOIN\r\n").unwrap();
        step(&mut server).await;

        assert_eq!(carol.take_lines(), vec!["ERROR lobby full"]);
        assert!(alice.take_output().is_empty());
        assert!(bob.take_output().is_empty());
    }

    #[tokio::test]
    async fn test_relogin_renames() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let alice = login(&mut server, &listener, "alice").await;
        let bob = login(&mut server, &listener, "bob").await;

        bob.send("JOIN\r\n").unwrap();
        step(&mut server).await;
        alice.send("LOGIN alicia\r\nJOIN\r\n").unwrap();
        step(&mut server).await;

        assert_eq!(alice.take_lines(), vec!["OK", "OK"]);
        assert_eq!(bob.take_lines(), vec!["OK", "GOTJOIN alicia"]);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_member() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let (alice, bob) = lobby(&mut server, &listener).await;

        bob.send("LEAVE\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(bob.take_lines(), vec!["OK"]);
        assert_eq!(alice.take_lines(), vec!["GOTLEAVE"]);

        // Not a member any more: still OK, nobody else hears about it.
        bob.send("LEAVE\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(bob.take_lines(), vec!["OK"]);
        assert!(alice.take_output().is_empty());
    }

    #[tokio::test]
    async fn test_game_until_capture() {
        let (mut server, listener) = test_server(small_board());
        let (alice, bob) = lobby(&mut server, &listener).await;

        alice.send("MOVE 0 1\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(alice.take_lines(), vec!["OK"]);
        assert_eq!(bob.take_lines(), vec!["GOTMOVE 0 1"]);

        bob.send("MOVE 0 0\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(bob.take_lines(), vec!["OK"]);
        assert_eq!(alice.take_lines(), vec!["GOTMOVE 0 0"]);

        alice.send("MOVE 1 0\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(alice.take_lines(), vec!["OK", "GOTWINNER O"]);
        assert_eq!(bob.take_lines(), vec!["GOTMOVE 1 0", "GOTWINNER O"]);
        assert_eq!(server.session().winner(), Some(Team::A));

        bob.send("MOVE 5 5\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(bob.take_lines(), vec!["ERROR game is over"]);
    }

    #[tokio::test]
    async fn test_move_echoes_client_digits() {
        let (mut server, listener) = test_server(small_board());
        let (alice, bob) = lobby(&mut server, &listener).await;

        alice.send("MOVE 003 02\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(alice.take_lines(), vec!["OK"]);
        assert_eq!(bob.take_lines(), vec!["GOTMOVE 003 02"]);

        let board = server.session().board();
        assert_eq!(board.get(Pos::new(3, 2)), Cell::Stone(Team::A));
    }

    #[tokio::test]
    async fn test_move_errors() {
        let (mut server, listener) = test_server(small_board());
        let alice = login(&mut server, &listener, "alice").await;

        alice.send("JOIN\r\nMOVE 0 0\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(alice.take_lines(), vec!["OK", "ERROR game has not started"]);

        let bob = login(&mut server, &listener, "bob").await;
        bob.send("JOIN\r\n").unwrap();
        step(&mut server).await;
        alice.take_output();
        bob.take_output();

        bob.send("MOVE 0 0\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(bob.take_lines(), vec!["ERROR not player's turn"]);

        alice.send("MOVE 7 0\r\nMOVE 0 5\r\nMOVE 3 3\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(
            alice.take_lines(),
            vec![
                "ERROR move is out of bounds",
                "ERROR move is out of bounds",
                "OK"
            ]
        );
        assert_eq!(bob.take_lines(), vec!["GOTMOVE 3 3"]);

        bob.send("MOVE 3 3\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(bob.take_lines(), vec!["ERROR space is occupied"]);
    }

    #[tokio::test]
    async fn test_replies_flush_after_all_reads() {
        let (mut server, listener) = test_server(small_board());
        let (alice, bob) = lobby(&mut server, &listener).await;

        alice.send("MOVE 0 1\r\n").unwrap();
        bob.send("MOVE 0 0\r\n").unwrap();
        step(&mut server).await;

        assert_eq!(alice.take_lines(), vec!["OK", "GOTMOVE 0 0"]);
        assert_eq!(bob.take_lines(), vec!["GOTMOVE 0 1", "OK"]);
    }

    #[tokio::test]
    async fn test_logout_delivers_ok_then_closes() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let (alice, bob) = lobby(&mut server, &listener).await;

        alice.send("LOGOUT\r\nJOIN\r\n").unwrap();
        step(&mut server).await;

        assert_eq!(alice.take_lines(), vec!["OK"]);
        assert!(alice.is_closed());
        assert_eq!(bob.take_lines(), vec!["GOTLEAVE"]);
        assert_eq!(server.clients().len(), 1);
        assert_eq!(server.session().members().len(), 1);
        assert_eq!(server.session().team_of(bob_id(&server)), Some(Team::A));
    }

    fn bob_id(server: &Server<MemoryListener>) -> ClientId {
        server
            .clients()
            .iter()
            .find(|client| client.name == "bob")
            .map(|client| client.id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_logout_before_login() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let conn = connect(&mut server, &listener).await;

        conn.send("LOGOUT\r\n").unwrap();
        step(&mut server).await;
        assert_eq!(conn.take_lines(), vec!["OK"]);
        assert!(conn.is_closed());
        assert!(server.clients().is_empty());
    }

    #[tokio::test]
    async fn test_hang_up_removes_client() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let (alice, bob) = lobby(&mut server, &listener).await;

        bob.hang_up();
        step(&mut server).await;

        assert!(bob.is_closed());
        assert_eq!(alice.take_lines(), vec!["GOTLEAVE"]);
        assert_eq!(server.clients().len(), 1);
        assert_eq!(server.session().members().len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_drops_client() {
        let (mut server, listener) = test_server(small_board());
        let (alice, bob) = lobby(&mut server, &listener).await;

        bob.break_pipe();
        alice.send("MOVE 2 2\r\n").unwrap();
        step(&mut server).await;

        assert_eq!(alice.take_lines(), vec!["OK", "GOTLEAVE"]);
        assert!(bob.is_closed());
        assert_eq!(server.clients().len(), 1);
    }

    #[tokio::test]
    async fn test_server_full_rejects_connection() {
        let (mut server, listener) = test_server(ServerConfig {
            max_clients: 1,
            ..ServerConfig::default()
        });
        let first = connect(&mut server, &listener).await;

        let second = listener.connect().unwrap();
        step(&mut server).await;
        assert_eq!(second.take_lines(), vec!["ERROR server full"]);
        assert!(second.is_closed());
        assert!(!first.is_closed());
        assert_eq!(server.clients().len(), 1);
    }

    #[tokio::test]
    async fn test_lobby_resets_after_everyone_leaves() {
        let (mut server, listener) = test_server(small_board());
        let (alice, bob) = lobby(&mut server, &listener).await;

        alice.send("MOVE 3 3\r\n").unwrap();
        step(&mut server).await;
        alice.send("LEAVE\r\n").unwrap();
        bob.send("LEAVE\r\n").unwrap();
        step(&mut server).await;

        assert!(server.session().members().is_empty());
        assert!(server
            .session()
            .board()
            .positions()
            .all(|pos| server.session().board().get(pos) == Cell::Empty));
    }

    #[tokio::test]
    async fn test_stalled_client_does_not_block_others() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let (alice, bob) = lobby(&mut server, &listener).await;

        alice.stall_writes();
        bob.send("LEAVE\r\n").unwrap();
        let carol = listener.connect().unwrap();
        step(&mut server).await;

        assert_eq!(bob.take_lines(), vec!["OK"]);
        assert_eq!(carol.take_lines(), vec!["OK"]);
        assert!(alice.take_output().is_empty());
        assert!(!alice.is_closed());
        assert_eq!(server.clients().len(), 3);

        {
            let mut turn = task::spawn(server.turn());
            assert_pending!(turn.poll());

            alice.resume_writes();
            assert!(turn.is_woken());
            assert_ready_ok!(turn.poll());
        }
        assert_eq!(alice.take_lines(), vec!["GOTLEAVE"]);
    }

    #[tokio::test]
    async fn test_stalled_client_dropped_when_buffer_overflows() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let (alice, bob) = lobby(&mut server, &listener).await;
        alice.stall_writes();

        // Every pair queues GOTLEAVE and GOTJOIN for alice.
        let burst = "LEAVE\r\nJOIN\r\n".repeat(MSG_MAX_SIZE / 13);
        let mut turns = 0;
        while !alice.is_closed() {
            assert!(turns < 200, "stalled client was never dropped");
            bob.send(&burst).unwrap();
            step(&mut server).await;
            turns += 1;
        }

        assert!(alice.take_output().is_empty());
        assert_eq!(server.clients().len(), 1);
        assert_eq!(server.session().members().len(), 1);
        let lines = bob.take_lines();
        assert_eq!(lines.last().map(String::as_str), Some("GOTLEAVE"));
        assert!(lines[..lines.len() - 1].iter().all(|line| line == "OK"));
    }

    #[tokio::test]
    async fn test_logout_reply_waits_for_slow_reader() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let conn = login(&mut server, &listener, "alice").await;

        conn.stall_writes();
        conn.send("LOGOUT\r\n").unwrap();
        step(&mut server).await;
        assert!(server.clients().is_empty());
        assert!(!conn.is_closed());

        conn.resume_writes();
        step(&mut server).await;
        assert_eq!(conn.take_lines(), vec!["OK"]);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_closing_connection_gives_up_after_linger() {
        let (mut server, listener) = test_server(ServerConfig::default());
        let alice = login(&mut server, &listener, "alice").await;
        let bob = login(&mut server, &listener, "bob").await;

        alice.stall_writes();
        alice.send("LOGOUT\r\n").unwrap();
        step(&mut server).await;

        for _ in 0..CLOSE_LINGER_TURNS {
            assert!(!alice.is_closed());
            bob.send("LOGIN bob\r\n").unwrap();
            step(&mut server).await;
        }

        assert!(alice.is_closed());
        alice.resume_writes();
        assert!(alice.take_output().is_empty());
        assert_eq!(bob.take_lines().len(), CLOSE_LINGER_TURNS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_failure_pauses_accepting() {
        let (mut server, listener) = test_server(ServerConfig::default());
        listener.fail_accept(io::ErrorKind::ConnectionAborted);
        step(&mut server).await;
        assert!(server.clients().is_empty());

        let conn = listener.connect().unwrap();
        let paused_at = tokio::time::Instant::now();
        {
            let mut turn = task::spawn(server.turn());
            assert_pending!(turn.poll());
        }
        assert!(conn.take_output().is_empty());

        step(&mut server).await;
        assert!(paused_at.elapsed() >= ACCEPT_BACKOFF);
        assert_eq!(conn.take_lines(), vec!["OK"]);
        assert_eq!(server.clients().len(), 1);
    }
}
