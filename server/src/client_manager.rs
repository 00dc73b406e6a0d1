//! Connected client tracking for the game server
//!
//! This module keeps the server-side record of every open connection:
//! - Identity assignment for new connections
//! - Login state and display names
//! - Ownership of the transport handle used for reads, writes and closing
//! - Capacity limits on concurrent connections
//!
//! Each entry bundles the player record with its connection, so the list of
//! players and the list of descriptors to poll can never drift apart.
//! Removal swaps the last entry into the freed slot; iteration order is the
//! order the dispatcher services ready connections in.

use crate::connection::WriteBuffer;
use crate::error::RegistryError;
use log::info;
use std::fmt;
use std::net::SocketAddr;

/// Server-assigned identity of a connection. Never reused while the server
/// runs; allocation fails once the `u32` range is used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected player and the transport handle used to reach them.
#[derive(Debug)]
pub struct Client<C> {
    /// Unique client identifier assigned by the server
    pub id: ClientId,
    /// Remote address, kept for logging
    pub peer: SocketAddr,
    /// Display name set by `LOGIN`, empty until then
    pub name: String,
    /// Whether `LOGIN` has been accepted on this connection
    pub logged_in: bool,
    pub conn: C,
    /// Output the connection has not taken yet
    pub pending: WriteBuffer,
}

impl<C> Client<C> {
    pub fn new(id: ClientId, peer: SocketAddr, conn: C) -> Self {
        Self {
            id,
            peer,
            name: String::new(),
            logged_in: false,
            conn,
            pending: WriteBuffer::new(),
        }
    }

    /// Stores the display name and marks the client as logged in.
    pub fn login(&mut self, name: &str) {
        self.name = name.chars().take(shared::NAME_MAX_LEN).collect();
        self.logged_in = true;
    }
}

impl<C> fmt::Display for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}<{}>]", self.name, self.id)
    }
}

/// Manages all open connections.
///
/// Enforces the server's connection limit and hands out client IDs starting
/// from 1.
pub struct ClientManager<C> {
    clients: Vec<Client<C>>,
    next_client_id: Option<u32>,
    max_clients: usize,
}

impl<C> ClientManager<C> {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: Vec::new(),
            next_client_id: Some(1),
            max_clients,
        }
    }

    /// Reserves a fresh client ID.
    pub fn next_id(&mut self) -> Result<ClientId, RegistryError> {
        let id = self.next_client_id.ok_or(RegistryError::IdsExhausted)?;
        self.next_client_id = id.checked_add(1);
        Ok(ClientId(id))
    }

    /// Registers a new connection under a fresh ID.
    ///
    /// On failure the connection is dropped, which closes it.
    pub fn add_client(&mut self, conn: C, peer: SocketAddr) -> Result<ClientId, RegistryError> {
        let id = self.next_id()?;
        self.add(Client::new(id, peer, conn))?;
        info!("Client {} connected from {}", id, peer);
        Ok(id)
    }

    /// Inserts an already-built client record.
    ///
    /// Fails if the ID is already present, the manager is at capacity, or
    /// the backing storage cannot grow.
    pub fn add(&mut self, client: Client<C>) -> Result<(), RegistryError> {
        if self.contains(client.id) {
            return Err(RegistryError::AlreadyRegistered(client.id));
        }
        if self.is_full() {
            return Err(RegistryError::Full(self.max_clients));
        }

        self.clients.try_reserve(1)?;
        self.clients.push(client);
        Ok(())
    }

    /// Removes a client and hands back its record, including the connection.
    ///
    /// The last client takes the freed slot, so order is not preserved.
    pub fn remove_client(&mut self, id: ClientId) -> Option<Client<C>> {
        let index = self.clients.iter().position(|client| client.id == id)?;
        let client = self.clients.swap_remove(index);
        info!("Client {} disconnected", client.id);
        Some(client)
    }

    pub fn get(&self, id: ClientId) -> Option<&Client<C>> {
        self.clients.iter().find(|client| client.id == id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client<C>> {
        self.clients.iter_mut().find(|client| client.id == id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client<C>> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client<C>> {
        self.clients.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }
}
