// src/core/state/client.rs

//! Contains state definitions related to client connections.

use crate::connection::{Client, ClientId};
use dashmap::DashMap;
use std::sync::Arc;

/// The live-connection set, keyed by connection id.
pub type ClientMap = DashMap<ClientId, Arc<Client>>;
