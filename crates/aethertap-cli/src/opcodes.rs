//! Embedded opcode-name table.
//!
//! Opcode values shift with every game patch, so the mapping is data, not
//! logic: a JSON document of per-region lists bundled into the binary.
//! Only the pretty-printer consults it; the decode path never interprets
//! opcodes.

use std::collections::HashMap;

use serde::Deserialize;

const OPCODES_JSON: &str = include_str!("../opcodes.json");

/// Region label of the global (international) game client.
pub const REGION_GLOBAL: &str = "Global";

/// Which IPC list an opcode belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpcList {
    /// Server-to-client zone traffic.
    ServerZone,
    /// Client-to-server zone traffic.
    ClientZone,
    /// Server-to-client lobby traffic.
    ServerLobby,
    /// Client-to-server lobby traffic.
    ClientLobby,
    /// Server-to-client chat traffic.
    ServerChat,
    /// Client-to-server chat traffic.
    ClientChat,
}

#[derive(Debug, Deserialize)]
struct RegionEntry {
    version: String,
    region: String,
    lists: Lists,
}

#[derive(Debug, Deserialize)]
struct Lists {
    #[serde(rename = "ServerZoneIpcType", default)]
    server_zone: Vec<OpcodeDef>,
    #[serde(rename = "ClientZoneIpcType", default)]
    client_zone: Vec<OpcodeDef>,
    #[serde(rename = "ServerLobbyIpcType", default)]
    server_lobby: Vec<OpcodeDef>,
    #[serde(rename = "ClientLobbyIpcType", default)]
    client_lobby: Vec<OpcodeDef>,
    #[serde(rename = "ServerChatIpcType", default)]
    server_chat: Vec<OpcodeDef>,
    #[serde(rename = "ClientChatIpcType", default)]
    client_chat: Vec<OpcodeDef>,
}

#[derive(Debug, Deserialize)]
struct OpcodeDef {
    name: String,
    opcode: u16,
}

/// Opcode-to-name lookup for one region.
#[derive(Debug)]
pub struct OpcodeTable {
    version: String,
    names: HashMap<(IpcList, u16), String>,
}

impl OpcodeTable {
    /// Build the table for `region` from the embedded definitions.
    pub fn for_region(region: &str) -> Option<Self> {
        let entries: Vec<RegionEntry> = match serde_json::from_str(OPCODES_JSON) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(%err, "embedded opcode definitions are unreadable");
                return None;
            },
        };

        let entry = entries.into_iter().find(|entry| entry.region == region)?;

        let mut names = HashMap::new();
        let lists = [
            (IpcList::ServerZone, entry.lists.server_zone),
            (IpcList::ClientZone, entry.lists.client_zone),
            (IpcList::ServerLobby, entry.lists.server_lobby),
            (IpcList::ClientLobby, entry.lists.client_lobby),
            (IpcList::ServerChat, entry.lists.server_chat),
            (IpcList::ClientChat, entry.lists.client_chat),
        ];
        for (list, defs) in lists {
            for def in defs {
                names.insert((list, def.opcode), def.name);
            }
        }

        tracing::debug!(
            region,
            version = %entry.version,
            opcodes = names.len(),
            "loaded opcode table"
        );

        Some(Self {
            version: entry.version,
            names,
        })
    }

    /// Game version the table was extracted from.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Resolve an opcode to its name within one list.
    pub fn name_of(&self, list: IpcList, opcode: u16) -> Option<&str> {
        self.names.get(&(list, opcode)).map(String::as_str)
    }
}
