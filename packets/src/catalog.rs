//! The packet catalog: a static, read-only, triple-keyed `(protocol_version, mode, direction) ->
//! (id <-> name)` lookup, loaded once.
//!
//! Grounded on the original source's `quarry.data.packets` module: per-version CSV rows of
//! `(mode, direction, name)` are loaded into `packet_names`/`packet_idents` dicts, where the
//! numeric id is not stored explicitly but assigned sequentially within each `(mode, direction)`
//! section, resetting to zero whenever that section changes. This module reproduces that id
//! assignment statically, once, behind a `LazyLock`.

use crate::{Error, VarInt};
use std::collections::HashMap;
use std::sync::LazyLock;

/// The mode a connection is in; determines which packet id table is in effect.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Init,
    Status,
    Login,
    Play,
}

/// Which way a packet is travelling: `Upstream` is client-to-server, `Downstream` is
/// server-to-client.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Upstream,
    Downstream,
}

type CatalogKey = (VarInt, Mode, Direction);

struct Section {
    mode: Mode,
    direction: Direction,
    names: &'static [&'static str],
}

/// One protocol version's packet layout: an ordered list of `(mode, direction)` sections, each
/// listing its packet names in ascending id order (the id is the name's index within its
/// section).
struct VersionTable {
    version: VarInt,
    sections: &'static [Section],
}

// Packet names for the modes this crate implements typed packets for (§4.3/§6). `play` carries
// only the handful of names the proxy bridge (§4.8) and compression-toggle duplicate-opcode path
// need to recognise by name for forwarding; its payload shapes are out of scope (§1).
//
// Shared across every version table below: only the id assignment (per-version, per-section) and
// the array length-prefix style (§4.4/§6, see `array_prefix_for_version`) vary by protocol
// version; this crate doesn't model per-version field-shape differences beyond that.
const PACKET_SECTIONS: &[Section] = &[
    Section {
        mode: Mode::Init,
        direction: Direction::Upstream,
        names: &["handshake"],
    },
    Section {
        mode: Mode::Status,
        direction: Direction::Upstream,
        names: &["status_request", "status_ping"],
    },
    Section {
        mode: Mode::Status,
        direction: Direction::Downstream,
        names: &["status_response", "status_pong"],
    },
    Section {
        mode: Mode::Login,
        direction: Direction::Upstream,
        names: &[
            "login_start",
            "login_encryption_response",
            "login_plugin_response",
        ],
    },
    Section {
        mode: Mode::Login,
        direction: Direction::Downstream,
        names: &[
            "login_disconnect",
            "login_encryption_request",
            "login_success",
            "login_set_compression",
            "login_plugin_request",
        ],
    },
    Section {
        mode: Mode::Play,
        direction: Direction::Upstream,
        names: &["chat_message", "keep_alive", "client_settings"],
    },
    Section {
        mode: Mode::Play,
        direction: Direction::Downstream,
        names: &["chat_message", "keep_alive", "disconnect", "set_compression"],
    },
];

static VERSION_TABLES: &[VersionTable] = &[
    // Protocol 5 (1.7.10-era): the last version before the varint-length array prefix and the
    // version that needs the 1.7.x safe-kick-on-entering-play latch (§4.3).
    VersionTable {
        version: 5,
        sections: PACKET_SECTIONS,
    },
    VersionTable {
        version: 754,
        sections: PACKET_SECTIONS,
    },
];

struct Catalog {
    names: HashMap<CatalogKey, Vec<&'static str>>,
    ids: HashMap<(VarInt, Mode, Direction, String), VarInt>,
}

static CATALOG: LazyLock<Catalog> = LazyLock::new(build_catalog);

fn build_catalog() -> Catalog {
    let mut names = HashMap::new();
    let mut ids = HashMap::new();
    for table in VERSION_TABLES {
        for section in table.sections {
            let key = (table.version, section.mode, section.direction);
            let mut entries = Vec::with_capacity(section.names.len());
            for (id, &name) in section.names.iter().enumerate() {
                entries.push(name);
                ids.insert(
                    (table.version, section.mode, section.direction, name.to_string()),
                    id as VarInt,
                );
            }
            names.insert(key, entries);
        }
    }
    Catalog { names, ids }
}

/// Resolves the name for `(version, mode, direction, id)`. A missing id is a fatal protocol
/// error.
pub fn name_of(version: VarInt, mode: Mode, direction: Direction, id: VarInt) -> Result<&'static str, Error> {
    CATALOG
        .names
        .get(&(version, mode, direction))
        .and_then(|names| names.get(id as usize))
        .copied()
        .ok_or_else(|| Error::UnknownPacket(format!("id {id:#04x} in v{version} {mode:?}/{direction:?}")))
}

/// Resolves the id for `(version, mode, direction, name)`. A missing name is a fatal protocol
/// error.
pub fn id_of(version: VarInt, mode: Mode, direction: Direction, name: &str) -> Result<VarInt, Error> {
    CATALOG
        .ids
        .get(&(version, mode, direction, name.to_string()))
        .copied()
        .ok_or_else(|| Error::UnknownPacket(name.to_string()))
}

/// The set of protocol versions this catalog recognises.
pub fn supported_versions() -> Vec<VarInt> {
    VERSION_TABLES.iter().map(|t| t.version).collect()
}

/// The newest protocol version present in the catalog.
pub fn default_version() -> VarInt {
    VERSION_TABLES.iter().map(|t| t.version).max().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_entry() {
        for table in VERSION_TABLES {
            for section in table.sections {
                for &name in section.names {
                    let id = id_of(table.version, section.mode, section.direction, name).unwrap();
                    let resolved = name_of(table.version, section.mode, section.direction, id).unwrap();
                    assert_eq!(resolved, name);
                }
            }
        }
    }

    #[test]
    fn unknown_id_is_an_error() {
        assert!(name_of(754, Mode::Login, Direction::Upstream, 99).is_err());
    }

    #[test]
    fn default_version_is_the_newest() {
        assert_eq!(default_version(), 754);
        assert_eq!(supported_versions(), vec![5, 754]);
    }
}
