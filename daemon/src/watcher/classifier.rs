//! Server log line classification.
//!
//! Each line the server writes is checked against a fixed, ordered rule set.
//! The first rule that matches decides the event.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, trace};

static SERVER_READY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Listening has been started").unwrap());

static PLAYER_JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ServerLobby: New player (.+) with online id [0-9][0-9]?").unwrap()
});

static LOBBY_LEAVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ServerLobby:\s*(.+?)\s+disconnected\s*$").unwrap()
});

// Untagged form. No `[level]` or `Tag:` prefix allowed, so other subsystems
// cannot leak their formatting into the name.
static BARE_LEAVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^\[\]:]+?)\s+disconnected\s*$").unwrap());

static NO_MORE_PLAYERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"STKHost.+There are now 0 peers\.$").unwrap());

/// Lifecycle event derived from a single log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The network listener is up.
    Ready,
    PlayerJoin(String),
    PlayerLeave(String),
    /// The last peer left.
    Shutdown,
    /// No rule matched. Not an error.
    None,
}

impl Event {
    /// True for every variant except `Event::None`.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Event::None)
    }
}

/// Classify one log line. Never fails; unmatched lines yield `Event::None`.
pub fn classify(line: &str) -> Event {
    if SERVER_READY.is_match(line) {
        info!("Server ready");
        return Event::Ready;
    }

    if let Some(player) = capture_name(&PLAYER_JOIN, line) {
        info!(player = %player, "Player joined");
        return Event::PlayerJoin(player);
    }

    if let Some(player) =
        capture_name(&LOBBY_LEAVE, line).or_else(|| capture_name(&BARE_LEAVE, line))
    {
        info!(player = %player, "Player disconnected");
        return Event::PlayerLeave(player);
    }

    if NO_MORE_PLAYERS.is_match(line) {
        info!("Server has no more players");
        return Event::Shutdown;
    }

    trace!(line, "No rule matched");
    Event::None
}

/// First capture group, trimmed. Blank names count as no match.
fn capture_name(re: &Regex, line: &str) -> Option<String> {
    let name = re.captures(line)?.get(1)?.as_str().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
