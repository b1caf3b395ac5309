//! Operator console
//!
//! Line-based admin commands read from stdin while the server runs:
//! `-a` dumps every room with its members, `-c` clears all rooms.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `-a`
    DumpRooms,
    /// `-c`
    ClearRooms,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.starts_with("-a") {
            Ok(Command::DumpRooms)
        } else if line.starts_with("-c") {
            Ok(Command::ClearRooms)
        } else {
            Err(line.to_string())
        }
    }
}

/// Run a command and return the text to show the operator
pub fn execute(server: &Server, command: Command) -> String {
    match command {
        Command::DumpRooms => render_rooms(server),
        Command::ClearRooms => format!("Cleared {} chatroom(s)", server.clear_rooms()),
    }
}

/// `name(size/cap)` per room, then each member port on its own indented line
pub fn render_rooms(server: &Server) -> String {
    let mut out = String::new();
    for snapshot in server.room_snapshots() {
        let summary = &snapshot.summary;
        let _ = writeln!(
            out,
            "{}({}/{})",
            summary.name, summary.size, summary.max_capacity
        );
        for port in snapshot.members {
            let _ = writeln!(out, "\t{}", port);
        }
    }
    out
}

/// Read commands from stdin until it closes
pub async fn run(server: Arc<Server>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match line.parse::<Command>() {
                Ok(command) => print!("{}", with_newline(execute(&server, command))),
                Err(unknown) => warn!("Unknown command {:?} (expected -a or -c)", unknown),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read console input: {}", e);
                break;
            }
        }
    }

    debug!("Console input closed");
}

fn with_newline(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
