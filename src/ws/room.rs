//! Broadcast rooms: named sets of connected fds (§4.4).

use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;

/// A named set of member fds. Membership is the only state a room holds;
/// actual frame delivery is the caller's job (see `ws::registry::Registry`).
#[derive(Debug, Default)]
pub struct Room {
    members: HashSet<RawFd>,
}

impl Room {
    pub fn join(&mut self, fd: RawFd) {
        self.members.insert(fd);
    }

    pub fn leave(&mut self, fd: RawFd) {
        self.members.remove(&fd);
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.members.contains(&fd)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.members.iter().copied()
    }
}

/// The process-wide table of rooms, keyed by name.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<String, Room>,
}

impl RoomTable {
    pub fn new() -> RoomTable {
        RoomTable::default()
    }

    pub fn join(&mut self, room: &str, fd: RawFd) {
        self.rooms.entry(room.to_string()).or_default().join(fd);
    }

    /// Removes `fd` from `room`, dropping the room entirely once empty.
    pub fn leave(&mut self, room: &str, fd: RawFd) {
        if let Some(r) = self.rooms.get_mut(room) {
            r.leave(fd);
            if r.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// Removes `fd` from every room it belongs to (connection teardown).
    pub fn leave_all(&mut self, fd: RawFd) {
        self.rooms.retain(|_, r| {
            r.leave(fd);
            !r.is_empty()
        });
    }

    pub fn get(&self, room: &str) -> Option<&Room> {
        self.rooms.get(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
