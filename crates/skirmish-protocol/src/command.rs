//! Lobby command identifiers.
//!
//! Client questions and the server's notices share one 16-bit space. Only
//! the commands the coordinator handles are listed; anything else is
//! logged and, if it is a question, answered generically.

pub const LINE_CHECK: u16 = 0x6001;
pub const LOGOUT: u16 = 0x6002;
pub const LOGIN: u16 = 0x6110;

pub const LOBBY_ENTER: u16 = 0x6205;
pub const LOBBY_EXIT: u16 = 0x6206;
pub const LOBBY_STATUS: u16 = 0x6207;

pub const ROOM_ENTER: u16 = 0x6407;
pub const ROOM_EXIT: u16 = 0x6408;
pub const ROOM_CREATE: u16 = 0x6409;
pub const ROOM_CLOSED: u16 = 0x6413;
pub const ENTRY: u16 = 0x640F;
pub const ENTRY_CANCEL: u16 = 0x6410;

pub const ROOM_READY: u16 = 0x6910;
pub const BATTLE_READY: u16 = 0x6911;
pub const BATTLE_RESULT: u16 = 0x6912;

/// Human-readable name for logs.
pub fn name(command: u16) -> &'static str {
    match command {
        LINE_CHECK => "LINE_CHECK",
        LOGOUT => "LOGOUT",
        LOGIN => "LOGIN",
        LOBBY_ENTER => "LOBBY_ENTER",
        LOBBY_EXIT => "LOBBY_EXIT",
        LOBBY_STATUS => "LOBBY_STATUS",
        ROOM_ENTER => "ROOM_ENTER",
        ROOM_EXIT => "ROOM_EXIT",
        ROOM_CREATE => "ROOM_CREATE",
        ROOM_CLOSED => "ROOM_CLOSED",
        ENTRY => "ENTRY",
        ENTRY_CANCEL => "ENTRY_CANCEL",
        ROOM_READY => "ROOM_READY",
        BATTLE_READY => "BATTLE_READY",
        BATTLE_RESULT => "BATTLE_RESULT",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_known_and_unknown() {
        assert_eq!(name(LOGIN), "LOGIN");
        assert_eq!(name(0x0000), "UNKNOWN");
    }
}
