/// Room constants
pub mod room {
    /// The broadcast scope every joined player belongs to
    pub const GLOBAL_ROOM: &str = "globalRoom";
    /// Maximum room name length (characters) for lobby rooms
    pub const MAX_NAME_LEN: usize = 32;
    /// Maximum members per lobby room (the global room is unbounded)
    pub const MAX_MEMBERS: usize = 64;
    /// Maximum concurrent rooms, including the global room
    pub const DEFAULT_MAX_ROOMS: usize = 100;
}

/// Player identity constants
pub mod player {
    /// Maximum pseudo length (characters) after sanitization
    pub const MAX_PSEUDO_LEN: usize = 24;
}

/// Chat constants
pub mod chat {
    /// Maximum chat message length (characters) after sanitization
    pub const MAX_MESSAGE_LEN: usize = 256;
}

/// Map constants
pub mod map {
    /// Prefab identifier marking the spawn point in a map definition
    pub const SPAWN_PREFAB_ID: &str = "cat_spawn";
}

/// Map rotation constants
pub mod rotation {
    /// Seconds between rotation cycles
    pub const DEFAULT_INTERVAL_SECS: u64 = 30;
}

/// Network constants
pub mod net {
    /// Maximum framed message size
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Seconds without any inbound message before a connection is reaped
    pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
    /// Seconds between idle reaper sweeps
    pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 5;
    /// Maximum concurrent connections
    pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;
}
