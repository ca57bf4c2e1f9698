/// Wire protocol revision, bumped on incompatible `Envelope` changes
pub const PROTOCOL_VERSION: u16 = 1;

/// Default chat listener port
pub const DEFAULT_CHAT_PORT: u16 = 5555;

/// Default HTTP status API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum attachment size in bytes (25 MiB)
pub const MAX_FILE_SIZE: usize = 25 * 1024 * 1024;

/// Room for the envelope fields on top of an attachment
pub const FRAME_OVERHEAD: usize = 64 * 1024;

/// Maximum frame size: one attachment plus room for the envelope fields
pub const MAX_FRAME_SIZE: usize = MAX_FILE_SIZE + FRAME_OVERHEAD;

/// Maximum number of members in a group, admins included
pub const MAX_GROUP_MEMBERS: usize = 10;

/// Number of decimal digits in a one-time login code
pub const CODE_LENGTH: usize = 6;

/// One-time code lifetime in seconds
pub const CODE_TTL_SECS: u64 = 300;

/// Number of history entries returned per GET_HISTORY request
pub const HISTORY_LIMIT: u32 = 200;

/// Number of users returned per SEARCH_USERS request
pub const SEARCH_LIMIT: u32 = 20;
