/// Largest body a 2-byte length prefix can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Size of the big-endian length prefix in front of every frame.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Default slice size when the server re-chunks an image (8 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Default cap on one reassembled payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Start of a chunk sequence, followed by the decimal slice count.
pub const IMG_START: &str = "[IMG_START]";

/// End of a chunk sequence.
pub const IMG_END: &str = "[IMG_END]";

/// Tag at the front of an image payload: `[IMG]<sender>|<base64>`.
pub const IMG_TAG: &str = "[IMG]";

/// Separates the sender name from the base64 body in an image payload.
pub const IMG_SEPARATOR: char = '|';

/// Prefix of a registration request: `REGISTER:<user>,<password>`.
pub const REGISTER_PREFIX: &str = "REGISTER:";

/// Separates username and password in credential frames.
pub const CREDENTIAL_SEPARATOR: char = ',';

/// Prefix of an addressed message: `@<recipient>：<body>`.
pub const PRIVATE_PREFIX: char = '@';

/// Full-width colon between recipient and body.
pub const PRIVATE_DELIMITER: char = '：';

/// Prefix of client commands.
pub const COMMAND_PREFIX: &str = "@@";

pub const CMD_LIST: &str = "@@list";
pub const CMD_QUIT: &str = "@@quit";
pub const CMD_ANONYMOUS: &str = "@@anonymous";

/// Client disconnect notice, and the server's goodbye after `@@quit`.
pub const EXIT: &str = "##exit";

/// Prefix of generated pseudonyms; a number in `0..PSEUDONYM_RANGE` follows.
pub const PSEUDONYM_PREFIX: &str = "匿名用户";
pub const PSEUDONYM_RANGE: u32 = 10_000;
