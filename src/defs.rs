//! Constants shared by the provider, its consumer and the tests.

/// Port the provider listens on when none is given.
pub const DEFAULT_PORT: &str = "14002";

/// Service name published in the source directory when none is given.
pub const DEFAULT_SERVICE_NAME: &str = "DIRECT_FEED";

/// Service id published in the source directory when none is given.
pub const DEFAULT_SERVICE_ID: u16 = 1;

/// How long the provider runs before shutting every session down, in seconds.
pub const DEFAULT_RUNTIME_SEC: u64 = 1200;

/// Readiness wait timeout in milliseconds.
///
/// This interval doubles as the publish cadence: every wait that times out
/// with no socket ready triggers one round of item updates.
pub const UPDATE_INTERVAL_MSEC: u64 = 1000;

/// Maximum number of concurrently admitted client sessions.
pub const MAX_CLIENT_SESSIONS: usize = 10;

/// Ping timeout offered to consumers during channel negotiation, in seconds.
///
/// A consumer may ask for a smaller value; the smaller of the two wins.
pub const DEFAULT_PING_TIMEOUT_SEC: u16 = 60;

/// Lower bound on any negotiated ping timeout, in seconds.
///
/// Pings are sent every third of the timeout, so anything below three
/// seconds would ping on every loop iteration.
pub const MIN_PING_TIMEOUT_SEC: u16 = 3;

/// Component version announced during channel negotiation.
pub const COMPONENT_VERSION: &str = concat!("market_provider ", env!("CARGO_PKG_VERSION"));

/// Largest frame accepted on the wire, header excluded.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Maximum number of item streams a single session may hold open.
pub const MAX_ITEMS_PER_SESSION: usize = 100;

/// Stream used to download the field dictionary from an upstream peer.
pub const FIELD_DICTIONARY_STREAM_ID: i32 = 3;

/// Stream used to download the enum-type dictionary from an upstream peer.
pub const ENUM_DICTIONARY_STREAM_ID: i32 = 4;

/// Name of the field dictionary on the dictionary domain.
pub const FIELD_DICTIONARY_NAME: &str = "RWFFld";

/// Name of the enum-type dictionary on the dictionary domain.
pub const ENUM_DICTIONARY_NAME: &str = "RWFEnum";

/// Price volatility coefficient used by the price generator.
///
/// This value determines how much an item price may change
/// during a single update tick.
pub const VOLATILITY: f64 = 0.000082;

/// Number of resting orders seeded into a new market-by-order item.
pub const ORDERS_PER_BOOK: usize = 3;

/// Upper bound on flush attempts per session while shutting down.
pub const MAX_SHUTDOWN_FLUSH_ATTEMPTS: usize = 1000;
