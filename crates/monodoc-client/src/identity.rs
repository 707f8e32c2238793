//! Document identifier generation.
//!
//! An identifier is 28 lower-case hex characters: a 4 character prefix fixed
//! for the lifetime of the source, an 8 character unix time component and a
//! 16 character serial. Within one source the serial strictly increases, so
//! identifiers generated back to back sort in generation order.

use std::{sync::Arc, time::Duration};

use monodoc_common::{DocError, Result};
use parking_lot::Mutex;
use rand::Rng;

pub const PREFIX_LEN: usize = 4;
pub const TIME_LEN: usize = 8;
pub const SERIAL_LEN: usize = 16;
pub const ID_LEN: usize = PREFIX_LEN + TIME_LEN + SERIAL_LEN;

/// Coarse clock used for the time component.
pub trait TimeSource: Send + Sync {
    /// Seconds since the unix epoch.
    fn now_secs(&self) -> u64;
}

/// Wall clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_secs(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

struct IdentityState {
    timestamp: u64,
    refreshed_at: u64,
    serial: [u8; SERIAL_LEN],
}

/// Generator of unique, ordered document identifiers.
///
/// One source is shared by `Arc` between every insertion path of a session.
pub struct IdentitySource {
    prefix: String,
    refresh_interval: Duration,
    clock: Arc<dyn TimeSource>,
    state: Mutex<IdentityState>,
}

impl std::fmt::Debug for IdentitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySource")
            .field("prefix", &self.prefix)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

impl IdentitySource {
    /// Create a source on the system clock. A random prefix is chosen when
    /// none is given.
    pub fn new(prefix: Option<&str>, refresh_interval: Duration) -> Result<Self> {
        Self::with_clock(prefix, refresh_interval, Arc::new(SystemClock))
    }

    pub fn with_clock(
        prefix: Option<&str>,
        refresh_interval: Duration,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let prefix = match prefix {
            Some(p) => validate_prefix(p)?,
            None => random_prefix(),
        };
        let now = clock.now_secs();

        Ok(Self {
            prefix,
            refresh_interval,
            clock,
            state: Mutex::new(IdentityState {
                timestamp: now,
                refreshed_at: now,
                serial: [b'0'; SERIAL_LEN],
            }),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The serial of the most recently generated identifier.
    pub fn peek_serial(&self) -> String {
        let state = self.state.lock();
        String::from_utf8_lossy(&state.serial).into_owned()
    }

    /// Generate the next identifier.
    pub fn next_id(&self) -> String {
        let mut state = self.state.lock();

        let now = self.clock.now_secs();
        if now.saturating_sub(state.refreshed_at) >= self.refresh_interval.as_secs() {
            state.refreshed_at = now;
            // The time component never goes backwards
            state.timestamp = state.timestamp.max(now);
        }

        increment_hex(&mut state.serial);

        let mut id = String::with_capacity(ID_LEN);
        id.push_str(&self.prefix);
        id.push_str(&format!("{:08x}", state.timestamp & 0xffff_ffff));
        id.push_str(&String::from_utf8_lossy(&state.serial));
        id
    }
}

fn validate_prefix(prefix: &str) -> Result<String> {
    if prefix.len() == PREFIX_LEN && prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(prefix.to_ascii_lowercase())
    } else {
        Err(DocError::Config(format!(
            "Identifier prefix must be {PREFIX_LEN} hex characters, got '{prefix}'"
        )))
    }
}

fn random_prefix() -> String {
    let value: u16 = rand::rng().random();
    format!("{value:04x}")
}

/// Advance a hex odometer by one: `0-9` then `a-f`, carrying to the left.
/// Overflow wraps to all zeros.
fn increment_hex(digits: &mut [u8]) {
    for digit in digits.iter_mut().rev() {
        match *digit {
            b'0'..=b'8' | b'a'..=b'e' => {
                *digit += 1;
                return;
            }
            b'9' => {
                *digit = b'a';
                return;
            }
            _ => *digit = b'0',
        }
    }
}
