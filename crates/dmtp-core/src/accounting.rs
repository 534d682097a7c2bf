//! Connection accounting: rolling per-minute connection counters and the
//! quota/timer checks that decide when, and over which channel, to connect.
//!
//! # The mask
//!
//! Each channel (simplex, duplex) keeps a bit register of up to 240 bits,
//! one per minute, stored as up to eight 30-bit words.  Bit 0 of word 0 is
//! the current minute.  As time passes the register is shifted left by the
//! number of elapsed whole minutes, so bits older than the quota window fall
//! off the end:
//!
//! ```text
//! word 0: minutes  0..29    word 1: minutes 30..59    ...    word 7: 210..239
//! ```
//!
//! The window length comes from `PROP_COMM_MAX_CONNECTIONS[2]` (minutes) and
//! is rounded up to whole words, clamped to `1..=8`.

use tracing::{debug, warn};

use crate::props::keys::*;
use crate::props::store::PropertyStore;
use crate::protocol::messages::Priority;

/// Maximum number of 30-bit words in a mask (4 hours).
pub const MAX_MASK_LEN: usize = 8;
const BITS_PER_WORD: u32 = 30;
const WORD_MASK: u32 = (1 << BITS_PER_WORD) - 1;

/// Which channel to open, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportType {
    #[default]
    None,
    Simplex,
    Duplex,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransportType::None => "none",
            TransportType::Simplex => "simplex",
            TransportType::Duplex => "duplex",
        })
    }
}

// ── AccountingMask ────────────────────────────────────────────────────────────

/// Rolling per-minute connection register for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountingMask {
    /// Time of the last shift, seconds.  Advances in whole minutes.
    shift_time: u32,
    /// Time of the last marked connection, seconds (0 = never).
    last_conn_time: u32,
    mask: [u32; MAX_MASK_LEN],
}

impl AccountingMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of words needed to cover `window_minutes`.
    pub fn mask_len(window_minutes: i64) -> usize {
        let words = (window_minutes.max(0) as usize).div_ceil(BITS_PER_WORD as usize);
        words.clamp(1, MAX_MASK_LEN)
    }

    pub fn last_connection(&self) -> u32 {
        self.last_conn_time
    }

    /// Ages the register to `now`, discarding minutes beyond `len` words.
    pub fn shift(&mut self, now: u32, len: usize) {
        let len = len.clamp(1, MAX_MASK_LEN);
        if self.shift_time == 0 || now < self.shift_time {
            self.shift_time = now;
            return;
        }
        let minutes = (now - self.shift_time) / 60;
        if minutes == 0 {
            return;
        }
        if minutes as usize >= len * BITS_PER_WORD as usize {
            self.mask = [0; MAX_MASK_LEN];
        } else {
            let word_shift = (minutes / BITS_PER_WORD) as usize;
            let bit_shift = minutes % BITS_PER_WORD;
            for i in (0..len).rev() {
                self.mask[i] = if i < word_shift {
                    0
                } else {
                    let src = i - word_shift;
                    let mut v = (self.mask[src] << bit_shift) & WORD_MASK;
                    if bit_shift > 0 && src > 0 {
                        v |= self.mask[src - 1] >> (BITS_PER_WORD - bit_shift);
                    }
                    v
                };
            }
            for w in &mut self.mask[len..] {
                *w = 0;
            }
        }
        self.shift_time += minutes * 60;
    }

    /// Records a connection at `now`.  Returns `false` if one was already
    /// recorded in the same minute.
    pub fn mark_connection(&mut self, now: u32, len: usize) -> bool {
        self.shift(now, len);
        self.last_conn_time = now;
        let fresh = self.mask[0] & 1 == 0;
        self.mask[0] |= 1;
        fresh
    }

    /// Connections recorded in the first `len` words.
    pub fn count_connections(&self, len: usize) -> u32 {
        self.mask[..len.clamp(1, MAX_MASK_LEN)]
            .iter()
            .map(|w| w.count_ones())
            .sum()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ── Accounting ────────────────────────────────────────────────────────────────

/// The two channel registers and the quota decisions built on them.
///
/// Every check takes the current time and the property store explicitly,
/// so tests can drive the clock.
#[derive(Debug, Clone, Default)]
pub struct Accounting {
    simplex: AccountingMask,
    duplex: AccountingMask,
}

fn window_len(props: &PropertyStore) -> usize {
    AccountingMask::mask_len(props.get_long_at(PROP_COMM_MAX_CONNECTIONS, 2, 60))
}

fn elapsed(now: u32, since: u32) -> i64 {
    i64::from(now) - i64::from(since)
}

impl Accounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simplex(&self) -> &AccountingMask {
        &self.simplex
    }

    pub fn duplex(&self) -> &AccountingMask {
        &self.duplex
    }

    pub fn mark_simplex_connection(&mut self, props: &PropertyStore, now: u32) -> bool {
        let fresh = self.simplex.mark_connection(now, window_len(props));
        if !fresh {
            warn!("two simplex connections within one minute");
        }
        fresh
    }

    pub fn mark_duplex_connection(&mut self, props: &PropertyStore, now: u32) -> bool {
        let fresh = self.duplex.mark_connection(now, window_len(props));
        if !fresh {
            warn!("two duplex connections within one minute");
        }
        fresh
    }

    fn counts(&mut self, props: &PropertyStore, now: u32) -> (u32, u32) {
        let len = window_len(props);
        self.simplex.shift(now, len);
        self.duplex.shift(now, len);
        (
            self.simplex.count_connections(len),
            self.duplex.count_connections(len),
        )
    }

    /// Simplex plus duplex connections in the window are below the total limit.
    pub fn is_under_total_quota(&mut self, props: &PropertyStore, now: u32) -> bool {
        let (s, d) = self.counts(props, now);
        i64::from(s + d) < props.get_long_at(PROP_COMM_MAX_CONNECTIONS, 0, 0)
    }

    /// Duplex connections in the window are below the duplex limit.
    pub fn is_under_duplex_quota(&mut self, props: &PropertyStore, now: u32) -> bool {
        let (_, d) = self.counts(props, now);
        i64::from(d) < props.get_long_at(PROP_COMM_MAX_CONNECTIONS, 1, 0)
    }

    /// Some channel can still be used in this window.
    pub fn has_quota(&mut self, props: &PropertyStore, now: u32) -> bool {
        if !self.is_under_total_quota(props, now) {
            return false;
        }
        Self::supports_simplex(props) || (Self::supports_duplex(props) && self.is_under_duplex_quota(props, now))
    }

    pub fn supports_duplex(props: &PropertyStore) -> bool {
        props.get_long(PROP_COMM_MAX_DUP_EVENTS, 0) > 0
            && props.get_long_at(PROP_COMM_MAX_CONNECTIONS, 1, 0) > 0
    }

    pub fn supports_simplex(props: &PropertyStore) -> bool {
        props.get_long(PROP_COMM_MAX_SIM_EVENTS, 0) > 0
            && props.get_long_at(PROP_COMM_MAX_CONNECTIONS, 0, 0)
                > props.get_long_at(PROP_COMM_MAX_CONNECTIONS, 1, 0)
    }

    fn last_connection(&self) -> u32 {
        self.simplex.last_connection().max(self.duplex.last_connection())
    }

    /// At least `PROP_COMM_MIN_XMIT_DELAY` seconds since any connection.
    pub fn absolute_delay_expired(&self, props: &PropertyStore, now: u32) -> bool {
        let last = self.last_connection();
        last == 0 || elapsed(now, last) >= props.get_long(PROP_COMM_MIN_XMIT_DELAY, 0)
    }

    /// At least `PROP_COMM_MIN_XMIT_RATE` seconds since any connection.
    pub fn min_interval_expired(&self, props: &PropertyStore, now: u32) -> bool {
        let last = self.last_connection();
        last == 0 || elapsed(now, last) >= props.get_long(PROP_COMM_MIN_XMIT_RATE, 0)
    }

    /// A periodic duplex check-in is due (`PROP_COMM_MAX_XMIT_RATE`, 0 = never).
    pub fn max_interval_expired(&self, props: &PropertyStore, now: u32) -> bool {
        let rate = props.get_long(PROP_COMM_MAX_XMIT_RATE, 0);
        if rate <= 0 {
            return false;
        }
        let last = self.duplex.last_connection();
        last == 0 || elapsed(now, last) >= rate
    }

    /// Chooses the channel for the highest queued `priority`.
    ///
    /// The absolute minimum delay between connections is checked first and
    /// overrides everything else.
    pub fn transport_type(&mut self, props: &PropertyStore, priority: Priority, now: u32) -> TransportType {
        if !self.absolute_delay_expired(props, now) {
            return TransportType::None;
        }
        let duplex_ok = Self::supports_duplex(props);
        let simplex_ok = Self::supports_simplex(props);
        let chosen = match priority {
            Priority::None => {
                if self.is_under_total_quota(props, now)
                    && self.max_interval_expired(props, now)
                    && duplex_ok
                    && self.is_under_duplex_quota(props, now)
                {
                    TransportType::Duplex
                } else {
                    TransportType::None
                }
            }
            Priority::Low => {
                if !self.is_under_total_quota(props, now) || !self.min_interval_expired(props, now) {
                    TransportType::None
                } else if simplex_ok {
                    TransportType::Simplex
                } else if duplex_ok && self.is_under_duplex_quota(props, now) {
                    TransportType::Duplex
                } else {
                    TransportType::None
                }
            }
            Priority::Normal => {
                if !self.is_under_total_quota(props, now) {
                    TransportType::None
                } else if duplex_ok && self.is_under_duplex_quota(props, now) {
                    TransportType::Duplex
                } else if !duplex_ok && simplex_ok {
                    TransportType::Simplex
                } else {
                    TransportType::None
                }
            }
            Priority::High => {
                if duplex_ok && self.is_under_duplex_quota(props, now) {
                    TransportType::Duplex
                } else if !duplex_ok && simplex_ok {
                    TransportType::Simplex
                } else {
                    warn!("high priority data queued but no channel is available");
                    TransportType::None
                }
            }
        };
        if chosen != TransportType::None {
            debug!(?priority, transport = %chosen, "transport selected");
        }
        chosen
    }
}
