use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

/// A single upstream registration, keyed in the cache by the gateway URI
/// string `sip:<username>@<host>`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationEntry {
    pub username: String,
    pub host: String,
    /// Resolved address for `host` at registration time.
    pub ip: String,
    /// Effective lifetime in seconds. May be zero or negative when the
    /// server granted less than the re-registration safety margin; such an
    /// entry is born expired but still visible in `snapshot`.
    pub expires: i64,
    #[serde(skip)]
    registered_on: Instant,
    pub registered_at: DateTime<Utc>,
    /// Relative age string for operator views, refreshed on `snapshot`.
    pub registered_ago: String,
}

impl RegistrationEntry {
    pub fn new(username: String, host: String, ip: String, expires: i64) -> Self {
        Self {
            username,
            host,
            ip,
            expires,
            registered_on: Instant::now(),
            registered_at: Utc::now(),
            registered_ago: format_elapsed(Duration::ZERO),
        }
    }

    pub fn age(&self) -> Duration {
        self.registered_on.elapsed()
    }

    /// Live while the age in whole seconds stays below the effective
    /// lifetime.
    pub fn is_live(&self) -> bool {
        (self.age().as_secs() as i64) < self.expires
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0..=4 => "just now".to_string(),
        5..=59 => format!("{} seconds ago", secs),
        60..=3599 => format!("{} minutes ago", secs / 60),
        _ => format!("{} hours ago", secs / 3600),
    }
}

struct StoredEntry {
    entry: RegistrationEntry,
    written_at: Instant,
}

/// Write-expiring map of current upstream registrations.
///
/// Two timers coexist and stay independent: the hard write-expiry evicts
/// any entry a fixed interval after its last write so dead gateways never
/// linger, while the entry's own `expires` drives `is_expired` and the
/// re-registration schedule.
pub struct RegistrationCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
    write_expiry: Duration,
    safety_margin: i64,
}

impl RegistrationCache {
    pub fn new(check_expires_minutes: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            write_expiry: Duration::from_secs(check_expires_minutes * 60),
            safety_margin: 2 * 60 * check_expires_minutes as i64,
        }
    }

    /// Override the eviction interval, for tests.
    pub fn with_write_expiry(mut self, write_expiry: Duration) -> Self {
        self.write_expiry = write_expiry;
        self
    }

    /// Lifetime stored for a server-granted `Expires`. The local view
    /// expires two check intervals before the server's so a re-REGISTER
    /// goes out in time even with one missed pass.
    pub fn effective_expires(&self, granted: u32) -> i64 {
        granted as i64 - self.safety_margin
    }

    /// Insert or replace, resetting the write-expiry timer for the key.
    pub fn put(&self, uri: &str, entry: RegistrationEntry) {
        self.entries.write().unwrap().insert(
            uri.to_string(),
            StoredEntry {
                entry,
                written_at: Instant::now(),
            },
        );
    }

    pub fn get_if_present(&self, uri: &str) -> Option<RegistrationEntry> {
        {
            let entries = self.entries.read().unwrap();
            match entries.get(uri) {
                Some(stored) if stored.written_at.elapsed() < self.write_expiry => {
                    return Some(stored.entry.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().unwrap().remove(uri);
        None
    }

    pub fn invalidate(&self, uri: &str) {
        self.entries.write().unwrap().remove(uri);
    }

    /// True when no entry exists for the key or the entry outlived its
    /// effective lifetime. Either way the gateway is due a re-REGISTER.
    pub fn is_expired(&self, uri: &str) -> bool {
        match self.get_if_present(uri) {
            Some(entry) => !entry.is_live(),
            None => true,
        }
    }

    /// Copy of every entry not yet write-evicted, age strings refreshed.
    /// Logically expired entries are included for operator visibility.
    pub fn snapshot(&self) -> Vec<RegistrationEntry> {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, stored| stored.written_at.elapsed() < self.write_expiry);
        entries
            .values()
            .map(|stored| {
                let mut entry = stored.entry.clone();
                entry.registered_ago = format_elapsed(entry.age());
                entry
            })
            .collect()
    }
}
