//! Per-exchange cookie ledger.

use super::Headers;

/// Name → value cookie store for a single exchange.
///
/// The ledger starts out holding whatever the client sent in its `Cookie`
/// headers. Only once a handler changes something is it considered *touched*,
/// and only a touched ledger is written back as `Set-Cookie` lines.
#[derive(Debug, Clone, Default)]
pub struct CookieLedger {
    entries: Vec<(String, String)>,
    touched: bool,
}

impl CookieLedger {
    /// Creates an empty, untouched ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a ledger from the request's `Cookie` headers. The result is untouched.
    pub fn from_request_headers(headers: &Headers) -> Self {
        let mut ledger = Self::new();
        for pair in headers.get_all("cookie").flat_map(|value| value.split(';')) {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            ledger.upsert(name, value.trim());
        }
        ledger
    }

    /// Returns the current value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `name` to `value` and marks the ledger touched.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.upsert(name, value);
        self.touched = true;
    }

    /// Removes `name`. Marks the ledger touched only if something was removed.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == name)?;
        self.touched = true;
        Some(self.entries.remove(pos).1)
    }

    /// Whether a handler has changed the ledger since it was seeded.
    ///
    /// # Returns
    ///
    /// `true` once [`set`](Self::set) has run, or [`remove`](Self::remove) has
    /// removed something. The response writer emits `Set-Cookie` lines only then.
    pub fn is_touched(&self) -> bool {
        self.touched
    }

    /// Number of cookies currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders one `Set-Cookie: name=value\r\n` line per entry, or an empty string
    /// when the ledger is untouched.
    pub fn to_cookie_data(&self) -> String {
        if !self.touched {
            return String::new();
        }
        self.entries
            .iter()
            .map(|(name, value)| format!("Set-Cookie: {name}={value}\r\n"))
            .collect()
    }

    fn upsert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }
}
