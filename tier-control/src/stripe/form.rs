//! Ordered form bodies for the Stripe wire protocol.
//!
//! Stripe speaks `application/x-www-form-urlencoded` with a dynamic key
//! shape: repeated keys carry a `[]` suffix (`expand[]=a&expand[]=b`),
//! nested maps flatten to bracketed paths (`metadata[foo]=bar`,
//! `tiers[0][up_to]=10`). Rather than model that as a tree, a [`Form`] is an
//! ordered list of `(key, value)` pairs with a small set of typed setters;
//! encoding is a single pass and insertion order is preserved on the wire.
//!
//! An idempotency key rides on the form but is carried as the
//! `Idempotency-Key` HTTP header, never as a body field.

use chrono::{DateTime, Utc};

/// A value that can be written into a [`Form`] field.
///
/// Integers encode decimal, booleans as `true`/`false`, timestamps as Unix
/// seconds.
pub trait FormValue {
    /// The wire representation of the value.
    fn to_form_value(&self) -> String;
}

impl FormValue for &str {
    fn to_form_value(&self) -> String {
        (*self).to_owned()
    }
}

impl FormValue for String {
    fn to_form_value(&self) -> String {
        self.clone()
    }
}

impl FormValue for i64 {
    fn to_form_value(&self) -> String {
        self.to_string()
    }
}

impl FormValue for u64 {
    fn to_form_value(&self) -> String {
        self.to_string()
    }
}

impl FormValue for bool {
    fn to_form_value(&self) -> String {
        if *self { "true".to_owned() } else { "false".to_owned() }
    }
}

impl FormValue for DateTime<Utc> {
    fn to_form_value(&self) -> String {
        self.timestamp().to_string()
    }
}

/// A mutable ordered multimap of form fields.
#[derive(Debug, Clone, Default)]
pub struct Form {
    pairs: Vec<(String, String)>,
    idempotency_key: Option<String>,
}

impl Form {
    /// Creates an empty form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any previous occurrences.
    pub fn set(&mut self, key: impl Into<String>, value: impl FormValue) {
        let key = key.into();
        self.pairs.retain(|(k, _)| *k != key);
        self.pairs.push((key, value.to_form_value()));
    }

    /// Appends another `value` under `key`, keeping existing occurrences.
    ///
    /// This is the setter for repeated keys such as `expand[]`.
    pub fn add(&mut self, key: impl Into<String>, value: impl FormValue) {
        self.pairs.push((key.into(), value.to_form_value()));
    }

    /// Returns the first value set for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets the idempotency key carried as the `Idempotency-Key` header.
    pub fn set_idempotency_key(&mut self, key: impl Into<String>) {
        self.idempotency_key = Some(key.into());
    }

    /// The idempotency key, if one was set.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// The ordered field pairs.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Reports whether the form has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Percent-encodes the fields in insertion order.
    #[must_use]
    pub fn encode(&self) -> String {
        // Vec<(String, String)> serializes as a sequence of pairs, which is
        // exactly the urlencoded wire shape, in order.
        serde_urlencoded::to_string(&self.pairs).unwrap_or_default()
    }
}
