//! Message header model.
//!
//! [`Header`] keeps fields in wire order with their raw values, so a header
//! parsed from a message can be written back verbatim (the delivery status
//! report relies on that). [`SharedHeader`] is the lock-guarded handle given
//! to body-stage checks that run concurrently.

use std::{io, sync::Arc};

use mailparse::MailParseError;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    value: String,
    /// Wire bytes of name and value, kept when they are not UTF-8
    raw: Option<(Box<[u8]>, Box<[u8]>)>,
}

impl Field {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            raw: None,
        }
    }

    fn from_wire(name: &[u8], value: &[u8]) -> Self {
        match (std::str::from_utf8(name), std::str::from_utf8(value)) {
            (Ok(name), Ok(value)) => Self::new(name, value),
            _ => Self {
                name: String::from_utf8_lossy(name).into_owned(),
                value: String::from_utf8_lossy(value).into_owned(),
                raw: Some((name.into(), value.into())),
            },
        }
    }

    fn name_bytes(&self) -> &[u8] {
        self.raw
            .as_ref()
            .map_or(self.name.as_bytes(), |(name, _)| &**name)
    }

    fn value_bytes(&self) -> &[u8] {
        self.raw
            .as_ref()
            .map_or(self.value.as_bytes(), |(_, value)| &**value)
    }
}

impl Header {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Parse the header section of a raw message.
    ///
    /// Parsing stops at the first empty line; the returned offset is where the
    /// body starts. Values that are not UTF-8 are shown lossily by the `&str`
    /// accessors but written back byte for byte.
    ///
    /// # Errors
    /// If the header section is malformed
    pub fn parse(raw: &[u8]) -> Result<(Self, usize), MailParseError> {
        let (headers, offset) = mailparse::parse_headers(raw)?;
        let fields = headers
            .iter()
            .map(|h| Field::from_wire(h.get_key_raw(), h.get_value_raw()))
            .collect();

        Ok((Self { fields }, offset))
    }

    /// Append a field after all existing ones.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push(Field::new(key, value));
    }

    /// Insert a field before all existing ones, where trace fields belong.
    pub fn prepend(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(0, Field::new(key, value));
    }

    /// Append every field of `other`, keeping its wire bytes.
    pub fn append(&mut self, other: &Self) {
        self.fields.extend_from_slice(&other.fields);
    }

    /// First value for `key`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).next()
    }

    pub fn get_all<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + use<'a, 'k> {
        self.matching(key).map(|f| f.value.as_str())
    }

    /// First value for `key` exactly as it appeared on the wire.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&[u8]> {
        self.matching(key).next().map(Field::value_bytes)
    }

    fn matching<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a Field> + use<'a, 'k> {
        self.fields
            .iter()
            .filter(move |f| f.name.eq_ignore_ascii_case(key))
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove every field named `key`.
    pub fn remove(&mut self, key: &str) {
        self.fields.retain(|f| !f.name.eq_ignore_ascii_case(key));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write every field as `Key: value\r\n`, followed by the empty line that
    /// terminates a header section.
    ///
    /// # Errors
    /// If the writer fails
    pub fn write_to<W: io::Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        for field in &self.fields {
            w.write_all(field.name_bytes())?;
            w.write_all(b": ")?;
            w.write_all(field.value_bytes())?;
            w.write_all(b"\r\n")?;
        }
        w.write_all(b"\r\n")
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Header {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| Field::new(k, v)).collect(),
        }
    }
}

/// A header shared by all body-stage checks of one message.
///
/// Inspection takes the read lock, so any number of checks may look at the
/// header at once; mutation takes the write lock and excludes every other
/// check for its duration. Guards must not be held across unrelated awaits.
#[derive(Debug, Clone, Default)]
pub struct SharedHeader(Arc<RwLock<Header>>);

impl SharedHeader {
    #[must_use]
    pub fn new(header: Header) -> Self {
        Self(Arc::new(RwLock::new(header)))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Header> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Header> {
        self.0.write().await
    }

    /// Clone the current contents.
    pub async fn snapshot(&self) -> Header {
        self.0.read().await.clone()
    }
}

impl From<Header> for SharedHeader {
    fn from(value: Header) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_and_write_verbatim() {
        let raw = b"From: alice@example.com\r\nSubject: hello\r\n there\r\nTo: bob@example.org\r\n\r\nbody";
        let (header, offset) = Header::parse(raw).unwrap();

        assert_eq!(header.len(), 3);
        assert_eq!(&raw[offset..], b"body");
        assert_eq!(header.get("subject"), Some("hello\r\n there"));
        assert_eq!(
            String::from_utf8(header.to_bytes()).unwrap(),
            "From: alice@example.com\r\nSubject: hello\r\n there\r\nTo: bob@example.org\r\n\r\n"
        );
    }

    #[test]
    fn test_eight_bit_values_survive() {
        let raw = b"Subject: caf\xe9\r\nFrom: alice@example.com\r\n\r\n";
        let (header, _) = Header::parse(raw).unwrap();

        assert_eq!(header.get("subject"), Some("caf\u{fffd}"));
        assert_eq!(header.get_raw("subject"), Some(&b"caf\xe9"[..]));
        assert_eq!(header.to_bytes(), raw.to_vec());

        let mut copy = Header::from_iter([("Return-Path", "<alice@example.com>")]);
        copy.append(&header);
        assert!(copy.to_bytes().ends_with(raw));
    }

    #[test]
    fn test_prepend_and_lookup() {
        let mut header = Header::new();
        header.add("Subject", "test");
        header.add("Received", "second");
        header.prepend("Return-Path", "<alice@example.com>");
        header.prepend("Received", "first");

        assert_eq!(header.get("return-path"), Some("<alice@example.com>"));
        assert_eq!(
            header.get_all("RECEIVED").collect::<Vec<_>>(),
            vec!["first", "second"]
        );
        assert_eq!(header.iter().next(), Some(("Received", "first")));

        header.remove("received");
        assert_eq!(header.len(), 2);
    }

    #[tokio::test]
    async fn test_shared_header_write_visible_to_readers() {
        let shared = SharedHeader::new(Header::from_iter([("Subject", "hi")]));
        let other = shared.clone();

        other.write().await.add("X-Spam-Score", "0.1");

        let guard = shared.read().await;
        assert_eq!(guard.get("x-spam-score"), Some("0.1"));
        drop(guard);

        assert_eq!(shared.snapshot().await.len(), 2);
    }
}
