use std::{ops::Deref, sync::Arc};

/// Immutable message body, cheap to clone and share between checks and
/// storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageBody(Arc<[u8]>);

impl MessageBody {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for MessageBody {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for MessageBody {
    fn from(value: Vec<u8>) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&[u8]> for MessageBody {
    fn from(value: &[u8]) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for MessageBody {
    fn from(value: &str) -> Self {
        Self::from(value.as_bytes())
    }
}

impl From<Arc<[u8]>> for MessageBody {
    fn from(value: Arc<[u8]>) -> Self {
        Self(value)
    }
}
