use std::collections::HashMap;

use rdkafka::message::{BorrowedMessage, Header, Headers, OwnedHeaders};
use rdkafka::Message;

/// A single record pulled from a topic partition, detached from the
/// underlying rdkafka buffers so the engine owns it for the whole
/// processing lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<Vec<u8>>,
    pub headers: HashMap<String, Vec<u8>>,
    pub payload: Vec<u8>,
}

impl ConsumedRecord {
    pub fn from_borrowed(message: &BorrowedMessage<'_>) -> Self {
        let mut headers = HashMap::new();
        if let Some(header_map) = message.headers() {
            for header in header_map.iter() {
                if let Some(value) = header.value {
                    headers.insert(header.key.to_string(), value.to_vec());
                }
            }
        }

        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            timestamp: message.timestamp().to_millis(),
            key: message.key().map(|k| k.to_vec()),
            headers,
            payload: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
        }
    }

    /// Rebuild rdkafka headers for re-publication on the dead letter path.
    pub fn owned_headers(&self) -> OwnedHeaders {
        owned_headers(&self.headers)
    }
}

pub fn owned_headers(map: &HashMap<String, Vec<u8>>) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new_with_capacity(map.len());
    for (key, value) in map {
        headers = headers.insert(Header {
            key,
            value: Some(value),
        });
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_headers_carries_every_entry() {
        let mut map = HashMap::new();
        map.insert("trace-id".to_string(), b"abc123".to_vec());
        map.insert("origin".to_string(), b"capture".to_vec());

        let headers = owned_headers(&map);
        assert_eq!(headers.count(), 2);
    }
}
