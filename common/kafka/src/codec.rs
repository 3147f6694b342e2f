use serde_json::Value;

use crate::record::ConsumedRecord;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode record body: {0}")]
    Decode(String),
    #[error("failed to encode record body: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    Json(Value),
    Raw(Vec<u8>),
}

/// A record whose body has been run through a codec; the raw record
/// rides along so commit/DLQ handling can still reach the original
/// payload, key and headers.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub record: ConsumedRecord,
    pub body: DecodedBody,
}

/// Pluggable body codec, invoked once per record before dispatch.
pub trait RecordCodec: Send + Sync {
    fn decode(&self, record: ConsumedRecord) -> Result<DecodedRecord, CodecError>;
    fn encode(&self, body: &DecodedBody) -> Result<Vec<u8>, CodecError>;
}

pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    fn decode(&self, record: ConsumedRecord) -> Result<DecodedRecord, CodecError> {
        let value: Value = serde_json::from_slice(&record.payload)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(DecodedRecord {
            record,
            body: DecodedBody::Json(value),
        })
    }

    fn encode(&self, body: &DecodedBody) -> Result<Vec<u8>, CodecError> {
        match body {
            DecodedBody::Json(value) => {
                serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
            }
            DecodedBody::Raw(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Passthrough codec for consumers that want the raw bytes.
pub struct RawCodec;

impl RecordCodec for RawCodec {
    fn decode(&self, record: ConsumedRecord) -> Result<DecodedRecord, CodecError> {
        let body = DecodedBody::Raw(record.payload.clone());
        Ok(DecodedRecord { record, body })
    }

    fn encode(&self, body: &DecodedBody) -> Result<Vec<u8>, CodecError> {
        match body {
            DecodedBody::Raw(bytes) => Ok(bytes.clone()),
            DecodedBody::Json(value) => {
                serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
            }
        }
    }
}
