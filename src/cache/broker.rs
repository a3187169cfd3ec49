//! Object brokers: object ↔ bytes codecs used by the cache tiers

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Codec between cached objects and their encoded bytes
///
/// Maps never look inside payloads. They ask for the encoded size first,
/// reserve exactly that many bytes, then ask the broker to fill them.
pub trait ObjectBroker: Send + Sync {
    /// Cached object type
    type Object;
    /// Extra information needed to rebuild an object from bytes
    type Hint;

    /// Number of bytes `encode` will write for `obj`
    fn encoded_size_of(&self, obj: &Self::Object) -> Result<usize>;

    /// Encode `obj` into `buf`, which is exactly `encoded_size_of(obj)` long
    fn encode(&self, obj: &Self::Object, buf: &mut [u8]) -> Result<()>;

    /// Rebuild an object from `buf`
    fn decode(&self, buf: &[u8], hint: Self::Hint) -> Result<Self::Object>;
}

/// Broker for raw byte payloads
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesBroker;

impl ObjectBroker for BytesBroker {
    type Object = Vec<u8>;
    type Hint = ();

    fn encoded_size_of(&self, obj: &Vec<u8>) -> Result<usize> {
        Ok(obj.len())
    }

    fn encode(&self, obj: &Vec<u8>, buf: &mut [u8]) -> Result<()> {
        if buf.len() != obj.len() {
            return Err(Error::Codec(format!(
                "Buffer of {} bytes for a {} byte payload",
                buf.len(),
                obj.len()
            )));
        }
        buf.copy_from_slice(obj);
        Ok(())
    }

    fn decode(&self, buf: &[u8], _hint: ()) -> Result<Vec<u8>> {
        Ok(buf.to_vec())
    }
}

/// Broker for serde payloads, encoded as JSON
///
/// The size query serializes the object once more; use a dedicated broker
/// for large hot payloads.
pub struct JsonBroker<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonBroker<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonBroker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectBroker for JsonBroker<T>
where
    T: Serialize + DeserializeOwned,
{
    type Object = T;
    type Hint = ();

    fn encoded_size_of(&self, obj: &T) -> Result<usize> {
        serde_json::to_vec(obj)
            .map(|bytes| bytes.len())
            .map_err(|e| Error::Codec(format!("Failed to serialize object: {}", e)))
    }

    fn encode(&self, obj: &T, buf: &mut [u8]) -> Result<()> {
        let bytes = serde_json::to_vec(obj)
            .map_err(|e| Error::Codec(format!("Failed to serialize object: {}", e)))?;
        if bytes.len() != buf.len() {
            return Err(Error::Codec(format!(
                "Serialized size changed: {} bytes for a {} byte buffer",
                bytes.len(),
                buf.len()
            )));
        }
        buf.copy_from_slice(&bytes);
        Ok(())
    }

    fn decode(&self, buf: &[u8], _hint: ()) -> Result<T> {
        serde_json::from_slice(buf)
            .map_err(|e| Error::Codec(format!("Failed to deserialize object: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_bytes_broker_roundtrip() -> Result<()> {
        let broker = BytesBroker;
        let payload = b"tile payload".to_vec();

        let mut buf = vec![0u8; broker.encoded_size_of(&payload)?];
        broker.encode(&payload, &mut buf)?;
        assert_eq!(broker.decode(&buf, ())?, payload);
        Ok(())
    }

    #[test]
    fn test_bytes_broker_rejects_wrong_buffer() {
        let mut buf = [0u8; 3];
        let err = BytesBroker.encode(&vec![1, 2], &mut buf).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Thumbnail {
        width: u32,
        height: u32,
        label: String,
    }

    #[test]
    fn test_json_broker_roundtrip() -> Result<()> {
        let broker = JsonBroker::<Thumbnail>::new();
        let thumb = Thumbnail {
            width: 160,
            height: 120,
            label: "IMG_0042".to_string(),
        };

        let mut buf = vec![0u8; broker.encoded_size_of(&thumb)?];
        broker.encode(&thumb, &mut buf)?;
        assert_eq!(broker.decode(&buf, ())?, thumb);
        Ok(())
    }

    #[test]
    fn test_json_broker_decode_garbage() {
        let broker = JsonBroker::<Thumbnail>::new();
        let err = broker.decode(b"not json", ()).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
