use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Converts typed values to and from workload bytes.
///
/// The engine itself only moves bytes; this sits on top for callers that
/// want to submit and receive structured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    #[default]
    Bincode,
    Json,
}

impl Serializer {
    pub fn dumps<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::Bincode => Ok(bincode::serialize(value)?),
            Serializer::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn loads<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Serializer::Bincode => Ok(bincode::deserialize(bytes)?),
            Serializer::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GearmanError;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Resize {
        url: String,
        width: u32,
    }

    #[test]
    fn test_json_is_readable() {
        let bytes = Serializer::Json
            .dumps(&Resize { url: "a.png".into(), width: 64 })
            .unwrap();
        assert_eq!(bytes, br#"{"url":"a.png","width":64}"#);
    }

    #[test]
    fn test_loads_rejects_garbage() {
        let err = Serializer::Json.loads::<Resize>(b"not json").unwrap_err();
        assert!(matches!(err, GearmanError::Serialization(_)));
    }

    #[test]
    fn test_bincode_default() {
        let value = Resize { url: "b.png".into(), width: 128 };
        let bytes = Serializer::default().dumps(&value).unwrap();
        assert_eq!(Serializer::Bincode.loads::<Resize>(&bytes).unwrap(), value);
    }
}
