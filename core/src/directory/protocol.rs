//! JSON contract of the report directory
//!
//! Binary fields travel as standard base64 strings. A response without a
//! `code` is treated as a failure.

use serde::{Deserialize, Serialize};

/// Success value of every `code` field
pub const CODE_OK: i32 = 0;

/// Registration refused because the key was not 64 bytes
pub const CODE_INVALID_KEY: i32 = 1;

fn missing_code() -> i32 {
    -1
}

/// Body of `POST /register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// Reply to `POST /register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default = "missing_code")]
    pub code: i32,
}

/// Body of `POST /query`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
}

/// One stored report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Milliseconds since the Unix epoch, as assigned by the directory
    pub timestamp: i64,
}

/// Reply to `POST /query`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default = "missing_code")]
    pub code: i32,
    #[serde(default)]
    pub results: Vec<ReportRecord>,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_uses_base64() {
        let req = RegisterRequest {
            key: vec![0xFF; 3],
            content: b"hi".to_vec(),
        };
        let json = serde_json::to_value(&req).expect("Serialize");
        assert_eq!(json["key"], "////");
        assert_eq!(json["content"], "aGk=");
    }

    #[test]
    fn test_query_response_parses_directory_reply() {
        let body = r#"{"code":0,"results":[{"content":"aGk=","timestamp":1621498817959}]}"#;
        let resp: QueryResponse = serde_json::from_str(body).expect("Parse");
        assert_eq!(resp.code, CODE_OK);
        assert_eq!(resp.results[0].content, b"hi");
        assert_eq!(resp.results[0].timestamp, 1_621_498_817_959);
    }

    #[test]
    fn test_missing_fields_default() {
        let resp: QueryResponse = serde_json::from_str("{}").expect("Parse");
        assert_eq!(resp.code, -1);
        assert!(resp.results.is_empty());

        let resp: RegisterResponse = serde_json::from_str(r#"{"code":0}"#).expect("Parse");
        assert_eq!(resp.code, CODE_OK);
    }

    #[test]
    fn test_bad_base64_is_rejected() {
        let result: Result<QueryRequest, _> = serde_json::from_str(r#"{"key":"***"}"#);
        assert!(result.is_err());
    }
}
