//! Worker wire protocol.
//!
//! One request per TCP connection:
//!
//! 1. client sends the parameter set as a flat JSON object in a single write
//! 2. worker answers with the literal [`ACK`] before simulating
//! 3. worker sends `{"Strain": [...], "Stress": [...]}` and closes the
//!    connection; end of stream is the only framing for the result

use serde::de::IgnoredAny;
use sf_types::{CalResult, Curve, CurveColumns, ParameterSet};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Acknowledgement token sent by the worker once a request is received.
pub const ACK: &[u8; 12] = b"ACK_RECEIVED";

/// Upper bound on a request payload.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

pub fn encode_request(params: &ParameterSet) -> CalResult<Vec<u8>> {
    Ok(serde_json::to_vec(params)?)
}

pub fn decode_request(bytes: &[u8]) -> CalResult<ParameterSet> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_result(curve: &Curve) -> CalResult<Vec<u8>> {
    Ok(serde_json::to_vec(&CurveColumns::from(curve.clone()))?)
}

/// Decode a result payload. Unequal column lengths or non-finite samples are
/// rejected.
pub fn decode_result(bytes: &[u8]) -> CalResult<Curve> {
    let columns: CurveColumns = serde_json::from_slice(bytes)?;
    Ok(Curve::try_from(columns)?)
}

/// Read one request payload.
///
/// The client keeps its write half open while it waits for the
/// acknowledgement, so the payload ends when the bytes read so far form a
/// complete JSON value (or at end of stream).
pub async fn read_request<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(payload);
        }
        payload.extend_from_slice(&chunk[..n]);
        if serde_json::from_slice::<IgnoredAny>(&payload).is_ok() {
            return Ok(payload);
        }
        if payload.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_types::CalError;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn request_is_flat_json_object() {
        let params = ParameterSet::new()
            .with("kratio", 2.5)
            .unwrap()
            .with("emod", 1e10)
            .unwrap();
        let bytes = encode_request(&params).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["emod"], 1e10);
        assert_eq!(value["kratio"], 2.5);
        assert_eq!(decode_request(&bytes).unwrap(), params);
    }

    #[test]
    fn result_uses_capitalised_columns() {
        let curve = Curve::from_columns(vec![0.0, 0.001], vec![0.0, 4.5]).unwrap();
        let bytes = encode_result(&curve).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"Strain\""));
        assert!(text.contains("\"Stress\""));
        assert_eq!(decode_result(&bytes).unwrap(), curve);
    }

    #[test]
    fn empty_result_decodes_to_empty_curve() {
        let curve = decode_result(br#"{"Strain":[],"Stress":[]}"#).unwrap();
        assert!(curve.is_empty());
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let err = decode_result(br#"{"Strain":[0.0,1.0],"Stress":[0.0]}"#).unwrap_err();
        assert!(matches!(err, CalError::Serialization(_) | CalError::Curve(_)));
        assert!(decode_result(b"not json").is_err());
    }

    #[tokio::test]
    async fn read_request_stops_at_complete_object() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(br#"{"emod":1.0,"#).await.unwrap();
            client.write_all(br#""kratio":2.0}"#).await.unwrap();
            // Keep the stream open; the reader must not wait for EOF.
            client
        });

        let payload = read_request(&mut server).await.unwrap();
        let params = decode_request(&payload).unwrap();
        assert_eq!(params.get("kratio"), Some(2.0));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn read_request_returns_partial_payload_at_eof() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"{\"emod\":").await.unwrap();
        drop(client);

        let payload = read_request(&mut server).await.unwrap();
        assert_eq!(payload, b"{\"emod\":");
        assert!(decode_request(&payload).is_err());
    }
}
