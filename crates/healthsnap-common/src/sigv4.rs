//! AWS Signature Version 4 request signing, shared by the EC2/CloudWatch
//! collector and the S3 uploader.

use crate::credentials::AwsCredentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hex SHA-256 of an empty body.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, thiserror::Error)]
#[error("SigV4 signing error: {0}")]
pub struct SigningError(String);

/// The parts of an HTTP request that take part in the signature.
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// `host[:port]` exactly as sent in the `Host` header.
    pub host: &'a str,
    /// Already URI-encoded absolute path, e.g. `/` or `/bucket/key.csv`.
    pub path: &'a str,
    /// Unencoded query parameters.
    pub query: &'a [(String, String)],
    /// Additional headers to sign; `host` and `x-amz-date` are added here.
    pub headers: &'a [(&'a str, &'a str)],
    pub payload_sha256: &'a str,
}

/// Signs `request` and returns the headers that must be attached to it
/// (`authorization`, `x-amz-date`, and `x-amz-security-token` when the
/// credentials carry a session token).
pub fn sign(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    request: &SigningRequest<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, SigningError> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.trim().to_string()))
        .collect();
    headers.push(("host".to_string(), request.host.to_string()));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        canonical_query(request.query),
        canonical_headers,
        signed_headers,
        request.payload_sha256
    );

    let credential_scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, region, service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    let mut out = vec![
        (
            "authorization".to_string(),
            format!(
                "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
                credentials.access_key_id
            ),
        ),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(token) = &credentials.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    Ok(out)
}

/// Derives the per-day, per-region, per-service signing key.
pub fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SigningError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Sorted, RFC 3986 encoded query string.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// `Host` header value for a base URL such as `https://ec2.us-east-1.amazonaws.com`
/// or `http://127.0.0.1:4566`; default ports are dropped the way HTTP clients
/// drop them.
pub fn host_header(endpoint: &str) -> Result<String, SigningError> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| SigningError(format!("endpoint has no scheme: {endpoint}")))?;
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(SigningError(format!("endpoint has no host: {endpoint}")));
    }
    let default_port = match scheme {
        "https" => Some(":443"),
        "http" => Some(":80"),
        _ => None,
    };
    let host = match default_port {
        Some(port) => authority.strip_suffix(port).unwrap_or(authority),
        None => authority,
    };
    Ok(host.to_string())
}

/// Encodes an object key as a path, leaving `/` separators intact.
pub fn encode_path(key: &str) -> String {
    key.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encodes everything except the RFC 3986 unreserved set.
pub fn uri_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError(format!("HMAC error: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EXAMPLE_SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    #[test]
    fn signing_key_matches_published_vector() {
        let key = signing_key(EXAMPLE_SECRET, "20120215", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn signature_matches_published_iam_example() {
        let creds = AwsCredentials::new("AKIDEXAMPLE", EXAMPLE_SECRET);
        let query = vec![
            ("Action".to_string(), "ListUsers".to_string()),
            ("Version".to_string(), "2010-05-08".to_string()),
        ];
        let request = SigningRequest {
            method: "GET",
            host: "iam.amazonaws.com",
            path: "/",
            query: &query,
            headers: &[(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )],
            payload_sha256: EMPTY_PAYLOAD_SHA256,
        };
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();

        let headers = sign(&creds, "us-east-1", "iam", &request, now).unwrap();
        let auth = &headers
            .iter()
            .find(|(name, _)| name == "authorization")
            .unwrap()
            .1;

        assert_eq!(
            auth,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
        assert!(headers
            .iter()
            .any(|(name, value)| name == "x-amz-date" && value == "20150830T123600Z"));
    }

    #[test]
    fn session_token_is_signed_and_returned() {
        let creds = AwsCredentials::new("AKID", "secret").with_session_token("session");
        let request = SigningRequest {
            method: "HEAD",
            host: "bucket.s3.us-east-1.amazonaws.com",
            path: "/",
            query: &[],
            headers: &[("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)],
            payload_sha256: EMPTY_PAYLOAD_SHA256,
        };

        let headers = sign(&creds, "us-east-1", "s3", &request, Utc::now()).unwrap();

        let auth = &headers[0].1;
        assert!(auth.contains(
            "SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"
        ));
        assert!(headers
            .iter()
            .any(|(name, value)| name == "x-amz-security-token" && value == "session"));
    }

    #[test]
    fn canonical_query_sorts_and_encodes() {
        let params = vec![
            ("StartTime".to_string(), "2024-01-01T00:00:00Z".to_string()),
            ("Action".to_string(), "GetMetricStatistics".to_string()),
            ("Dimensions.member.1.Value".to_string(), "i-0abc".to_string()),
        ];

        assert_eq!(
            canonical_query(&params),
            "Action=GetMetricStatistics&Dimensions.member.1.Value=i-0abc&StartTime=2024-01-01T00%3A00%3A00Z"
        );
    }

    #[test]
    fn host_header_drops_scheme_path_and_default_port() {
        assert_eq!(
            host_header("https://monitoring.us-east-1.amazonaws.com/").unwrap(),
            "monitoring.us-east-1.amazonaws.com"
        );
        assert_eq!(host_header("http://127.0.0.1:4566").unwrap(), "127.0.0.1:4566");
        assert_eq!(host_header("https://s3.local:443/bucket").unwrap(), "s3.local");
        assert!(host_header("s3.amazonaws.com").is_err());
    }

    #[test]
    fn encode_path_keeps_separators() {
        assert_eq!(encode_path("reports/Instance Health.csv"), "reports/Instance%20Health.csv");
        assert_eq!(uri_encode("a+b~c"), "a%2Bb~c");
    }
}
