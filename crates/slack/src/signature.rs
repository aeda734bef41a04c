use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this many seconds are refused as replays.
pub const MAX_CLOCK_SKEW_SECS: u64 = 5 * 60;

const VERSION: &str = "v0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing or malformed request timestamp")]
    BadTimestamp,
    #[error("request timestamp is outside the replay window")]
    Stale,
    #[error("missing or malformed signature header")]
    BadSignatureFormat,
    #[error("signature does not match request body")]
    Mismatch,
    #[error("signing secret is unusable")]
    BadSecret,
}

/// Checks `X-Slack-Signature` against `v0:{timestamp}:{body}` signed with the
/// app's signing secret.
pub fn verify_request(
    signing_secret: &[u8],
    timestamp: &str,
    signature: &str,
    body: &[u8],
    now_unix: i64,
) -> Result<(), SignatureError> {
    let sent_at: i64 = timestamp.trim().parse().map_err(|_| SignatureError::BadTimestamp)?;
    if now_unix.abs_diff(sent_at) > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::Stale);
    }

    let hex_digest = signature
        .strip_prefix(VERSION)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or(SignatureError::BadSignatureFormat)?;
    let expected = hex::decode(hex_digest).map_err(|_| SignatureError::BadSignatureFormat)?;

    let mac = signed_mac(signing_secret, timestamp.trim(), body)?;
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Produces the `v0=<hex>` header value Slack would send for `body`.
pub fn sign_request(
    signing_secret: &[u8],
    timestamp: &str,
    body: &[u8],
) -> Result<String, SignatureError> {
    let mac = signed_mac(signing_secret, timestamp, body)?;
    Ok(format!("{VERSION}={}", hex::encode(mac.finalize().into_bytes())))
}

fn signed_mac(
    signing_secret: &[u8],
    timestamp: &str,
    body: &[u8],
) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(signing_secret).map_err(|_| SignatureError::BadSecret)?;
    mac.update(VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::{sign_request, verify_request, SignatureError};

    const SECRET: &[u8] = b"8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&team_domain=testteamnow&channel_id=G8PSS9T3V&channel_name=foobar&user_id=U2CERLKJA&user_name=roadrunner&command=%2Fwebhook-collect&text=&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2FT1DC2JH3J%2F397700885554%2F96rGlfmibIGlgcZRskXaIFfN&trigger_id=398738663015.47445629121.803a0bc887a14d10d2c447fce8b6703c";

    // Published example from Slack's request verification guide.
    #[test]
    fn matches_documented_example_signature() {
        let signature = sign_request(SECRET, "1531420618", BODY).expect("sign");
        assert_eq!(
            signature,
            "v0=a2114d57b48eac39b9ad189dd8316235a7b4a8d21a10bd27519666489c69b503"
        );
    }

    #[test]
    fn accepts_fresh_signed_request() {
        let signature = sign_request(SECRET, "1700000000", BODY).expect("sign");
        assert_eq!(verify_request(SECRET, "1700000000", &signature, BODY, 1_700_000_100), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let signature = sign_request(SECRET, "1700000000", BODY).expect("sign");
        assert_eq!(
            verify_request(SECRET, "1700000000", &signature, b"tampered", 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_requests_outside_replay_window() {
        let signature = sign_request(SECRET, "1700000000", BODY).expect("sign");
        assert_eq!(
            verify_request(SECRET, "1700000000", &signature, BODY, 1_700_000_301),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn extreme_timestamps_are_stale_not_overflow() {
        assert_eq!(
            verify_request(SECRET, "-9223372036854775808", "v0=00", b"{}", 1_700_000_000),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify_request(SECRET, "9223372036854775807", "v0=00", b"{}", -1_700_000_000),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(
            verify_request(SECRET, "yesterday", "v0=00", BODY, 0),
            Err(SignatureError::BadTimestamp)
        );
        assert_eq!(
            verify_request(SECRET, "100", "v1=abcd", BODY, 100),
            Err(SignatureError::BadSignatureFormat)
        );
        assert_eq!(
            verify_request(SECRET, "100", "v0=zz", BODY, 100),
            Err(SignatureError::BadSignatureFormat)
        );
    }
}
