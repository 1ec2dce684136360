use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::types::FormParams;

type HmacSha1 = Hmac<Sha1>;

/// Provider webhook signature: HMAC-SHA1 over the full request URL followed
/// by every form parameter's key and value in key-sorted order, base64
/// encoded and sent in the X-Twilio-Signature header.
pub fn compute_signature(auth_token: &str, url: &str, params: &FormParams) -> String {
    let mut data = String::from(url);
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }
    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Constant-time check of the provided header value. A missing or
/// undecodable header fails closed.
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &FormParams,
    provided: Option<&str>,
) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(provided.trim()) else {
        return false;
    };

    let mut data = String::from(url);
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }
    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    mac.verify_slice(&decoded).is_ok()
}
