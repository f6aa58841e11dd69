//! Signed attachment URL codec
//!
//! Attachment URLs handed out by the platform are only valid for a limited
//! time. The signature lives in three query parameters:
//!
//! ```text
//! https://cdn.example.com/attachments/<channel>/<attachment>/<name>?ex=65d9c1a2&is=65c74ca2&hm=5f0c..&
//!                                                                  |           |           |
//!                                                     expiry (hex unix secs)  issued    signature
//! ```
//!
//! We store the bare URL and the three parameters separately, and glue
//! them back together (verbatim) when downloading.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed attachment url '{url}': {reason}")]
    MalformedUrl { url: String, reason: &'static str },
}

impl CodecError {
    fn malformed(url: &str, reason: &'static str) -> Self {
        Self::MalformedUrl {
            url: url.to_string(),
            reason,
        }
    }
}

/// The decoded parts of a signed attachment URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub base: String,
    pub ex: i64,
    pub is: String,
    pub hm: String,
}

/// Split a signed attachment URL into its bare URL and signature parameters.
pub fn decode(raw: &str) -> Result<SignedUrl, CodecError> {
    let mut url = Url::parse(raw).map_err(|_| CodecError::malformed(raw, "not a url"))?;

    let mut ex = None;
    let mut is = None;
    let mut hm = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "ex" => ex = Some(value.into_owned()),
            "is" => is = Some(value.into_owned()),
            "hm" => hm = Some(value.into_owned()),
            _ => {}
        }
    }

    let ex = ex.ok_or_else(|| CodecError::malformed(raw, "missing 'ex' parameter"))?;
    let is = is.ok_or_else(|| CodecError::malformed(raw, "missing 'is' parameter"))?;
    let hm = hm.ok_or_else(|| CodecError::malformed(raw, "missing 'hm' parameter"))?;
    let ex = i64::from_str_radix(&ex, 16)
        .map_err(|_| CodecError::malformed(raw, "'ex' is not hexadecimal"))?;

    url.set_query(None);
    url.set_fragment(None);

    Ok(SignedUrl {
        base: url.to_string(),
        ex,
        is,
        hm,
    })
}

/// Re-append the signature parameters to a bare attachment URL.
pub fn encode(base: &str, ex: i64, is: &str, hm: &str) -> String {
    format!("{}?ex={:x}&is={}&hm={}&", base, ex, is, hm)
}

/// Extract the channel id from an attachment URL
///  (`/attachments/<channel>/<attachment>/<name>`).
pub fn channel_id(raw: &str) -> Result<String, CodecError> {
    let url = Url::parse(raw).map_err(|_| CodecError::malformed(raw, "not a url"))?;
    let mut segments = url
        .path_segments()
        .ok_or_else(|| CodecError::malformed(raw, "url has no path"))?;

    while let Some(segment) = segments.next() {
        if segment == "attachments" {
            return match segments.next() {
                Some(channel) if !channel.is_empty() => Ok(channel.to_string()),
                _ => Err(CodecError::malformed(raw, "missing channel segment")),
            };
        }
    }
    Err(CodecError::malformed(raw, "not an attachment url"))
}
