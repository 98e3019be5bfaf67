use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};

use super::error::S3Error;

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn md5_raw(data: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn etag_quoted(data: &[u8]) -> String {
    format!("\"{}\"", md5_hex(data))
}

/// XML timestamp format used across S3 responses.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// HTTP-date for `Last-Modified` headers and conditional comparisons.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Bucket naming rules: 3-63 chars of `[a-z0-9.-]`, alphanumeric at both
/// ends, no `..`/`.-`/`-.` runs, and not an IPv4 literal.
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let fail = |reason: &str| {
        Err(S3Error::InvalidBucketName(format!(
            "The specified bucket is not valid: {reason}"
        )))
    };
    if name.len() < 3 || name.len() > 63 {
        return fail("name must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return fail("name may only contain lowercase letters, digits, dots and hyphens");
    }
    let first = name.chars().next().unwrap();
    let last = name.chars().next_back().unwrap();
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return fail("name must start and end with a letter or digit");
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return fail("name must not contain adjacent dots or dot-hyphen runs");
    }
    if name.parse::<Ipv4Addr>().is_ok() {
        return fail("name must not be formatted as an IP address");
    }
    Ok(())
}

/// Conditional request headers, parsed by the wire layer.
#[derive(Debug, Clone, Default)]
pub struct Conditionals {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

fn etag_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_matches('"') == etag.trim_matches('"')
    })
}

#[derive(Debug, Clone)]
pub struct Object {
    pub key: String,
    pub data: Vec<u8>,
    pub content_type: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Object {
    pub fn new(
        key: String,
        data: Vec<u8>,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        let etag = etag_quoted(&data);
        Object {
            key,
            content_type: content_type.unwrap_or_else(|| "application/octet-stream".into()),
            etag,
            last_modified: Utc::now(),
            data,
            metadata,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// RFC 7232 evaluation order: If-Match, then If-Unmodified-Since (only
    /// without If-Match), then If-None-Match, then If-Modified-Since (only
    /// without If-None-Match). Timestamps compare at second granularity,
    /// matching the header resolution.
    pub fn check_conditionals(&self, cond: &Conditionals) -> Result<(), S3Error> {
        if let Some(ref if_match) = cond.if_match {
            if !etag_matches(if_match, &self.etag) {
                return Err(S3Error::PreconditionFailed(
                    "At least one of the pre-conditions you specified did not hold".into(),
                ));
            }
        } else if let Some(since) = cond.if_unmodified_since {
            if self.last_modified.timestamp() > since.timestamp() {
                return Err(S3Error::PreconditionFailed(
                    "At least one of the pre-conditions you specified did not hold".into(),
                ));
            }
        }

        if let Some(ref if_none_match) = cond.if_none_match {
            if etag_matches(if_none_match, &self.etag) {
                return Err(S3Error::NotModified);
            }
        } else if let Some(since) = cond.if_modified_since {
            if self.last_modified.timestamp() <= since.timestamp() {
                return Err(S3Error::NotModified);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Part {
    pub part_number: i32,
    pub data: Vec<u8>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub key: String,
    pub parts: HashMap<i32, Part>,
    pub initiated: DateTime<Utc>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug)]
pub struct Bucket {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub objects: BTreeMap<String, Object>,
    pub multipart_uploads: HashMap<String, MultipartUpload>,
}

impl Bucket {
    pub fn new(name: String) -> Self {
        Bucket {
            name,
            created_at: Utc::now(),
            objects: BTreeMap::new(),
            multipart_uploads: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_rules() {
        for good in ["abc", "my-bucket", "my.bucket.1", "0-9"] {
            assert!(validate_bucket_name(good).is_ok(), "{good}");
        }
        for bad in [
            "ab",
            "UPPER",
            "under_score",
            "-leading",
            "trailing-",
            ".leading",
            "double..dot",
            "dot.-hyphen",
            "hyphen-.dot",
            "192.168.5.4",
            &"x".repeat(64),
        ] {
            assert!(validate_bucket_name(bad).is_err(), "{bad}");
        }
        // Looks like an IP but is not one.
        assert!(validate_bucket_name("192.168.5.400").is_ok());
    }

    #[test]
    fn conditional_precedence() {
        let obj = Object::new("k".into(), b"hello".to_vec(), None, HashMap::new());
        let etag = obj.etag.clone();

        // If-Match mismatch wins over a passing If-Unmodified-Since.
        let cond = Conditionals {
            if_match: Some("\"bogus\"".into()),
            if_unmodified_since: Some(obj.last_modified + chrono::Duration::hours(1)),
            ..Conditionals::default()
        };
        assert!(matches!(
            obj.check_conditionals(&cond).unwrap_err(),
            S3Error::PreconditionFailed(_)
        ));

        // Matching If-Match passes, then If-None-Match turns into 304.
        let cond = Conditionals {
            if_match: Some(etag.clone()),
            if_none_match: Some(etag.clone()),
            ..Conditionals::default()
        };
        assert!(matches!(
            obj.check_conditionals(&cond).unwrap_err(),
            S3Error::NotModified
        ));

        // If-None-Match present: If-Modified-Since is not evaluated.
        let cond = Conditionals {
            if_none_match: Some("\"other\"".into()),
            if_modified_since: Some(obj.last_modified + chrono::Duration::hours(1)),
            ..Conditionals::default()
        };
        assert!(obj.check_conditionals(&cond).is_ok());

        // If-Modified-Since alone: not modified since a future date -> 304.
        let cond = Conditionals {
            if_modified_since: Some(obj.last_modified + chrono::Duration::hours(1)),
            ..Conditionals::default()
        };
        assert!(matches!(
            obj.check_conditionals(&cond).unwrap_err(),
            S3Error::NotModified
        ));

        // Wildcard matches any entity.
        let cond = Conditionals {
            if_match: Some("*".into()),
            ..Conditionals::default()
        };
        assert!(obj.check_conditionals(&cond).is_ok());
    }
}
