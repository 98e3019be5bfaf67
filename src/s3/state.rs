use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::spy::{MessageSpy, SpyEvent};

use super::bucket::*;
use super::error::S3Error;
use super::types::*;

const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// A parsed `Range` header, not yet resolved against an object size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeSpec {
    /// `bytes=a-b`, closed and inclusive.
    FromTo(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`, the last n bytes.
    Suffix(u64),
}

fn resolve_range(spec: RangeSpec, total: u64) -> Result<Option<(u64, u64)>, S3Error> {
    match spec {
        RangeSpec::FromTo(start, end) => {
            if start > end {
                // Malformed per RFC 9110: the header is ignored.
                return Ok(None);
            }
            if start >= total {
                return Err(S3Error::InvalidRange(total));
            }
            Ok(Some((start, end.min(total - 1))))
        }
        RangeSpec::From(start) => {
            if start >= total {
                return Err(S3Error::InvalidRange(total));
            }
            Ok(Some((start, total - 1)))
        }
        RangeSpec::Suffix(n) => {
            if n == 0 || total == 0 {
                return Err(S3Error::InvalidRange(total));
            }
            Ok(Some((total.saturating_sub(n), total - 1)))
        }
    }
}

#[derive(Debug, Default)]
pub struct ListParams {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    /// Exclusive lower bound on emitted entry names: the V1 `Marker` or the
    /// decoded V2 continuation token.
    pub marker: Option<String>,
    /// V2 `StartAfter`: skips keys less than or equal to its value, applied
    /// before delimiter rollup.
    pub start_after: Option<String>,
}

#[derive(Debug)]
pub struct ListOutcome {
    pub entries: Vec<ObjectEntry>,
    pub common_prefixes: Vec<CommonPrefix>,
    pub is_truncated: bool,
    /// Last emitted entry name; present whenever the listing is truncated.
    pub next_entry: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub name: String,
    pub region: String,
    pub object_count: usize,
    pub active_upload_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    pub key: String,
    pub size: usize,
    pub etag: String,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSnapshot {
    pub name: String,
    pub region: String,
    pub objects: Vec<ObjectSnapshot>,
    pub active_uploads: Vec<String>,
}

struct S3Inner {
    /// region -> bucket name -> bucket
    regions: HashMap<String, HashMap<String, Bucket>>,
}

pub struct S3State {
    inner: Mutex<S3Inner>,
    account_id: String,
    spy: Option<Arc<MessageSpy>>,
}

impl S3State {
    pub fn new(account_id: String, spy: Option<Arc<MessageSpy>>) -> Self {
        S3State {
            inner: Mutex::new(S3Inner {
                regions: HashMap::new(),
            }),
            account_id,
            spy,
        }
    }

    fn record(&self, event: SpyEvent) {
        if let Some(spy) = &self.spy {
            spy.record(event);
        }
    }

    // --- buckets ---

    pub async fn create_bucket(&self, region: &str, name: &str) -> Result<(), S3Error> {
        validate_bucket_name(name)?;
        let mut inner = self.inner.lock().await;
        let buckets = inner.regions.entry(region.to_string()).or_default();
        // Re-creating your own bucket is idempotent for the single local owner.
        if !buckets.contains_key(name) {
            buckets.insert(name.to_string(), Bucket::new(name.to_string()));
        }
        Ok(())
    }

    pub async fn delete_bucket(&self, region: &str, name: &str) -> Result<(), S3Error> {
        let mut inner = self.inner.lock().await;
        let buckets = inner
            .regions
            .get_mut(region)
            .ok_or_else(|| S3Error::NoSuchBucket(name.to_string()))?;
        let bucket = buckets
            .get(name)
            .ok_or_else(|| S3Error::NoSuchBucket(name.to_string()))?;
        if !bucket.objects.is_empty() {
            return Err(S3Error::BucketNotEmpty(
                "The bucket you tried to delete is not empty".into(),
            ));
        }
        if !bucket.multipart_uploads.is_empty() {
            return Err(S3Error::BucketNotEmpty(
                "The bucket you tried to delete has in-progress multipart uploads".into(),
            ));
        }
        buckets.remove(name);
        Ok(())
    }

    pub async fn head_bucket(&self, region: &str, name: &str) -> Result<(), S3Error> {
        let inner = self.inner.lock().await;
        inner
            .regions
            .get(region)
            .and_then(|b| b.get(name))
            .map(|_| ())
            .ok_or_else(|| S3Error::NoSuchBucket(name.to_string()))
    }

    pub async fn list_buckets(&self, region: &str) -> ListAllMyBucketsResult {
        let inner = self.inner.lock().await;
        let mut entries: Vec<BucketEntry> = inner
            .regions
            .get(region)
            .map(|buckets| {
                buckets
                    .values()
                    .map(|b| BucketEntry {
                        name: b.name.clone(),
                        creation_date: format_timestamp(&b.created_at),
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        ListAllMyBucketsResult {
            owner: Owner {
                id: self.account_id.clone(),
                display_name: "local".into(),
            },
            buckets: BucketList { bucket: entries },
        }
    }

    // --- objects ---

    pub async fn put_object(
        &self,
        region: &str,
        bucket_name: &str,
        key: String,
        data: Vec<u8>,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String, S3Error> {
        let mut inner = self.inner.lock().await;
        let bucket = bucket_mut(&mut inner, region, bucket_name)?;
        let obj = Object::new(key.clone(), data, content_type, metadata);
        let etag = obj.etag.clone();
        bucket.objects.insert(key.clone(), obj);
        self.record(SpyEvent::S3ObjectPut {
            region: region.to_string(),
            bucket: bucket_name.to_string(),
            key,
            etag: etag.clone(),
        });
        Ok(etag)
    }

    /// Returns the object (conditionals already applied) and, when a range
    /// was requested and satisfiable, the resolved `(start, end, total)`.
    pub async fn get_object(
        &self,
        region: &str,
        bucket_name: &str,
        key: &str,
        range: Option<RangeSpec>,
        conditionals: &Conditionals,
    ) -> Result<(Object, Option<(u64, u64, u64)>), S3Error> {
        let inner = self.inner.lock().await;
        let obj = object_ref(&inner, region, bucket_name, key)?;
        obj.check_conditionals(conditionals)?;

        let total = obj.data.len() as u64;
        let resolved = match range {
            Some(spec) => resolve_range(spec, total)?.map(|(start, end)| (start, end, total)),
            None => None,
        };
        Ok((obj.clone(), resolved))
    }

    pub async fn head_object(
        &self,
        region: &str,
        bucket_name: &str,
        key: &str,
        conditionals: &Conditionals,
    ) -> Result<Object, S3Error> {
        let inner = self.inner.lock().await;
        let obj = object_ref(&inner, region, bucket_name, key)?;
        obj.check_conditionals(conditionals)?;
        Ok(obj.clone())
    }

    /// Deleting a missing key still succeeds; deleting from a missing bucket
    /// does not.
    pub async fn delete_object(
        &self,
        region: &str,
        bucket_name: &str,
        key: &str,
    ) -> Result<(), S3Error> {
        let mut inner = self.inner.lock().await;
        let bucket = bucket_mut(&mut inner, region, bucket_name)?;
        if bucket.objects.remove(key).is_some() {
            self.record(SpyEvent::S3ObjectDeleted {
                region: region.to_string(),
                bucket: bucket_name.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub async fn delete_objects(
        &self,
        region: &str,
        bucket_name: &str,
        keys: Vec<String>,
        quiet: bool,
    ) -> Result<DeleteResult, S3Error> {
        let mut inner = self.inner.lock().await;
        let bucket = bucket_mut(&mut inner, region, bucket_name)?;

        let mut deleted = Vec::new();
        for key in keys {
            if bucket.objects.remove(&key).is_some() {
                self.record(SpyEvent::S3ObjectDeleted {
                    region: region.to_string(),
                    bucket: bucket_name.to_string(),
                    key: key.clone(),
                });
            }
            if !quiet {
                deleted.push(DeletedEntry { key });
            }
        }
        Ok(DeleteResult {
            deleted,
            errors: Vec::new(),
        })
    }

    pub async fn copy_object(
        &self,
        region: &str,
        dest_bucket: &str,
        dest_key: String,
        source_bucket: &str,
        source_key: &str,
        replace_metadata: bool,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<CopyObjectResult, S3Error> {
        let mut inner = self.inner.lock().await;

        let src = object_ref(&inner, region, source_bucket, source_key)?.clone();
        let (new_ct, new_meta) = if replace_metadata {
            (content_type, metadata)
        } else {
            (Some(src.content_type.clone()), src.metadata.clone())
        };

        let obj = Object::new(dest_key.clone(), src.data, new_ct, new_meta);
        let result = CopyObjectResult {
            etag: obj.etag.clone(),
            last_modified: format_timestamp(&obj.last_modified),
        };
        let etag = obj.etag.clone();

        let dest = bucket_mut(&mut inner, region, dest_bucket)?;
        dest.objects.insert(dest_key.clone(), obj);
        self.record(SpyEvent::S3ObjectPut {
            region: region.to_string(),
            bucket: dest_bucket.to_string(),
            key: dest_key,
            etag,
        });
        Ok(result)
    }

    /// Shared listing walk for V1 and V2. Keys are iterated in order;
    /// delimiter rollups count as one entry at first appearance; truncation
    /// applies to the combined entry count.
    pub async fn list_objects(
        &self,
        region: &str,
        bucket_name: &str,
        params: &ListParams,
    ) -> Result<ListOutcome, S3Error> {
        let inner = self.inner.lock().await;
        let bucket = inner
            .regions
            .get(region)
            .and_then(|b| b.get(bucket_name))
            .ok_or_else(|| S3Error::NoSuchBucket(bucket_name.to_string()))?;

        let mut entries = Vec::new();
        let mut common_prefixes = Vec::new();
        let mut seen_prefixes: HashSet<String> = HashSet::new();
        let mut is_truncated = false;
        let mut next_entry = None;
        let mut count = 0usize;

        if params.max_keys == 0 {
            return Ok(ListOutcome {
                entries,
                common_prefixes,
                is_truncated: false,
                next_entry: None,
            });
        }

        for (key, obj) in &bucket.objects {
            if !key.starts_with(&params.prefix) {
                continue;
            }
            if let Some(ref sa) = params.start_after {
                if key.as_str() <= sa.as_str() {
                    continue;
                }
            }

            let rollup = params.delimiter.as_ref().filter(|d| !d.is_empty()).and_then(|d| {
                key[params.prefix.len()..]
                    .find(d.as_str())
                    .map(|pos| key[..params.prefix.len() + pos + d.len()].to_string())
            });

            let entry_name = rollup.as_deref().unwrap_or(key.as_str());
            if let Some(ref marker) = params.marker {
                if entry_name <= marker.as_str() {
                    continue;
                }
            }
            if let Some(cp) = rollup {
                if seen_prefixes.contains(&cp) {
                    continue;
                }
                if count >= params.max_keys {
                    is_truncated = true;
                    break;
                }
                seen_prefixes.insert(cp.clone());
                common_prefixes.push(CommonPrefix { prefix: cp.clone() });
                next_entry = Some(cp);
                count += 1;
            } else {
                if count >= params.max_keys {
                    is_truncated = true;
                    break;
                }
                entries.push(ObjectEntry {
                    key: key.clone(),
                    last_modified: format_timestamp(&obj.last_modified),
                    etag: obj.etag.clone(),
                    size: obj.size(),
                    storage_class: "STANDARD".into(),
                });
                next_entry = Some(key.clone());
                count += 1;
            }
        }

        Ok(ListOutcome {
            entries,
            common_prefixes,
            is_truncated,
            next_entry: if is_truncated { next_entry } else { None },
        })
    }

    // --- multipart ---

    pub async fn create_multipart_upload(
        &self,
        region: &str,
        bucket_name: &str,
        key: String,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<InitiateMultipartUploadResult, S3Error> {
        let mut inner = self.inner.lock().await;
        let bucket = bucket_mut(&mut inner, region, bucket_name)?;

        let upload_id = Uuid::new_v4().to_string();
        bucket.multipart_uploads.insert(
            upload_id.clone(),
            MultipartUpload {
                upload_id: upload_id.clone(),
                key: key.clone(),
                parts: HashMap::new(),
                initiated: chrono::Utc::now(),
                content_type,
                metadata,
            },
        );
        Ok(InitiateMultipartUploadResult {
            bucket: bucket_name.into(),
            key,
            upload_id,
        })
    }

    pub async fn upload_part(
        &self,
        region: &str,
        bucket_name: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String, S3Error> {
        if !(1..=10000).contains(&part_number) {
            return Err(S3Error::InvalidArgument(
                "Part number must be an integer between 1 and 10000, inclusive".into(),
            ));
        }
        let mut inner = self.inner.lock().await;
        let bucket = bucket_mut(&mut inner, region, bucket_name)?;
        let upload = bucket
            .multipart_uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;

        let etag = etag_quoted(&data);
        upload.parts.insert(
            part_number,
            Part {
                part_number,
                data,
                etag: etag.clone(),
                last_modified: chrono::Utc::now(),
            },
        );
        Ok(etag)
    }

    pub async fn complete_multipart_upload(
        &self,
        region: &str,
        bucket_name: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletePart>,
    ) -> Result<CompleteMultipartUploadResult, S3Error> {
        let mut inner = self.inner.lock().await;
        let bucket = bucket_mut(&mut inner, region, bucket_name)?;

        // Validate against the upload in place; only success consumes it, so
        // a failed completion can be retried.
        {
            let upload = bucket
                .multipart_uploads
                .get(upload_id)
                .filter(|u| u.key == key)
                .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
            if parts.is_empty() {
                return Err(S3Error::InvalidPart(
                    "You must specify at least one part".into(),
                ));
            }
            let mut prev = 0;
            for (i, cp) in parts.iter().enumerate() {
                if cp.part_number <= prev {
                    return Err(S3Error::InvalidPartOrder(
                        "The list of parts was not in ascending order. Parts must be ordered by part number.".into(),
                    ));
                }
                prev = cp.part_number;

                let part = upload.parts.get(&cp.part_number).ok_or_else(|| {
                    S3Error::InvalidPart(format!(
                        "One or more of the specified parts could not be found: part {}",
                        cp.part_number
                    ))
                })?;
                if !part
                    .etag
                    .trim_matches('"')
                    .eq_ignore_ascii_case(cp.etag.trim_matches('"'))
                {
                    return Err(S3Error::InvalidPart(format!(
                        "The part's entity tag does not match: part {}",
                        cp.part_number
                    )));
                }
                if i + 1 < parts.len() && part.data.len() < MIN_PART_SIZE {
                    return Err(S3Error::EntityTooSmall(
                        "Your proposed upload is smaller than the minimum allowed size".into(),
                    ));
                }
            }
        }

        let upload = bucket.multipart_uploads.remove(upload_id).unwrap();
        let mut data = Vec::new();
        let mut part_digests = Vec::new();
        for cp in &parts {
            let part = &upload.parts[&cp.part_number];
            data.extend_from_slice(&part.data);
            part_digests.extend_from_slice(&md5_raw(&part.data));
        }
        let etag = format!("\"{}-{}\"", md5_hex(&part_digests), parts.len());

        let mut obj = Object::new(
            key.to_string(),
            data,
            upload.content_type,
            upload.metadata,
        );
        obj.etag = etag.clone();
        bucket.objects.insert(key.to_string(), obj);

        self.record(SpyEvent::S3ObjectPut {
            region: region.to_string(),
            bucket: bucket_name.to_string(),
            key: key.to_string(),
            etag: etag.clone(),
        });

        Ok(CompleteMultipartUploadResult {
            location: format!("/{bucket_name}/{key}"),
            bucket: bucket_name.into(),
            key: key.into(),
            etag,
        })
    }

    pub async fn abort_multipart_upload(
        &self,
        region: &str,
        bucket_name: &str,
        upload_id: &str,
    ) -> Result<(), S3Error> {
        let mut inner = self.inner.lock().await;
        let bucket = bucket_mut(&mut inner, region, bucket_name)?;
        bucket
            .multipart_uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))
    }

    pub async fn list_multipart_uploads(
        &self,
        region: &str,
        bucket_name: &str,
    ) -> Result<ListMultipartUploadsResult, S3Error> {
        let inner = self.inner.lock().await;
        let bucket = inner
            .regions
            .get(region)
            .and_then(|b| b.get(bucket_name))
            .ok_or_else(|| S3Error::NoSuchBucket(bucket_name.to_string()))?;

        let mut uploads: Vec<UploadEntry> = bucket
            .multipart_uploads
            .values()
            .map(|u| UploadEntry {
                key: u.key.clone(),
                upload_id: u.upload_id.clone(),
                initiated: format_timestamp(&u.initiated),
                storage_class: "STANDARD".into(),
            })
            .collect();
        uploads.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));

        Ok(ListMultipartUploadsResult {
            bucket: bucket_name.into(),
            key_marker: String::new(),
            upload_id_marker: String::new(),
            max_uploads: 1000,
            is_truncated: false,
            uploads,
        })
    }

    pub async fn list_parts(
        &self,
        region: &str,
        bucket_name: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<ListPartsResult, S3Error> {
        let inner = self.inner.lock().await;
        let bucket = inner
            .regions
            .get(region)
            .and_then(|b| b.get(bucket_name))
            .ok_or_else(|| S3Error::NoSuchBucket(bucket_name.to_string()))?;
        let upload = bucket
            .multipart_uploads
            .get(upload_id)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;

        let mut parts: Vec<PartEntry> = upload
            .parts
            .values()
            .map(|p| PartEntry {
                part_number: p.part_number,
                last_modified: format_timestamp(&p.last_modified),
                etag: p.etag.clone(),
                size: p.data.len(),
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);

        Ok(ListPartsResult {
            bucket: bucket_name.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            max_parts: 1000,
            is_truncated: false,
            parts,
        })
    }

    // --- inspection ---

    pub async fn bucket_summaries(&self) -> Vec<BucketSummary> {
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for (region, buckets) in &inner.regions {
            for bucket in buckets.values() {
                out.push(BucketSummary {
                    name: bucket.name.clone(),
                    region: region.clone(),
                    object_count: bucket.objects.len(),
                    active_upload_count: bucket.multipart_uploads.len(),
                });
            }
        }
        out.sort_by(|a, b| (&a.region, &a.name).cmp(&(&b.region, &b.name)));
        out
    }

    pub async fn bucket_snapshot(&self, region: &str, name: &str) -> Option<BucketSnapshot> {
        let inner = self.inner.lock().await;
        let bucket = inner.regions.get(region)?.get(name)?;
        let mut active_uploads: Vec<String> =
            bucket.multipart_uploads.keys().cloned().collect();
        active_uploads.sort();
        Some(BucketSnapshot {
            name: bucket.name.clone(),
            region: region.to_string(),
            objects: bucket
                .objects
                .values()
                .map(|o| ObjectSnapshot {
                    key: o.key.clone(),
                    size: o.size(),
                    etag: o.etag.clone(),
                    content_type: o.content_type.clone(),
                })
                .collect(),
            active_uploads,
        })
    }
}

fn bucket_mut<'a>(
    inner: &'a mut S3Inner,
    region: &str,
    name: &str,
) -> Result<&'a mut Bucket, S3Error> {
    inner
        .regions
        .get_mut(region)
        .and_then(|b| b.get_mut(name))
        .ok_or_else(|| S3Error::NoSuchBucket(name.to_string()))
}

fn object_ref<'a>(
    inner: &'a S3Inner,
    region: &str,
    bucket_name: &str,
    key: &str,
) -> Result<&'a Object, S3Error> {
    let bucket = inner
        .regions
        .get(region)
        .and_then(|b| b.get(bucket_name))
        .ok_or_else(|| S3Error::NoSuchBucket(bucket_name.to_string()))?;
    bucket
        .objects
        .get(key)
        .ok_or_else(|| S3Error::NoSuchKey(format!("{bucket_name}/{key}")))
}
