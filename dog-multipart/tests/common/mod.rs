#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use dog_multipart::{
    backend::{memory::MemoryBackend, RegistryBackend},
    ByteRange, ByteStream, MultipartError, MultipartResult, ObjectHead, ObjectStore, PartRecord,
    UploadId,
};

/// Number of pieces a ranged read body is split into
const BODY_PIECES: usize = 4;

#[derive(Default)]
struct OpenUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct State {
    next_upload: u64,
    uploads: HashMap<String, OpenUpload>,
    objects: HashMap<String, Bytes>,
    completions: Vec<Vec<PartRecord>>,
    range_reads: Vec<ByteRange>,
    fail_uploads: u32,
    fail_completes: u32,
    complete_delay: Duration,
    fail_gets: u32,
    short_gets: u32,
}

/// In-memory multipart object store with failure injection.
///
/// Clones share state. Every ranged read is recorded so tests can assert on
/// exactly which ranges were requested.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<State>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_object(&self, key: &str, body: impl Into<Bytes>) {
        self.state.lock().objects.insert(key.to_string(), body.into());
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    /// Part lists passed to every successful completion, in call order
    pub fn completions(&self) -> Vec<Vec<PartRecord>> {
        self.state.lock().completions.clone()
    }

    pub fn range_reads(&self) -> Vec<ByteRange> {
        self.state.lock().range_reads.clone()
    }

    pub fn fail_next_uploads(&self, n: u32) {
        self.state.lock().fail_uploads = n;
    }

    pub fn fail_next_completes(&self, n: u32) {
        self.state.lock().fail_completes = n;
    }

    /// Every completion waits `delay` before touching the store state
    pub fn delay_completes(&self, delay: Duration) {
        self.state.lock().complete_delay = delay;
    }

    /// The next `n` ranged reads deliver part of the body, then error
    pub fn fail_next_gets(&self, n: u32) {
        self.state.lock().fail_gets = n;
    }

    /// The next `n` ranged reads end early without an error
    pub fn truncate_next_gets(&self, n: u32) {
        self.state.lock().short_gets = n;
    }
}

fn take_one(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn pieces(body: Bytes) -> Vec<Result<Bytes, std::io::Error>> {
    let piece_len = body.len().div_ceil(BODY_PIECES).max(1);
    body.chunks(piece_len)
        .map(|piece| Ok(Bytes::copy_from_slice(piece)))
        .collect()
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_multipart_upload(&self, key: &str) -> MultipartResult<UploadId> {
        let mut state = self.state.lock();
        state.next_upload += 1;
        let id = format!("mpu-{}", state.next_upload);
        state.uploads.insert(
            id.clone(),
            OpenUpload {
                key: key.to_string(),
                ..OpenUpload::default()
            },
        );
        Ok(UploadId::from_string(id))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> MultipartResult<String> {
        let mut state = self.state.lock();
        if take_one(&mut state.fail_uploads) {
            return Err(MultipartError::upstream_message("UploadPart", "service unavailable"));
        }
        let upload = state
            .uploads
            .get_mut(upload_id.as_str())
            .filter(|u| u.key == key)
            .ok_or_else(|| MultipartError::upstream_message("UploadPart", "NoSuchUpload"))?;

        let e_tag = format!("\"etag-{}-{}\"", part_number, body.len());
        upload.parts.insert(part_number, (e_tag.clone(), body));
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[PartRecord],
    ) -> MultipartResult<String> {
        let delay = self.state.lock().complete_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if take_one(&mut state.fail_completes) {
            return Err(MultipartError::upstream_message(
                "CompleteMultipartUpload",
                "InternalError",
            ));
        }
        let upload = state
            .uploads
            .get(upload_id.as_str())
            .filter(|u| u.key == key)
            .ok_or_else(|| {
                MultipartError::upstream_message("CompleteMultipartUpload", "NoSuchUpload")
            })?;

        let mut object = Vec::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((e_tag, body)) if *e_tag == part.e_tag => object.extend_from_slice(body),
                _ => {
                    return Err(MultipartError::upstream_message(
                        "CompleteMultipartUpload",
                        format!("InvalidPart {}", part.part_number),
                    ))
                }
            }
        }

        state.uploads.remove(upload_id.as_str());
        state.objects.insert(key.to_string(), Bytes::from(object));
        state.completions.push(parts.to_vec());
        Ok(format!("memory://bucket/{}", key))
    }

    async fn abort_multipart_upload(
        &self,
        _key: &str,
        upload_id: &UploadId,
    ) -> MultipartResult<()> {
        self.state
            .lock()
            .uploads
            .remove(upload_id.as_str())
            .map(|_| ())
            .ok_or_else(|| MultipartError::upstream_message("AbortMultipartUpload", "NoSuchUpload"))
    }

    async fn head_object(&self, key: &str) -> MultipartResult<ObjectHead> {
        let state = self.state.lock();
        let object = state
            .objects
            .get(key)
            .ok_or_else(|| MultipartError::upstream_message("HeadObject", "NotFound"))?;
        Ok(ObjectHead {
            size_bytes: object.len() as u64,
        })
    }

    async fn get_object(&self, key: &str, range: ByteRange) -> MultipartResult<ByteStream> {
        let mut state = self.state.lock();
        state.range_reads.push(range);

        let object = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| MultipartError::upstream_message("GetObject", "NoSuchKey"))?;
        let end = (range.end as usize + 1).min(object.len());
        let body = object.slice(range.start as usize..end);

        let items = if take_one(&mut state.fail_gets) {
            let mut items = pieces(body.slice(..body.len() / 2));
            items.push(Err(std::io::Error::other("connection reset by peer")));
            items
        } else if take_one(&mut state.short_gets) {
            pieces(body.slice(..body.len() / 2))
        } else {
            pieces(body)
        };

        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

/// Registry backend whose appends can be made to fail
#[derive(Clone, Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    fail_appends: Arc<Mutex<u32>>,
}

impl FlakyBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            fail_appends: Arc::default(),
        }
    }

    pub fn fail_next_appends(&self, n: u32) {
        *self.fail_appends.lock() = n;
    }
}

#[async_trait]
impl RegistryBackend for FlakyBackend {
    async fn append_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> MultipartResult<()> {
        let fail = take_one(&mut self.fail_appends.lock());
        if fail {
            return Err(MultipartError::registry(std::io::Error::other("connection refused")));
        }
        self.inner.append_with_ttl(key, value, ttl).await
    }

    async fn range_all(&self, key: &str) -> MultipartResult<Vec<String>> {
        self.inner.range_all(key).await
    }

    async fn delete(&self, key: &str) -> MultipartResult<()> {
        self.inner.delete(key).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> MultipartResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> MultipartResult<bool> {
        self.inner.delete_if_equals(key, value).await
    }

    async fn extend_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> MultipartResult<bool> {
        self.inner.extend_if_equals(key, value, ttl).await
    }
}

/// Deterministic test payload of `len` bytes
pub fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
}
