//! Cache gateway between the dispatcher and the store.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::cache::store::{MemoryStore, Store};
use crate::cache::{CachePolicy, CacheTtl};
use crate::config::ResponseCacheConfig;
use crate::error::{DispatchError, SerializationError};
use crate::http::message::WireMessage;
use crate::http::Request;
use crate::observability::metrics;

/// Entry layout, all integers big-endian:
///
/// ```text
/// version:u8  count:u32  message*
/// message := 0x01 status:u16 header_count:u32 (name:str value:str)*
///          | 0x02 more_body:u8 body:bytes
/// str, bytes := len:u32 raw
/// ```
const ENVELOPE_VERSION: u8 = 2;

const TAG_START: u8 = 1;
const TAG_BODY: u8 = 2;

/// Encode messages into the stored envelope.
pub fn encode_messages(messages: &[WireMessage]) -> Result<Bytes, SerializationError> {
    let mut buf = BytesMut::new();
    buf.put_u8(ENVELOPE_VERSION);
    buf.put_u32(length(messages.len())?);
    for message in messages {
        match message {
            WireMessage::Start { status, headers } => {
                buf.put_u8(TAG_START);
                buf.put_u16(*status);
                buf.put_u32(length(headers.len())?);
                for (name, value) in headers {
                    put_chunk(&mut buf, name.as_bytes())?;
                    put_chunk(&mut buf, value.as_bytes())?;
                }
            }
            WireMessage::Body { body, more_body } => {
                buf.put_u8(TAG_BODY);
                buf.put_u8(u8::from(*more_body));
                put_chunk(&mut buf, body)?;
            }
        }
    }
    Ok(buf.freeze())
}

/// Decode a stored envelope back into messages.
pub fn decode_messages(data: &[u8]) -> Result<Vec<WireMessage>, SerializationError> {
    let mut buf = Bytes::copy_from_slice(data);
    let version = take_u8(&mut buf)?;
    if version != ENVELOPE_VERSION {
        return Err(SerializationError(format!(
            "unsupported cache envelope version {version}"
        )));
    }
    let count = take_u32(&mut buf)?;
    let mut messages = Vec::new();
    for _ in 0..count {
        let message = match take_u8(&mut buf)? {
            TAG_START => {
                ensure(&buf, 2)?;
                let status = buf.get_u16();
                let header_count = take_u32(&mut buf)?;
                let mut headers = Vec::new();
                for _ in 0..header_count {
                    headers.push((take_str(&mut buf)?, take_str(&mut buf)?));
                }
                WireMessage::Start { status, headers }
            }
            TAG_BODY => {
                let more_body = take_u8(&mut buf)? != 0;
                let body = take_chunk(&mut buf)?;
                WireMessage::Body { body, more_body }
            }
            tag => return Err(SerializationError(format!("unknown cache message tag {tag}"))),
        };
        messages.push(message);
    }
    if buf.has_remaining() {
        return Err(SerializationError("trailing bytes in cache entry".into()));
    }
    Ok(messages)
}

fn length(len: usize) -> Result<u32, SerializationError> {
    u32::try_from(len).map_err(|_| SerializationError(format!("cache field too large ({len})")))
}

fn put_chunk(buf: &mut BytesMut, chunk: &[u8]) -> Result<(), SerializationError> {
    buf.put_u32(length(chunk.len())?);
    buf.put_slice(chunk);
    Ok(())
}

fn ensure(buf: &Bytes, needed: usize) -> Result<(), SerializationError> {
    if buf.remaining() < needed {
        return Err(SerializationError("truncated cache entry".into()));
    }
    Ok(())
}

fn take_u8(buf: &mut Bytes) -> Result<u8, SerializationError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut Bytes) -> Result<u32, SerializationError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn take_chunk(buf: &mut Bytes) -> Result<Bytes, SerializationError> {
    let len = take_u32(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

fn take_str(buf: &mut Bytes) -> Result<String, SerializationError> {
    let chunk = take_chunk(buf)?;
    String::from_utf8(chunk.to_vec())
        .map_err(|_| SerializationError("cache header is not utf-8".into()))
}

/// Default key: path, sorted query string, then any configured vary headers.
pub fn default_cache_key(request: &Request, vary_headers: &[String]) -> String {
    let mut query: Vec<(&str, &str)> = request
        .query_params()
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    query.sort();

    let mut key = request.path().to_string();
    if !query.is_empty() {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        key.push('?');
        key.push_str(&encoded);
    }
    for name in vary_headers {
        key.push('|');
        key.push_str(&name.to_ascii_lowercase());
        key.push('=');
        key.push_str(request.header(name).unwrap_or_default());
    }
    key
}

/// Reads and writes cached responses through an opaque store.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn Store>,
    key_prefix: String,
    default_ttl: Option<Duration>,
    vary_headers: Vec<String>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn Store>, config: &ResponseCacheConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            default_ttl: config.default_expiration_secs.map(Duration::from_secs),
            vary_headers: config.vary_headers.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn key_for(&self, request: &Request, policy: &CachePolicy) -> String {
        let key = match &policy.key_builder {
            Some(builder) => builder(request),
            None => default_cache_key(request, &self.vary_headers),
        };
        format!("{}{}", self.key_prefix, key)
    }

    pub fn ttl_for(&self, policy: &CachePolicy) -> Option<Duration> {
        match policy.ttl {
            CacheTtl::Default => self.default_ttl,
            CacheTtl::Never => None,
            CacheTtl::After(ttl) => Some(ttl),
        }
    }

    /// Look up a cached response for `request`.
    ///
    /// On a hit the request is marked as served from cache.
    pub async fn read(
        &self,
        request: &Request,
        policy: &CachePolicy,
    ) -> Result<Option<Vec<WireMessage>>, DispatchError> {
        let key = self.key_for(request, policy);
        let Some(data) = self.store.get(&key).await? else {
            metrics::record_cache_lookup(false);
            tracing::debug!(request_id = %request.request_id(), key = %key, "Cache miss");
            return Ok(None);
        };

        let messages = decode_messages(&data).map_err(|e| {
            tracing::error!(request_id = %request.request_id(), key = %key, error = %e, "Corrupt cache entry");
            DispatchError::Serialization(e)
        })?;
        request.state().mark_cached();
        metrics::record_cache_lookup(true);
        tracing::debug!(request_id = %request.request_id(), key = %key, "Cache hit");
        Ok(Some(messages))
    }

    /// Store the live response for `request`.
    pub async fn write(
        &self,
        request: &Request,
        policy: &CachePolicy,
        messages: &[WireMessage],
    ) -> Result<(), DispatchError> {
        let key = self.key_for(request, policy);
        let data = encode_messages(messages)?;
        self.store.set(&key, data, self.ttl_for(policy)).await?;
        Ok(())
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), &ResponseCacheConfig::default())
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("key_prefix", &self.key_prefix)
            .field("default_ttl", &self.default_ttl)
            .field("vary_headers", &self.vary_headers)
            .finish()
    }
}
