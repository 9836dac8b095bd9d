//! Form data parsing and temporary uploads.
//!
//! # Responsibilities
//! - Parse `application/x-www-form-urlencoded` and `multipart/form-data` bodies
//! - Spool uploaded files to temporary files owned by the request
//! - Close each upload exactly once, by the handler or at request teardown
//!
//! # Design Decisions
//! - Multipart parsing is done on the fully buffered body (bounded by the body limit)
//! - Parse failures are `SerializationError`s so `data` resolution can turn them into 400s
//! - Closing an upload drops its `NamedTempFile`, which removes the file from disk

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::error::{DispatchError, SerializationError};

/// A file received in a multipart form, backed by a temporary file.
#[derive(Debug)]
pub struct UploadFile {
    field_name: String,
    filename: String,
    content_type: String,
    size: usize,
    path: PathBuf,
    file: Mutex<Option<NamedTempFile>>,
    closed: AtomicBool,
}

impl UploadFile {
    /// Write `data` to a fresh temporary file. Blocking.
    pub fn create(
        field_name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: &[u8],
        dir: Option<&Path>,
    ) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-");
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(data)?;
        file.flush()?;

        Ok(Self {
            field_name: field_name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            size: data.len(),
            path: file.path().to_path_buf(),
            file: Mutex::new(Some(file)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Location of the spooled file. Gone once the upload is closed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Read the whole upload.
    pub async fn read(&self) -> io::Result<Bytes> {
        if self.is_closed() {
            return Err(io::Error::other("upload file is closed"));
        }
        tokio::fs::read(&self.path).await.map(Bytes::from)
    }

    /// Close the upload and delete its file.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(file) = file {
            if let Err(e) = file.close() {
                tracing::warn!(path = ?self.path, error = %e, "Failed to remove upload file");
            }
        }
        tracing::trace!(field = %self.field_name, filename = %self.filename, "Upload closed");
        true
    }
}

/// One value of a parsed form.
#[derive(Debug, Clone)]
pub enum FormValue {
    Text(String),
    File(Arc<UploadFile>),
}

/// Parsed form fields in arrival order.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    fields: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: FormValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FormValue> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(FormValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn get_file(&self, name: &str) -> Option<&Arc<UploadFile>> {
        match self.get(name) {
            Some(FormValue::File(file)) => Some(file),
            _ => None,
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &Arc<UploadFile>> {
        self.fields.iter().filter_map(|(_, v)| match v {
            FormValue::File(file) => Some(file),
            FormValue::Text(_) => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON view of the form: repeated keys become arrays, files become their filename.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            let value = match value {
                FormValue::Text(text) => serde_json::Value::String(text.clone()),
                FormValue::File(file) => serde_json::Value::String(file.filename().to_string()),
            };
            match map.get_mut(name) {
                Some(serde_json::Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = serde_json::Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(name.clone(), value);
                }
            }
        }
        serde_json::Value::Object(map)
    }

    /// Build a form from multipart parts, spooling files to disk.
    pub async fn from_parts(
        parts: Vec<MultipartPart>,
        temp_dir: Option<PathBuf>,
    ) -> Result<Self, DispatchError> {
        tokio::task::spawn_blocking(move || {
            let mut form = FormData::new();
            for part in parts {
                let value = match part.filename {
                    Some(filename) => {
                        let content_type = part
                            .content_type
                            .unwrap_or_else(|| "application/octet-stream".to_string());
                        let upload = UploadFile::create(
                            &part.name,
                            filename,
                            content_type,
                            &part.data,
                            temp_dir.as_deref(),
                        )
                        .map_err(|e| DispatchError::Internal(format!("failed to spool upload: {e}")))?;
                        FormValue::File(Arc::new(upload))
                    }
                    None => FormValue::Text(String::from_utf8_lossy(&part.data).into_owned()),
                };
                form.push(part.name, value);
            }
            Ok(form)
        })
        .await
        .map_err(|e| DispatchError::Internal(format!("upload task failed: {e}")))?
    }
}

/// Parse `application/x-www-form-urlencoded` data.
pub fn parse_urlencoded(body: &[u8]) -> FormData {
    let mut form = FormData::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        form.push(key.into_owned(), FormValue::Text(value.into_owned()));
    }
    form
}

/// Split a header such as `multipart/form-data; boundary=x` into value and options.
pub fn parse_content_header(value: &str) -> (String, HashMap<String, String>) {
    let mut pieces = value.split(';');
    let main = pieces.next().unwrap_or_default().trim().to_ascii_lowercase();
    let options = pieces
        .filter_map(|piece| {
            let (key, val) = piece.split_once('=')?;
            let val = val.trim().trim_matches('"');
            Some((key.trim().to_ascii_lowercase(), val.to_string()))
        })
        .collect();
    (main, options)
}

/// One raw part of a multipart body.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Parse a fully buffered `multipart/form-data` body.
pub fn parse_multipart(
    body: &Bytes,
    boundary: &str,
    part_limit: usize,
) -> Result<Vec<MultipartPart>, SerializationError> {
    if boundary.is_empty() {
        return Err(SerializationError("missing multipart boundary".into()));
    }
    let delimiter = format!("--{boundary}").into_bytes();
    let separator = [b"\r\n".as_slice(), delimiter.as_slice()].concat();

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| SerializationError("missing opening multipart boundary".into()))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(SerializationError("malformed multipart boundary line".into()));
        }
        pos += 2;

        let end = find(body, &separator, pos)
            .ok_or_else(|| SerializationError("unterminated multipart part".into()))?;
        parts.push(parse_part(body.slice(pos..end))?);
        if parts.len() > part_limit {
            return Err(SerializationError(format!(
                "multipart form exceeds {part_limit} parts"
            )));
        }
        pos = end + separator.len();
    }

    Ok(parts)
}

fn parse_part(part: Bytes) -> Result<MultipartPart, SerializationError> {
    let (head, data) = if part.starts_with(b"\r\n") {
        (&b""[..], part.slice(2..))
    } else {
        let split = find(&part, b"\r\n\r\n", 0)
            .ok_or_else(|| SerializationError("multipart part has no header terminator".into()))?;
        (&part[..split], part.slice(split + 4..))
    };

    let head = std::str::from_utf8(head)
        .map_err(|_| SerializationError("multipart headers are not utf-8".into()))?;

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split("\r\n").filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once(':') else {
            return Err(SerializationError(format!("malformed multipart header {line:?}")));
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "content-disposition" => {
                let (_, options) = parse_content_header(value);
                name = options.get("name").cloned();
                filename = options.get("filename").cloned();
            }
            "content-type" => content_type = Some(value.trim().to_string()),
            _ => {}
        }
    }

    let name =
        name.ok_or_else(|| SerializationError("multipart part without a field name".into()))?;
    Ok(MultipartPart {
        name,
        filename,
        content_type,
        data,
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multipart_body() -> Bytes {
        Bytes::from(
            "--XyZ\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             report\r\n\
             --XyZ\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             hello world\r\n\
             --XyZ--\r\n",
        )
    }

    #[test]
    fn test_parse_content_header() {
        let (value, options) = parse_content_header("multipart/form-data; boundary=\"XyZ\"");
        assert_eq!(value, "multipart/form-data");
        assert_eq!(options.get("boundary").map(String::as_str), Some("XyZ"));
    }

    #[test]
    fn test_parse_multipart() {
        let parts = parse_multipart(&multipart_body(), "XyZ", 10).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "title");
        assert_eq!(&parts[0].data[..], b"report");
        assert_eq!(parts[1].filename.as_deref(), Some("a.txt"));
        assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(&parts[1].data[..], b"hello world");
    }

    #[test]
    fn test_parse_multipart_rejects_garbage() {
        assert!(parse_multipart(&Bytes::from("not multipart"), "XyZ", 10).is_err());
        assert!(parse_multipart(&multipart_body(), "", 10).is_err());
        assert!(parse_multipart(&multipart_body(), "XyZ", 1).is_err());
    }

    #[test]
    fn test_parse_urlencoded_repeated_keys() {
        let form = parse_urlencoded(b"tag=a&tag=b&name=x%20y");
        assert_eq!(form.get_text("name"), Some("x y"));
        assert_eq!(form.get_all("tag").count(), 2);
        assert_eq!(form.to_json()["tag"], serde_json::json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_upload_closes_once() {
        let parts = parse_multipart(&multipart_body(), "XyZ", 10).unwrap();
        let form = FormData::from_parts(parts, None).await.unwrap();
        let upload = form.get_file("file").unwrap().clone();

        assert_eq!(upload.read().await.unwrap(), Bytes::from("hello world"));
        assert!(upload.path().exists());

        assert!(upload.close().await);
        assert!(!upload.close().await);
        assert!(upload.is_closed());
        assert!(!upload.path().exists());
        assert!(upload.read().await.is_err());
    }
}
