// SPDX-License-Identifier: MIT
//! File Bridge — moves local media bytes into the page's virtual
//! filesystem so the compiled hashing module can read them as if they
//! were local files.
//!
//! Transfer is chunked base64 through script evaluation: chunks
//! accumulate in a page-side buffer, then a single commit decodes them
//! into the VFS under the original filename and reports the resulting
//! size, which must match the local file exactly.
//!
//! The VFS is global per session. Nothing else in the harness touches
//! it directly — all access goes through `push`/`remove` here, and
//! `remove` is idempotent so cleanup can run on every error path.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::debug;

use crate::session::{BrowserHost, HostError};

/// Raw bytes per upload chunk. Base64 expansion keeps the script payload
/// under ~256 KiB per round trip.
const CHUNK_BYTES: usize = 192 * 1024;

pub(crate) const JS_UPLOAD_BEGIN: &str = "window.__wasmhashUpload = []; return true;";

pub(crate) const JS_UPLOAD_CHUNK: &str =
    "window.__wasmhashUpload.push(arguments[0]); return window.__wasmhashUpload.length;";

pub(crate) const JS_UPLOAD_COMMIT: &str = r#"
var name = arguments[0];
var chunks = window.__wasmhashUpload || [];
var raw = '';
for (var i = 0; i < chunks.length; i++) { raw += atob(chunks[i]); }
var bytes = new Uint8Array(raw.length);
for (var j = 0; j < raw.length; j++) { bytes[j] = raw.charCodeAt(j); }
FS.writeFile(name, bytes);
delete window.__wasmhashUpload;
return FS.stat(name).size;
"#;

pub(crate) const JS_VFS_UNLINK: &str = r#"
var name = arguments[0];
if (FS.analyzePath(name).exists) { FS.unlink(name); }
return true;
"#;

pub(crate) const JS_VFS_READ: &str = r#"
var bytes = FS.readFile(arguments[0]);
var raw = '';
for (var i = 0; i < bytes.length; i++) { raw += String.fromCharCode(bytes[i]); }
return btoa(raw);
"#;

/// Handle to a named byte buffer in the session's virtual filesystem.
/// Scoped to one verification case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedFile {
    pub name: String,
    pub len: u64,
}

/// Read `local_path` fully and transfer it into the page VFS under the
/// file's own name.
///
/// # Errors
///
/// [`BridgeError::Read`] when the local file cannot be read,
/// [`BridgeError::Host`] when a transfer script fails, and
/// [`BridgeError::LengthMismatch`] when the VFS reports a different size
/// than was sent.
pub async fn push(host: &dyn BrowserHost, local_path: &Path) -> Result<BridgedFile, BridgeError> {
    let bytes = std::fs::read(local_path)
        .map_err(|e| BridgeError::Read(local_path.display().to_string(), e.to_string()))?;
    let name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            BridgeError::Read(local_path.display().to_string(), "no file name".to_string())
        })?;

    host.execute(JS_UPLOAD_BEGIN, vec![]).await?;
    for chunk in bytes.chunks(CHUNK_BYTES) {
        host.execute(JS_UPLOAD_CHUNK, vec![json!(BASE64.encode(chunk))])
            .await?;
    }
    let reported = host.execute(JS_UPLOAD_COMMIT, vec![json!(name)]).await?;

    let vfs_len = reported.as_u64().unwrap_or(0);
    if vfs_len != bytes.len() as u64 {
        return Err(BridgeError::LengthMismatch {
            name,
            expected: bytes.len() as u64,
            actual: vfs_len,
        });
    }

    debug!(%name, len = vfs_len, "file bridged into page vfs");
    Ok(BridgedFile {
        name,
        len: vfs_len,
    })
}

/// Delete a bridged file from the VFS. Removing a file that is already
/// gone is a no-op, not an error.
pub async fn remove(host: &dyn BrowserHost, file: &BridgedFile) -> Result<(), BridgeError> {
    remove_named(host, &file.name).await
}

/// Unlink an arbitrary VFS name (intermediate transcode output, module
/// artifact). Same idempotence as [`remove`].
pub async fn remove_named(host: &dyn BrowserHost, name: &str) -> Result<(), BridgeError> {
    host.execute(JS_VFS_UNLINK, vec![json!(name)]).await?;
    Ok(())
}

/// Read a bridged file back out of the VFS.
pub async fn read_back(
    host: &dyn BrowserHost,
    file: &BridgedFile,
) -> Result<Vec<u8>, BridgeError> {
    let encoded = host.execute(JS_VFS_READ, vec![json!(file.name)]).await?;
    let text = match encoded {
        Value::String(s) => s,
        other => {
            return Err(BridgeError::Read(
                file.name.clone(),
                format!("unexpected read result: {other}"),
            ))
        }
    };
    BASE64
        .decode(text.as_bytes())
        .map_err(|e| BridgeError::Read(file.name.clone(), e.to_string()))
}

/// Per-case bridge failure — the case fails, the run continues.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("cannot read {0}: {1}")]
    Read(String, String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("vfs size mismatch for {name}: sent {expected} bytes, page reports {actual}")]
    LengthMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
}
