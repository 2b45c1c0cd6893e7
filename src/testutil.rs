//! Scripted [`BrowserHost`] fake for unit tests.
//!
//! Emulates the page boundary the harness talks to: an in-memory VFS for
//! the bridge scripts, and queued state objects for the invocation
//! polling scripts. No real browser involved.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::bridge;
use crate::invoke;
use crate::session::{BrowserHost, HostError};

#[derive(Default)]
pub(crate) struct ScriptedHost {
    vfs: Mutex<HashMap<String, Vec<u8>>>,
    upload_buf: Mutex<Vec<String>>,
    /// When set, commit stores only this many bytes — simulates a
    /// truncated page-side write.
    truncate_uploads: Mutex<Option<usize>>,
    image_states: Mutex<VecDeque<Value>>,
    transcode_states: Mutex<VecDeque<Value>>,
    tmk_code: Mutex<i64>,
    engine_ready: AtomicBool,
    pub visited: Mutex<Vec<String>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            tmk_code: Mutex::new(1),
            engine_ready: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn seed_vfs(&self, name: &str, bytes: &[u8]) {
        self.vfs
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn vfs_contains(&self, name: &str) -> bool {
        self.vfs.lock().unwrap().contains_key(name)
    }

    pub fn truncate_uploads_to(&self, len: usize) {
        *self.truncate_uploads.lock().unwrap() = Some(len);
    }

    pub fn push_image_state(&self, state: Value) {
        self.image_states.lock().unwrap().push_back(state);
    }

    pub fn push_transcode_state(&self, state: Value) {
        self.transcode_states.lock().unwrap().push_back(state);
    }

    pub fn set_tmk_code(&self, code: i64) {
        *self.tmk_code.lock().unwrap() = code;
    }

    pub fn set_engine_ready(&self, ready: bool) {
        self.engine_ready.store(ready, Ordering::Relaxed);
    }
}

#[async_trait]
impl BrowserHost for ScriptedHost {
    async fn goto(&self, url: &str) -> Result<(), HostError> {
        self.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, HostError> {
        let arg_str = |idx: usize| -> String {
            args.get(idx)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        if script == bridge::JS_UPLOAD_BEGIN {
            self.upload_buf.lock().unwrap().clear();
            return Ok(json!(true));
        }
        if script == bridge::JS_UPLOAD_CHUNK {
            let mut buf = self.upload_buf.lock().unwrap();
            buf.push(arg_str(0));
            return Ok(json!(buf.len()));
        }
        if script == bridge::JS_UPLOAD_COMMIT {
            let chunks: Vec<String> = std::mem::take(&mut *self.upload_buf.lock().unwrap());
            let mut bytes = Vec::new();
            for chunk in chunks {
                let decoded = BASE64
                    .decode(chunk.as_bytes())
                    .map_err(|e| HostError::Script(format!("bad chunk: {e}")))?;
                bytes.extend_from_slice(&decoded);
            }
            if let Some(limit) = *self.truncate_uploads.lock().unwrap() {
                bytes.truncate(limit);
            }
            let len = bytes.len();
            self.vfs.lock().unwrap().insert(arg_str(0), bytes);
            return Ok(json!(len));
        }
        if script == bridge::JS_VFS_UNLINK {
            self.vfs.lock().unwrap().remove(&arg_str(0));
            return Ok(json!(true));
        }
        if script == bridge::JS_VFS_READ {
            let vfs = self.vfs.lock().unwrap();
            let bytes = vfs
                .get(&arg_str(0))
                .ok_or_else(|| HostError::Script("no such vfs file".to_string()))?;
            return Ok(json!(BASE64.encode(bytes)));
        }

        if script == invoke::JS_IMAGE_ENGINE_READY || script == invoke::JS_TMK_ENGINE_READY {
            return Ok(json!(self.engine_ready.load(Ordering::Relaxed)));
        }
        if script == invoke::JS_START_IMAGE_HASH || script == invoke::JS_START_TRANSCODE {
            return Ok(json!(true));
        }
        if script == invoke::JS_POLL_IMAGE_HASH {
            let state = self.image_states.lock().unwrap().pop_front();
            return Ok(state.unwrap_or(Value::Null));
        }
        if script == invoke::JS_POLL_TRANSCODE {
            let state = self.transcode_states.lock().unwrap().pop_front();
            return Ok(state.unwrap_or(Value::Null));
        }
        if script == invoke::JS_RUN_TMK {
            return Ok(json!(*self.tmk_code.lock().unwrap()));
        }

        Err(HostError::Script(format!("unscripted call: {script}")))
    }
}
