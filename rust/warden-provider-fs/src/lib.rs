//! Filesystem sandbox for warden host dispatch.
//!
//! Exposes two gated operations:
//! - `write_file` (host slot 0) — write a file inside the jail
//! - `read_file` (host slot 64) — read a file into the arena
//!
//! Every path is lexically cleaned and must remain under the sandbox
//! root after cleaning; `../`, absolute paths and other escape spellings
//! are rejected before the filesystem is touched. Writes are capped at
//! `max_bytes` and land atomically (temp file + rename).

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use warden_core::Value;
use warden_vm::bytecode::{host, scopes};
use warden_vm::{Machine, VmError};

#[derive(Debug, Error)]
pub enum FsError {
    #[error("path escape violation: '{0}' leaves the sandbox root")]
    PathEscape(String),
    #[error("file size limit exceeded: {size} bytes > {limit}")]
    FileTooLarge { size: usize, limit: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FsError> for VmError {
    fn from(e: FsError) -> Self {
        VmError::Host(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

pub struct FsSandbox {
    root: PathBuf,
    max_bytes: usize,
}

/// Resolve `.` and `..` lexically, without touching the filesystem.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl FsSandbox {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root, max_bytes }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path jail: join under the root, clean, and require the result
    /// to still be prefixed by the root.
    fn jail(&self, rel: &str) -> Result<PathBuf, FsError> {
        let joined = self.root.join(rel);
        let cleaned = clean(&joined);
        if !cleaned.starts_with(&self.root) {
            return Err(FsError::PathEscape(rel.to_string()));
        }
        Ok(cleaned)
    }

    /// Write `content` at `rel` inside the jail.
    pub fn write(&self, rel: &str, content: &[u8]) -> Result<(), FsError> {
        let target = self.jail(rel)?;
        if content.len() > self.max_bytes {
            return Err(FsError::FileTooLarge {
                size: content.len(),
                limit: self.max_bytes,
            });
        }
        if let Some(parent) = target.parent() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o755);
            }
            builder.create(parent)?;
        }
        // Atomic replace: write beside the target, then rename over it.
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "out".to_string());
        let tmp = target.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Read the file at `rel` inside the jail.
    pub fn read(&self, rel: &str) -> Result<Vec<u8>, FsError> {
        let target = self.jail(rel)?;
        Ok(fs::read(target)?)
    }

    // -- Host functions: ( content path -- ) and ( path -- content ) --

    pub fn write_file(&self, m: &mut Machine) -> Result<(), VmError> {
        let path = m.pop_str()?;
        let content = m.pop_str()?;
        self.write(&path, content.as_bytes())?;
        Ok(())
    }

    pub fn read_file(&self, m: &mut Machine) -> Result<(), VmError> {
        let path = m.pop_str()?;
        let data = self.read(&path)?;
        let r = m.arena_mut().append(&data);
        m.push(Value::Str(r))
    }
}

/// Install the sandbox into its frozen host slots, both gated on the
/// filesystem scope.
pub fn install(sandbox: FsSandbox, m: &mut Machine) {
    let sandbox = Rc::new(sandbox);
    let write = Rc::clone(&sandbox);
    m.set_host(host::WRITE_FILE, "write_file", Some(scopes::FS_ENV), move |m| {
        write.write_file(m)
    });
    m.set_host(host::READ_FILE, "read_file", Some(scopes::FS_ENV), move |m| {
        sandbox.read_file(m)
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
