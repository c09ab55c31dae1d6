//! Bytecode cache controls.
//!
//! The engine never rewrites a `.py` source file. A mutant is materialized
//! by swapping the derived `__pycache__` entry: a PEP 552 timestamp-format
//! `.pyc` whose header carries the *pristine* source's mtime and size, so
//! the interpreter's import machinery accepts it as up to date instead of
//! recompiling from source. Byte-compilation itself is delegated to the
//! host interpreter; the container format and the cache-path scheme are
//! reimplemented here and must track CPython's if the runtime changes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::error::{Error, Result};
use crate::find_py_files;

/// Emits the interpreter's cache tag and pyc magic number on one probe.
const PROBE_SNIPPET: &str = "import sys, importlib.util\n\
     out = sys.stdout.buffer\n\
     out.write(sys.implementation.cache_tag.encode() + b'\\n' + importlib.util.MAGIC_NUMBER)\n";

/// Compiles source from stdin against the real file name and emits the
/// marshalled code object.
const COMPILE_SNIPPET: &str = "import sys, marshal\n\
     source = sys.stdin.buffer.read().decode('utf-8')\n\
     code = compile(source, sys.argv[1], 'exec')\n\
     sys.stdout.buffer.write(marshal.dumps(code))\n";

/// Handle to the host Python interpreter and its cache scheme.
///
/// Probed once per run; carries everything needed to place a compiled
/// artifact where the import system will load it.
#[derive(Debug, Clone)]
pub struct PythonRuntime {
    pub executable: PathBuf,
    pub cache_tag: String,
    pub magic: [u8; 4],
}

impl PythonRuntime {
    /// Probe the interpreter (default `python3`) for its cache tag and
    /// pyc magic number.
    pub fn probe(executable: Option<&Path>) -> Result<Self> {
        let exe = executable.unwrap_or(Path::new("python3")).to_path_buf();
        let output = Command::new(&exe)
            .arg("-c")
            .arg(PROBE_SNIPPET)
            .output()
            .map_err(|e| Error::Interpreter(format!("failed to invoke {}: {e}", exe.display())))?;

        if !output.status.success() {
            return Err(Error::Interpreter(format!(
                "probe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let newline = output
            .stdout
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| Error::Interpreter("malformed probe output".to_string()))?;
        let cache_tag = String::from_utf8_lossy(&output.stdout[..newline]).to_string();
        let magic_bytes = &output.stdout[newline + 1..];
        if cache_tag.is_empty() || magic_bytes.len() != 4 {
            return Err(Error::Interpreter("malformed probe output".to_string()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(magic_bytes);

        debug!("probed {}: cache tag {}", exe.display(), cache_tag);
        Ok(PythonRuntime {
            executable: exe,
            cache_tag,
            magic,
        })
    }

    /// Byte-compile `source` as if it were the contents of `file_name`,
    /// returning the marshalled code object.
    pub fn compile_source(&self, source: &str, file_name: &str) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.executable)
            .arg("-c")
            .arg(COMPILE_SNIPPET)
            .arg(file_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Interpreter(format!("failed to spawn compiler: {e}")))?;

        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            stdin
                .write_all(source.as_bytes())
                .map_err(|e| Error::Interpreter(format!("failed to feed compiler: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::Interpreter(format!("compiler did not finish: {e}")))?;

        if !output.status.success() {
            return Err(Error::Interpreter(format!(
                "compile of {file_name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }

    /// The `__pycache__` location the import system derives for a source
    /// file under this interpreter.
    pub fn cache_file_loc(&self, src_file: &Path) -> Result<PathBuf> {
        cache_file_loc(src_file, &self.cache_tag)
    }
}

/// Only timestamp-based cache invalidation is supported; a populated
/// `SOURCE_DATE_EPOCH` switches the interpreter to hash validation and
/// would mask the swapped artifact.
pub fn check_cache_invalidation_mode() -> Result<()> {
    if std::env::var_os("SOURCE_DATE_EPOCH").is_some_and(|v| !v.is_empty()) {
        return Err(Error::Configuration(
            "SOURCE_DATE_EPOCH is set, but only timestamp cache invalidation is supported. \
             Clear this environment variable so cache swaps can trigger mutations."
                .to_string(),
        ));
    }
    Ok(())
}

/// Cache file path for a source file: `__pycache__/{stem}.{tag}.pyc`.
pub fn cache_file_loc(src_file: &Path, cache_tag: &str) -> Result<PathBuf> {
    let stem = src_file
        .file_stem()
        .ok_or_else(|| Error::Cache(format!("{} has no file stem", src_file.display())))?;
    let parent = src_file.parent().unwrap_or(Path::new(""));
    let cfile = parent.join("__pycache__").join(format!(
        "{}.{}.pyc",
        stem.to_string_lossy(),
        cache_tag
    ));

    if let Ok(meta) = fs::symlink_metadata(&cfile) {
        if meta.file_type().is_symlink() {
            return Err(Error::Cache(format!(
                "{} is a symlink and would be replaced by a regular file",
                cfile.display()
            )));
        }
        if !meta.is_file() {
            return Err(Error::Cache(format!(
                "{} is a non-regular file and would be replaced by a regular one",
                cfile.display()
            )));
        }
    }

    Ok(cfile)
}

/// Cache file path under a private cache root, laid out the way the
/// interpreter expects with `PYTHONPYCACHEPREFIX`: the source directory's
/// absolute path re-rooted under the prefix, without a `__pycache__`
/// component.
pub fn prefixed_cache_file(prefix: &Path, src_file: &Path, cache_tag: &str) -> Result<PathBuf> {
    let stem = src_file
        .file_stem()
        .ok_or_else(|| Error::Cache(format!("{} has no file stem", src_file.display())))?;
    let parent = src_file.parent().unwrap_or(Path::new(""));

    let mut out = prefix.to_path_buf();
    for component in parent.components() {
        use std::path::Component;
        match component {
            Component::RootDir | Component::Prefix(_) => {}
            other => out.push(other.as_os_str()),
        }
    }
    out.push(format!("{}.{}.pyc", stem.to_string_lossy(), cache_tag));
    Ok(out)
}

/// Source file stat snapshot used for cache invalidation, plus the file
/// mode to stamp onto the artifact.
pub fn source_stats(src_file: &Path) -> Result<(u32, u32, u32)> {
    let meta = fs::metadata(src_file)?;
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    let size = meta.len() as u32;
    let mode = file_mode(&meta);
    Ok((mtime, size, mode))
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

/// Assemble a PEP 552 timestamp-format pyc: magic, zeroed flags word,
/// source mtime and source size (both truncated to 32 bits), then the
/// marshalled code object.
pub fn timestamp_pyc(magic: [u8; 4], mtime: u32, size: u32, code: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + code.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&mtime.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(code);
    out
}

/// Create the `__pycache__` directories for a cache file if needed.
pub fn create_cache_dirs(cfile: &Path) -> Result<()> {
    if let Some(parent) = cfile.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write the artifact atomically: temp file in the target directory,
/// permissions applied, then renamed into place.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    set_mode(tmp.as_file(), mode)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> Result<()> {
    Ok(())
}

/// Remove cache files for a source file or, recursively, for every source
/// file under a directory. Removal failures are tolerated: a vanished
/// cache entry already is the desired state.
pub fn remove_existing_cache_files(src_loc: &Path) {
    if src_loc.is_dir() {
        match find_py_files(src_loc) {
            Ok(files) => {
                for file in files {
                    remove_cache_files_for(&file);
                }
            }
            Err(e) => debug!("cache sweep of {} failed: {e}", src_loc.display()),
        }
    } else if src_loc.extension().is_some_and(|e| e == "py") {
        remove_cache_files_for(src_loc);
    }
}

/// Remove every `{stem}.*.pyc` in the source file's `__pycache__`,
/// whatever interpreter wrote it.
fn remove_cache_files_for(src_file: &Path) {
    let Some(parent) = src_file.parent() else {
        return;
    };
    let Some(stem) = src_file.file_stem() else {
        return;
    };
    let cache_dir = parent.join("__pycache__");
    let Ok(entries) = fs::read_dir(&cache_dir) else {
        return;
    };

    let prefix = format!("{}.", stem.to_string_lossy());
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(".pyc") {
            debug!("removing cache file: {}", entry.path().display());
            if let Err(e) = fs::remove_file(entry.path()) {
                debug!("could not remove {}: {e}", entry.path().display());
            }
        }
    }
}
