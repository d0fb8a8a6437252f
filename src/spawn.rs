//! `posix_spawn()` の安全な Rust ラッパーと、子プロセスの終了待ち。
//!
//! executor はプログラムのパスを [`SearchPath`](crate::path::SearchPath) で解決済みの状態で呼ぶため、
//! ここでは PATH 検索をしない `posix_spawn` を使う。
//!
//! ## 構成
//!
//! | 型 / 関数 | 役割 |
//! |-----|------|
//! | [`SpawnAttr`] | `posix_spawnattr_t` の RAII ラッパー（シグナル設定） |
//! | [`FileActions`] | `posix_spawn_file_actions_t` の RAII ラッパー（fd 付け替え） |
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//! | [`spawn`] | 上記を組み合わせて `posix_spawn` を呼ぶ |
//! | [`wait`] | `waitpid` で終了を待ち、終了コードに変換する |
//!
//! シェルが開く fd はすべて close-on-exec なので、子プロセスに残るのは
//! `dup2` で 0/1/2 に付け替えたものだけになる。

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

// ── エラー型 ──────────────────────────────────────────────────────

/// 子プロセスを起動できなかった。
#[derive(Debug, Error)]
#[error("{command}: {source}")]
pub struct SpawnError {
    /// コマンド名（エラーメッセージ用）。
    pub command: String,
    #[source]
    pub source: io::Error,
}

impl SpawnError {
    /// エラーに対応する終了ステータス。
    /// 127 = 見つからない, 126 = 実行権限なし, 1 = その他。
    pub fn exit_status(&self) -> i32 {
        match self.source.raw_os_error() {
            Some(libc::ENOENT) => 127,
            Some(libc::EACCES) => 126,
            _ => 1,
        }
    }
}

// ── SpawnAttr ─────────────────────────────────────────────────────

/// `posix_spawnattr_t` の RAII ラッパー。Drop で自動 destroy。
struct SpawnAttr {
    inner: libc::posix_spawnattr_t,
}

impl SpawnAttr {
    fn new() -> Self {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            libc::posix_spawnattr_init(&mut attr);
            Self { inner: attr }
        }
    }

    /// シェルが無視しているシグナルを子プロセスで `SIG_DFL` に戻す。
    ///
    /// SIGPIPE は Rust ランタイムが無視に設定しているため、戻さないと
    /// `yes | head -1` の `yes` が終了しなくなる。
    fn set_sigdefault(&mut self) {
        unsafe {
            let mut flags: libc::c_short = 0;
            libc::posix_spawnattr_getflags(&self.inner, &mut flags);
            flags |= libc::POSIX_SPAWN_SETSIGDEF as libc::c_short;
            libc::posix_spawnattr_setflags(&mut self.inner, flags);

            let mut sigset: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut sigset);
            libc::sigaddset(&mut sigset, libc::SIGPIPE);
            libc::sigaddset(&mut sigset, libc::SIGINT);
            libc::sigaddset(&mut sigset, libc::SIGQUIT);
            libc::posix_spawnattr_setsigdefault(&mut self.inner, &sigset);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.inner
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.inner);
        }
    }
}

// ── FileActions ───────────────────────────────────────────────────

/// `posix_spawn_file_actions_t` の RAII ラッパー。Drop で自動 destroy。
struct FileActions {
    inner: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> Self {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            libc::posix_spawn_file_actions_init(&mut actions);
            Self { inner: actions }
        }
    }

    /// `dup2(fd, newfd)` アクションを追加する。パイプ接続・リダイレクト用。
    fn add_dup2(&mut self, fd: RawFd, newfd: RawFd) {
        unsafe {
            libc::posix_spawn_file_actions_adddup2(&mut self.inner, fd, newfd);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.inner
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.inner);
        }
    }
}

// ── CStringVec ────────────────────────────────────────────────────

/// argv 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*mut libc::c_char>,
}

impl CStringVec {
    /// 引数に NUL バイトが含まれていれば `None`。
    fn from_args(args: &[String]) -> Option<Self> {
        let strings = args
            .iter()
            .map(|s| CString::new(s.as_bytes()).ok())
            .collect::<Option<Vec<CString>>>()?;
        let mut ptrs: Vec<*mut libc::c_char> = strings
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        ptrs.push(std::ptr::null_mut()); // NULL 終端
        Some(Self {
            _strings: strings,
            ptrs,
        })
    }

    fn as_ptr(&self) -> *const *mut libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── spawn / wait ──────────────────────────────────────────────────

/// 子プロセスの標準ストリームの接続先。`None` はシェルのものをそのまま継承する。
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioFds {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    pub stderr: Option<RawFd>,
}

/// `program` を `args`（`args[0]` は表示用のコマンド名）で起動し、子 PID を返す。
pub fn spawn(program: &Path, args: &[String], fds: StdioFds) -> Result<libc::pid_t, SpawnError> {
    let command = args.first().cloned().unwrap_or_default();
    let invalid = |command: String| SpawnError {
        command,
        source: io::Error::from(io::ErrorKind::InvalidInput),
    };

    let argv = CStringVec::from_args(args).ok_or_else(|| invalid(command.clone()))?;
    let path = CString::new(program.as_os_str().as_bytes()).map_err(|_| invalid(command.clone()))?;

    let mut attr = SpawnAttr::new();
    attr.set_sigdefault();

    let mut actions = FileActions::new();
    for (fd, target) in [
        (fds.stdin, libc::STDIN_FILENO),
        (fds.stdout, libc::STDOUT_FILENO),
        (fds.stderr, libc::STDERR_FILENO),
    ] {
        if let Some(fd) = fd {
            if fd != target {
                actions.add_dup2(fd, target);
            }
        }
    }

    // environ を継承（std::env::set_var で設定済みの環境がそのまま渡る）
    extern "C" {
        static environ: *const *mut libc::c_char;
    }

    let mut pid: libc::pid_t = 0;
    let ret = unsafe {
        libc::posix_spawn(
            &mut pid,
            path.as_ptr(),
            actions.as_ptr(),
            attr.as_ptr(),
            argv.as_ptr(),
            environ as *const *mut libc::c_char,
        )
    };

    if ret != 0 {
        return Err(SpawnError {
            command,
            source: io::Error::from_raw_os_error(ret),
        });
    }

    debug!(pid, program = %program.display(), "spawned");
    Ok(pid)
}

/// `pid` の終了を待ち、終了コードを返す。シグナルで終了した場合は `128 + signal`。
pub fn wait(pid: libc::pid_t) -> i32 {
    let mut raw_status = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut raw_status, 0) };
        if ret == pid {
            break;
        }
        if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
            return 1;
        }
    }

    if libc::WIFEXITED(raw_status) {
        libc::WEXITSTATUS(raw_status)
    } else if libc::WIFSIGNALED(raw_status) {
        128 + libc::WTERMSIG(raw_status)
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exit_code_is_reported() {
        let pid = spawn(Path::new("/bin/sh"), &args(&["sh", "-c", "exit 7"]), StdioFds::default()).unwrap();
        assert_eq!(wait(pid), 7);
    }

    #[test]
    fn signal_exit_is_128_plus_signal() {
        let pid = spawn(Path::new("/bin/sh"), &args(&["sh", "-c", "kill -TERM $$"]), StdioFds::default()).unwrap();
        assert_eq!(wait(pid), 128 + libc::SIGTERM);
    }

    #[test]
    fn stdout_is_redirected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let file = std::fs::File::create(&path).unwrap();
        let fds = StdioFds {
            stdout: Some(std::os::unix::io::AsRawFd::as_raw_fd(&file)),
            ..StdioFds::default()
        };

        let pid = spawn(Path::new("/bin/sh"), &args(&["sh", "-c", "echo spawned"]), fds).unwrap();
        assert_eq!(wait(pid), 0);
        drop(file);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "spawned\n");
    }

    #[test]
    fn missing_program_fails() {
        // glibc は exec 失敗を子の終了コード 127 として返す実装もあるため、両方を許容する
        match spawn(Path::new("/nonexistent/prog"), &args(&["prog"]), StdioFds::default()) {
            Err(e) => assert_eq!(e.exit_status(), 127),
            Ok(pid) => assert_eq!(wait(pid), 127),
        }
    }

    #[test]
    fn nul_in_argument_is_rejected() {
        let err = spawn(Path::new("/bin/sh"), &args(&["sh", "a\0b"]), StdioFds::default()).unwrap_err();
        assert_eq!(err.command, "sh");
        assert_eq!(err.exit_status(), 1);
    }
}
