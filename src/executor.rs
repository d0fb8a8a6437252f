//! コマンド実行: ビルトイン判定、リダイレクト適用、パイプライン接続。
//!
//! - [`eval`]: 1 行を履歴に記録し、パースして単一コマンドかパイプラインに振り分ける
//! - [`run_single`]: 単一コマンド。ビルトインはプロセス内で直接、外部コマンドは `posix_spawn` で起動
//! - [`run_multiple`]: パイプライン。各段をパイプで接続し、段ごとに独立して実行する
//!
//! ## パイプラインの段
//!
//! | 段の種類 | 実行方法 |
//! |----------|----------|
//! | ビルトイン | ワーカースレッドで [`Shell`] のスナップショットに対して実行 |
//! | 外部コマンド | `posix_spawn` で子プロセスとして起動 |
//! | 見つからない | その段の stdout（パイプ）に `<name>: command not found` を書く |
//!
//! 起動順は「先頭以外の全段 → 先頭の段」で、先頭の段の完了を待ってから残りを待つ。
//! 1 つの段の失敗（リダイレクト失敗、起動失敗）は他の段を止めない。
//!
//! パイプの fd はすべて close-on-exec。親側の端は各段の起動直後に drop されるので、
//! 上流が終われば下流は EOF を受け取る。

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::builtins;
use crate::parser::{self, Command};
use crate::path::SearchPath;
use crate::redirect::{IoContext, Sink};
use crate::shell::{CommandResult, Shell};
use crate::spawn::{self, StdioFds};

/// 1 行を評価する。空白だけの行は記録も実行もしない。
pub fn eval(line: &str, shell: &mut Shell) -> CommandResult {
    if line.trim().is_empty() {
        return CommandResult::status(0);
    }
    shell.history.push(line);

    let commands = parser::parse_line(line);
    match commands.as_slice() {
        [] => CommandResult::status(0),
        [single] => run_single(single, shell),
        _ => run_multiple(&commands, shell),
    }
}

// ── 単一コマンド ──────────────────────────────────────────────────

/// 単一コマンドを実行する。stdin はシェルのものを継承する。
pub fn run_single(cmd: &Command, shell: &mut Shell) -> CommandResult {
    let Some(name) = cmd.args.first() else {
        return CommandResult::status(0);
    };

    // リダイレクトは実行前にすべて開く。失敗したら何も実行しない
    let mut io = match IoContext::open(&cmd.redirects) {
        Ok(io) => io,
        Err(e) => {
            eprintln!("tish: {}", e);
            return CommandResult::status(1);
        }
    };

    if let Some(builtin) = builtins::lookup(name) {
        return builtins::run(builtin, &cmd.args, shell, &mut io);
    }

    let Some(program) = SearchPath::from_env().locate(name) else {
        println!("{}: command not found", name);
        return CommandResult::status(1);
    };

    let fds = StdioFds {
        stdin: None,
        stdout: io.stdout.redirect_fd(),
        stderr: io.stderr.redirect_fd(),
    };
    match spawn::spawn(&program, &cmd.args, fds) {
        Ok(pid) => CommandResult::status(spawn::wait(pid)),
        Err(e) => {
            let _ = writeln!(io.stderr, "{}", e);
            CommandResult::status(e.exit_status())
        }
    }
    // io はここで drop され、リダイレクト先のファイルが閉じられる
}

// ── パイプライン ──────────────────────────────────────────────────

/// 起動済みの段。
enum Running {
    Process(libc::pid_t),
    Thread(JoinHandle<i32>),
    /// 起動せずに終わった（見つからない、リダイレクト失敗など）。
    Finished(i32),
}

impl Running {
    fn wait(self) -> i32 {
        match self {
            Running::Process(pid) => spawn::wait(pid),
            Running::Thread(handle) => handle.join().unwrap_or(1),
            Running::Finished(status) => status,
        }
    }
}

/// 両端とも close-on-exec のパイプを作る。`(読み取り端, 書き込み端)`。
fn cloexec_pipe() -> io::Result<(File, File)> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // 以降はエラーでも File の drop で両端が閉じる
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    for fd in fds {
        if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((read, write))
}

/// パイプラインを実行し、最後の段の終了ステータスを返す。
///
/// `exit` を含んでいてもシェルは終了しない（各段はスナップショット上で動く）。
pub fn run_multiple(commands: &[Command], shell: &Shell) -> CommandResult {
    let n = commands.len();
    if n == 0 {
        return CommandResult::status(0);
    }

    // 段 i の stdin は inputs[i]、stdout（最後の段以外）は outputs[i]
    let mut inputs: Vec<Option<File>> = (0..n).map(|_| None).collect();
    let mut outputs: Vec<Option<File>> = (0..n).map(|_| None).collect();
    for i in 0..n - 1 {
        match cloexec_pipe() {
            Ok((read, write)) => {
                outputs[i] = Some(write);
                inputs[i + 1] = Some(read);
            }
            Err(e) => {
                eprintln!("tish: pipe: {}", e);
                return CommandResult::status(1);
            }
        }
    }

    let search_path = SearchPath::from_env();
    let mut running: Vec<Option<Running>> = (0..n).map(|_| None).collect();
    for i in (1..n).chain(std::iter::once(0)) {
        let stage = start_stage(i, &commands[i], inputs[i].take(), outputs[i].take(), shell, &search_path);
        running[i] = Some(stage);
    }
    debug!(stages = n, "pipeline started");

    // 先頭の段を先に待ち、残りを順に回収する
    let mut statuses = vec![0; n];
    for i in std::iter::once(0).chain(1..n) {
        if let Some(stage) = running[i].take() {
            statuses[i] = stage.wait();
        }
    }
    debug!(?statuses, "pipeline finished");
    CommandResult::status(statuses[n - 1])
}

/// 段を 1 つ起動する。`stdin` / `pipe_out` はこの関数が消費し、戻る時には親側の端が閉じている。
fn start_stage(
    index: usize,
    cmd: &Command,
    stdin: Option<File>,
    pipe_out: Option<File>,
    shell: &Shell,
    search_path: &SearchPath,
) -> Running {
    let mut io = match IoContext::open(&cmd.redirects) {
        Ok(io) => io,
        Err(e) => {
            eprintln!("tish: {}", e);
            return Running::Finished(1);
        }
    };
    // 途中の段は常にパイプへ書く
    if let Some(pipe) = pipe_out {
        io.stdout = Sink::File(pipe);
    }

    let name = &cmd.args[0];

    if let Some(builtin) = builtins::lookup(name) {
        let args = cmd.args.clone();
        let mut snapshot = shell.clone();
        snapshot.pipeline_stage = true;
        let spawned = thread::Builder::new()
            .name(format!("stage-{}", index))
            .spawn(move || {
                // ビルトインは stdin を読まない
                drop(stdin);
                builtins::run(builtin, &args, &mut snapshot, &mut io).exit_code
            });
        return match spawned {
            Ok(handle) => Running::Thread(handle),
            Err(e) => {
                warn!(error = %e, stage = index, "failed to start builtin stage");
                eprintln!("tish: {}: {}", name, e);
                Running::Finished(1)
            }
        };
    }

    let Some(program) = search_path.locate(name) else {
        let _ = writeln!(io.stdout, "{}: command not found", name);
        io.flush();
        return Running::Finished(1);
    };

    let fds = StdioFds {
        stdin: stdin.as_ref().map(AsRawFd::as_raw_fd),
        stdout: io.stdout.redirect_fd(),
        stderr: io.stderr.redirect_fd(),
    };
    match spawn::spawn(&program, &cmd.args, fds) {
        Ok(pid) => Running::Process(pid),
        Err(e) => {
            let _ = writeln!(io.stderr, "{}", e);
            Running::Finished(e.exit_status())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read(path: &std::path::Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn builtin_output_is_redirected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut shell = Shell::new();

        let result = eval(&format!("echo hello world > {}", out.display()), &mut shell);
        assert_eq!(result, CommandResult::status(0));
        assert_eq!(read(&out), "hello world\n");
    }

    #[test]
    fn external_exit_code_is_returned() {
        let mut shell = Shell::new();
        let result = eval("sh -c 'exit 5'", &mut shell);
        assert_eq!(result, CommandResult::status(5));
    }

    #[test]
    fn external_stderr_is_redirected() {
        let dir = tempfile::tempdir().unwrap();
        let err = dir.path().join("err.txt");
        let mut shell = Shell::new();

        let line = format!("sh -c 'echo oops 1>&2' 2> {}", err.display());
        assert_eq!(eval(&line, &mut shell).exit_code, 0);
        assert_eq!(read(&err), "oops\n");
    }

    #[test]
    fn unknown_command_is_status_1() {
        let mut shell = Shell::new();
        let result = eval("definitely_not_a_command_xyz", &mut shell);
        assert_eq!(result, CommandResult::status(1));
    }

    #[test]
    fn unopenable_redirect_skips_execution() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let bad = dir.path().join("missing").join("out.txt");
        let mut shell = Shell::new();

        let line = format!("sh -c 'touch {}' > {}", marker.display(), bad.display());
        assert_eq!(eval(&line, &mut shell), CommandResult::status(1));
        assert!(!marker.exists());
    }

    #[test]
    fn exit_builtin_ends_shell() {
        let mut shell = Shell::new();
        assert_eq!(eval("exit 3", &mut shell), CommandResult::exit(3));
    }

    #[test]
    fn whitespace_line_is_ignored() {
        let mut shell = Shell::new();
        assert_eq!(eval("   ", &mut shell), CommandResult::status(0));
        assert!(shell.history.is_empty());
    }

    #[test]
    fn lines_are_recorded_before_dispatch() {
        let mut shell = Shell::new();
        eval("definitely_not_a_command_xyz", &mut shell);
        eval("echo hi > /dev/null", &mut shell);
        assert_eq!(
            shell.history.entries(),
            &["definitely_not_a_command_xyz".to_string(), "echo hi > /dev/null".to_string()],
        );
    }

    // ── パイプライン ──

    #[test]
    fn pipe_builtin_into_external() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut shell = Shell::new();

        let result = eval(&format!("echo hello | tr a-z A-Z > {}", out.display()), &mut shell);
        assert_eq!(result, CommandResult::status(0));
        assert_eq!(read(&out), "HELLO\n");
    }

    #[test]
    fn pipe_external_into_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut shell = Shell::new();

        eval(&format!("sh -c 'echo ignored' | echo replaced > {}", out.display()), &mut shell);
        assert_eq!(read(&out), "replaced\n");
    }

    #[test]
    fn interior_stage_always_writes_to_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let side = dir.path().join("side.txt");
        let out = dir.path().join("out.txt");
        let mut shell = Shell::new();

        let line = format!("echo abc > {} | cat > {}", side.display(), out.display());
        eval(&line, &mut shell);
        assert_eq!(read(&out), "abc\n");
        // 指定されたファイル自体は作られる
        assert_eq!(read(&side), "");
    }

    #[test]
    fn missing_stage_reports_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut shell = Shell::new();

        let line = format!("echo x | no_such_cmd_zz | cat > {}", out.display());
        let result = eval(&line, &mut shell);
        assert_eq!(result, CommandResult::status(0));
        assert_eq!(read(&out), "no_such_cmd_zz: command not found\n");
    }

    #[test]
    fn exit_in_pipeline_does_not_end_shell() {
        let mut shell = Shell::new();
        let result = eval("exit 4 | cat", &mut shell);
        assert!(!result.exit_shell);
    }

    #[test]
    fn cd_in_pipeline_keeps_shell_cwd() {
        let before = std::env::current_dir().unwrap();
        let mut shell = Shell::new();

        let result = eval("cd / | cat", &mut shell);
        assert_eq!(result, CommandResult::status(0));
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn failed_redirect_fails_only_its_stage() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing").join("x");
        let out = dir.path().join("out.txt");
        let mut shell = Shell::new();

        let line = format!("echo a > {} | echo b > {}", bad.display(), out.display());
        assert_eq!(eval(&line, &mut shell), CommandResult::status(0));
        assert_eq!(read(&out), "b\n");

        // 失敗した段の書き込み端は閉じられ、下流は EOF で終わる
        let line = format!("echo a > {} | cat > {}", bad.display(), out.display());
        assert_eq!(eval(&line, &mut shell), CommandResult::status(0));
        assert_eq!(read(&out), "");
    }

    #[test]
    fn last_stage_status_is_reported() {
        let mut shell = Shell::new();
        assert_eq!(eval("echo x | sh -c 'cat >/dev/null; exit 9'", &mut shell).exit_code, 9);
    }

    #[test]
    fn pipeline_history_is_not_changed_by_stages() {
        let mut shell = Shell::new();
        eval("history | cat > /dev/null", &mut shell);
        assert_eq!(shell.history.len(), 1);
    }
}
