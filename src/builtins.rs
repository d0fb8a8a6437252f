//! ビルトインコマンドの実装。
//!
//! ビルトインは fork/exec を経由せずプロセス内で直接実行される。
//! [`lookup`] が `Some(f)` を返せばビルトイン、`None` なら executor が外部コマンドとして扱う。
//!
//! 各ビルトインは [`IoContext`] の stdout / stderr に書き込む。
//! 失敗は [`BuiltinError`] として返し、[`run`] が `"<name>: <error>"` を stderr に出して
//! 終了ステータス 1 に変換する。

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::history::HistoryError;
use crate::path::SearchPath;
use crate::redirect::IoContext;
use crate::shell::{CommandResult, Shell};

/// ビルトインのシグネチャ。`args[0]` はコマンド名。
pub type BuiltinFn = fn(&[String], &mut Shell, &mut IoContext) -> Result<CommandResult, BuiltinError>;

/// ビルトインの失敗。
#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("{0}: numeric argument required")]
    NotNumeric(String),
    #[error("missing argument")]
    MissingArgument,
    #[error("HOME not set")]
    HomeNotSet,
    #[error("{0}: No such file or directory")]
    NoSuchDirectory(String),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("cd", builtin_cd),
    ("echo", builtin_echo),
    ("exit", builtin_exit),
    ("history", builtin_history),
    ("pwd", builtin_pwd),
    ("type", builtin_type),
];

/// 名前からビルトインを引く。
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

/// 全ビルトイン名（補完の候補源）。
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(n, _)| *n)
}

/// ビルトインを実行し、エラーを stderr に出力して結果に変換する。
pub fn run(builtin: BuiltinFn, args: &[String], shell: &mut Shell, io: &mut IoContext) -> CommandResult {
    let result = match builtin(args, shell, io) {
        Ok(result) => result,
        // 読み手がいなくなったパイプへの書き込みは黙って失敗させる
        Err(BuiltinError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => CommandResult::status(1),
        Err(e) => {
            let _ = writeln!(io.stderr, "{}: {}", args[0], e);
            CommandResult::status(1)
        }
    };
    io.flush();
    result
}

/// `exit [N]`: シェルを終了する。N 省略時は 0。
fn builtin_exit(args: &[String], _shell: &mut Shell, _io: &mut IoContext) -> Result<CommandResult, BuiltinError> {
    match args.get(1) {
        Some(code) => code
            .parse::<i32>()
            .map(CommandResult::exit)
            .map_err(|_| BuiltinError::NotNumeric(code.clone())),
        None => Ok(CommandResult::exit(0)),
    }
}

/// `echo [args...]`: 引数を空白 1 つで連結し、改行付きで出力する。
fn builtin_echo(args: &[String], _shell: &mut Shell, io: &mut IoContext) -> Result<CommandResult, BuiltinError> {
    writeln!(io.stdout, "{}", args[1..].join(" "))?;
    Ok(CommandResult::status(0))
}

/// `type name...`: ビルトインか、PATH 上のどこにあるか、見つからないかを報告する。
fn builtin_type(args: &[String], _shell: &mut Shell, io: &mut IoContext) -> Result<CommandResult, BuiltinError> {
    if args.len() < 2 {
        return Err(BuiltinError::MissingArgument);
    }
    let search_path = SearchPath::from_env();
    let mut status = 0;
    for name in &args[1..] {
        if is_builtin(name) {
            writeln!(io.stdout, "{} is a shell builtin", name)?;
        } else if let Some(path) = search_path.locate(name) {
            writeln!(io.stdout, "{} is {}", name, path.display())?;
        } else {
            writeln!(io.stdout, "{}: not found", name)?;
            status = 1;
        }
    }
    Ok(CommandResult::status(status))
}

/// `pwd`: カレントディレクトリを出力する。
fn builtin_pwd(_args: &[String], _shell: &mut Shell, io: &mut IoContext) -> Result<CommandResult, BuiltinError> {
    let cwd = env::current_dir()?;
    writeln!(io.stdout, "{}", cwd.display())?;
    Ok(CommandResult::status(0))
}

/// `cd [dir]`: カレントディレクトリを変更する。
///
/// `/` 始まりは絶対パス、`~` 始まりは `$HOME` 基準、それ以外（`.` 始まりを含む）は
/// カレントディレクトリ基準。引数省略時は `$HOME`。
///
/// パイプラインの段では移動先を検査するだけで移動しない（子プロセスの `cd` と同じく親に影響しない）。
fn builtin_cd(args: &[String], shell: &mut Shell, _io: &mut IoContext) -> Result<CommandResult, BuiltinError> {
    let target = args.get(1).map(String::as_str).unwrap_or("~");
    let resolved = resolve_cd_target(target)?;
    let not_found = |e: io::Error| match e.kind() {
        io::ErrorKind::NotFound => BuiltinError::NoSuchDirectory(target.to_string()),
        _ => BuiltinError::Io(e),
    };

    if shell.pipeline_stage {
        let metadata = std::fs::metadata(&resolved).map_err(not_found)?;
        if !metadata.is_dir() {
            return Err(BuiltinError::Io(io::Error::from_raw_os_error(libc::ENOTDIR)));
        }
        return Ok(CommandResult::status(0));
    }

    env::set_current_dir(&resolved).map_err(not_found)?;
    Ok(CommandResult::status(0))
}

fn resolve_cd_target(target: &str) -> Result<PathBuf, BuiltinError> {
    match target.strip_prefix('~') {
        Some(rest) => {
            let home = env::var("HOME")
                .ok()
                .filter(|h| !h.is_empty())
                .ok_or(BuiltinError::HomeNotSet)?;
            Ok(Path::new(&home).join(rest.trim_start_matches('/')))
        }
        None => Ok(PathBuf::from(target)),
    }
}

/// `history [N | -r path | -w path | -a path]`
///
/// - 引数なし: 全履歴を `{:5}  {line}` 形式で表示
/// - `N`: 末尾 N 件のみ表示（番号は通し番号）
/// - `-r`: ファイルから読み込んで追加 / `-w`: 上書き保存 / `-a`: 前回以降の分を追記
fn builtin_history(args: &[String], shell: &mut Shell, io: &mut IoContext) -> Result<CommandResult, BuiltinError> {
    let file_arg = || args.get(2).map(Path::new).ok_or(BuiltinError::MissingArgument);

    match args.get(1).map(String::as_str) {
        None => shell.history.render(&mut io.stdout, None)?,
        Some("-r") => {
            shell.history.read_from(file_arg()?)?;
        }
        Some("-w") => shell.history.write_to(file_arg()?)?,
        Some("-a") => shell.history.append_to(file_arg()?)?,
        Some(n) => {
            let count = n
                .parse::<usize>()
                .map_err(|_| BuiltinError::NotNumeric(n.to_string()))?;
            shell.history.render(&mut io.stdout, Some(count))?;
        }
    }
    Ok(CommandResult::status(0))
}
