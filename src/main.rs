//! tish: 行編集・補完・パイプライン付きの小さな対話シェル
//!
//! REPL ループ: プロンプト表示 → 行エディタで入力読み取り → 履歴に記録 → パース → 実行 → ループ
//!
//! 引数付きで起動した場合は、引数をそのまま 1 コマンドとして実行し、その終了コードで終了する
//! （リダイレクトは解釈しない）。
//!
//! ## 環境変数
//!
//! | 変数 | 用途 |
//! |------|------|
//! | `PATH` | 外部コマンドの検索と補完候補 |
//! | `HOME` | 引数なし `cd` の移動先 |
//! | `HISTFILE` | 起動時に読み込み、終了時に上書きする履歴ファイル |
//! | `TISH_LOG` | `tracing` のフィルタ（例: `TISH_LOG=debug`）。未設定ならログは出さない |

use std::process;

use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use tish::complete::Completer;
use tish::editor::{LineEditor, ReadResult};
use tish::executor;
use tish::parser::Command;
use tish::shell::Shell;

const LOG_ENV: &str = "TISH_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

fn main() {
    init_logging();

    // シェル自体は SIGINT/SIGQUIT を無視する。
    // 子プロセスは posix_spawnattr の POSIX_SPAWN_SETSIGDEF で SIG_DFL に戻る。
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
        libc::signal(libc::SIGQUIT, libc::SIG_IGN);
    }

    let mut shell = Shell::from_env();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = if args.is_empty() {
        repl(&mut shell)
    } else {
        executor::run_single(&Command::from_args(args), &mut shell).exit_code
    };

    // どの経路で終わっても履歴ファイルを書き出す
    shell.save_histfile();
    process::exit(code);
}

/// 対話ループ。終了コードを返す。履歴ファイルの書き出しは呼び出し側で行う。
fn repl(shell: &mut Shell) -> i32 {
    let mut editor = LineEditor::new();
    let mut last_status = 0;

    loop {
        // PATH の変更を反映するため、補完器は行ごとに作り直す
        let completer = Completer::from_env();
        let line = match editor.read_line_tty(&shell.history, &completer) {
            Ok(ReadResult::Content(line)) => line,
            Ok(ReadResult::Empty) => continue,
            Ok(ReadResult::Quit) => {
                debug!("end of input");
                return last_status;
            }
            Err(e) => {
                error!(error = %e, "terminal setup failed");
                eprintln!("tish: {}", e);
                return 1;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let result = executor::eval(&line, shell);
        last_status = result.exit_code;
        if result.exit_shell {
            return result.exit_code;
        }
    }
}
