//! シェルの状態を保持するコンテキスト。
//!
//! 履歴と `$HISTFILE` のパスを持ち、executor とビルトインに明示的に渡される。
//! プロセス全体のシングルトンにはしないので、テストでは評価ごとに独立した [`Shell`] を作れる。
//! パイプラインの途中で動くビルトインには [`Clone`] したスナップショットを渡す
//! （サブシェルと同じく、そこでの変更は元のシェルに戻らない。`cd` も移動しない）。

use std::path::PathBuf;

use tracing::warn;

use crate::history::History;

/// 履歴ファイルのパスを指定する環境変数。
pub const HISTFILE_VAR: &str = "HISTFILE";

/// 1 コマンド実行の結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    /// `exit` ビルトインで `true` になり、REPL ループを終了させる。
    pub exit_shell: bool,
}

impl CommandResult {
    pub fn status(exit_code: i32) -> Self {
        Self {
            exit_code,
            exit_shell: false,
        }
    }

    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            exit_shell: true,
        }
    }
}

/// シェルの実行状態。REPL ループ全体で共有される。
#[derive(Debug, Clone, Default)]
pub struct Shell {
    pub history: History,
    /// 起動時に読み込み、終了時に書き出す履歴ファイル。
    pub histfile: Option<PathBuf>,
    /// パイプラインの段として動いている（子プロセス相当）。
    /// プロセス全体に効く変更（カレントディレクトリ）は行わない。
    pub pipeline_stage: bool,
}

impl Shell {
    pub fn new() -> Self {
        Self::default()
    }

    /// `$HISTFILE` を読み、設定されていれば履歴を読み込む。
    pub fn from_env() -> Self {
        let histfile = std::env::var_os(HISTFILE_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let mut shell = Self {
            histfile,
            ..Self::default()
        };
        shell.load_histfile();
        shell
    }

    /// 履歴ファイルを読み込む。存在しなければ何もしない。
    pub fn load_histfile(&mut self) {
        let Some(path) = self.histfile.clone() else {
            return;
        };
        if let Err(e) = self.history.read_from(&path) {
            if e.source.kind() != std::io::ErrorKind::NotFound {
                warn!("{}", e);
            }
        }
        self.history.mark_saved();
    }

    /// 全履歴で履歴ファイルを上書きする。
    pub fn save_histfile(&mut self) {
        let Some(path) = self.histfile.clone() else {
            return;
        };
        if let Err(e) = self.history.write_to(&path) {
            eprintln!("tish: {}", e);
        }
    }
}
