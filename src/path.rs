//! 検索パス（`$PATH`）の解決と実行可能ファイルの走査。
//!
//! - [`SearchPath::locate`]: プログラム名から実行ファイルのパスを求める（executor, `type` 用）
//! - [`SearchPath::executables_with_prefix`]: 接頭辞に一致する実行可能ファイル名を集める（補完用）
//!
//! どちらも失敗しない。読めないディレクトリは黙ってスキップする。
//! `$PATH` は呼び出しのたびに読み直すので、シェル起動後に追加されたコマンドも見える。

use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// `:` 区切りで並んだ検索ディレクトリ。
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// `PATH` 形式の文字列から作る。空要素は無視する。
    pub fn new(path_var: &str) -> Self {
        Self {
            dirs: path_var
                .split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect(),
        }
    }

    /// 現在の `$PATH` から作る。未設定なら空。
    pub fn from_env() -> Self {
        Self::new(&std::env::var("PATH").unwrap_or_default())
    }

    /// プログラム名を解決する。
    ///
    /// `/` を含む名前は相対/絶対パスとして存在だけを確認する。
    /// それ以外は各ディレクトリを順に調べ、最初に見つかった実行可能ファイルを返す。
    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        if program.is_empty() {
            return None;
        }
        if program.contains('/') {
            let path = PathBuf::from(program);
            return path.exists().then_some(path);
        }
        self.dirs
            .iter()
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }

    /// `prefix` で始まる実行可能な通常ファイルの名前を、ディレクトリの並び順に返す。
    /// 同名のファイルは最初に見つかったものだけを残す。
    pub fn executables_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for dir in &self.dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if name.starts_with(prefix) && is_executable(&entry.path()) && seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// 通常ファイルかつ実行ビット（`0o111` のいずれか）が立っているか。シンボリックリンクは辿る。
pub fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
