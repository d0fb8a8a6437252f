//! コマンド履歴（追記専用のメモリ内ログ）と、その永続化。
//!
//! ## ファイル形式
//!
//! - プレーンテキスト、1 行 1 コマンド（改行終端）
//! - `history -r <path>`: ファイルの各行を末尾に追加
//! - `history -w <path>`: 全エントリでファイルを上書き
//! - `history -a <path>`: 前回の `-a`/`-w` 以降に追加されたエントリだけを追記
//! - 起動時に `$HISTFILE` があれば読み込み、終了時に全エントリで上書きする（[`crate::shell`]）
//!
//! ## 追記位置（watermark）
//!
//! `append_mark` は「ファイルに書き出し済み」のエントリ数。
//! `-a` と `-w` の後に `entries.len()` まで進む。
//!
//! ↑↓ による呼び出し位置は [`editor`](crate::editor) 側が持ち、ここではエントリの参照だけを提供する。

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// 履歴ファイルの読み書きエラー。
#[derive(Debug, Error)]
#[error("{}: {source}", .path.display())]
pub struct HistoryError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl HistoryError {
    fn new(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// コマンド履歴。エントリは古い順。
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<String>,
    /// ファイルへ書き出し済みのエントリ数。
    append_mark: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1 行追加する。重複や空行の除外はしない（呼び出し側で空行は弾く）。
    pub fn push(&mut self, line: &str) {
        self.entries.push(line.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 0 始まりのインデックスでエントリを返す。
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// 現在の全エントリを書き出し済みとして扱う（`$HISTFILE` 読み込み直後に使う）。
    pub fn mark_saved(&mut self) {
        self.append_mark = self.entries.len();
    }

    /// ファイルの各行（空行を含む）を末尾に追加する。追加した行数を返す。
    pub fn read_from(&mut self, path: &Path) -> Result<usize, HistoryError> {
        let file = fs::File::open(path).map_err(|e| HistoryError::new(path, e))?;
        let mut added = 0;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| HistoryError::new(path, e))?;
            self.entries.push(line);
            added += 1;
        }
        debug!(path = %path.display(), added, "history loaded");
        Ok(added)
    }

    /// 全エントリでファイルを上書きし、追記位置を末尾に進める。
    pub fn write_to(&mut self, path: &Path) -> Result<(), HistoryError> {
        let file = fs::File::create(path).map_err(|e| HistoryError::new(path, e))?;
        write_lines(file, &self.entries).map_err(|e| HistoryError::new(path, e))?;
        self.append_mark = self.entries.len();
        debug!(path = %path.display(), count = self.entries.len(), "history written");
        Ok(())
    }

    /// 前回の書き出し以降のエントリだけをファイルに追記する。
    pub fn append_to(&mut self, path: &Path) -> Result<(), HistoryError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| HistoryError::new(path, e))?;
        let pending = &self.entries[self.append_mark.min(self.entries.len())..];
        write_lines(file, pending).map_err(|e| HistoryError::new(path, e))?;
        debug!(path = %path.display(), count = pending.len(), "history appended");
        self.append_mark = self.entries.len();
        Ok(())
    }

    /// `{:5}  {line}` 形式で出力する。`last` が指定されれば末尾 N 件のみ（番号は通し番号のまま）。
    pub fn render(&self, out: &mut dyn Write, last: Option<usize>) -> io::Result<()> {
        let start = match last {
            Some(n) => self.entries.len().saturating_sub(n),
            None => 0,
        };
        for (i, entry) in self.entries[start..].iter().enumerate() {
            writeln!(out, "{:5}  {}", start + i + 1, entry)?;
        }
        Ok(())
    }
}

fn write_lines(file: fs::File, lines: &[String]) -> io::Result<()> {
    let mut writer = io::BufWriter::new(file);
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}
