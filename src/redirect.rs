//! 1 コマンド分の I/O コンテキスト（stdout / stderr の出力先）。
//!
//! [`IoContext::open`] がリダイレクト指定を宣言順に開く。
//! 同じストリームへの指定が複数あれば最後が有効で、それ以前に開いたファイルは
//! 次を開く前に閉じる。開いたファイルは [`IoContext`] が所有し、
//! コンテキストを drop した時点で（成功・失敗・早期 return のどの経路でも）閉じられる。
//! リダイレクトされていないストリームはシェルから継承したものをそのまま使い、閉じない。

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use thiserror::Error;
use tracing::debug;

use crate::parser::{Redirect, Stream};

/// リダイレクト先を開けなかった。
#[derive(Debug, Error)]
#[error("{path}: {source}")]
pub struct RedirectError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

/// 出力先。継承したストリームか、コンテキストが所有するファイル（リダイレクト先またはパイプ）。
pub enum Sink {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
    File(File),
}

impl Sink {
    /// 子プロセスに `dup2` すべき fd。継承ストリームなら `None`（何もしなくてよい）。
    pub fn redirect_fd(&self) -> Option<RawFd> {
        match self {
            Sink::File(f) => Some(f.as_raw_fd()),
            Sink::Stdout(_) | Sink::Stderr(_) => None,
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stdout(s) => s.write(buf),
            Sink::Stderr(s) => s.write(buf),
            Sink::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stdout(s) => s.flush(),
            Sink::Stderr(s) => s.flush(),
            Sink::File(f) => f.flush(),
        }
    }
}

/// 1 コマンドの stdout / stderr の束。
pub struct IoContext {
    pub stdout: Sink,
    pub stderr: Sink,
}

impl IoContext {
    /// どちらもシェルから継承したストリーム。
    pub fn inherit() -> Self {
        Self {
            stdout: Sink::Stdout(io::stdout()),
            stderr: Sink::Stderr(io::stderr()),
        }
    }

    /// リダイレクト指定を宣言順に開く。
    ///
    /// 1 つでも開けなければ `Err`。それまでに開いたファイルは途中のコンテキストと一緒に drop され閉じる。
    pub fn open(redirects: &[Redirect]) -> Result<Self, RedirectError> {
        let mut ctx = Self::inherit();
        for r in redirects {
            // 同じストリームの前のファイルを先に閉じる
            match r.stream {
                Stream::Stdout => ctx.stdout = Sink::Stdout(io::stdout()),
                Stream::Stderr => ctx.stderr = Sink::Stderr(io::stderr()),
            }
            let file = open_target(r)?;
            debug!(path = %r.path, stream = ?r.stream, append = r.append, "redirect opened");
            match r.stream {
                Stream::Stdout => ctx.stdout = Sink::File(file),
                Stream::Stderr => ctx.stderr = Sink::File(file),
            }
        }
        Ok(ctx)
    }

    /// 出力をフラッシュする。継承した stdout はバッファ付きなので、子プロセスの出力と
    /// 順序が入れ替わらないようにビルトインの実行後に呼ぶ。
    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
        let _ = self.stderr.flush();
    }
}

/// `>` は切り詰め、`>>` は追記。存在しなければ作成する。
fn open_target(r: &Redirect) -> Result<File, RedirectError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if r.append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options.open(&r.path).map_err(|source| RedirectError {
        path: r.path.clone(),
        source,
    })
}
