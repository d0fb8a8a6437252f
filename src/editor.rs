//! 行エディタ: raw モード、1 バイトずつの入力処理、履歴呼び出し、Tab 補完。
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ LineEditor::read_line_tty(history, completer)  │
//! │  ┌──────────┐  ┌──────────┐  ┌─────────────┐  │
//! │  │ RawMode  │  │ Terminal │  │ read_line   │  │
//! │  │ (RAII)   │  │ (fd I/O) │  │ (状態機械)  │  │
//! │  └──────────┘  └──────────┘  └─────────────┘  │
//! │       │             │               │          │
//! │  termios 操作  libc::read/write   feed(byte)   │
//! │                                     │          │
//! │                      ┌──────────────┴───┐      │
//! │                      │ History / complete│     │
//! │                      └──────────────────┘      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## 入力の分類
//!
//! | バイト | 動作 |
//! |--------|------|
//! | `0x04` (EOT) | 読み取りループ終了（[`ReadResult::Quit`]） |
//! | `\r` / `\n` | 改行を出力し、バッファが空なら [`ReadResult::Empty`]、それ以外は [`ReadResult::Content`] |
//! | `\t` | 補完（[`complete`]） |
//! | `0x1b` | エスケープシーケンス開始。続く 2 バイト（`[` と方向コード）を副状態で消費 |
//! | `0x7f` / `0x08` | 末尾 1 文字を削除（`\b \b`） |
//! | その他 | エコーしてバッファに追加 |
//!
//! 入力が途中で尽きた場合（エスケープシーケンスの途中を含む）は EOT と同じく終了扱い。
//!
//! ## raw モードの範囲
//!
//! raw モードは [`LineEditor::read_line_tty`] 内でのみ有効。
//! [`RawMode`] の RAII ガードにより、どの経路で抜けても元の termios 設定が復元される。

use std::io::{self, Read, Write};

use thiserror::Error;
use tracing::debug;

use crate::complete::{self, Completer, Completion};
use crate::history::History;

/// プロンプト文字列。
pub const PROMPT: &str = "$ ";

const EOT: u8 = 0x04;
const BELL: &[u8] = b"\x07";
const ERASE_CHAR: &[u8] = b"\x08 \x08";

/// 端末設定の取得・変更に失敗した。対話編集を続けられないので致命的エラーとして扱う。
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("tcgetattr: {0}")]
    GetAttr(#[source] io::Error),
    #[error("tcsetattr: {0}")]
    SetAttr(#[source] io::Error),
    #[error("terminal write: {0}")]
    Write(#[source] io::Error),
}

// ── RawMode ガード ────────────────────────────────────────────────

/// RAII ガードで raw モードを管理する。Drop で元の termios を自動復元する。
///
/// ## termios 設定
///
/// | フラグ | 操作 | 理由 |
/// |--------|------|------|
/// | `c_iflag` | `BRKINT\|INPCK\|ISTRIP\|IXON` OFF | 8 ビットをそのまま受け取り、フロー制御を無効化 |
/// | `c_oflag` | `OPOST` ON のまま | `\n` → `\r\n` 自動変換を維持 |
/// | `c_lflag` | `ECHO\|ICANON\|IEXTEN` OFF | エコー無効、1 バイトずつ読み取り |
/// | `VMIN`/`VTIME` | `1` / `0` | 最低 1 バイトで即座に返る |
///
/// 切り替えと復元はどちらも `TCSANOW`。コマンド実行中に先行入力された行を捨てない。
struct RawMode {
    orig: libc::termios,
    fd: i32,
}

impl RawMode {
    fn enable(fd: i32) -> Result<Self, TerminalError> {
        let mut orig: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut orig) } != 0 {
            return Err(TerminalError::GetAttr(io::Error::last_os_error()));
        }
        let mut raw = orig;
        raw.c_iflag &= !(libc::BRKINT | libc::INPCK | libc::ISTRIP | libc::IXON);
        raw.c_cflag |= libc::CS8;
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            return Err(TerminalError::SetAttr(io::Error::last_os_error()));
        }
        Ok(Self { orig, fd })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.orig);
        }
    }
}

// ── Terminal ──────────────────────────────────────────────────────

/// 端末の入出力。`libc::read` / `libc::write` を直接使い、Rust 側のバッファを通さない。
///
/// 読み取りは 1 バイトずつ行うので、先読みしたバイトが子プロセスに渡らないということはない。
struct Terminal {
    input_fd: i32,
    output_fd: i32,
}

impl Terminal {
    fn stdio() -> Self {
        Self {
            input_fd: libc::STDIN_FILENO,
            output_fd: libc::STDOUT_FILENO,
        }
    }
}

impl Read for Terminal {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = unsafe { libc::read(self.input_fd, buf.as_mut_ptr() as *mut libc::c_void, 1) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Write for Terminal {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.output_fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── 入力の分類 ────────────────────────────────────────────────────

/// 1 行読み取りの結果。
#[derive(Debug, PartialEq, Eq)]
pub enum ReadResult {
    /// EOT か入力の終端。シェルを終了する。
    Quit,
    /// 空のまま Enter。
    Empty,
    /// 入力された行。
    Content(String),
}

/// 先頭バイトの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteClass {
    EndOfTransmission,
    Enter,
    Tab,
    Escape,
    Delete,
    Other(u8),
}

fn classify(byte: u8) -> ByteClass {
    match byte {
        EOT => ByteClass::EndOfTransmission,
        b'\r' | b'\n' => ByteClass::Enter,
        b'\t' => ByteClass::Tab,
        0x1b => ByteClass::Escape,
        0x7f | 0x08 => ByteClass::Delete,
        b => ByteClass::Other(b),
    }
}

/// エスケープシーケンスの副状態。`ESC [ X` の残り 2 バイトを数える。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Idle,
    /// `ESC` を読んだ。次のバイト（`[`）は中身を見ずに捨てる。
    Bracket,
    /// 方向コードを待っている。
    Code,
}

// ── LineEditor ────────────────────────────────────────────────────

/// 行エディタ本体。入力バッファ、履歴の参照位置、ベル状態を保持する。
pub struct LineEditor {
    buf: String,
    /// 履歴の参照位置。`history.len()` は「履歴を見ていない（新規入力中）」。
    history_pos: usize,
    /// 直前の Tab が共通部分のない複数候補でベルを鳴らしたか。
    alerted: bool,
    escape: EscapeState,
    /// UTF-8 マルチバイト文字の組み立て途中のバイト。
    pending: Vec<u8>,
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl LineEditor {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            history_pos: 0,
            alerted: false,
            escape: EscapeState::Idle,
            pending: Vec::new(),
        }
    }

    /// 標準入力を raw モードにして 1 行読み取る。戻る時には必ず元のモードに戻す。
    ///
    /// 標準入力が端末でなければ raw モードにはせず、同じ状態機械でそのまま読む。
    pub fn read_line_tty(&mut self, history: &History, completer: &Completer) -> Result<ReadResult, TerminalError> {
        let is_tty = unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        let _raw = if is_tty {
            Some(RawMode::enable(libc::STDIN_FILENO)?)
        } else {
            None
        };
        let mut input = Terminal::stdio();
        let mut output = Terminal::stdio();
        self.read_line(history, completer, &mut input, &mut output)
            .map_err(TerminalError::Write)
    }

    /// プロンプトを表示し、`input` から 1 バイトずつ読んで 1 行を組み立てる。
    ///
    /// 読み取りエラーと入力終端は [`ReadResult::Quit`]。`Err` は出力側の失敗のみ。
    pub fn read_line(
        &mut self,
        history: &History,
        completer: &Completer,
        input: &mut dyn Read,
        out: &mut dyn Write,
    ) -> io::Result<ReadResult> {
        self.buf.clear();
        self.pending.clear();
        self.history_pos = history.len();
        self.alerted = false;
        self.escape = EscapeState::Idle;

        out.write_all(PROMPT.as_bytes())?;
        out.flush()?;

        let mut byte = [0u8; 1];
        loop {
            match input.read(&mut byte) {
                Ok(1) => {}
                Ok(_) => return Ok(ReadResult::Quit),
                Err(e) => {
                    debug!(error = %e, "terminal read failed");
                    return Ok(ReadResult::Quit);
                }
            }
            let result = self.feed(byte[0], history, completer, out)?;
            out.flush()?;
            if let Some(result) = result {
                return Ok(result);
            }
        }
    }

    /// 1 バイトを処理する。行が確定したら `Some`。
    fn feed(
        &mut self,
        byte: u8,
        history: &History,
        completer: &Completer,
        out: &mut dyn Write,
    ) -> io::Result<Option<ReadResult>> {
        match self.escape {
            EscapeState::Bracket => {
                self.escape = EscapeState::Code;
                return Ok(None);
            }
            EscapeState::Code => {
                self.escape = EscapeState::Idle;
                self.navigate(byte, history, out)?;
                return Ok(None);
            }
            EscapeState::Idle => {}
        }

        let class = classify(byte);
        if class != ByteClass::Tab {
            self.alerted = false;
        }

        match class {
            ByteClass::EndOfTransmission => return Ok(Some(ReadResult::Quit)),
            ByteClass::Enter => {
                out.write_all(b"\n")?;
                let line = std::mem::take(&mut self.buf);
                return Ok(Some(if line.is_empty() {
                    ReadResult::Empty
                } else {
                    ReadResult::Content(line)
                }));
            }
            ByteClass::Tab => self.complete(completer, out)?,
            ByteClass::Escape => self.escape = EscapeState::Bracket,
            ByteClass::Delete => self.delete_last(out)?,
            ByteClass::Other(b) => self.insert_byte(b, out)?,
        }
        Ok(None)
    }

    // ── バッファ操作 ──────────────────────────────────────────────

    /// バイトをエコーしてバッファに追加する。マルチバイト文字は揃った時点で追加する。
    fn insert_byte(&mut self, byte: u8, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&[byte])?;
        self.pending.push(byte);
        match std::str::from_utf8(&self.pending) {
            Ok(s) => self.buf.push_str(s),
            // 不正なシーケンスは置換文字にする
            Err(e) if e.error_len().is_some() => self.buf.push_str(&String::from_utf8_lossy(&self.pending)),
            // 続きのバイトを待つ
            Err(_) => return Ok(()),
        }
        self.pending.clear();
        Ok(())
    }

    /// Backspace: 末尾の 1 文字を削除し、画面上でも消す。空なら何もしない。
    ///
    /// マルチバイト文字の途中なら、組み立て中のバイトだけを捨てて表示を 1 桁消す。
    fn delete_last(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.pending.clear();
            return out.write_all(ERASE_CHAR);
        }
        if self.buf.pop().is_some() {
            out.write_all(ERASE_CHAR)?;
        }
        Ok(())
    }

    /// 表示中のバッファを 1 文字ずつ消してから `line` に置き換える。
    fn replace_line(&mut self, line: &str, out: &mut dyn Write) -> io::Result<()> {
        for _ in 0..self.buf.chars().count() {
            out.write_all(ERASE_CHAR)?;
        }
        out.write_all(line.as_bytes())?;
        self.buf.clear();
        self.buf.push_str(line);
        Ok(())
    }

    // ── 履歴ナビゲーション ────────────────────────────────────────

    /// `ESC [ A`（↑）/ `ESC [ B`（↓）。それ以外の方向コードは無視する。
    fn navigate(&mut self, code: u8, history: &History, out: &mut dyn Write) -> io::Result<()> {
        match code {
            b'A' if self.history_pos > 0 => {
                self.history_pos -= 1;
                let entry = history.get(self.history_pos).unwrap_or_default();
                self.replace_line(entry, out)
            }
            b'B' if self.history_pos < history.len() => {
                self.history_pos += 1;
                let entry = history.get(self.history_pos).unwrap_or_default();
                self.replace_line(entry, out)
            }
            _ => Ok(()),
        }
    }

    // ── Tab 補完 ──────────────────────────────────────────────────

    /// Tab 補完を実行する。
    ///
    /// - 候補なし → ベル
    /// - 唯一の候補 / 共通接頭辞あり → その文字列を追加
    /// - 共通部分なし → 1 回目はベル、連続 2 回目で候補一覧を表示してプロンプトを再描画
    fn complete(&mut self, completer: &Completer, out: &mut dyn Write) -> io::Result<()> {
        let completion = complete::resolve(completer.complete(&self.buf));

        if let Some(text) = completion.insertion() {
            out.write_all(text.as_bytes())?;
            self.buf.push_str(&text);
            self.alerted = false;
            return Ok(());
        }

        match completion {
            Completion::Ambiguous(suffixes) if self.alerted => {
                let listing: Vec<String> = suffixes
                    .iter()
                    .map(|suffix| format!("{}{}", self.buf, suffix))
                    .collect();
                write!(out, "\n{}\n{}{}", listing.join("  "), PROMPT, self.buf)?;
            }
            Completion::Ambiguous(_) => {
                self.alerted = true;
                out.write_all(BELL)?;
            }
            _ => {
                self.alerted = false;
                out.write_all(BELL)?;
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────
