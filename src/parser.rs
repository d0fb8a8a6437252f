//! トークナイザ: 1 行の入力から引数列とリダイレクト指定を取り出す。
//!
//! 文字列を先頭から 1 文字ずつ走査し、先読みは 1 文字だけ使う。
//! 不正なクォートやエスケープでもエラーにはせず、そこまでに蓄積した部分トークンを返す。
//!
//! ## 走査規則
//!
//! | 入力 | 扱い |
//! |------|------|
//! | 空白 (`' '`) | クォート外なら現在のトークンを確定（連続する空白は 1 つ扱い） |
//! | `'...'` | 閉じクォートまですべてリテラル（`\` も `"` もそのまま） |
//! | `"..."` | `\\` → `\`、`\"` → `"`。それ以外の `\X` は 2 文字ともそのまま |
//! | `\X`（クォート外） | `\` を捨て、`X` を無条件にリテラルとして追加 |
//! | `>` / `>>` | stdout リダイレクト（`>>` は追記） |
//! | `1>` / `2>` | stdout / stderr リダイレクト |
//! | `N>`（N が 1, 2 以外の数字） | 未知のストリーム。パスは消費するが記録せず、`N` は引数に残る |
//!
//! リダイレクト記号の直後のトークン（同じ規則で再帰的に読む）は出力先パスとして消費され、
//! 引数列には入らない。
//!
//! パイプ `|` による分割は [`parse_line`] が担当し、クォート内・エスケープされた `|` は
//! リテラルとして扱う。

use tracing::debug;

// ── データ型 ────────────────────────────────────────────────────────

/// リダイレクト対象の標準ストリーム。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// `>` / `1>`
    Stdout,
    /// `2>`
    Stderr,
}

impl Stream {
    /// `N>` の `N` からストリームを決める。`1`, `2` 以外は `None`。
    fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '1' => Some(Self::Stdout),
            '2' => Some(Self::Stderr),
            _ => None,
        }
    }
}

/// ファイルリダイレクト指定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub stream: Stream,
    pub path: String,
    /// `>>` なら `true`（追記）、`>` なら `false`（切り詰め）。
    pub append: bool,
}

/// パイプラインの 1 段分のコマンド。
///
/// `args[0]` がプログラム名。executor に渡される時点で `args` は空でない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub args: Vec<String>,
    pub redirects: Vec<Redirect>,
}

impl Command {
    /// リダイレクトなしのコマンドを作る（非対話モードの argv 用）。
    pub fn from_args(args: Vec<String>) -> Self {
        Self {
            args,
            redirects: Vec::new(),
        }
    }
}

// ── Tokenizer ───────────────────────────────────────────────────────

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    redirects: Vec<Redirect>,
}

impl Tokenizer {
    fn new(line: &str) -> Self {
        Self {
            chars: line.chars().collect(),
            pos: 0,
            redirects: Vec::new(),
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// 次の空白区切りトークンを読む。入力末尾で空なら `None`。
    fn next_word(&mut self) -> Option<String> {
        let mut word = String::new();

        while let Some(ch) = self.next_char() {
            match ch {
                ' ' => {
                    if !word.is_empty() {
                        return Some(word);
                    }
                }
                '\'' => {
                    while let Some(c) = self.next_char() {
                        if c == '\'' {
                            break;
                        }
                        word.push(c);
                    }
                }
                '"' => {
                    while let Some(c) = self.next_char() {
                        match c {
                            '"' => break,
                            '\\' => self.push_escaped(&mut word, true),
                            _ => word.push(c),
                        }
                    }
                }
                '\\' => self.push_escaped(&mut word, false),
                '>' => self.read_redirect(Some(Stream::Stdout)),
                d if d.is_ascii_digit() && self.peek() == Some('>') => {
                    self.pos += 1; // skip '>'
                    let stream = Stream::from_digit(d);
                    if stream.is_none() {
                        word.push(d);
                    }
                    self.read_redirect(stream);
                }
                _ => word.push(ch),
            }
        }

        if word.is_empty() {
            None
        } else {
            Some(word)
        }
    }

    /// `\` の直後の 1 文字を処理する。末尾の `\` は何も追加しない。
    ///
    /// ダブルクォート内では `\\` と `\"` だけがエスケープになり、
    /// それ以外は `\` を残したまま次の文字を追加する。
    fn push_escaped(&mut self, word: &mut String, in_double_quote: bool) {
        let Some(ch) = self.next_char() else {
            return;
        };
        if in_double_quote && ch != '\\' && ch != '"' {
            word.push('\\');
        }
        word.push(ch);
    }

    /// リダイレクト記号の後ろを読む。`>` は消費済みで、2 つ目の `>` は先読みで判定する。
    ///
    /// `stream` が `None`（未知のストリーム番号）ならパスだけ消費して捨てる。
    fn read_redirect(&mut self, stream: Option<Stream>) {
        let append = self.peek() == Some('>');
        if append {
            self.pos += 1;
        }
        let path = self.next_word().unwrap_or_default();

        match stream {
            Some(stream) => self.redirects.push(Redirect {
                stream,
                path,
                append,
            }),
            None => debug!(path = %path, "ignoring redirect to unknown stream"),
        }
    }
}

// ── 公開 API ────────────────────────────────────────────────────────

/// 1 コマンド分のテキストを引数列とリダイレクト列に分解する。
///
/// 失敗しない。空白だけの入力は `args` が空の [`Command`] になる。
pub fn parse(line: &str) -> Command {
    let mut tokenizer = Tokenizer::new(line);
    let mut args = Vec::new();
    while let Some(word) = tokenizer.next_word() {
        args.push(word);
    }
    Command {
        args,
        redirects: tokenizer.redirects,
    }
}

/// 行全体をクォート外の `|` で分割し、各段を [`parse`] する。
///
/// 引数が 1 つもない段（`a | | b` の中央、末尾の `|` など）は取り除くため、
/// 返るコマンドはすべて `args` が空でない。空行なら空の `Vec`。
pub fn parse_line(line: &str) -> Vec<Command> {
    split_pipes(line)
        .into_iter()
        .map(parse)
        .filter(|cmd| !cmd.args.is_empty())
        .collect()
}

/// クォートとエスケープを追跡しながら、裸の `|` の位置で行を切り分ける。
fn split_pipes(line: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('"'), '\\') => escaped = true,
            (Some(_), _) => {}
            (None, '\\') => escaped = true,
            (None, '\'' | '"') => quote = Some(ch),
            (None, '|') => {
                segments.push(&line[start..i]);
                start = i + 1;
            }
            (None, _) => {}
        }
    }
    segments.push(&line[start..]);
    segments
}

// ── Tests ───────────────────────────────────────────────────────────
