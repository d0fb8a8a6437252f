//! tish ライブラリ: テスト・ベンチマーク用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の REPL ループ。
//! この `lib.rs` は `tests/` の統合テストや `benches/bench_main.rs` から
//! パーサー・補完・実行機能に直接アクセスするために存在する。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`editor`] | 行エディタ（raw モード、1 バイトずつの入力処理、履歴呼び出し、Tab 補完） |
//! | [`parser`] | 字句解析（クォート、エスケープ、`>`/`>>`/`1>`/`2>` リダイレクト、`|` 分割） |
//! | [`executor`] | コマンド実行（ビルトイン判定、リダイレクト適用、パイプライン接続） |
//! | [`complete`] | Tab 補完（ビルトイン名 + `$PATH` 上の実行ファイル、共通接頭辞） |
//! | [`redirect`] | 1 コマンド分の I/O コンテキスト（リダイレクト先ファイルの所有） |
//! | [`spawn`] | `posix_spawn` ラッパーと終了待ち |
//! | [`path`] | `$PATH` 検索（実行可能ファイルの解決、接頭辞一致の列挙） |
//! | [`builtins`] | ビルトイン（`exit`, `echo`, `type`, `pwd`, `cd`, `history`） |
//! | [`history`] | コマンド履歴（`$HISTFILE` の読み書き、追記位置の管理） |
//! | [`shell`] | シェルの実行状態（履歴、履歴ファイル）とコマンド結果 |

pub mod builtins;
pub mod complete;
pub mod editor;
pub mod executor;
pub mod history;
pub mod parser;
pub mod path;
pub mod redirect;
pub mod shell;
pub mod spawn;
