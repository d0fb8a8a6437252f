//! Tab 補完（コマンド名）。
//!
//! 入力中のバッファ全体を接頭辞とみなし、一致するコマンド名を集める。
//! 候補は「接頭辞の後ろに付け足す文字列（サフィックス）」として返す。
//!
//! ## 候補源
//!
//! 1. ビルトイン名（[`builtins::names`]）
//! 2. `$PATH` の各ディレクトリ内の実行可能な通常ファイル（並び順に走査、読めないディレクトリはスキップ）
//!
//! 完全な名前で重複を除いてからサフィックスに変換する。
//!
//! ## 候補の絞り込み（[`resolve`]、適用は [`editor`](crate::editor) 側）
//!
//! | 候補 | 結果 |
//! |------|------|
//! | 0 件 | [`Completion::NotFound`] |
//! | 1 件 | [`Completion::Unique`]: サフィックス + 末尾スペース |
//! | 複数、共通接頭辞あり | [`Completion::Prefix`]: 共通接頭辞のみ（スペースなし） |
//! | 複数、共通接頭辞なし | [`Completion::Ambiguous`]: 長さ順 → 辞書順に並べた候補一覧 |

use tracing::debug;

use crate::builtins;
use crate::path::SearchPath;

/// 補完候補の検索器。候補源となる検索パスを持つ。
pub struct Completer {
    search_path: SearchPath,
}

impl Completer {
    pub fn new(search_path: SearchPath) -> Self {
        Self { search_path }
    }

    /// 現在の `$PATH` を候補源にする。
    pub fn from_env() -> Self {
        Self::new(SearchPath::from_env())
    }

    /// `prefix` に一致する名前のサフィックス（重複なし）を返す。
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = builtins::names()
            .filter(|name| name.starts_with(prefix))
            .map(str::to_string)
            .collect();
        for name in self.search_path.executables_with_prefix(prefix) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
            .into_iter()
            .map(|name| name[prefix.len()..].to_string())
            .collect()
    }
}

/// 補完候補を絞り込んだ結果。
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    NotFound,
    /// 唯一の候補。
    Unique(String),
    /// 複数候補の共通接頭辞（空でない）。
    Prefix(String),
    /// 共通部分のない複数候補（並べ替え済みサフィックス）。
    Ambiguous(Vec<String>),
}

impl Completion {
    /// バッファに追加する文字列。`Unique` は末尾スペース付き。
    pub fn insertion(&self) -> Option<String> {
        match self {
            Completion::Unique(suffix) => Some(format!("{} ", suffix)),
            Completion::Prefix(prefix) => Some(prefix.clone()),
            Completion::NotFound | Completion::Ambiguous(_) => None,
        }
    }
}

/// サフィックス群に絞り込み規則を適用する。
pub fn resolve(mut candidates: Vec<String>) -> Completion {
    let completion = match candidates.len() {
        0 => Completion::NotFound,
        1 => Completion::Unique(candidates.remove(0)),
        _ => {
            sort_candidates(&mut candidates);
            let common = longest_common_prefix(&candidates);
            if common.is_empty() {
                Completion::Ambiguous(candidates)
            } else {
                Completion::Prefix(common.to_string())
            }
        }
    };
    debug!(?completion, "completion resolved");
    completion
}

/// 長さ順、同じ長さなら辞書順に並べる。
pub fn sort_candidates(candidates: &mut [String]) {
    candidates.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
}

/// 候補群の最長共通接頭辞を返す。UTF-8 文字境界を考慮する。
///
/// バイト単位で比較し、どれかの候補が食い違う位置か最短候補の長さで止まる。
/// 候補が空なら空文字列を返す。
pub fn longest_common_prefix(candidates: &[String]) -> &str {
    if candidates.is_empty() {
        return "";
    }
    let first = &candidates[0];
    let mut prefix_len = first.len();
    for candidate in &candidates[1..] {
        prefix_len = first
            .bytes()
            .zip(candidate.bytes())
            .take(prefix_len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    // UTF-8 境界に合わせる
    while prefix_len > 0 && !first.is_char_boundary(prefix_len) {
        prefix_len -= 1;
    }
    &first[..prefix_len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::testutil::make_executable;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn completer_for(dirs: &[&std::path::Path]) -> Completer {
        let joined: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
        Completer::new(SearchPath::new(&joined.join(":")))
    }

    // ── 共通接頭辞 ──

    #[test]
    fn lcp_basic() {
        assert_eq!(longest_common_prefix(&strings(&["foobar", "foobaz"])), "fooba");
    }

    #[test]
    fn lcp_single() {
        assert_eq!(longest_common_prefix(&strings(&["hello"])), "hello");
    }

    #[test]
    fn lcp_empty() {
        assert_eq!(longest_common_prefix(&[]), "");
    }

    #[test]
    fn lcp_no_common() {
        assert_eq!(longest_common_prefix(&strings(&["cho", "ko"])), "");
    }

    #[test]
    fn lcp_stops_at_shortest() {
        assert_eq!(longest_common_prefix(&strings(&["cho", "cho2"])), "cho");
        assert_eq!(longest_common_prefix(&strings(&["cho2", "cho", "cho_x"])), "cho");
    }

    #[test]
    fn lcp_utf8_boundary() {
        assert_eq!(longest_common_prefix(&strings(&["あい", "あう"])), "あ");
    }

    // ── 並べ替えと絞り込み ──

    #[test]
    fn sort_by_length_then_lexically() {
        let mut c = strings(&["bb", "c", "ab", "a"]);
        sort_candidates(&mut c);
        assert_eq!(c, vec!["a", "c", "ab", "bb"]);
    }

    #[test]
    fn resolve_none() {
        assert_eq!(resolve(vec![]), Completion::NotFound);
        assert_eq!(Completion::NotFound.insertion(), None);
    }

    #[test]
    fn resolve_unique_appends_space() {
        let c = resolve(strings(&["cho"]));
        assert_eq!(c, Completion::Unique("cho".to_string()));
        assert_eq!(c.insertion().as_deref(), Some("cho "));
    }

    #[test]
    fn resolve_prefix_has_no_space() {
        let c = resolve(strings(&["cho2", "cho"]));
        assert_eq!(c, Completion::Prefix("cho".to_string()));
        assert_eq!(c.insertion().as_deref(), Some("cho"));
    }

    #[test]
    fn resolve_ambiguous_sorted() {
        let c = resolve(strings(&["ko", "cho", "x"]));
        assert_eq!(c, Completion::Ambiguous(strings(&["x", "ko", "cho"])));
        assert_eq!(c.insertion(), None);
    }

    #[test]
    fn resolve_unique_empty_suffix_still_adds_space() {
        // 入力がすでに完全なコマンド名
        let c = resolve(strings(&[""]));
        assert_eq!(c.insertion().as_deref(), Some(" "));
    }

    // ── 候補の収集 ──

    #[test]
    fn builtins_are_candidates() {
        let completer = Completer::new(SearchPath::new(""));
        assert_eq!(completer.complete("ech"), vec!["o"]);
        assert_eq!(completer.complete("hist"), vec!["ory"]);
        assert!(completer.complete("zzz").is_empty());
    }

    #[test]
    fn path_executables_are_candidates() {
        let dir = tempfile::tempdir().unwrap();
        make_executable(dir.path(), "custom_exe_1");
        make_executable(dir.path(), "custom_exe_2");

        let completer = completer_for(&[dir.path()]);
        let mut suffixes = completer.complete("custom");
        suffixes.sort();
        assert_eq!(suffixes, vec!["_exe_1", "_exe_2"]);
        assert_eq!(resolve(suffixes), Completion::Prefix("_exe_".to_string()));
    }

    #[test]
    fn builtin_and_executable_with_same_name_dedup() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        make_executable(a.path(), "echo");
        make_executable(b.path(), "echo");

        let completer = completer_for(&[a.path(), b.path()]);
        assert_eq!(completer.complete("ech"), vec!["o"]);
    }

    #[test]
    fn shared_prefix_scenario() {
        let dir = tempfile::tempdir().unwrap();
        make_executable(dir.path(), "xyz_foo");
        make_executable(dir.path(), "xyz_foo_bar");
        make_executable(dir.path(), "xyz_foo_bar_baz");

        let completer = completer_for(&[dir.path()]);
        assert_eq!(resolve(completer.complete("xyz_")), Completion::Prefix("foo".to_string()));
        assert_eq!(
            resolve(completer.complete("xyz_foo")),
            Completion::Ambiguous(strings(&["", "_bar", "_bar_baz"])),
        );
        assert_eq!(resolve(completer.complete("xyz_foo_bar_")), Completion::Unique("baz".to_string()));
    }
}
