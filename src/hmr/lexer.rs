//! Accept-call lexer.
//!
//! A miniature state machine that extracts the string-literal arguments of
//! `accept([deps], cb)` calls at transform time, without a full JS parse. The
//! extracted URLs populate `accepted_hmr_deps`; the same machinery reads the
//! export-name list of partial acceptance.
//!
//! Lexing starts right after the opening parenthesis. The first argument
//! decides the outcome:
//!
//! - string literal: single accepted dep, not self-accepting
//! - array of string literals: accepted deps, not self-accepting
//! - anything else (callback, identifier, empty): self-accepting, no deps
//!
//! Template literals are allowed only without interpolation; `${` raises a
//! [`LexError`] and the caller treats the module as non-self-accepting so the
//! update propagates upward.

use rustc_hash::FxHashSet;

/// A string literal extracted from an accept call.
///
/// `start`/`end` are byte offsets of the literal's contents (quotes excluded),
/// usable for in-place URL rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedUrl {
    pub url: String,
    pub start: usize,
    pub end: usize,
}

/// Lex error inside an `accept()` call, with byte position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("template literal with interpolation in accept() at offset {0}")]
    TemplateInterpolation(usize),
    #[error("unexpected character '{ch}' in accept() deps array at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    InCall,
    InArray,
    InSingleQuote,
    InDoubleQuote,
    InTemplate,
}

/// Lex the dependency list of an `accept(...)` call.
///
/// `start` is the byte offset just past the opening parenthesis. Extracted
/// literals are appended to `urls` in source order. Returns whether the call
/// is self-accepting (no explicit dep list).
pub fn lex_accepted_hmr_deps(
    code: &str,
    start: usize,
    urls: &mut Vec<AcceptedUrl>,
) -> Result<bool, LexError> {
    let mut state = State::InCall;
    let mut prev_state = State::InCall;
    let mut current = String::new();
    let mut current_start = 0usize;

    let mut chars = code[start..].char_indices().peekable();
    while let Some((off, ch)) = chars.next() {
        let i = start + off;
        match state {
            State::InCall | State::InArray => match ch {
                '\'' => {
                    prev_state = state;
                    state = State::InSingleQuote;
                    current_start = i + 1;
                }
                '"' => {
                    prev_state = state;
                    state = State::InDoubleQuote;
                    current_start = i + 1;
                }
                '`' => {
                    prev_state = state;
                    state = State::InTemplate;
                    current_start = i + 1;
                }
                c if c.is_whitespace() => continue,
                _ => {
                    if state == State::InCall {
                        if ch == '[' {
                            state = State::InArray;
                        } else {
                            // First argument is not a string or array:
                            // self-accepting with no explicit deps.
                            return Ok(true);
                        }
                    } else if ch == ']' {
                        return Ok(false);
                    } else if ch == ',' {
                        continue;
                    } else {
                        return Err(LexError::UnexpectedChar { ch, pos: i });
                    }
                }
            },
            State::InSingleQuote => {
                if ch == '\'' {
                    urls.push(AcceptedUrl {
                        url: std::mem::take(&mut current),
                        start: current_start,
                        end: i,
                    });
                    if prev_state == State::InCall {
                        return Ok(false);
                    }
                    state = prev_state;
                } else {
                    current.push(ch);
                }
            }
            State::InDoubleQuote => {
                if ch == '"' {
                    urls.push(AcceptedUrl {
                        url: std::mem::take(&mut current),
                        start: current_start,
                        end: i,
                    });
                    if prev_state == State::InCall {
                        return Ok(false);
                    }
                    state = prev_state;
                } else {
                    current.push(ch);
                }
            }
            State::InTemplate => {
                if ch == '`' {
                    urls.push(AcceptedUrl {
                        url: std::mem::take(&mut current),
                        start: current_start,
                        end: i,
                    });
                    if prev_state == State::InCall {
                        return Ok(false);
                    }
                    state = prev_state;
                } else if ch == '$' && chars.peek().is_some_and(|&(_, next)| next == '{') {
                    return Err(LexError::TemplateInterpolation(i));
                } else {
                    current.push(ch);
                }
            }
        }
    }
    Ok(false)
}

/// Lex the export-name list of a partial-acceptance call
/// (`acceptExports(['x', 'y'], cb)`).
///
/// Returns the accepted names; empty when the argument list is not literal.
pub fn lex_accepted_hmr_exports(
    code: &str,
    start: usize,
) -> Result<FxHashSet<String>, LexError> {
    let mut urls = Vec::new();
    lex_accepted_hmr_deps(code, start, &mut urls)?;
    Ok(urls.into_iter().map(|u| u.url).collect())
}

/// Byte offsets just past the opening parenthesis of each `.accept(` call.
pub fn accept_call_sites(code: &str) -> Vec<usize> {
    const NEEDLE: &str = ".accept(";
    let mut sites = Vec::new();
    let mut from = 0;
    while let Some(pos) = code[from..].find(NEEDLE) {
        let site = from + pos + NEEDLE.len();
        sites.push(site);
        from = site;
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(code: &str) -> (bool, Vec<AcceptedUrl>) {
        let start = accept_call_sites(code)[0];
        let mut urls = Vec::new();
        let self_accepts = lex_accepted_hmr_deps(code, start, &mut urls).unwrap();
        (self_accepts, urls)
    }

    #[test]
    fn test_self_accept_no_args() {
        let (self_accepts, urls) = lex("hot.accept()");
        assert!(self_accepts);
        assert!(urls.is_empty());
    }

    #[test]
    fn test_self_accept_callback() {
        let (self_accepts, urls) = lex("hot.accept((mod) => { render(mod) })");
        assert!(self_accepts);
        assert!(urls.is_empty());
    }

    #[test]
    fn test_single_dep() {
        let (self_accepts, urls) = lex("hot.accept('./dep.js', (mod) => {})");
        assert!(!self_accepts);
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].url, "./dep.js");
    }

    #[test]
    fn test_dep_array() {
        let code = "hot.accept(['./a.js', \"./b.js\"], ([a, b]) => {})";
        let (self_accepts, urls) = lex(code);
        assert!(!self_accepts);
        let extracted: Vec<&str> = urls.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(extracted, vec!["./a.js", "./b.js"]);
    }

    #[test]
    fn test_literal_offsets_round_trip() {
        let code = "hot.accept('./dep.js', cb)";
        let (_, urls) = lex(code);
        let AcceptedUrl { start, end, url } = &urls[0];
        assert_eq!(&code[*start..*end], url);
    }

    #[test]
    fn test_template_without_interpolation() {
        let (self_accepts, urls) = lex("hot.accept(`./dep.js`, cb)");
        assert!(!self_accepts);
        assert_eq!(urls[0].url, "./dep.js");
    }

    #[test]
    fn test_template_interpolation_errors() {
        let code = "hot.accept(`./${name}.js`, cb)";
        let start = accept_call_sites(code)[0];
        let mut urls = Vec::new();
        let err = lex_accepted_hmr_deps(code, start, &mut urls).unwrap_err();
        assert!(matches!(err, LexError::TemplateInterpolation(_)));
    }

    #[test]
    fn test_unexpected_char_in_array() {
        let code = "hot.accept(['./a.js', dynamic], cb)";
        let start = accept_call_sites(code)[0];
        let mut urls = Vec::new();
        let err = lex_accepted_hmr_deps(code, start, &mut urls).unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar { ch: 'd', .. }));
    }

    #[test]
    fn test_whitespace_tolerated() {
        let (self_accepts, urls) = lex("hot.accept(  [ './a.js' , './b.js' ]  , cb)");
        assert!(!self_accepts);
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_accepted_exports() {
        let code = "hot.acceptExports(['x', 'y'], cb)";
        let start = code.find('(').unwrap() + 1;
        let names = lex_accepted_hmr_exports(code, start).unwrap();
        assert!(names.contains("x"));
        assert!(names.contains("y"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_multiple_call_sites() {
        let code = "hot.accept('./a.js'); other(); hot.accept('./b.js')";
        assert_eq!(accept_call_sites(code).len(), 2);
    }
}
