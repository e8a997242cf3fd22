// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Path-glob matching for the path samplers.
//!
//! Hand-rolled on purpose: pulling a regex engine into the per-request
//! admission path is not worth it for `*`/`?`/`**`. Three entry points:
//!
//! - [`match_path`]: flat matching, `*` crosses `/`
//! - [`match_path_with_segments`]: `*` is bounded by `/`, `**` spans whole
//!   segments
//! - [`match_path_escaped`]: backslash escapes make `*`, `?` and `\` literal
//!
//! All three are total over arbitrary byte strings and run in O(n+m) for
//! the common case via iterative backtracking with a last-star pointer.

/// One pattern byte; `literal` marks bytes that lost their escape and must
/// not act as wildcards.
#[derive(Clone, Copy, Debug)]
struct PatToken {
    byte:    u8,
    literal: bool,
}

impl PatToken {
    fn is_star(self) -> bool { self.byte == b'*' && !self.literal }

    fn is_question(self) -> bool { self.byte == b'?' && !self.literal }
}

/// Iterative backtracking matcher over preprocessed pattern tokens.
///
/// Keeps the position of the last `*` seen; on mismatch the star re-expands
/// by one byte and matching resumes. Trailing stars consume the rest.
fn match_tokens(pattern: &[PatToken], path: &[u8]) -> bool {
    let mut pi = 0;
    let mut si = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while si < path.len() {
        if pi < pattern.len()
            && (pattern[pi].is_question() || (!pattern[pi].is_star() && pattern[pi].byte == path[si]))
        {
            pi += 1;
            si += 1;
        } else if pi < pattern.len() && pattern[pi].is_star() {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(star_pos) = star {
            pi = star_pos + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi].is_star() {
        pi += 1;
    }
    pi == pattern.len()
}

fn plain_tokens(pattern: &str) -> Vec<PatToken> {
    pattern
        .bytes()
        .map(|byte| PatToken {
            byte,
            literal: false,
        })
        .collect()
}

/// Flat glob match: `*` matches any substring (including across `/`), `?`
/// matches exactly one byte.
pub fn match_path(pattern: &str, path: &str) -> bool {
    match_tokens(&plain_tokens(pattern), path.as_bytes())
}

/// Segment-aware glob match.
///
/// Both pattern and path are split on `/`; `*` and `?` match within a
/// single segment only, while a segment consisting of exactly `**` matches
/// zero or more whole segments. Patterns without `**` therefore require an
/// equal segment count: `/api/*` does not match `/api/v1/users`.
pub fn match_path_with_segments(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            (0..=path.len()).any(|skip| match_segments(&pattern[1..], &path[skip..]))
        }
        Some(segment) => match path.first() {
            Some(candidate) if match_path(segment, candidate) => {
                match_segments(&pattern[1..], &path[1..])
            }
            _ => false,
        },
    }
}

/// Escape-aware glob match.
///
/// A backslash escapes the following `*`, `?` or `\`, turning it into a
/// literal byte. If no unescaped wildcard remains the comparison degrades
/// to byte equality.
pub fn match_path_escaped(pattern: &str, path: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut tokens = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 1 < bytes.len()
            && matches!(bytes[i + 1], b'*' | b'?' | b'\\')
        {
            tokens.push(PatToken {
                byte:    bytes[i + 1],
                literal: true,
            });
            i += 2;
        } else {
            tokens.push(PatToken {
                byte:    bytes[i],
                literal: false,
            });
            i += 1;
        }
    }

    if tokens.iter().any(|t| t.is_star() || t.is_question()) {
        match_tokens(&tokens, path.as_bytes())
    } else {
        tokens.len() == path.len()
            && tokens.iter().zip(path.bytes()).all(|(t, b)| t.byte == b)
    }
}
