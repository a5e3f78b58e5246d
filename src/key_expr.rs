// Copyright 2020-2022 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Validated key expressions.
//!
//! A key expression is a `/`-separated list of chunks. Besides literal chunks
//! it may contain the wildcards `*`, matching exactly one chunk, and `**`,
//! matching any number of chunks including none.

use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::ops::Deref;
use std::str::FromStr;

/// Separator of chunks.
pub const CHUNK_SEPARATOR: char = '/';

/// Wildcard matching a single chunk.
pub const SINGLE_WILDCARD: &str = "*";

/// Wildcard matching zero or more chunks.
pub const MULTI_WILDCARD: &str = "**";

const FORBIDDEN_CHARS: [char; 3] = ['?', '#', '$'];

/// Errors validating a key expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The key expression is the empty string.
    #[error("key expressions must not be empty")]
    Empty,
    /// The key expression starts or ends with `/`.
    #[error("the separator '/' is not allowed at the beginning or end of a key expression")]
    SeparatorAtEndOrBeginning,
    /// Two separators follow each other.
    #[error("key expressions must not contain empty chunks")]
    EmptyChunk,
    /// A chunk combines `*` with other characters, as in `a*` or `***`.
    #[error("chunk '{0}' mixes wildcards with other characters")]
    MixedWildcard(String),
    /// A chunk contains whitespace, `?`, `#` or `$`.
    #[error("chunk '{0}' contains whitespace or one of '?', '#', '$'")]
    ForbiddenCharacter(String),
    /// `**` directly follows another `**`.
    #[error("'**/**' is not allowed, use a single '**'")]
    RepeatedMultiWildcard,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

/// An owned, valid key expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyExpr(String);

impl KeyExpr {
    /// Validates `expr` and wraps it.
    ///
    /// # Example
    /// ```
    /// use keysub::KeyExpr;
    ///
    /// let key_expr = KeyExpr::new("mqtt/demo/**").unwrap();
    /// assert!(key_expr.matches("mqtt/demo/sensor/temp"));
    /// assert!(KeyExpr::new("mqtt//demo").is_err());
    /// ```
    pub fn new(expr: &str) -> Result<KeyExpr, Error> {
        validate(expr)?;
        Ok(KeyExpr(expr.to_owned()))
    }

    /// The key expression as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the chunks.
    pub fn chunks(&self) -> std::str::Split<'_, char> {
        self.0.split(CHUNK_SEPARATOR)
    }

    /// Check if the key expression contains any wildcard.
    ///
    /// Messages are always published on concrete, wildcard-free topics.
    pub fn is_wild(&self) -> bool {
        self.chunks()
            .any(|chunk| chunk == SINGLE_WILDCARD || chunk == MULTI_WILDCARD)
    }

    /// Check if a concrete topic is matched by this key expression.
    pub fn matches(&self, topic: &str) -> bool {
        let pattern: Vec<&str> = self.chunks().collect();
        let topic: Vec<&str> = topic.split(CHUNK_SEPARATOR).collect();
        chunks_match(&pattern, &topic)
    }
}

/// Checks the syntax of a key expression without allocating.
pub fn validate(expr: &str) -> Result<(), Error> {
    if expr.is_empty() {
        return Err(Error::Empty);
    }
    if expr.starts_with(CHUNK_SEPARATOR) || expr.ends_with(CHUNK_SEPARATOR) {
        return Err(Error::SeparatorAtEndOrBeginning);
    }

    let mut last_was_multi_wildcard = false;
    for chunk in expr.split(CHUNK_SEPARATOR) {
        if chunk.is_empty() {
            return Err(Error::EmptyChunk);
        }

        let is_multi_wildcard = chunk == MULTI_WILDCARD;
        if is_multi_wildcard && last_was_multi_wildcard {
            return Err(Error::RepeatedMultiWildcard);
        }

        if !is_multi_wildcard && chunk != SINGLE_WILDCARD {
            if chunk.contains('*') {
                return Err(Error::MixedWildcard(chunk.to_owned()));
            }
            if chunk
                .chars()
                .any(|c| c.is_whitespace() || FORBIDDEN_CHARS.contains(&c))
            {
                return Err(Error::ForbiddenCharacter(chunk.to_owned()));
            }
        }

        last_was_multi_wildcard = is_multi_wildcard;
    }

    Ok(())
}

// `reachable[j]` holds when the pattern chunks consumed so far match the
// first `j` topic chunks. Each pattern chunk is one pass over the topic.
fn chunks_match(pattern: &[&str], topic: &[&str]) -> bool {
    let mut reachable = vec![false; topic.len() + 1];
    reachable[0] = true;

    for &chunk in pattern {
        if chunk == MULTI_WILDCARD {
            let mut seen = false;
            for slot in reachable.iter_mut() {
                seen |= *slot;
                *slot = seen;
            }
        } else {
            for j in (1..=topic.len()).rev() {
                reachable[j] = reachable[j - 1]
                    && (chunk == SINGLE_WILDCARD || chunk == topic[j - 1]);
            }
            reachable[0] = false;
        }

        if !reachable.iter().any(|&r| r) {
            return false;
        }
    }

    reachable[topic.len()]
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for KeyExpr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for KeyExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyExpr::new(s)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate(&s)?;
        Ok(KeyExpr(s))
    }
}

impl From<KeyExpr> for String {
    fn from(key_expr: KeyExpr) -> String {
        key_expr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn matches(pattern: &str, topic: &str) -> bool {
        KeyExpr::new(pattern).unwrap().matches(topic)
    }

    #[test]
    fn valid_key_exprs() {
        for expr in &[
            "mqtt/demo/**",
            "a",
            "a/b/c",
            "*",
            "**",
            "a/*/c",
            "**/temp",
            "a/**/b/**/c",
            "sensor-1/temp_c/21.5",
        ] {
            assert!(KeyExpr::new(expr).is_ok(), "{} should be valid", expr);
        }
    }

    #[test]
    fn invalid_key_exprs() {
        assert_eq!(KeyExpr::new(""), Err(Error::Empty));
        assert_eq!(
            KeyExpr::new("/a"),
            Err(Error::SeparatorAtEndOrBeginning)
        );
        assert_eq!(
            KeyExpr::new("a/"),
            Err(Error::SeparatorAtEndOrBeginning)
        );
        assert_eq!(KeyExpr::new("a//b"), Err(Error::EmptyChunk));
        assert_eq!(
            KeyExpr::new("a/b*"),
            Err(Error::MixedWildcard("b*".into()))
        );
        assert_eq!(
            KeyExpr::new("***"),
            Err(Error::MixedWildcard("***".into()))
        );
        assert_eq!(
            KeyExpr::new("a/b c"),
            Err(Error::ForbiddenCharacter("b c".into()))
        );
        assert_eq!(
            KeyExpr::new("a/#"),
            Err(Error::ForbiddenCharacter("#".into()))
        );
        assert_eq!(
            KeyExpr::new("a/**/**"),
            Err(Error::RepeatedMultiWildcard)
        );
    }

    #[test]
    fn multi_wildcard_matches_any_suffix() {
        assert!(matches("mqtt/demo/**", "mqtt/demo/sensor/temp"));
        assert!(matches("mqtt/demo/**", "mqtt/demo/x"));
        assert!(matches("mqtt/demo/**", "mqtt/demo"));
        assert!(!matches("mqtt/demo/**", "other/topic"));
        assert!(!matches("mqtt/demo/**", "mqtt/demonstration"));
        assert!(!matches("mqtt/demo/**", "mqtt"));
        assert!(matches("**", "anything/at/all"));
    }

    #[test]
    fn multi_wildcard_in_the_middle() {
        assert!(matches("**/temp", "temp"));
        assert!(matches("**/temp", "a/b/temp"));
        assert!(!matches("**/temp", "a/b/temp/x"));
        assert!(matches("a/**/b/**/c", "a/b/c"));
        assert!(matches("a/**/b/**/c", "a/x/b/y/z/c"));
        assert!(!matches("a/**/b/**/c", "a/x/y/c"));
    }

    #[test]
    fn single_wildcard_matches_one_chunk() {
        assert!(matches("a/*/c", "a/b/c"));
        assert!(!matches("a/*/c", "a/c"));
        assert!(!matches("a/*/c", "a/b/d/c"));
        assert!(matches("*", "a"));
        assert!(!matches("*", "a/b"));
    }

    #[test]
    fn literal_matches_itself_only() {
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/bc"));
        assert!(!matches("a/b", "a"));
    }

    #[test]
    fn many_multi_wildcards_match_in_polynomial_time() {
        let pattern = "**/a/**/a/**/a/**/a/**/a/**/a/**/b";
        let long = vec!["a"; 200].join("/");

        let start = Instant::now();
        assert!(!matches(pattern, &long));
        assert!(matches(pattern, &format!("{}/b", long)));
        assert!(!matches(pattern, &format!("{}/b/a", long)));
        assert!(start.elapsed() < Duration::from_secs(1));

        assert!(matches("**/*/**", &long));
        assert!(!matches("*/**/c", &long));
    }

    #[test]
    fn wildness() {
        assert!(KeyExpr::new("a/*").unwrap().is_wild());
        assert!(KeyExpr::new("**").unwrap().is_wild());
        assert!(!KeyExpr::new("a/b").unwrap().is_wild());
    }
}
