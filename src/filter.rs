use core::fmt;
use std::{borrow::Cow, ops::Deref, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};

/// Lines of a golden or output file as raw bytes, each one keeping its line terminator.
pub type Lines = Vec<Vec<u8>>;

/// Transform applied identically to the golden and the output lines
/// before they are compared or diffed. Defaults to identity.
#[derive(Clone)]
pub struct LineFilter(Arc<dyn Fn(Lines) -> Lines + Send + Sync>);

impl LineFilter {
  pub fn new(f: impl Fn(Lines) -> Lines + Send + Sync + 'static) -> Self {
    Self(Arc::new(f))
  }
  pub fn identity() -> Self {
    Self::new(|lines| lines)
  }
  #[inline]
  pub fn apply(&self, lines: Lines) -> Lines {
    (self.0)(lines)
  }
  /// Run `self` first, then `next`.
  pub fn then(self, next: Self) -> Self {
    Self::new(move |lines| next.apply(self.apply(lines)))
  }
  pub(crate) fn from_rules(rules: Vec<FilterRule>) -> Self {
    if rules.is_empty() {
      return Self::identity();
    }
    Self::new(move |lines| {
      lines
        .into_iter()
        .filter_map(|line| rules.iter().try_fold(line, |line, rule| rule.apply(line)))
        .collect()
    })
  }
}

impl Default for LineFilter {
  fn default() -> Self {
    Self::identity()
  }
}

impl fmt::Debug for LineFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("LineFilter(..)")
  }
}

#[derive(Debug, Clone)]
pub(crate) struct PatternMatch(regex::bytes::Regex);
impl Deref for PatternMatch {
  type Target = regex::bytes::Regex;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl<'de> Deserialize<'de> for PatternMatch {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let s = String::deserialize(deserializer)?;
    match regex::bytes::Regex::new(&s) {
      Ok(reg) => Ok(PatternMatch(reg)),
      Err(e) => Err(serde::de::Error::custom(e)),
    }
  }
}
impl Serialize for PatternMatch {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(self.as_str())
  }
}

/// One `[[filter]]` entry of the config file.
/// Patterns only ever see the line body, never its terminator.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct FilterRule {
  pattern: PatternMatch,
  replace: Option<String>,
  drop: Option<bool>,
}

fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
  let body_len =
    line.iter().rposition(|b| !matches!(b, b'\n' | b'\r')).map_or(0, |idx| idx + 1);
  line.split_at(body_len)
}

impl FilterRule {
  pub(crate) fn validate(&self) -> Result<(), String> {
    if self.replace.is_some() && self.drop == Some(true) {
      return Err(format!(
        "filter \"{}\": `replace` and `drop` are exclusive",
        self.pattern.as_str()
      ));
    }
    Ok(())
  }
  fn apply(&self, line: Vec<u8>) -> Option<Vec<u8>> {
    let (body, end) = split_terminator(&line);
    if let Some(true) = self.drop {
      return if self.pattern.is_match(body) { None } else { Some(line) };
    }
    let replaced =
      match self.pattern.replace_all(body, self.replace.as_deref().unwrap_or("").as_bytes()) {
        Cow::Borrowed(_) => None,
        Cow::Owned(mut replaced) => {
          replaced.extend_from_slice(end);
          Some(replaced)
        }
      };
    Some(replaced.unwrap_or(line))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lines(s: &str) -> Lines {
    s.as_bytes().split_inclusive(|b| *b == b'\n').map(<[u8]>::to_vec).collect()
  }
  fn rules(toml_str: &str) -> Vec<FilterRule> {
    #[derive(Deserialize)]
    struct Rules {
      filter: Vec<FilterRule>,
    }
    toml::from_str::<Rules>(toml_str).unwrap().filter
  }

  #[test]
  fn identity_keeps_lines() {
    let input = lines("a\nb\n\nc");
    assert_eq!(LineFilter::default().apply(input.clone()), input);
    assert_eq!(LineFilter::from_rules(vec![]).apply(input.clone()), input);
  }

  #[test]
  fn replace_keeps_terminator() {
    let filter = LineFilter::from_rules(rules(
      r#"
[[filter]]
pattern = '\d{2}:\d{2}:\d{2}'
replace = "<time>"
"#,
    ));
    assert_eq!(
      filter.apply(lines("at 12:30:01 done\nno time\r\nlast 00:00:00")),
      lines("at <time> done\nno time\r\nlast <time>")
    );
  }

  #[test]
  fn drop_removes_matching_lines() {
    let filter = LineFilter::from_rules(rules(
      r#"
[[filter]]
pattern = '^#'
drop = true

[[filter]]
pattern = 'x'
"#,
    ));
    assert_eq!(filter.apply(lines("# header\nxax\n#\nb\n")), lines("a\nb\n"));
  }

  #[test]
  fn then_composes_in_order() {
    let upper =
      LineFilter::new(|lines| lines.into_iter().map(|l| l.to_ascii_uppercase()).collect());
    let skip_first = LineFilter::new(|lines| lines.into_iter().skip(1).collect());
    assert_eq!(upper.then(skip_first).apply(lines("a\nb\n")), lines("B\n"));
  }

  #[test]
  fn replace_and_drop_conflict() {
    let rule = rules(
      r#"
[[filter]]
pattern = 'a'
replace = "b"
drop = true
"#,
    );
    assert!(rule[0].validate().is_err());
  }

  #[test]
  fn invalid_pattern_fails_to_parse() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Rules {
      filter: Vec<FilterRule>,
    }
    assert!(toml::from_str::<Rules>("[[filter]]\npattern = '(unclosed'\n").is_err());
  }
}
