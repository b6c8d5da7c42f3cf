//! Episode numbers from raw stream locators.
//!
//! Backends report availability either as plain numbers or as stream URLs
//! that encode the episode somewhere: a query parameter (`?n=3`, `?ep=3`), an
//! `ep.3.` path segment, or trailing digits of the last path segment.

use serde_json::Value;
use url::Url;

use crate::backend::EpisodeNumber;

const EPISODE_QUERY_KEYS: [&str; 4] = ["n", "ep", "episode", "e"];

/// Episode number carried by a JSON locator, if any.
pub fn episode_number(locator: &Value) -> Option<EpisodeNumber> {
  match locator {
    Value::Number(n) => n.as_u64().and_then(positive),
    Value::String(s) => episode_number_from_str(s),
    _ => None,
  }
}

pub fn episode_number_from_str(locator: &str) -> Option<EpisodeNumber> {
  let locator = locator.trim();
  if let Ok(n) = locator.parse::<u64>() {
    return positive(n);
  }

  let url = Url::parse(locator)
    .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(locator)))
    .ok()?;

  let from_query = url
    .query_pairs()
    .find(|(k, _)| EPISODE_QUERY_KEYS.contains(&k.as_ref()))
    .and_then(|(_, v)| v.parse::<u64>().ok())
    .and_then(positive);
  if from_query.is_some() {
    return from_query;
  }

  let segments: Vec<&str> = url
    .path_segments()
    .map(|s| s.filter(|seg| !seg.is_empty()).collect())
    .unwrap_or_default();

  // `.../ep.12.m3u8` style
  for seg in segments.iter().rev() {
    if let Some(rest) = seg.strip_prefix("ep.") {
      if let Some(n) = leading_digits(rest) {
        return Some(n);
      }
    }
  }

  segments.last().and_then(|last| {
    let stem = last.split('.').next().unwrap_or_default();
    trailing_digits(stem)
  })
}

fn positive(n: u64) -> Option<EpisodeNumber> {
  EpisodeNumber::try_from(n).ok().filter(|n| *n > 0)
}

fn leading_digits(s: &str) -> Option<EpisodeNumber> {
  let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
  s[..end].parse::<u64>().ok().and_then(positive)
}

fn trailing_digits(s: &str) -> Option<EpisodeNumber> {
  let start = s
    .rfind(|c: char| !c.is_ascii_digit())
    .map(|i| i + 1)
    .unwrap_or(0);
  s[start..].parse::<u64>().ok().and_then(positive)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_plain_numbers() {
    assert_eq!(episode_number(&json!(3)), Some(3));
    assert_eq!(episode_number(&json!("7")), Some(7));
    assert_eq!(episode_number(&json!(0)), None);
    assert_eq!(episode_number(&json!(-1)), None);
    assert_eq!(episode_number(&json!(1.5)), None);
  }

  #[test]
  fn test_query_parameter() {
    assert_eq!(episode_number(&json!("https://x/ep?n=1")), Some(1));
    assert_eq!(episode_number(&json!("https://x/watch?id=9&ep=12")), Some(12));
  }

  #[test]
  fn test_ep_dot_segment() {
    assert_eq!(
      episode_number(&json!("https://cdn.example/show/ep.4.1080.m3u8")),
      Some(4)
    );
  }

  #[test]
  fn test_trailing_digits_and_relative_paths() {
    assert_eq!(episode_number(&json!("/watch_anime/42/5")), Some(5));
    assert_eq!(episode_number(&json!("https://x/episode-10.m3u8")), Some(10));
  }

  #[test]
  fn test_underivable() {
    assert_eq!(episode_number(&json!("https://x/stream")), None);
    assert_eq!(episode_number(&json!(null)), None);
    assert_eq!(episode_number(&json!({"n": 1})), None);
  }
}
